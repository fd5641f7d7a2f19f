//! Tolerant parser for header-indexed delimited export files.
//!
//! Export tools reorder and rename their table columns across versions, so
//! all field access goes through the lower-cased header by name, never by
//! position. One bad line never aborts a file: a row whose width does not
//! match the header is reported as a malformed-row error and parsing moves
//! on to the next line.

use crate::error::IngestError;
use crate::types::{CancelToken, TableKind};
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

/// File name of the container catalogue table that classifies the numbered
/// container exports.
pub const CONTAINERS_FILE: &str = "Containers.csv";
/// Naming scheme of the numbered container exports.
pub const CONTAINER_FILE_PREFIX: &str = "Container_";
pub const CONTAINER_FILE_EXT: &str = ".csv";

/// Column count of the fixed-layout results export.
pub const RESULTS_FIELD_COUNT: usize = 9;

/// Lower-cased column name to field index mapping, built exactly once per
/// file from its first non-empty line.
#[derive(Debug)]
struct ColumnIndex {
    by_name: HashMap<String, usize>,
    width: usize,
}

/// One data line of an export table, addressable by column name.
#[derive(Debug, Clone)]
pub struct ExportRow {
    columns: Arc<ColumnIndex>,
    fields: Vec<String>,
    line: usize,
}

impl ExportRow {
    /// Returns the raw field under the given (lower-case) column name, or
    /// `None` when the file has no such column.
    pub fn get(&self, name: &str) -> Option<&str> {
        let index = *self.columns.by_name.get(name)?;
        self.fields.get(index).map(String::as_str)
    }

    /// One-based line number of this row in the export file.
    pub fn line(&self) -> usize {
        self.line
    }
}

/// Streaming reader over a delimited export table.
///
/// Finite and not restartable; a fresh reader is required to re-parse.
/// Cancellation is polled before each row is yielded, and a cancelled
/// sequence simply ends early — partial results are valid.
pub struct TableReader<R: BufRead> {
    reader: R,
    delimiter: char,
    header: Option<Arc<ColumnIndex>>,
    line_no: usize,
    cancel: CancelToken,
    done: bool,
}

impl<R: BufRead> TableReader<R> {
    pub fn new(reader: R, delimiter: char, cancel: CancelToken) -> Self {
        Self {
            reader,
            delimiter,
            header: None,
            line_no: 0,
            cancel,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for TableReader<R> {
    type Item = Result<ExportRow, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.cancel.is_cancelled() {
                return None;
            }

            let mut raw = String::new();
            match self.reader.read_line(&mut raw) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            self.line_no += 1;

            let line = raw.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }

            match &self.header {
                None => {
                    let names = split_fields(&line.to_lowercase(), self.delimiter);
                    let width = names.len();
                    let by_name = names
                        .into_iter()
                        .enumerate()
                        .map(|(i, name)| (name, i))
                        .collect();
                    self.header = Some(Arc::new(ColumnIndex { by_name, width }));
                }
                Some(header) => {
                    let fields = split_fields(line, self.delimiter);
                    if fields.len() != header.width {
                        return Some(Err(IngestError::MalformedRow {
                            line: self.line_no,
                            expected: header.width,
                            got: fields.len(),
                        }));
                    }
                    return Some(Ok(ExportRow {
                        columns: Arc::clone(header),
                        fields,
                        line: self.line_no,
                    }));
                }
            }
        }
    }
}

/// Splits a line on the delimiter, treating double-quoted spans as atomic.
/// Quote characters are kept in the field value; consumers that need the
/// bare text strip them.
pub fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            current.push(ch);
        } else if ch == delimiter && !in_quotes {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    fields.push(current);
    fields
}

/// Decodes a field arriving as space-separated hex byte values.
///
/// Non-printable code points (<= 31) are dropped; any non-hex token fails
/// the whole field, which is then reported absent rather than aborting the
/// row.
pub fn decode_hex_field(field: &str) -> Option<String> {
    let mut output = String::new();
    for token in field.split(' ') {
        let value = u32::from_str_radix(token, 16).ok()?;
        if value > 31 {
            output.push(char::from_u32(value)?);
        }
    }
    Some(output)
}

/// One row of the fixed-layout, tab-separated results export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsRow {
    pub container: String,
    pub fs_offset: String,
    pub meta_addr: String,
    pub extract_status: String,
    pub rule_set: String,
    pub rule_name: String,
    pub description: String,
    pub file_name: String,
    pub parent_path: String,
    pub line: usize,
}

/// Streaming reader over the results export. The header line is skipped and
/// data rows are numbered starting at 2, matching how the export tool
/// writes the file.
pub struct ResultsReader<R: BufRead> {
    reader: R,
    line_no: usize,
    header_skipped: bool,
    cancel: CancelToken,
    done: bool,
}

impl<R: BufRead> ResultsReader<R> {
    pub fn new(reader: R, cancel: CancelToken) -> Self {
        Self {
            reader,
            line_no: 0,
            header_skipped: false,
            cancel,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for ResultsReader<R> {
    type Item = Result<ResultsRow, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.cancel.is_cancelled() {
                return None;
            }

            let mut raw = String::new();
            match self.reader.read_line(&mut raw) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            self.line_no += 1;

            let line = raw.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }

            if !self.header_skipped {
                self.header_skipped = true;
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != RESULTS_FIELD_COUNT {
                return Some(Err(IngestError::MalformedRow {
                    line: self.line_no,
                    expected: RESULTS_FIELD_COUNT,
                    got: fields.len(),
                }));
            }

            return Some(Ok(ResultsRow {
                container: fields[0].to_string(),
                fs_offset: fields[1].to_string(),
                meta_addr: fields[2].to_string(),
                extract_status: fields[3].to_string(),
                rule_set: fields[4].to_string(),
                rule_name: fields[5].to_string(),
                description: fields[6].to_string(),
                file_name: fields[7].to_string(),
                parent_path: fields[8].to_string(),
                line: self.line_no,
            }));
        }
    }
}

/// Task-scoped mapping from container export id to table kind, built from
/// the catalogue table. Each task loads its own catalogue; nothing is shared
/// between concurrently running tasks.
#[derive(Debug, Default)]
pub struct ContainerCatalog {
    by_id: HashMap<String, TableKind>,
}

impl ContainerCatalog {
    /// Reads the catalogue table. Rows that cannot be classified are
    /// ignored; malformed rows are returned as warnings.
    pub fn load<R: BufRead>(reader: R, cancel: &CancelToken) -> (Self, Vec<IngestError>) {
        let mut by_id = HashMap::new();
        let mut warnings = Vec::new();

        for item in TableReader::new(reader, ',', cancel.clone()) {
            match item {
                Ok(row) => {
                    let (Some(name), Some(id)) = (row.get("name"), row.get("containerid"))
                    else {
                        continue;
                    };
                    if let Some(kind) = TableKind::classify(name) {
                        by_id.insert(id.trim().to_string(), kind);
                    }
                }
                Err(e) => warnings.push(e),
            }
        }

        (Self { by_id }, warnings)
    }

    /// Kind of a numbered container export, by its file name.
    pub fn kind_for_container_file(&self, file_name: &str) -> Option<TableKind> {
        let id = file_name
            .strip_prefix(CONTAINER_FILE_PREFIX)?
            .strip_suffix(CONTAINER_FILE_EXT)?;
        self.by_id.get(id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_delimiters_are_atomic() {
        let fields = split_fields("a,\"Smith, John\",c", ',');
        assert_eq!(fields, vec!["a", "\"Smith, John\"", "c"]);
    }

    #[test]
    fn unquoted_delimiters_always_split() {
        let fields = split_fields("a,b,,d", ',');
        assert_eq!(fields, vec!["a", "b", "", "d"]);
    }

    #[test]
    fn hex_decoding_keeps_printable_only() {
        assert_eq!(decode_hex_field("48 65 6c 6c 6f"), Some("Hello".into()));
        assert_eq!(decode_hex_field("48 09 65"), Some("He".into()));
        assert_eq!(decode_hex_field("48 zz 65"), None);
        assert_eq!(decode_hex_field(""), None);
    }

    #[test]
    fn header_access_is_case_insensitive_by_lowercasing() {
        let data = "URL,AccessedTime\nhttp://x,now\n";
        let mut reader = TableReader::new(data.as_bytes(), ',', CancelToken::new());
        let row = reader.next().unwrap().unwrap();
        assert_eq!(row.get("url"), Some("http://x"));
        assert_eq!(row.get("accessedtime"), Some("now"));
        assert_eq!(row.get("URL"), None);
    }

    #[test]
    fn malformed_row_does_not_abort_the_file() {
        let data = "a,b\n1,2\nonly-one\n3,4\n";
        let mut reader = TableReader::new(data.as_bytes(), ',', CancelToken::new());
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, IngestError::MalformedRow { line: 3, .. }));
        let row = reader.next().unwrap().unwrap();
        assert_eq!(row.get("a"), Some("3"));
        assert!(reader.next().is_none());
    }

    #[test]
    fn catalogue_classifies_container_files() {
        let data = "Name,ContainerId\nHistory,7\ncookie,12\nContent,3\n";
        let (catalog, warnings) = ContainerCatalog::load(data.as_bytes(), &CancelToken::new());
        assert!(warnings.is_empty());
        assert_eq!(
            catalog.kind_for_container_file("Container_7.csv"),
            Some(TableKind::History)
        );
        assert_eq!(
            catalog.kind_for_container_file("Container_12.csv"),
            Some(TableKind::Cookie)
        );
        assert_eq!(catalog.kind_for_container_file("Container_3.csv"), None);
        assert_eq!(catalog.kind_for_container_file("notes.csv"), None);
    }
}
