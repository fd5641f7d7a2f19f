use proptest::prelude::*;
use tessera::artifacts::{cookie_spec, history_spec};
use tessera::export::{ContainerCatalog, ResultsReader, TableReader, split_fields};
use tessera::types::{CancelToken, TableKind};
use tessera::IngestError;

fn rows(data: &str, delim: char) -> Vec<Result<tessera::export::ExportRow, IngestError>> {
    TableReader::new(data.as_bytes(), delim, CancelToken::new()).collect()
}

#[test]
fn column_access_survives_header_reordering() {
    let a = "Url,AccessedTime\nVisited: alice@http://example.com/x,01/02/2019 02:33:45 PM\n";
    let b = "AccessedTime,Url\n01/02/2019 02:33:45 PM,Visited: alice@http://example.com/x\n";

    let row_a = rows(a, ',').remove(0).unwrap();
    let row_b = rows(b, ',').remove(0).unwrap();
    assert_eq!(history_spec(&row_a), history_spec(&row_b));
}

#[test]
fn renamed_extra_columns_are_ignored() {
    let data = "RDomain,LastModified,Name,Value,Flags\ncom.example,junk,61,62,7\n";
    let row = rows(data, ',').remove(0).unwrap();
    let spec = cookie_spec(&row).unwrap();
    assert!(!spec.attributes.is_empty());
}

#[test]
fn malformed_rows_are_isolated_per_row() {
    let data = "a,b,c\n1,2,3\nshort,row\n4,5,6\nway,too,long,row\n7,8,9\n";
    let parsed = rows(data, ',');
    assert_eq!(parsed.len(), 5);
    assert!(parsed[0].is_ok());
    assert!(matches!(
        parsed[1],
        Err(IngestError::MalformedRow { line: 3, expected: 3, got: 2 })
    ));
    assert!(parsed[2].is_ok());
    assert!(matches!(
        parsed[3],
        Err(IngestError::MalformedRow { line: 5, got: 4, .. })
    ));
    assert!(parsed[4].is_ok());
}

#[test]
fn empty_lines_are_skipped_without_errors() {
    let data = "a,b\n\n1,2\n\n\n3,4\n";
    let parsed = rows(data, ',');
    assert_eq!(parsed.len(), 2);
    assert!(parsed.iter().all(Result::is_ok));
}

#[test]
fn cancelled_reader_ends_early_with_valid_partial_results() {
    let cancel = CancelToken::new();
    let data = "a,b\n1,2\n3,4\n5,6\n";
    let mut reader = TableReader::new(data.as_bytes(), ',', cancel.clone());
    assert!(reader.next().unwrap().is_ok());
    cancel.cancel();
    assert!(reader.next().is_none());
}

#[test]
fn results_rows_are_numbered_from_two() {
    let data = "header line\ndisk1\t0\t57\t0\tset\trule\tdesc\tfile.txt\tUsers/\n";
    let mut reader = ResultsReader::new(data.as_bytes(), CancelToken::new());
    let row = reader.next().unwrap().unwrap();
    assert_eq!(row.line, 2);
    assert_eq!(row.container, "disk1");
    assert_eq!(row.meta_addr, "57");
    assert_eq!(row.file_name, "file.txt");
    assert!(reader.next().is_none());
}

#[test]
fn results_reader_reports_wrong_field_counts() {
    let data = "header\na\tb\tc\n";
    let mut reader = ResultsReader::new(data.as_bytes(), CancelToken::new());
    let err = reader.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        IngestError::MalformedRow { line: 2, expected: 9, got: 3 }
    ));
}

#[test]
fn catalogue_ignores_unclassifiable_rows() {
    let data = "Name,ContainerId\nHistory,4\nContent,9\nIEDownload,11\n";
    let (catalog, warnings) = ContainerCatalog::load(data.as_bytes(), &CancelToken::new());
    assert!(warnings.is_empty());
    assert_eq!(
        catalog.kind_for_container_file("Container_4.csv"),
        Some(TableKind::History)
    );
    assert_eq!(catalog.kind_for_container_file("Container_9.csv"), None);
    assert_eq!(
        catalog.kind_for_container_file("Container_11.csv"),
        Some(TableKind::Download)
    );
}

proptest! {
    #[test]
    fn quote_free_lines_split_into_delimiter_count_plus_one(
        line in "[a-z0-9 ;.:,]{0,64}",
    ) {
        let fields = split_fields(&line, ',');
        let commas = line.matches(',').count();
        prop_assert_eq!(fields.len(), commas + 1);
        prop_assert_eq!(fields.join(","), line);
    }

    #[test]
    fn splitting_never_loses_non_delimiter_characters(
        parts in proptest::collection::vec("[a-z0-9]{0,8}", 1..6),
    ) {
        let line = parts.join(",");
        let fields = split_fields(&line, ',');
        prop_assert_eq!(fields, parts);
    }
}
