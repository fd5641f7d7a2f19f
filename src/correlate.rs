//! Deterministic correlation of parsed export rows to case-held files.

use crate::case::{CaseFiles, FileQuery};
use crate::error::IngestError;
use crate::export::ResultsRow;
use crate::types::{CorrelationKey, MatchedFile, SourceId};
use std::collections::HashMap;
use std::path::Path;

/// Task-scoped mapping from an image path to its data source id.
///
/// Built once per task from the case store and threaded through the
/// pipeline explicitly; two concurrent tasks never observe each other's
/// map.
#[derive(Debug, Default)]
pub struct SourceIdMap {
    by_image_path: HashMap<String, SourceId>,
}

impl SourceIdMap {
    pub fn new(by_image_path: HashMap<String, SourceId>) -> Self {
        Self { by_image_path }
    }

    pub fn resolve(&self, image_path: &str) -> Option<SourceId> {
        self.by_image_path.get(image_path).copied()
    }
}

/// Builds the data-source-scoped key for a results row.
///
/// The row's container column names the image the hit came from; if the
/// resulting path is not a known data source the export cannot be
/// meaningfully attributed, which is a fatal correlation error for the
/// whole file.
pub fn source_key_for_row(
    row: &ResultsRow,
    dest: &Path,
    sources: &SourceIdMap,
) -> Result<CorrelationKey, IngestError> {
    let image_path = dest.join(&row.container).to_string_lossy().into_owned();
    let source_id = sources
        .resolve(&image_path)
        .ok_or(IngestError::MissingSourceIdentifier(image_path))?;
    Ok(CorrelationKey::SourceAddress {
        source_id,
        meta_addr: row.meta_addr.clone(),
        name: row.file_name.clone(),
    })
}

/// Builds the flat-file-set key for a results row.
///
/// The search parent path is derived the way the imager lays out its
/// fallback tree: the container name (minus any image extension) becomes a
/// directory under `root`, and the row's own parent path is appended.
pub fn path_key_for_row(row: &ResultsRow) -> CorrelationKey {
    let container_root = row.container.replace(".vhd", "").replace('\\', "/");
    let parent_path = format!("/root/{}/{}", container_root, row.parent_path);
    CorrelationKey::PathName {
        name: row.file_name.clone(),
        parent_path,
    }
}

/// Maps correlation keys to case files through the read-only lookup seam.
pub struct FileCorrelator<'a, C: CaseFiles + ?Sized> {
    files: &'a C,
}

impl<'a, C: CaseFiles + ?Sized> FileCorrelator<'a, C> {
    pub fn new(files: &'a C) -> Self {
        Self { files }
    }

    /// Resolves the key to zero, one, or many matched files, preserving the
    /// store's order. An empty result is not an error here; the caller
    /// records it as a per-row note.
    pub fn correlate(&self, key: &CorrelationKey) -> Result<Vec<MatchedFile>, IngestError> {
        let query = match key {
            CorrelationKey::SourceAddress {
                source_id,
                meta_addr,
                name,
            } => FileQuery::SourceAddress {
                source_id: *source_id,
                meta_addr: meta_addr.clone(),
                name: name.clone(),
            },
            CorrelationKey::PathName { name, parent_path } => FileQuery::PathName {
                name: name.clone(),
                parent_path: parent_path.clone(),
            },
        };

        let files = self
            .files
            .find_files_where(&query)
            .map_err(|e| IngestError::Case(e.to_string()))?;

        Ok(files
            .into_iter()
            .map(|file| MatchedFile {
                file,
                key: key.clone(),
            })
            .collect())
    }

    /// Resolves the case file an auxiliary export set was dumped from, by
    /// exact (escaped) name. Used to decide which file the web artifacts of
    /// a dumped database attach to.
    pub fn resolve_export_origin(
        &self,
        db_name: &str,
    ) -> Result<Vec<crate::types::FileRef>, IngestError> {
        self.files
            .find_files_where(&FileQuery::Named {
                name: db_name.to_string(),
            })
            .map_err(|e| IngestError::Case(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(container: &str, name: &str, parent: &str) -> ResultsRow {
        ResultsRow {
            container: container.into(),
            fs_offset: "0".into(),
            meta_addr: "57".into(),
            extract_status: "0".into(),
            rule_set: "set".into(),
            rule_name: "rule".into(),
            description: String::new(),
            file_name: name.into(),
            parent_path: parent.into(),
            line: 2,
        }
    }

    #[test]
    fn path_key_strips_image_extension_and_flips_separators() {
        let key = path_key_for_row(&row("disk1.vhd", "secret.txt", "Users/alice/"));
        assert_eq!(
            key,
            CorrelationKey::PathName {
                name: "secret.txt".into(),
                parent_path: "/root/disk1/Users/alice/".into(),
            }
        );
    }

    #[test]
    fn source_key_requires_a_known_image() {
        let sources = SourceIdMap::default();
        let err = source_key_for_row(&row("ghost.vhd", "a", ""), Path::new("/case"), &sources)
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingSourceIdentifier(_)));
    }

    #[test]
    fn source_key_carries_meta_addr_and_name() {
        let mut map = HashMap::new();
        map.insert("/case/disk1.vhd".to_string(), 9);
        let sources = SourceIdMap::new(map);
        let key =
            source_key_for_row(&row("disk1.vhd", "hosts", ""), Path::new("/case"), &sources)
                .unwrap();
        assert_eq!(
            key,
            CorrelationKey::SourceAddress {
                source_id: 9,
                meta_addr: "57".into(),
                name: "hosts".into(),
            }
        );
    }
}
