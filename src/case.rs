//! Seams to the external case store.
//!
//! The engine never resolves an ambient "current case"; every component is
//! handed the capability it needs explicitly. Implementations are expected
//! to serialise exists-then-create artifact writes, and callers must treat
//! a racing "already exists" outcome as success.

use crate::types::{ArtifactId, ArtifactSpec, DataSourceRef, FileId, FileRef, SourceId};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by a case store implementation.
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("case query failed: {0}")]
    Query(String),

    #[error("artifact store error: {0}")]
    Artifact(String),

    #[error("report attachment failed: {0}")]
    Report(String),

    #[error("data source error: {0}")]
    Source(String),

    #[error("indexing error: {0}")]
    Index(String),
}

/// Structured filter over case files.
///
/// String fields are untrusted export data; `to_clause` doubles embedded
/// single quotes so a literal quote in a file name can never act as a query
/// delimiter. Implementations that match structurally instead of rendering
/// text still rely on the exact string equality this encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileQuery {
    SourceAddress {
        source_id: SourceId,
        meta_addr: String,
        name: String,
    },
    PathName {
        name: String,
        parent_path: String,
    },
    Named {
        name: String,
    },
}

/// Escapes a string literal for embedding in a query clause by doubling
/// single quotes.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

impl FileQuery {
    /// Renders the filter as a query clause with escaped literals.
    pub fn to_clause(&self) -> String {
        match self {
            FileQuery::SourceAddress {
                source_id,
                meta_addr,
                name,
            } => format!(
                "data_source_obj_id = '{}' AND meta_addr = '{}' AND name = '{}'",
                source_id,
                escape_literal(meta_addr),
                escape_literal(name)
            ),
            FileQuery::PathName { name, parent_path } => format!(
                "name = '{}' AND parent_path = '{}'",
                escape_literal(name),
                escape_literal(parent_path)
            ),
            FileQuery::Named { name } => format!("name = '{}'", escape_literal(name)),
        }
    }
}

impl fmt::Display for FileQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_clause())
    }
}

/// Read-only file lookup capability of the case store.
pub trait CaseFiles: Send + Sync {
    /// Returns all case files matching the filter, in a stable order:
    /// identical inputs against an unchanged case always return the same
    /// set in the same order.
    fn find_files_where(&self, query: &FileQuery) -> Result<Vec<FileRef>, CaseError>;

    /// Mapping from image path to the data source id it was added under.
    fn image_source_ids(&self) -> Result<HashMap<String, SourceId>, CaseError>;
}

/// Artifact persistence capability of the case store.
pub trait CaseArtifacts: Send + Sync {
    /// Whether an artifact of the same kind and attribute set already
    /// exists on the file.
    fn artifact_exists(&self, file: FileId, spec: &ArtifactSpec) -> Result<bool, CaseError>;

    /// Creates the artifact. A store that races with another writer may
    /// return the already-existing artifact's id; callers treat that the
    /// same as a fresh creation.
    fn new_artifact(&self, file: FileId, spec: &ArtifactSpec) -> Result<ArtifactId, CaseError>;

    /// Queues the artifact for the case's searchable index.
    fn post_artifact(&self, artifact: ArtifactId) -> Result<(), CaseError>;
}

/// Report attachment capability of the case store.
pub trait CaseReports: Send + Sync {
    fn add_report(&self, path: &Path, category: &str, name: &str) -> Result<(), CaseError>;
}

/// Data source registration capability of the case store.
pub trait CaseSources: Send + Sync {
    fn add_image_source(
        &self,
        device_id: &str,
        time_zone: &str,
        image_path: &Path,
    ) -> Result<DataSourceRef, CaseError>;

    fn add_local_files_source(
        &self,
        device_id: &str,
        paths: &[std::path::PathBuf],
    ) -> Result<DataSourceRef, CaseError>;
}

/// The full case handle an ingest task is constructed with.
pub trait Case: CaseFiles + CaseArtifacts + CaseReports + CaseSources {}

impl<T: CaseFiles + CaseArtifacts + CaseReports + CaseSources> Case for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_doubled_in_clauses() {
        let query = FileQuery::PathName {
            name: "o'brien.txt".into(),
            parent_path: "/root/disk1/Users/o'brien/".into(),
        };
        let clause = query.to_clause();
        assert_eq!(
            clause,
            "name = 'o''brien.txt' AND parent_path = '/root/disk1/Users/o''brien/'"
        );
    }

    #[test]
    fn source_address_clause_shape() {
        let query = FileQuery::SourceAddress {
            source_id: 42,
            meta_addr: "128-1".into(),
            name: "hosts".into(),
        };
        assert_eq!(
            query.to_clause(),
            "data_source_obj_id = '42' AND meta_addr = '128-1' AND name = 'hosts'"
        );
    }
}
