use crate::types::Severity;
use std::io;
use thiserror::Error;

/// Errors raised while ingesting and correlating export files.
///
/// Row- and file-scoped variants never escalate past their scope; the task
/// folds every error into its result list and tracks the worst severity
/// observed. No variant crosses the task boundary as a panic or exception.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("malformed row at line {line}: expected {expected} fields, got {got}")]
    MalformedRow {
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("no case file matched {0}")]
    UnresolvedCorrelation(String),

    #[error("cannot resolve a data source for image {0}")]
    MissingSourceIdentifier(String),

    #[error("failed to copy {src} to {dest}: {reason}")]
    CopyFailure {
        src: String,
        dest: String,
        reason: String,
    },

    #[error("required results export {0} not found")]
    RequiredExportMissing(String),

    #[error("failed to attach report {path}: {reason}")]
    ReportAttachment { path: String, reason: String },

    #[error("failed to index artifact {artifact}: {reason}")]
    ArtifactIndexing { artifact: i64, reason: String },

    #[error("failed to add data source: {0}")]
    SourceRegistration(String),

    #[error("case store error: {0}")]
    Case(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl IngestError {
    /// Severity this error contributes to the task outcome.
    pub fn severity(&self) -> Severity {
        match self {
            IngestError::MalformedRow { .. }
            | IngestError::UnresolvedCorrelation(_)
            | IngestError::CopyFailure { .. }
            | IngestError::ArtifactIndexing { .. } => Severity::NonCritical,
            IngestError::MissingSourceIdentifier(_)
            | IngestError::RequiredExportMissing(_)
            | IngestError::ReportAttachment { .. }
            | IngestError::SourceRegistration(_) => Severity::Critical,
            IngestError::Case(_) | IngestError::Io(_) => Severity::NonCritical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping_matches_taxonomy() {
        let malformed = IngestError::MalformedRow {
            line: 3,
            expected: 9,
            got: 7,
        };
        assert_eq!(malformed.severity(), Severity::NonCritical);

        let missing = IngestError::MissingSourceIdentifier("disk1.vhd".into());
        assert_eq!(missing.severity(), Severity::Critical);

        let absent = IngestError::RequiredExportMissing("SearchResults.txt".into());
        assert_eq!(absent.severity(), Severity::Critical);
    }

    #[test]
    fn malformed_row_names_the_line() {
        let err = IngestError::MalformedRow {
            line: 3,
            expected: 9,
            got: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("expected 9"));
    }
}
