pub mod artifacts;
pub mod case;
pub mod correlate;
pub mod error;
pub mod export;
pub mod store;
pub mod task;
pub mod types;

pub use error::IngestError;
pub use task::{IngestSettings, IngestTask, ProgressSink, ResultSink, Stage};
pub use types::{
    ArtifactId, ArtifactKind, ArtifactSpec, CancelToken, CorrelationKey, DataSourceRef, FileId,
    FileRef, IngestResult, MatchedFile, Severity, SourceId, TableKind,
};
