use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identifier of a data source (disk image or logical file set) in the case.
pub type SourceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FileId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactId(pub i64);

/// Task-level outcome classification, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    NoErrors,
    NonCritical,
    Critical,
}

impl Severity {
    fn rank(self) -> u8 {
        match self {
            Severity::NoErrors => 0,
            Severity::NonCritical => 1,
            Severity::Critical => 2,
        }
    }

    /// Worst-of combination used when aggregating stage outcomes.
    pub fn worst(self, other: Severity) -> Severity {
        if other.rank() > self.rank() { other } else { self }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::NoErrors => write!(f, "no errors"),
            Severity::NonCritical => write!(f, "non-critical errors"),
            Severity::Critical => write!(f, "critical errors"),
        }
    }
}

/// How an export row is tied back to a case-held file object.
///
/// Exactly one variant is valid per ingestion mode: `SourceAddress` when the
/// export came from disk images, `PathName` when it came from a flat logical
/// file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationKey {
    SourceAddress {
        source_id: SourceId,
        meta_addr: String,
        name: String,
    },
    PathName {
        name: String,
        parent_path: String,
    },
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::SourceAddress {
                source_id,
                meta_addr,
                name,
            } => write!(f, "source {source_id}, meta_addr {meta_addr}, name {name}"),
            CorrelationKey::PathName { name, parent_path } => {
                write!(f, "name {name}, parent path {parent_path}")
            }
        }
    }
}

/// A case file reference as returned by the case-file query capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub id: FileId,
    pub name: String,
    pub parent_path: String,
}

/// A case file together with the key that resolved it.
#[derive(Debug, Clone)]
pub struct MatchedFile {
    pub file: FileRef,
    pub key: CorrelationKey,
}

/// Closed set of export table kinds. Classification happens once per file
/// from the container catalogue, never by substring checks at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    History,
    Cookie,
    Bookmark,
    Download,
    Interesting,
}

impl TableKind {
    /// Maps the container name recorded in the catalogue table to a kind.
    pub fn classify(container_name: &str) -> Option<TableKind> {
        match container_name.trim().to_lowercase().as_str() {
            "history" => Some(TableKind::History),
            "cookie" | "cookies" => Some(TableKind::Cookie),
            "iedownload" | "download" => Some(TableKind::Download),
            "favorites" | "bookmarks" => Some(TableKind::Bookmark),
            _ => None,
        }
    }

    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            TableKind::History => ArtifactKind::WebHistory,
            TableKind::Cookie => ArtifactKind::WebCookie,
            TableKind::Bookmark => ArtifactKind::WebBookmark,
            TableKind::Download => ArtifactKind::WebDownload,
            TableKind::Interesting => ArtifactKind::InterestingFileHit,
        }
    }
}

/// Typed artifact kinds the engine can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactKind {
    WebHistory,
    WebCookie,
    WebBookmark,
    WebDownload,
    InterestingFileHit,
}

impl ArtifactKind {
    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::WebHistory => "web history",
            ArtifactKind::WebCookie => "web cookie",
            ArtifactKind::WebBookmark => "web bookmark",
            ArtifactKind::WebDownload => "web download",
            ArtifactKind::InterestingFileHit => "interesting file hit",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Closed set of attribute types an artifact may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttrType {
    Url,
    DatetimeAccessed,
    DatetimeCreated,
    Datetime,
    Referrer,
    Title,
    ProgName,
    Domain,
    UserName,
    Name,
    Value,
    Path,
    SetName,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AttrValue {
    Text(String),
    Time(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub attr_type: AttrType,
    pub value: AttrValue,
}

impl Attribute {
    pub fn text(attr_type: AttrType, value: impl Into<String>) -> Self {
        Self {
            attr_type,
            value: AttrValue::Text(value.into()),
        }
    }

    pub fn time(attr_type: AttrType, epoch_seconds: i64) -> Self {
        Self {
            attr_type,
            value: AttrValue::Time(epoch_seconds),
        }
    }
}

/// A typed artifact plus its ordered attribute set.
///
/// Builders emit attributes in a fixed order so that re-running ingestion on
/// identical input yields identical specs, which is what the duplicate check
/// in the artifact writer compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSpec {
    pub kind: ArtifactKind,
    pub attributes: Vec<Attribute>,
}

impl ArtifactSpec {
    pub fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
        }
    }

    pub fn push(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }
}

/// Kind of data source created during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    Image,
    LocalFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSourceRef {
    pub id: SourceId,
    pub kind: SourceKind,
    pub path: String,
}

/// Accumulated outcome of one ingest task.
///
/// Created empty at task start, mutated only by the owning task, and handed
/// to the result sink exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub severity: Severity,
    pub errors: Vec<String>,
    pub new_data_sources: Vec<DataSourceRef>,
}

impl IngestResult {
    pub fn new() -> Self {
        Self {
            severity: Severity::NoErrors,
            errors: Vec::new(),
            new_data_sources: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: String, severity: Severity) {
        self.errors.push(message);
        self.severity = self.severity.worst(severity);
    }
}

impl Default for IngestResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation flag, polled at row and file boundaries.
/// Clones share the same flag, so a handle can cancel a running task from
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_worst_is_ordered() {
        assert_eq!(
            Severity::NoErrors.worst(Severity::NonCritical),
            Severity::NonCritical
        );
        assert_eq!(
            Severity::Critical.worst(Severity::NonCritical),
            Severity::Critical
        );
        assert_eq!(Severity::NoErrors.worst(Severity::NoErrors), Severity::NoErrors);
    }

    #[test]
    fn classify_maps_catalogue_names() {
        assert_eq!(TableKind::classify("History"), Some(TableKind::History));
        assert_eq!(TableKind::classify("cookie"), Some(TableKind::Cookie));
        assert_eq!(TableKind::classify("iedownload"), Some(TableKind::Download));
        assert_eq!(TableKind::classify("Content"), None);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
