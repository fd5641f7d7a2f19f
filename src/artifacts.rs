//! Deduplicating artifact writer and the row-to-spec builders.
//!
//! A spec is built deterministically from its row: attribute order is fixed
//! per kind, so re-running ingestion over the same input produces
//! byte-identical specs and the duplicate check holds across runs.

use crate::case::CaseArtifacts;
use crate::error::IngestError;
use crate::export::{ExportRow, ResultsRow, decode_hex_field};
use crate::types::{ArtifactId, ArtifactSpec, AttrType, Attribute, FileId, TableKind};
use chrono::NaiveDateTime;

/// Label recorded in program-name attributes and used as the report
/// category.
pub const MODULE_NAME: &str = "tessera";

/// Marker a history row must carry in its url field to qualify.
pub const VISIT_MARKER: &str = "Visited:";

const EXPORT_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Outcome of one idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new artifact was created (and queued for indexing).
    Created(ArtifactId),
    /// An identical artifact already existed; nothing was written.
    Existing,
    /// The row did not qualify for the artifact kind.
    Skipped,
}

/// Creates typed artifacts without ever duplicating one.
pub struct ArtifactWriter<'a, C: CaseArtifacts + ?Sized> {
    store: &'a C,
}

impl<'a, C: CaseArtifacts + ?Sized> ArtifactWriter<'a, C> {
    pub fn new(store: &'a C) -> Self {
        Self { store }
    }

    /// Creates the artifact unless one with the same kind and attribute set
    /// already exists on the file. Indexing failures are logged and do not
    /// roll back the creation; the artifact stands even if search lags.
    pub fn write(&self, file: FileId, spec: &ArtifactSpec) -> Result<WriteOutcome, IngestError> {
        if self
            .store
            .artifact_exists(file, spec)
            .map_err(|e| IngestError::Case(e.to_string()))?
        {
            return Ok(WriteOutcome::Existing);
        }

        // A racing writer may have created the same artifact between the
        // check and the create; the store then hands back the existing id,
        // which is success from this caller's point of view.
        let artifact = self
            .store
            .new_artifact(file, spec)
            .map_err(|e| IngestError::Case(e.to_string()))?;

        if let Err(e) = self.store.post_artifact(artifact) {
            let err = IngestError::ArtifactIndexing {
                artifact: artifact.0,
                reason: e.to_string(),
            };
            tracing::warn!("{err}");
        }

        Ok(WriteOutcome::Created(artifact))
    }
}

/// Builds the spec for a row of the given table kind, or `None` when the
/// row does not qualify for the kind.
pub fn spec_for_row(kind: TableKind, row: &ExportRow) -> Option<ArtifactSpec> {
    match kind {
        TableKind::History => history_spec(row),
        TableKind::Cookie => cookie_spec(row),
        TableKind::Bookmark => bookmark_spec(row),
        TableKind::Download => download_spec(row),
        TableKind::Interesting => None,
    }
}

/// History rows record a visit as `Visited: user@url`; rows without the
/// marker are other cache entries sharing the table and do not qualify.
pub fn history_spec(row: &ExportRow) -> Option<ArtifactSpec> {
    let url_field = row.get("url")?;
    if !url_field.contains(VISIT_MARKER) {
        return None;
    }
    let (user_part, url) = url_field.split_once('@')?;
    let user = user_part.replace(VISIT_MARKER, "").trim().to_string();
    let access_time = row.get("accessedtime").and_then(parse_export_timestamp);

    let mut spec = ArtifactSpec::new(TableKind::History.artifact_kind());
    spec.push(Attribute::text(AttrType::Url, url));
    if let Some(time) = access_time {
        spec.push(Attribute::time(AttrType::DatetimeAccessed, time));
    }
    spec.push(Attribute::text(AttrType::Referrer, ""));
    spec.push(Attribute::text(AttrType::Title, ""));
    spec.push(Attribute::text(AttrType::ProgName, MODULE_NAME));
    spec.push(Attribute::text(AttrType::Domain, extract_domain(url)));
    spec.push(Attribute::text(AttrType::UserName, user));
    Some(spec)
}

/// Cookie names and values arrive hex-encoded; a field that fails decoding
/// is reported absent rather than failing the row. The reversed `rdomain`
/// column is flipped back into a regular domain.
pub fn cookie_spec(row: &ExportRow) -> Option<ArtifactSpec> {
    let rdomain = row.get("rdomain")?.trim();
    let last_modified = row.get("lastmodified").and_then(parse_export_timestamp);
    let name = row.get("name").map(str::trim).and_then(decode_hex_field);
    let value = row.get("value").map(str::trim).and_then(decode_hex_field);
    let url = flip_domain(rdomain).unwrap_or_default();

    let mut spec = ArtifactSpec::new(TableKind::Cookie.artifact_kind());
    spec.push(Attribute::text(AttrType::Url, url.clone()));
    if let Some(time) = last_modified {
        spec.push(Attribute::time(AttrType::Datetime, time));
    }
    if let Some(name) = name {
        spec.push(Attribute::text(AttrType::Name, name));
    }
    if let Some(value) = value {
        spec.push(Attribute::text(AttrType::Value, value));
    }
    spec.push(Attribute::text(AttrType::ProgName, MODULE_NAME));
    spec.push(Attribute::text(AttrType::Domain, extract_domain(&url)));
    Some(spec)
}

/// Bookmark rows with an empty url column are placeholder entries and do
/// not qualify. Quote characters left in by the delimiter handling are
/// stripped from the title.
pub fn bookmark_spec(row: &ExportRow) -> Option<ArtifactSpec> {
    let url = row.get("url")?;
    if url.is_empty() {
        return None;
    }
    let title = row.get("title").unwrap_or("").replace('"', "");

    let mut spec = ArtifactSpec::new(TableKind::Bookmark.artifact_kind());
    spec.push(Attribute::text(AttrType::Url, url));
    spec.push(Attribute::text(AttrType::Title, title));
    spec.push(Attribute::text(AttrType::ProgName, MODULE_NAME));
    spec.push(Attribute::text(AttrType::Domain, extract_domain(url)));
    Some(spec)
}

/// Download rows are recognised but not converted: the payload lives inside
/// the response-headers blob, whose layout is undocumented. Rows map to the
/// defined "no artifact" result.
pub fn download_spec(_row: &ExportRow) -> Option<ArtifactSpec> {
    None
}

/// Spec for a results-export hit on a matched file.
pub fn interesting_file_spec(row: &ResultsRow) -> ArtifactSpec {
    let mut spec = ArtifactSpec::new(TableKind::Interesting.artifact_kind());
    spec.push(Attribute::text(AttrType::SetName, row.rule_set.clone()));
    spec.push(Attribute::text(AttrType::Category, row.rule_name.clone()));
    spec
}

/// Parses an export timestamp (`MM/dd/yyyy hh:mm:ss AM|PM`) to epoch
/// seconds. A malformed value is logged and the attribute omitted.
pub fn parse_export_timestamp(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    match NaiveDateTime::parse_from_str(trimmed, EXPORT_TIMESTAMP_FORMAT) {
        Ok(dt) => Some(dt.and_utc().timestamp()),
        Err(_) => {
            tracing::warn!(value = trimmed, "unparseable export timestamp");
            None
        }
    }
}

/// Reverses a stored-backwards domain (`com.host.www` becomes
/// `www.host.com`). Values with an unexpected token count are junk the tool
/// writes into the same column and are passed through unchanged.
pub fn flip_domain(domain: &str) -> Option<String> {
    if domain.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = domain.split('.').collect();
    if tokens.len() < 2 || tokens.len() > 3 {
        return Some(domain.to_string());
    }

    let mut flipped = String::new();
    if tokens.len() > 2 {
        flipped.push_str(tokens[2]);
        flipped.push('.');
    }
    flipped.push_str(tokens[1]);
    flipped.push('.');
    flipped.push_str(tokens[0]);
    Some(flipped)
}

/// Best-effort host extraction from a url-ish value.
pub fn extract_domain(url: &str) -> String {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or(host);
    host.split(':').next().unwrap_or(host).to_string()
}
