//! In-memory reference implementation of the case seams.
//!
//! Stands in for the real case store behind the same traits the engine is
//! written against: structural file queries, a duplicate-aware artifact
//! table, report bookkeeping, and data source registration. The CLI runs
//! against it and dumps a JSON snapshot; tests use its injection knobs to
//! exercise failure paths.

use crate::case::{CaseArtifacts, CaseError, CaseFiles, CaseReports, CaseSources, FileQuery};
use crate::types::{
    ArtifactId, ArtifactSpec, DataSourceRef, FileId, FileRef, SourceId, SourceKind,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct FileRecord {
    id: FileId,
    source_id: Option<SourceId>,
    meta_addr: String,
    name: String,
    parent_path: String,
}

#[derive(Debug, Clone)]
struct ArtifactRecord {
    id: ArtifactId,
    file: FileId,
    spec: ArtifactSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRecord {
    pub path: String,
    pub category: String,
    pub name: String,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    files: Vec<FileRecord>,
    artifacts: Vec<ArtifactRecord>,
    indexed: Vec<ArtifactId>,
    reports: Vec<ReportRecord>,
    image_sources: HashMap<String, SourceId>,
    sources: Vec<DataSourceRef>,
}

impl Inner {
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MemoryCase {
    inner: Mutex<Inner>,
    fail_report: Mutex<Option<String>>,
    fail_indexing: AtomicBool,
}

impl MemoryCase {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fail_report: Mutex::new(None),
            fail_indexing: AtomicBool::new(false),
        }
    }

    /// Registers a case file directly, the way a real store would know it
    /// from parsing an image.
    pub fn register_file(
        &self,
        source_id: SourceId,
        meta_addr: &str,
        name: &str,
        parent_path: &str,
    ) -> FileId {
        let mut inner = self.inner.lock();
        let id = FileId(inner.alloc_id());
        inner.files.push(FileRecord {
            id,
            source_id: Some(source_id),
            meta_addr: meta_addr.to_string(),
            name: name.to_string(),
            parent_path: parent_path.to_string(),
        });
        id
    }

    /// Makes attaching the report with the given name fail.
    pub fn fail_report_named(&self, name: &str) {
        *self.fail_report.lock() = Some(name.to_string());
    }

    /// Makes every indexing call fail. Artifact creation is unaffected.
    pub fn set_index_failure(&self, fail: bool) {
        self.fail_indexing.store(fail, Ordering::SeqCst);
    }

    pub fn artifact_count(&self) -> usize {
        self.inner.lock().artifacts.len()
    }

    pub fn artifacts(&self) -> Vec<(FileId, ArtifactSpec)> {
        self.inner
            .lock()
            .artifacts
            .iter()
            .map(|a| (a.file, a.spec.clone()))
            .collect()
    }

    pub fn indexed_count(&self) -> usize {
        self.inner.lock().indexed.len()
    }

    pub fn report_count(&self) -> usize {
        self.inner.lock().reports.len()
    }

    pub fn snapshot(&self) -> CaseSnapshot {
        let inner = self.inner.lock();
        CaseSnapshot {
            files: inner.files.len(),
            data_sources: inner.sources.clone(),
            reports: inner.reports.clone(),
            artifacts: inner
                .artifacts
                .iter()
                .map(|a| ArtifactSnapshot {
                    file: a.file,
                    spec: a.spec.clone(),
                })
                .collect(),
        }
    }

    fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                Self::walk_files(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl Default for MemoryCase {
    fn default() -> Self {
        Self::new()
    }
}

impl CaseFiles for MemoryCase {
    fn find_files_where(&self, query: &FileQuery) -> Result<Vec<FileRef>, CaseError> {
        let inner = self.inner.lock();
        // Registration order doubles as the stable result order.
        let matches = inner
            .files
            .iter()
            .filter(|f| match query {
                FileQuery::SourceAddress {
                    source_id,
                    meta_addr,
                    name,
                } => {
                    f.source_id == Some(*source_id)
                        && f.meta_addr == *meta_addr
                        && f.name == *name
                }
                FileQuery::PathName { name, parent_path } => {
                    f.name == *name && f.parent_path == *parent_path
                }
                FileQuery::Named { name } => f.name == *name,
            })
            .map(|f| FileRef {
                id: f.id,
                name: f.name.clone(),
                parent_path: f.parent_path.clone(),
            })
            .collect();
        Ok(matches)
    }

    fn image_source_ids(&self) -> Result<HashMap<String, SourceId>, CaseError> {
        Ok(self.inner.lock().image_sources.clone())
    }
}

impl CaseArtifacts for MemoryCase {
    fn artifact_exists(&self, file: FileId, spec: &ArtifactSpec) -> Result<bool, CaseError> {
        let inner = self.inner.lock();
        Ok(inner
            .artifacts
            .iter()
            .any(|a| a.file == file && a.spec == *spec))
    }

    fn new_artifact(&self, file: FileId, spec: &ArtifactSpec) -> Result<ArtifactId, CaseError> {
        let mut inner = self.inner.lock();
        // Duplicate from a racing writer: hand back the existing id.
        if let Some(existing) = inner
            .artifacts
            .iter()
            .find(|a| a.file == file && a.spec == *spec)
        {
            return Ok(existing.id);
        }
        let id = ArtifactId(inner.alloc_id());
        inner.artifacts.push(ArtifactRecord {
            id,
            file,
            spec: spec.clone(),
        });
        Ok(id)
    }

    fn post_artifact(&self, artifact: ArtifactId) -> Result<(), CaseError> {
        if self.fail_indexing.load(Ordering::SeqCst) {
            return Err(CaseError::Index("index service unavailable".into()));
        }
        let mut inner = self.inner.lock();
        if !inner.artifacts.iter().any(|a| a.id == artifact) {
            return Err(CaseError::Artifact(format!(
                "unknown artifact {}",
                artifact.0
            )));
        }
        inner.indexed.push(artifact);
        Ok(())
    }
}

impl CaseReports for MemoryCase {
    fn add_report(&self, path: &Path, category: &str, name: &str) -> Result<(), CaseError> {
        if let Some(failing) = self.fail_report.lock().as_deref()
            && name.contains(failing)
        {
            return Err(CaseError::Report(format!("cannot attach {name}")));
        }
        self.inner.lock().reports.push(ReportRecord {
            path: path.to_string_lossy().into_owned(),
            category: category.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }
}

impl CaseSources for MemoryCase {
    fn add_image_source(
        &self,
        _device_id: &str,
        _time_zone: &str,
        image_path: &Path,
    ) -> Result<DataSourceRef, CaseError> {
        let mut inner = self.inner.lock();
        let key = image_path.to_string_lossy().into_owned();
        if let Some(id) = inner.image_sources.get(&key).copied() {
            let existing = inner
                .sources
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| CaseError::Source(format!("missing source {id}")))?;
            return Ok(existing);
        }
        let id = inner.alloc_id();
        inner.image_sources.insert(key.clone(), id);
        let source = DataSourceRef {
            id,
            kind: SourceKind::Image,
            path: key,
        };
        inner.sources.push(source.clone());
        // The reference store does not parse image contents; files inside
        // an image are registered explicitly via register_file.
        Ok(source)
    }

    fn add_local_files_source(
        &self,
        _device_id: &str,
        paths: &[PathBuf],
    ) -> Result<DataSourceRef, CaseError> {
        let mut collected = Vec::new();
        for root in paths {
            Self::walk_files(root, &mut collected).map_err(|e| CaseError::Source(e.to_string()))?;
        }

        let mut inner = self.inner.lock();
        let id = inner.alloc_id();
        for root in paths {
            let base = root.parent().unwrap_or(Path::new(""));
            for file in collected.iter().filter(|f| f.starts_with(root)) {
                let Ok(rel) = file.strip_prefix(base) else {
                    continue;
                };
                let parent_path = match rel.parent() {
                    Some(dir) if !dir.as_os_str().is_empty() => {
                        format!("/{}/", dir.to_string_lossy().replace('\\', "/"))
                    }
                    _ => "/".to_string(),
                };
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let file_id = FileId(inner.alloc_id());
                inner.files.push(FileRecord {
                    id: file_id,
                    source_id: Some(id),
                    meta_addr: String::new(),
                    name,
                    parent_path,
                });
            }
        }

        let source = DataSourceRef {
            id,
            kind: SourceKind::LocalFiles,
            path: paths
                .first()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        inner.sources.push(source.clone());
        Ok(source)
    }
}

/// Serializable view of the case contents, printed by the CLI.
#[derive(Debug, Serialize)]
pub struct CaseSnapshot {
    pub files: usize,
    pub data_sources: Vec<DataSourceRef>,
    pub reports: Vec<ReportRecord>,
    pub artifacts: Vec<ArtifactSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactSnapshot {
    pub file: FileId,
    pub spec: ArtifactSpec,
}
