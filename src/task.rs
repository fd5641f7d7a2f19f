//! Cancellable multi-stage ingest orchestration.
//!
//! One task drives the whole pipeline for a single data source: copy the
//! source tree, attach the auxiliary reports, register data sources, then
//! walk each export file through parse, correlate, and write. Errors are
//! aggregated into one ordered list with a worst-of severity; the result is
//! emitted through the sink exactly once on every exit path, including
//! cancellation.

use crate::artifacts::{ArtifactWriter, MODULE_NAME, interesting_file_spec, spec_for_row};
use crate::case::Case;
use crate::correlate::{FileCorrelator, SourceIdMap, path_key_for_row, source_key_for_row};
use crate::error::IngestError;
use crate::export::{
    CONTAINER_FILE_PREFIX, CONTAINERS_FILE, ContainerCatalog, ResultsReader, ResultsRow,
    TableReader,
};
use crate::types::{CancelToken, FileId, IngestResult, MatchedFile, TableKind};
use std::fmt;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Fixed name of the required, tab-separated results export.
pub const RESULTS_FILE: &str = "SearchResults.txt";
/// Fixed name of the optional users report.
pub const USERS_FILE: &str = "users.txt";
/// Fixed name of the bookmark export table.
pub const FAVORITES_FILE: &str = "Favorites.csv";
/// Database files the auxiliary export sets are dumped from; web artifacts
/// attach to the matching case file.
pub const WEBCACHE_DB: &str = "WebCacheV01.dat";
pub const SPARTAN_DB: &str = "Spartan.edb";

const IMAGE_EXT: &str = "vhd";
const FALLBACK_ROOT: &str = "root";
const SCRATCH_DIR: &str = ".tessera-work";

/// Per-task configuration collected by the caller.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub device_id: String,
    pub time_zone: String,
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Receives coarse progress text while the task runs.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, text: &str);
}

impl<F: Fn(&str) + Send + Sync> ProgressSink for F {
    fn progress(&self, text: &str) {
        self(text)
    }
}

/// Receives the terminal result; invoked exactly once.
pub type ResultSink = Box<dyn FnOnce(IngestResult) + Send>;

/// Orchestration states. `Cancelled` absorbs from any state at row/file
/// boundaries; `Failed` is terminal for unrecoverable stage conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Copying,
    AttachingReports,
    ParsingExports,
    Correlating,
    WritingArtifacts,
    Done,
    Cancelled,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Copying => "copying",
            Stage::AttachingReports => "attaching reports",
            Stage::ParsingExports => "parsing exports",
            Stage::Correlating => "correlating",
            Stage::WritingArtifacts => "writing artifacts",
            Stage::Done => "done",
            Stage::Cancelled => "cancelled",
            Stage::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Scratch directory exclusively owned by one task. Exports are staged into
/// it before parsing so the evidence copy is never read in place, and the
/// whole directory is removed on every exit path. Cleanup failures are
/// logged, never escalated.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(dest: &Path) -> Result<Self, IngestError> {
        let path = dest.join(SCRATCH_DIR);
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn stage_copy(&self, file: &Path) -> Result<PathBuf, IngestError> {
        let name = file
            .file_name()
            .ok_or_else(|| IngestError::Case(format!("not a file: {}", file.display())))?;
        let target = self.path.join(name);
        fs::copy(file, &target)?;
        Ok(target)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove task scratch directory"
            );
        }
    }
}

fn stage_for_read(scratch: Option<&ScratchDir>, path: &Path) -> PathBuf {
    if let Some(scratch) = scratch {
        match scratch.stage_copy(path) {
            Ok(copy) => return copy,
            Err(e) => tracing::warn!(
                file = %path.display(),
                error = %e,
                "could not stage export; reading in place"
            ),
        }
    }
    path.to_path_buf()
}

/// Recursively duplicates the source tree to the working destination.
pub fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    let mut entries: Vec<_> = fs::read_dir(src)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();
    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = dest.join(name);
        if path.is_dir() {
            copy_tree(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

/// End-to-end ingest pipeline for one data source.
pub struct IngestTask<'a, C: Case + ?Sized> {
    settings: IngestSettings,
    case: &'a C,
    progress: &'a dyn ProgressSink,
    cancel: CancelToken,
    stage: Stage,
    result: IngestResult,
}

impl<'a, C: Case + ?Sized> IngestTask<'a, C> {
    pub fn new(settings: IngestSettings, case: &'a C, progress: &'a dyn ProgressSink) -> Self {
        Self {
            settings,
            case,
            progress,
            cancel: CancelToken::new(),
            stage: Stage::Copying,
            result: IngestResult::new(),
        }
    }

    /// Handle that cancels this task from another thread. Cancellation is
    /// observed at row and file boundaries only; partial work already
    /// written remains valid.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs the pipeline to completion, then emits the accumulated result
    /// through the sink. The sink is invoked exactly once, on every exit
    /// path.
    pub fn run(mut self, on_done: ResultSink) {
        self.execute();
        if self.stage == Stage::Cancelled {
            tracing::warn!("ingest task cancelled; processing may be incomplete");
            self.progress.progress("Ingest cancelled");
        }
        on_done(self.result);
    }

    fn record(&mut self, err: IngestError) {
        tracing::debug!("{err}");
        let severity = err.severity();
        self.result.add_error(err.to_string(), severity);
    }

    fn check_cancelled(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            self.stage = Stage::Cancelled;
            true
        } else {
            false
        }
    }

    fn execute(&mut self) {
        let src = self.settings.source.clone();
        let dest = self.settings.dest.clone();

        self.stage = Stage::Copying;
        self.progress
            .progress(&format!("Copying {} to {}", src.display(), dest.display()));
        if let Err(e) = copy_tree(&src, &dest) {
            // Later stages proceed best-effort against whatever did copy.
            self.record(IngestError::CopyFailure {
                src: src.display().to_string(),
                dest: dest.display().to_string(),
                reason: e.to_string(),
            });
        } else {
            self.progress.progress("Done copying");
        }

        if self.check_cancelled() {
            return;
        }

        let results_path = dest.join(RESULTS_FILE);
        if !results_path.exists() {
            self.record(IngestError::RequiredExportMissing(RESULTS_FILE.into()));
            self.stage = Stage::Failed;
            return;
        }

        self.stage = Stage::AttachingReports;
        if !self.attach_report(&results_path, RESULTS_FILE) {
            self.stage = Stage::Failed;
            return;
        }
        let users_path = dest.join(USERS_FILE);
        // A missing auxiliary report is not an error; one that is present
        // but cannot be attached is.
        if users_path.exists() && !self.attach_report(&users_path, USERS_FILE) {
            self.stage = Stage::Failed;
            return;
        }

        if self.check_cancelled() {
            return;
        }

        let Some((scoped_to_images, sources)) = self.register_data_sources(&dest) else {
            self.stage = Stage::Failed;
            return;
        };

        if self.check_cancelled() {
            return;
        }

        let scratch = match ScratchDir::create(&dest) {
            Ok(scratch) => Some(scratch),
            Err(e) => {
                tracing::warn!(error = %e, "could not create scratch directory");
                None
            }
        };

        self.process_results_export(&dest, &results_path, scoped_to_images, &sources);
        if self.stage == Stage::Cancelled {
            return;
        }

        self.process_aux_tables(&dest, scratch.as_ref());
        if self.stage == Stage::Cancelled {
            return;
        }

        self.stage = Stage::Done;
        self.progress.progress("Ingest finished");
    }

    fn attach_report(&mut self, path: &Path, name: &str) -> bool {
        self.progress.progress(&format!("Adding {name} to report"));
        let src_name = self
            .settings
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self
            .case
            .add_report(path, MODULE_NAME, &format!("{name} {src_name}"))
        {
            Ok(()) => {
                self.progress
                    .progress(&format!("Done adding {name} to report"));
                true
            }
            Err(e) => {
                self.record(IngestError::ReportAttachment {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Registers the destination's disk images as data sources, or falls
    /// back to a logical file set when none exist. Returns whether the
    /// export is scoped to images, plus the task's source id map; `None`
    /// means registration failed critically.
    fn register_data_sources(&mut self, dest: &Path) -> Option<(bool, SourceIdMap)> {
        let mut images = match fs::read_dir(dest) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXT))
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                self.record(IngestError::SourceRegistration(e.to_string()));
                return None;
            }
        };
        images.sort();

        if images.is_empty() {
            // No images: ingest the fallback tree as a logical file set.
            // The imager always lays that tree out under `root`, and the
            // parent-path correlation prefixes are written against it, so
            // actual subdirectories are deliberately not enumerated.
            let root = dest.join(FALLBACK_ROOT);
            self.progress
                .progress(&format!("Adding logical file set {}", root.display()));
            match self
                .case
                .add_local_files_source(&self.settings.device_id, &[root])
            {
                Ok(source) => {
                    self.result.new_data_sources.push(source);
                    return Some((false, SourceIdMap::default()));
                }
                Err(e) => {
                    self.record(IngestError::SourceRegistration(e.to_string()));
                    return None;
                }
            }
        }

        for image in &images {
            self.progress
                .progress(&format!("Adding image {}", image.display()));
            match self.case.add_image_source(
                &self.settings.device_id,
                &self.settings.time_zone,
                image,
            ) {
                Ok(source) => self.result.new_data_sources.push(source),
                Err(e) => {
                    self.record(IngestError::SourceRegistration(e.to_string()));
                    return None;
                }
            }
        }

        match self.case.image_source_ids() {
            Ok(map) => Some((true, SourceIdMap::new(map))),
            Err(e) => {
                self.record(IngestError::SourceRegistration(e.to_string()));
                None
            }
        }
    }

    /// Walks the results export through parse, correlate, and write.
    fn process_results_export(
        &mut self,
        dest: &Path,
        results_path: &Path,
        scoped_to_images: bool,
        sources: &SourceIdMap,
    ) {
        self.stage = Stage::ParsingExports;
        self.progress.progress("Parsing results export");

        let file = match fs::File::open(results_path) {
            Ok(file) => file,
            Err(e) => {
                self.record(e.into());
                return;
            }
        };

        let mut rows = Vec::new();
        for item in ResultsReader::new(BufReader::new(file), self.cancel.clone()) {
            match item {
                Ok(row) => rows.push(row),
                Err(e) => self.record(e),
            }
        }
        if self.check_cancelled() {
            return;
        }

        self.stage = Stage::Correlating;
        self.progress.progress("Correlating results");
        let correlator = FileCorrelator::new(self.case);
        let mut matched: Vec<(ResultsRow, Vec<MatchedFile>)> = Vec::new();
        for row in rows {
            if self.check_cancelled() {
                return;
            }
            let key = if scoped_to_images {
                match source_key_for_row(&row, dest, sources) {
                    Ok(key) => key,
                    Err(e @ IngestError::MissingSourceIdentifier(_)) => {
                        // The export cannot be attributed: fatal for this
                        // file's correlation, the rest of the pipeline
                        // continues.
                        self.record(e);
                        break;
                    }
                    Err(e) => {
                        self.record(e);
                        continue;
                    }
                }
            } else {
                path_key_for_row(&row)
            };
            match correlator.correlate(&key) {
                Ok(files) if files.is_empty() => {
                    self.record(IngestError::UnresolvedCorrelation(format!(
                        "{key} (line {})",
                        row.line
                    )));
                }
                Ok(files) => matched.push((row, files)),
                Err(e) => self.record(e),
            }
        }

        self.stage = Stage::WritingArtifacts;
        self.progress.progress("Writing artifacts");
        let writer = ArtifactWriter::new(self.case);
        for (row, files) in matched {
            if self.check_cancelled() {
                return;
            }
            let spec = interesting_file_spec(&row);
            for matched_file in files {
                if let Err(e) = writer.write(matched_file.file.id, &spec) {
                    self.record(e);
                }
            }
        }
    }

    /// Processes the auxiliary comma-separated export tables: the numbered
    /// container exports classified by the catalogue, then the bookmark
    /// table.
    fn process_aux_tables(&mut self, dest: &Path, scratch: Option<&ScratchDir>) {
        let containers_path = dest.join(CONTAINERS_FILE);
        if containers_path.exists() {
            let staged = stage_for_read(scratch, &containers_path);
            let catalog = match fs::File::open(&staged) {
                Ok(file) => {
                    let (catalog, warnings) =
                        ContainerCatalog::load(BufReader::new(file), &self.cancel);
                    for warning in warnings {
                        self.record(warning);
                    }
                    catalog
                }
                Err(e) => {
                    self.record(e.into());
                    ContainerCatalog::default()
                }
            };
            if self.check_cancelled() {
                return;
            }

            if !catalog.is_empty()
                && let Some(origin) = self.resolve_origin(WEBCACHE_DB)
            {
                let mut tables = match fs::read_dir(dest) {
                    Ok(entries) => entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.path())
                        .filter_map(|path| {
                            let name = path.file_name()?.to_str()?;
                            if !name.starts_with(CONTAINER_FILE_PREFIX) {
                                return None;
                            }
                            let kind = catalog.kind_for_container_file(name)?;
                            Some((path.clone(), kind))
                        })
                        .collect::<Vec<_>>(),
                    Err(e) => {
                        self.record(e.into());
                        Vec::new()
                    }
                };
                tables.sort_by(|a, b| a.0.cmp(&b.0));

                for (path, kind) in tables {
                    if self.check_cancelled() {
                        return;
                    }
                    self.process_table(&path, kind, origin, scratch);
                    if self.stage == Stage::Cancelled {
                        return;
                    }
                }
            }
        }

        let favorites_path = dest.join(FAVORITES_FILE);
        if favorites_path.exists()
            && let Some(origin) = self.resolve_origin(SPARTAN_DB)
        {
            self.process_table(&favorites_path, TableKind::Bookmark, origin, scratch);
        }
    }

    /// Resolves the case file an export set was dumped from. No match is a
    /// non-fatal per-file note; the export set is skipped.
    fn resolve_origin(&mut self, db_name: &str) -> Option<FileId> {
        self.stage = Stage::Correlating;
        let correlator = FileCorrelator::new(self.case);
        match correlator.resolve_export_origin(db_name) {
            Ok(files) => match files.first() {
                Some(file) => Some(file.id),
                None => {
                    self.record(IngestError::UnresolvedCorrelation(format!(
                        "export origin {db_name}"
                    )));
                    None
                }
            },
            Err(e) => {
                self.record(e);
                None
            }
        }
    }

    fn process_table(
        &mut self,
        path: &Path,
        kind: TableKind,
        origin: FileId,
        scratch: Option<&ScratchDir>,
    ) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.stage = Stage::ParsingExports;
        self.progress.progress(&format!("Parsing {name}"));

        let read_path = stage_for_read(scratch, path);
        let file = match fs::File::open(&read_path) {
            Ok(file) => file,
            Err(e) => {
                self.record(e.into());
                return;
            }
        };

        let mut rows = Vec::new();
        for item in TableReader::new(BufReader::new(file), ',', self.cancel.clone()) {
            match item {
                Ok(row) => rows.push(row),
                Err(e) => self.record(e),
            }
        }
        if self.check_cancelled() {
            return;
        }

        self.stage = Stage::WritingArtifacts;
        let writer = ArtifactWriter::new(self.case);
        for row in rows {
            if self.check_cancelled() {
                return;
            }
            if let Some(spec) = spec_for_row(kind, &row)
                && let Err(e) = writer.write(origin, &spec)
            {
                self.record(e);
            }
        }
    }
}
