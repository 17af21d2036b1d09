//! Reference file container.
//!
//! Tracks the files under a workspace root and answers the four event
//! kinds:
//!
//! | Kind | Effect |
//! |------|--------|
//! | `update` | Rescan the root, diff against the table, report changes |
//! | `descriptorsAll` | List tracked files |
//! | `descriptorsByStatus` | List tracked files whose status is in the filter |
//! | `settings` | Replace the active settings as a whole |
//!
//! Statuses are derived from scan history: files present at the first scan
//! of a root are `clean`, files appearing later are `added`, and files whose
//! size or modification time changed are `modified`.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    EventKind, FileDescriptor, Payload, RawFile, RequestEnvelope, ResultEnvelope,
    SettingsSnapshot, Status, StatusSet, UpdateChange, UpdateResult,
};

use super::dispatcher::Dispatcher;

// ============================================================================
// PathFilter
// ============================================================================

/// Compiled visibility rules of one settings snapshot.
#[derive(Debug, Clone, Default)]
struct PathFilter {
    include_hidden: bool,
    excludes: Vec<Regex>,
}

impl PathFilter {
    /// Compiles every exclude pattern, failing on the first invalid one.
    fn compile(settings: &SettingsSnapshot) -> Result<Self> {
        let excludes = settings
            .exclude
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    Error::operation_failed(
                        EventKind::Settings,
                        format!("invalid exclude pattern `{pattern}`: {e}"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            include_hidden: settings.include_hidden,
            excludes,
        })
    }

    fn is_hidden(relative: &Path) -> bool {
        relative
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
    }

    /// Returns `true` if a directory should be descended into.
    fn admits_dir(&self, relative: &Path) -> bool {
        self.include_hidden || !Self::is_hidden(relative)
    }

    /// Returns `true` if a file is visible under these rules.
    fn admits_file(&self, relative: &Path) -> bool {
        if !self.include_hidden && Self::is_hidden(relative) {
            return false;
        }
        let key = slash_path(relative);
        !self.excludes.iter().any(|re| re.is_match(&key))
    }
}

/// Workspace-relative path with `/` separators.
fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Scanning
// ============================================================================

/// Walks `root` and returns every admitted regular file.
///
/// Symlinks are not followed. Unreadable subdirectories are skipped; an
/// unreadable root is an error.
fn scan(root: &Path, filter: &PathFilter) -> io::Result<BTreeMap<PathBuf, RawFile>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative_dir) = pending.pop() {
        let entries = match fs::read_dir(root.join(&relative_dir)) {
            Ok(entries) => entries,
            Err(e) if relative_dir.as_os_str().is_empty() => return Err(e),
            Err(e) => {
                warn!(dir = %relative_dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let relative = relative_dir.join(entry.file_name());

            if file_type.is_dir() {
                if filter.admits_dir(&relative) {
                    pending.push(relative);
                }
            } else if file_type.is_file() && filter.admits_file(&relative) {
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64);

                files.insert(
                    relative.clone(),
                    RawFile {
                        path: relative,
                        size: metadata.len(),
                        modified,
                    },
                );
            }
        }
    }

    Ok(files)
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone)]
struct TrackedFile {
    raw: RawFile,
    status: Status,
}

#[derive(Debug, Default)]
struct ContainerState {
    /// Root fixed at launch.
    launch_root: Option<PathBuf>,
    settings: SettingsSnapshot,
    filter: PathFilter,
    /// Tracked files, ordered by path.
    files: BTreeMap<PathBuf, TrackedFile>,
    /// Whether the current root has been scanned at least once.
    scanned: bool,
}

impl ContainerState {
    fn root(&self) -> Option<&Path> {
        self.settings
            .workspace_root
            .as_deref()
            .or(self.launch_root.as_deref())
    }

    fn descriptor(&self, file: &TrackedFile) -> FileDescriptor {
        let path = file.raw.path.clone();
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let description = path.parent().map(slash_path).unwrap_or_default();

        FileDescriptor {
            label,
            description,
            path,
            status: file.status,
            format_on_save: self.settings.format_on_save,
        }
    }

    fn descriptors<F>(&self, mut keep: F) -> Vec<FileDescriptor>
    where
        F: FnMut(&TrackedFile) -> bool,
    {
        self.files
            .values()
            .filter(|f| self.filter.admits_file(&f.raw.path) && keep(f))
            .map(|f| self.descriptor(f))
            .collect()
    }
}

// ============================================================================
// FileContainer
// ============================================================================

/// In-memory file table answering the protocol's event kinds.
///
/// Reads take a shared lock and always observe one complete settings
/// snapshot together with one complete scan. Updates and settings changes
/// are serialized with each other.
#[derive(Debug, Default)]
pub struct FileContainer {
    /// Serializes state-changing operations.
    gate: AsyncMutex<()>,
    state: RwLock<ContainerState>,
}

impl FileContainer {
    /// Creates a container rooted at `root`.
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            gate: AsyncMutex::new(()),
            state: RwLock::new(ContainerState {
                launch_root: root,
                ..ContainerState::default()
            }),
        }
    }

    /// Returns the effective workspace root.
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.state.read().root().map(Path::to_path_buf)
    }

    /// Returns the active settings.
    #[must_use]
    pub fn settings(&self) -> SettingsSnapshot {
        self.state.read().settings.clone()
    }

    /// Rescans the root and returns what changed since the last scan.
    ///
    /// On failure the table is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if no root is configured or the
    /// root cannot be read.
    pub async fn update(&self) -> Result<Vec<UpdateResult>> {
        let _gate = self.gate.lock().await;

        let (root, filter) = {
            let state = self.state.read();
            let root = state.root().map(Path::to_path_buf).ok_or_else(|| {
                Error::operation_failed(EventKind::Update, "no workspace root configured")
            })?;
            (root, state.filter.clone())
        };

        let scan_root = root.clone();
        let scanned = tokio::task::spawn_blocking(move || scan(&scan_root, &filter))
            .await
            .map_err(|e| Error::operation_failed(EventKind::Update, format!("scan aborted: {e}")))?
            .map_err(|e| {
                Error::operation_failed(
                    EventKind::Update,
                    format!("cannot read workspace root {}: {e}", root.display()),
                )
            })?;

        let mut state = self.state.write();
        let baseline = !state.scanned;
        let mut results = Vec::new();

        for (path, tracked) in &state.files {
            if !scanned.contains_key(path) {
                results.push(UpdateResult {
                    file: tracked.raw.clone(),
                    change: UpdateChange::Removed,
                });
            }
        }

        let mut files = BTreeMap::new();
        for (path, raw) in scanned {
            let status = match state.files.get(&path) {
                None => {
                    results.push(UpdateResult {
                        file: raw.clone(),
                        change: UpdateChange::Added,
                    });
                    if baseline { Status::Clean } else { Status::Added }
                }
                Some(old) if old.raw != raw => {
                    results.push(UpdateResult {
                        file: raw.clone(),
                        change: UpdateChange::Changed,
                    });
                    match old.status {
                        Status::Added => Status::Added,
                        _ => Status::Modified,
                    }
                }
                Some(old) => old.status,
            };
            files.insert(path, TrackedFile { raw, status });
        }

        state.files = files;
        state.scanned = true;
        results.sort_by(|a, b| a.file.path.cmp(&b.file.path));

        info!(
            root = %root.display(),
            tracked = state.files.len(),
            changes = results.len(),
            "Workspace updated"
        );
        Ok(results)
    }

    /// Lists every visible tracked file, ordered by path.
    #[must_use]
    pub fn descriptors_all(&self) -> Vec<FileDescriptor> {
        self.state.read().descriptors(|_| true)
    }

    /// Lists visible tracked files whose status is in `filter`.
    ///
    /// An empty filter matches nothing.
    #[must_use]
    pub fn descriptors_by_status(&self, filter: &StatusSet) -> Vec<FileDescriptor> {
        self.state
            .read()
            .descriptors(|f| filter.contains(&f.status))
    }

    /// Replaces the active settings.
    ///
    /// Either the whole snapshot takes effect or none of it does. Changing
    /// the workspace root drops the file table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if an exclude pattern does not
    /// compile or the new root is not a directory.
    pub async fn apply_settings(&self, settings: SettingsSnapshot) -> Result<()> {
        let _gate = self.gate.lock().await;

        let filter = PathFilter::compile(&settings)?;
        if let Some(root) = &settings.workspace_root
            && !root.is_dir()
        {
            return Err(Error::operation_failed(
                EventKind::Settings,
                format!("workspace root is not a directory: {}", root.display()),
            ));
        }

        let mut state = self.state.write();
        let old_root = state.root().map(Path::to_path_buf);

        state.settings = settings;
        state.filter = filter;

        if state.root() != old_root.as_deref() {
            state.files.clear();
            state.scanned = false;
            debug!(root = ?state.root(), "Workspace root changed, table reset");
        }

        info!(
            format_on_save = state.settings.format_on_save,
            include_hidden = state.settings.include_hidden,
            excludes = state.filter.excludes.len(),
            "Settings applied"
        );
        Ok(())
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Turns an operation error into an unsuccessful result.
fn failure(kind: EventKind, error: Error) -> ResultEnvelope {
    match error {
        Error::OperationFailed { message, .. } => ResultEnvelope::failure(kind, message),
        other => ResultEnvelope::failure(kind, other.to_string()),
    }
}

#[async_trait]
impl Dispatcher for FileContainer {
    async fn dispatch(&self, envelope: RequestEnvelope) -> ResultEnvelope {
        let kind = envelope.event_type;

        match (kind, envelope.payload) {
            (EventKind::Update, None) => match self.update().await {
                Ok(results) => {
                    ResultEnvelope::success(kind, Some(Payload::UpdateResults(results)))
                }
                Err(e) => failure(kind, e),
            },

            (EventKind::DescriptorsAll, None) => ResultEnvelope::success(
                kind,
                Some(Payload::Descriptors(self.descriptors_all())),
            ),

            (EventKind::DescriptorsByStatus, Some(Payload::StatusFilter(filter))) => {
                ResultEnvelope::success(
                    kind,
                    Some(Payload::Descriptors(self.descriptors_by_status(&filter))),
                )
            }

            (EventKind::Settings, Some(Payload::Settings(settings))) => {
                match self.apply_settings(settings).await {
                    Ok(()) => ResultEnvelope::success(kind, None),
                    Err(e) => failure(kind, e),
                }
            }

            (kind, payload) => ResultEnvelope::failure(
                kind,
                format!(
                    "unexpected payload {} for {kind}",
                    payload.map_or_else(|| "none".to_string(), |p| p.shape().to_string())
                ),
            ),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("src/nested")).expect("mkdir");
        fs::create_dir_all(dir.path().join(".git")).expect("mkdir");
        fs::write(dir.path().join("README.md"), "readme").expect("write");
        fs::write(dir.path().join("src/lib.rs"), "lib").expect("write");
        fs::write(dir.path().join("src/nested/mod.rs"), "mod").expect("write");
        fs::write(dir.path().join(".git/HEAD"), "ref").expect("write");
        fs::write(dir.path().join(".env"), "X=1").expect("write");
        dir
    }

    fn paths(descriptors: &[FileDescriptor]) -> Vec<String> {
        descriptors.iter().map(|d| slash_path(&d.path)).collect()
    }

    #[test]
    fn test_filter_hidden_and_excludes() {
        let filter = PathFilter::compile(&SettingsSnapshot::new().with_exclude(r"\.lock$"))
            .expect("compile");
        assert!(filter.admits_file(Path::new("src/lib.rs")));
        assert!(!filter.admits_file(Path::new(".env")));
        assert!(!filter.admits_file(Path::new("Cargo.lock")));
        assert!(!filter.admits_dir(Path::new(".git")));

        let hidden = PathFilter::compile(&SettingsSnapshot::new().with_include_hidden(true))
            .expect("compile");
        assert!(hidden.admits_file(Path::new(".env")));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = PathFilter::compile(&SettingsSnapshot::new().with_exclude("(")).unwrap_err();
        assert!(matches!(
            err,
            Error::OperationFailed {
                kind: EventKind::Settings,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_first_update_is_clean_baseline() {
        let dir = workspace();
        let container = FileContainer::new(Some(dir.path().to_path_buf()));

        let results = container.update().await.expect("update");
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.change == UpdateChange::Added));

        let all = container.descriptors_all();
        assert_eq!(paths(&all), vec!["README.md", "src/lib.rs", "src/nested/mod.rs"]);
        assert!(all.iter().all(|d| d.status == Status::Clean));

        let nested = &all[2];
        assert_eq!(nested.label, "mod.rs");
        assert_eq!(nested.description, "src/nested");
        assert!(!nested.format_on_save);
    }

    #[tokio::test]
    async fn test_incremental_update_tracks_status() {
        let dir = workspace();
        let container = FileContainer::new(Some(dir.path().to_path_buf()));
        container.update().await.expect("baseline");

        fs::write(dir.path().join("new.rs"), "new").expect("write");
        fs::write(dir.path().join("src/lib.rs"), "lib, but longer").expect("write");
        fs::remove_file(dir.path().join("README.md")).expect("remove");

        let results = container.update().await.expect("update");
        let changes: Vec<_> = results
            .iter()
            .map(|r| (slash_path(&r.file.path), r.change))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("README.md".to_string(), UpdateChange::Removed),
                ("new.rs".to_string(), UpdateChange::Added),
                ("src/lib.rs".to_string(), UpdateChange::Changed),
            ]
        );

        let added = container.descriptors_by_status(&StatusSet::from([Status::Added]));
        assert_eq!(paths(&added), vec!["new.rs"]);

        let modified = container.descriptors_by_status(&StatusSet::from([Status::Modified]));
        assert_eq!(paths(&modified), vec!["src/lib.rs"]);

        assert!(container.descriptors_by_status(&StatusSet::new()).is_empty());

        let again = container.update().await.expect("update");
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_update_without_root_fails_and_keeps_table() {
        let container = FileContainer::new(None);
        let err = container.update().await.unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));

        let dir = workspace();
        let container = FileContainer::new(Some(dir.path().to_path_buf()));
        container.update().await.expect("baseline");

        let root = dir.path().to_path_buf();
        drop(dir);
        assert!(!root.exists());

        let err = container.update().await.unwrap_err();
        assert!(err.to_string().contains("cannot read workspace root"));
        assert_eq!(container.descriptors_all().len(), 3);
    }

    #[tokio::test]
    async fn test_settings_apply_all_or_nothing() {
        let dir = workspace();
        let container = FileContainer::new(Some(dir.path().to_path_buf()));
        container.update().await.expect("baseline");

        let good = SettingsSnapshot::new()
            .with_format_on_save(true)
            .with_exclude("^src/nested/");
        container.apply_settings(good.clone()).await.expect("apply");

        let all = container.descriptors_all();
        assert_eq!(paths(&all), vec!["README.md", "src/lib.rs"]);
        assert!(all.iter().all(|d| d.format_on_save));

        let bad = SettingsSnapshot::new()
            .with_format_on_save(false)
            .with_exclude("valid")
            .with_exclude("[");
        assert!(container.apply_settings(bad).await.is_err());
        assert_eq!(container.settings(), good);
        assert!(container.descriptors_all().iter().all(|d| d.format_on_save));

        let missing_root = SettingsSnapshot::new().with_workspace_root(dir.path().join("nope"));
        assert!(container.apply_settings(missing_root).await.is_err());
        assert_eq!(container.settings(), good);
    }

    #[tokio::test]
    async fn test_root_change_resets_table() {
        let first = workspace();
        let second = tempfile::tempdir().expect("tempdir");
        fs::write(second.path().join("only.txt"), "x").expect("write");

        let container = FileContainer::new(Some(first.path().to_path_buf()));
        container.update().await.expect("baseline");

        container
            .apply_settings(SettingsSnapshot::new().with_workspace_root(second.path()))
            .await
            .expect("apply");
        assert!(container.descriptors_all().is_empty());
        assert_eq!(container.root().as_deref(), Some(second.path()));

        container.update().await.expect("update");
        let all = container.descriptors_all();
        assert_eq!(paths(&all), vec!["only.txt"]);
        assert_eq!(all[0].status, Status::Clean);
    }

    #[tokio::test]
    async fn test_dispatch_maps_operations() {
        let dir = workspace();
        let container = FileContainer::new(Some(dir.path().to_path_buf()));

        let result = container
            .dispatch(RequestEnvelope::new(EventKind::Update, None))
            .await;
        assert!(result.successful);
        assert_eq!(result.event_type, EventKind::Update);
        assert!(result.validate_for(EventKind::Update).is_ok());

        let result = container
            .dispatch(RequestEnvelope::new(
                EventKind::Settings,
                Some(Payload::Settings(SettingsSnapshot::new().with_exclude(")"))),
            ))
            .await;
        assert!(!result.successful);
        assert!(result.payload.is_none());
        assert!(result.failure_message().contains("invalid exclude pattern"));

        let result = container
            .dispatch(RequestEnvelope::new(EventKind::DescriptorsByStatus, None))
            .await;
        assert!(!result.successful);
        assert_eq!(result.event_type, EventKind::DescriptorsByStatus);
    }
}
