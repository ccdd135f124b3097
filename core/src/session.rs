//! Session state for one repository connection: the displayed root, the selection,
//! and the user intents that tie the cache, transfers and associations together.

use crate::association::{self, Association, AssociationTable, Preview};
use crate::cache::{DirectoryCache, Row};
use crate::connection::Connection;
use crate::error::{SvnError, message_error};
use crate::listing::{LogEntry, RepositoryEntry};
use crate::path;
use crate::repository::Repository;
use crate::transfer::{
    BatchReport, DEFAULT_DELETE_MESSAGE, DEFAULT_MKDIR_MESSAGE, DEFAULT_UPDATE_MESSAGE,
    DEFAULT_UPLOAD_MESSAGE, TransferCoordinator,
};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entries currently selected in the displayed tree, keyed by normalized path.
#[derive(Clone, Debug, Default)]
pub struct SelectionSet {
    entries: BTreeMap<String, RepositoryEntry>,
}

impl SelectionSet {
    /// Replaces the selection with `entry`.
    pub fn select(&mut self, entry: RepositoryEntry) {
        self.entries.clear();
        self.entries.insert(path::normalize(&entry.full_path), entry);
    }

    /// Adds `entry`, keeping whatever is already selected. Returns false if it already was.
    pub fn add(&mut self, entry: RepositoryEntry) -> bool {
        self.entries
            .insert(path::normalize(&entry.full_path), entry)
            .is_none()
    }

    /// Adds `entry` or removes it when already selected. Returns true if it is now selected.
    pub fn toggle(&mut self, entry: RepositoryEntry) -> bool {
        let key = path::normalize(&entry.full_path);
        if self.entries.remove(&key).is_some() {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&path::normalize(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<RepositoryEntry> {
        self.entries.values().cloned().collect()
    }
}

/// What activating an entry did.
#[derive(Debug)]
pub enum Activation {
    Navigated(Arc<[RepositoryEntry]>),
    Preview(Preview),
    /// Local copy ready for the OS default application.
    External(PathBuf),
}

pub struct Session {
    repo: Arc<Repository>,
    cache: DirectoryCache,
    transfers: TransferCoordinator,
    associations: AssociationTable,
    root: String,
    selection: SelectionSet,
}

impl Session {
    /// Verifies the connection by listing the repository root. Nothing is kept when
    /// the listing fails.
    pub async fn open(
        transfers: TransferCoordinator,
        associations: AssociationTable,
    ) -> Result<Self, SvnError> {
        let repo = transfers.repository().clone();
        let root = path::normalize(repo.root_url());
        let cache = DirectoryCache::new(repo.clone());

        match cache.load(&root).await {
            Ok(entries) => info!("connected to {root}, {} entries", entries.len()),
            Err(err) => {
                warn!("connection to {root} rejected: {err}");
                return Err(err);
            }
        }

        Ok(Self {
            repo,
            cache,
            transfers,
            associations,
            root,
            selection: SelectionSet::default(),
        })
    }

    pub fn connection(&self) -> &Connection {
        self.repo.connection()
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    pub fn transfers(&self) -> &TransferCoordinator {
        &self.transfers
    }

    pub fn associations(&self) -> &AssociationTable {
        &self.associations
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn root_entries(&self) -> Arc<[RepositoryEntry]> {
        self.cache
            .get_children(&self.root)
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Makes `url` the displayed root. On failure the current root and its listing
    /// stay as they were.
    pub async fn navigate(&mut self, url: &str) -> Result<Arc<[RepositoryEntry]>, SvnError> {
        let target = path::normalize(url);
        let entries = self.cache.load(&target).await?;

        debug!("navigated from {} to {target}", self.root);
        self.root = target;
        self.selection.clear();
        self.cache.retain_within(&self.root);
        Ok(entries)
    }

    /// Navigates to the parent of the current root. Returns `None` at the top.
    pub async fn up(&mut self) -> Result<Option<Arc<[RepositoryEntry]>>, SvnError> {
        let Some(parent) = path::parent(&self.root) else {
            return Ok(None);
        };
        self.navigate(&parent).await.map(Some)
    }

    /// Reloads the root, then every expanded directory that still exists under it.
    /// Expanded directories that vanished or fail to load are collapsed.
    pub async fn refresh(&mut self) -> Result<Arc<[RepositoryEntry]>, SvnError> {
        let entries = self.cache.load(&self.root).await?;
        self.selection.clear();

        for expanded in self.cache.expanded_paths() {
            if expanded == self.root || !path::is_within(&expanded, &self.root) {
                continue;
            }
            match self.cache.find_entry(&expanded) {
                Some(entry) if entry.is_dir() => {
                    if let Err(err) = self.cache.load(&expanded).await {
                        warn!("collapsing {expanded} after failed reload: {err}");
                        self.cache.invalidate(&expanded);
                    }
                }
                _ => self.cache.invalidate(&expanded),
            }
        }
        Ok(entries)
    }

    pub async fn toggle_expand(&self, path: &str) -> Result<bool, SvnError> {
        self.cache.toggle(path).await
    }

    pub fn visible_rows(&self) -> Vec<Row> {
        self.cache.visible_rows(&self.root)
    }

    pub fn select(&mut self, entry: RepositoryEntry) {
        self.selection.select(entry);
    }

    pub fn add_to_selection(&mut self, entry: RepositoryEntry) -> bool {
        self.selection.add(entry)
    }

    pub fn toggle_select(&mut self, entry: RepositoryEntry) -> bool {
        self.selection.toggle(entry)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Directories become the new root; files open according to their association.
    pub async fn activate(&mut self, entry: &RepositoryEntry) -> Result<Activation, SvnError> {
        if entry.is_dir() {
            return self.navigate(&entry.full_path).await.map(Activation::Navigated);
        }

        match self.classify(entry) {
            Association::Internal => self.preview(entry, None).await.map(Activation::Preview),
            Association::External => association::hand_off(&self.transfers, entry)
                .await
                .map(Activation::External),
        }
    }

    pub fn classify(&self, entry: &RepositoryEntry) -> Association {
        association::classify(&entry.name, &self.associations)
    }

    pub async fn preview(
        &self,
        entry: &RepositoryEntry,
        revision: Option<u64>,
    ) -> Result<Preview, SvnError> {
        association::preview(&self.transfers, &entry.full_path, revision).await
    }

    pub async fn history(&self, entry: &RepositoryEntry) -> Result<Vec<LogEntry>, SvnError> {
        self.repo.log(&entry.full_path).await
    }

    pub fn set_association(&mut self, extension: &str, mode: Association) -> bool {
        self.associations.set(extension, mode)
    }

    pub fn remove_association(&mut self, extension: &str) -> bool {
        self.associations.remove(extension)
    }

    pub async fn download_selected(&self, destination_dir: &Path) -> BatchReport {
        self.transfers
            .download_batch(&self.selection.entries(), destination_dir)
            .await
    }

    /// Uploads local files into the current root one after another. Names already in
    /// the root listing replace the remote file's content; other names are imported.
    /// The root is reloaded afterwards; a failed reload is logged and the previous
    /// listing stays.
    pub async fn upload_files(&mut self, files: &[PathBuf]) -> BatchReport {
        let existing: Vec<String> = self
            .root_entries()
            .iter()
            .filter(|entry| !entry.is_dir())
            .map(|entry| entry.name.clone())
            .collect();

        let mut report = BatchReport::default();
        for local in files {
            let target = local.to_string_lossy().to_string();
            let Some(name) = local.file_name().map(|name| name.to_string_lossy().to_string())
            else {
                report.record(target, message_error::<()>("local path has no file name"));
                continue;
            };

            let url = path::join(&self.root, &name);
            let result = if existing.contains(&name) {
                self.transfers
                    .update(local, &url, DEFAULT_UPDATE_MESSAGE)
                    .await
            } else {
                self.transfers
                    .upload(local, &url, DEFAULT_UPLOAD_MESSAGE)
                    .await
            };
            report.record(url, result);
        }
        info!(
            "uploaded {}/{} files into {}",
            report.succeeded,
            report.total(),
            self.root
        );

        if let Err(err) = self.reload_root().await {
            warn!("failed to reload {} after upload: {err}", self.root);
        }
        report
    }

    /// Deletes `entry` remotely, then reloads the directory that listed it.
    pub async fn delete(
        &mut self,
        entry: &RepositoryEntry,
        message: Option<&str>,
    ) -> Result<(), SvnError> {
        self.transfers
            .delete(&entry.full_path, message.unwrap_or(DEFAULT_DELETE_MESSAGE))
            .await?;
        self.cache.invalidate(&entry.full_path);

        let parent = path::parent(&entry.full_path).unwrap_or_else(|| self.root.clone());
        if path::normalize(&parent) == self.root {
            self.reload_root().await
        } else {
            self.selection.clear();
            self.cache.load(&parent).await.map(|_| ())
        }
    }

    /// Creates a folder directly under the current root and reloads it.
    pub async fn create_folder(&mut self, name: &str, message: Option<&str>) -> Result<(), SvnError> {
        let name = name.trim();
        if name.is_empty() || name.contains('/') {
            return message_error("folder name must be a single non-empty path segment");
        }

        let url = path::join(&self.root, name);
        self.transfers
            .mkdir(&url, message.unwrap_or(DEFAULT_MKDIR_MESSAGE))
            .await?;
        self.reload_root().await
    }

    async fn reload_root(&mut self) -> Result<(), SvnError> {
        self.cache.load(&self.root).await?;
        self.selection.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::ContentType;
    use crate::command::Verb;
    use crate::test_utils::{ROOT, ScriptedRunner, failure, listing_xml, repository};
    use std::sync::Mutex;

    fn tree_runner() -> Arc<ScriptedRunner> {
        let runner = ScriptedRunner::new();
        runner.on(Verb::List, |spec| {
            let xml = if spec.targets[0].ends_with("/src") {
                listing_xml(&["lib.rs"])
            } else if spec.targets[0].ends_with("/repo") {
                listing_xml(&["dir:trunk", "dir:branches"])
            } else {
                listing_xml(&["dir:src", "notes.txt", "report.docx"])
            };
            Ok(xml.into_bytes())
        });
        runner
    }

    async fn open(runner: Arc<ScriptedRunner>, scratch: &Path) -> Session {
        let transfers = TransferCoordinator::new(repository(runner), scratch);
        Session::open(transfers, AssociationTable::default())
            .await
            .unwrap()
    }

    fn entry_named(session: &Session, name: &str) -> RepositoryEntry {
        session
            .root_entries()
            .iter()
            .find(|entry| entry.name == name)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_rejects_unreachable_repository() {
        let runner = ScriptedRunner::new();
        runner.on(Verb::List, |_| {
            Err(SvnError::CredentialRejected {
                stderr: "svn: E170001: Authorization failed".to_string(),
            })
        });
        let transfers = TransferCoordinator::new(repository(runner), std::env::temp_dir());

        let result = Session::open(transfers, AssociationTable::default()).await;
        assert!(matches!(result, Err(SvnError::CredentialRejected { .. })));
    }

    #[tokio::test]
    async fn test_selection_replace_and_toggle() {
        let session = &mut open(tree_runner(), &std::env::temp_dir()).await;
        let notes = entry_named(session, "notes.txt");
        let report = entry_named(session, "report.docx");

        session.select(notes.clone());
        session.select(report.clone());
        assert_eq!(session.selection().len(), 1);
        assert!(session.selection().contains(&report.full_path));

        assert!(session.toggle_select(notes.clone()));
        assert_eq!(session.selection().len(), 2);
        assert!(!session.toggle_select(notes.clone()));
        assert!(!session.selection().contains(&notes.full_path));

        assert!(session.add_to_selection(notes.clone()));
        assert!(!session.add_to_selection(notes.clone()));
        assert!(session.selection().contains(&notes.full_path));

        session.clear_selection();
        assert!(session.selection().is_empty());
    }

    #[tokio::test]
    async fn test_navigate_clears_selection_and_outside_state() {
        let session = &mut open(tree_runner(), &std::env::temp_dir()).await;
        let src = format!("{ROOT}/src");
        session.toggle_expand(&src).await.unwrap();
        session.select(entry_named(session, "notes.txt"));

        let entries = session.navigate(&format!("{src}/")).await.unwrap();
        assert_eq!(entries[0].name, "lib.rs");
        assert_eq!(session.root(), src);
        assert!(session.selection().is_empty());
        assert!(session.cache().get_children(ROOT).is_none());
        assert!(session.cache().is_expanded(&src));
    }

    #[tokio::test]
    async fn test_failed_navigation_keeps_root() {
        let runner = tree_runner();
        let session = &mut open(runner.clone(), &std::env::temp_dir()).await;
        runner.on(Verb::List, |_| Err(failure(1, "svn: E170000: URL doesn't exist")));

        assert!(session.navigate("https://svn.example.com/other").await.is_err());
        assert_eq!(session.root(), ROOT);
        assert_eq!(session.root_entries().len(), 3);
    }

    #[tokio::test]
    async fn test_up_walks_to_parent() {
        let session = &mut open(tree_runner(), &std::env::temp_dir()).await;

        let entries = session.up().await.unwrap().unwrap();
        assert_eq!(session.root(), "https://svn.example.com/repo");
        assert_eq!(entries.len(), 2);

        session.navigate("https://svn.example.com").await.unwrap();
        assert!(session.up().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_collapses_vanished_directories() {
        let runner = tree_runner();
        let session = &mut open(runner.clone(), &std::env::temp_dir()).await;
        let src = format!("{ROOT}/src");
        session.toggle_expand(&src).await.unwrap();
        assert_eq!(session.visible_rows().len(), 4);

        runner.on_ok(Verb::List, &listing_xml(&["notes.txt"]));
        session.refresh().await.unwrap();

        assert!(!session.cache().is_expanded(&src));
        let rows = session.visible_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.name, "notes.txt");
    }

    #[tokio::test]
    async fn test_activate_dispatches_by_kind_and_association() {
        let runner = tree_runner();
        runner.on_ok(Verb::Cat, "remember the milk");
        runner.stream(vec![b"docx bytes".to_vec()]);
        let scratch = tempfile::tempdir().unwrap();
        let session = &mut open(runner.clone(), scratch.path()).await;

        let notes = entry_named(session, "notes.txt");
        match session.activate(&notes).await.unwrap() {
            Activation::Preview(preview) => {
                assert_eq!(preview.content_type, ContentType::Text);
                assert_eq!(preview.payload, "remember the milk");
            }
            other => panic!("expected preview, got {other:?}"),
        }

        let report = entry_named(session, "report.docx");
        match session.activate(&report).await.unwrap() {
            Activation::External(local) => {
                assert_eq!(local, scratch.path().join("report.docx"));
            }
            other => panic!("expected hand-off, got {other:?}"),
        }

        let src = entry_named(session, "src");
        assert!(matches!(
            session.activate(&src).await.unwrap(),
            Activation::Navigated(_)
        ));
        assert_eq!(session.root(), src.full_path);
    }

    #[tokio::test]
    async fn test_set_association_changes_activation() {
        let session = &mut open(tree_runner(), &std::env::temp_dir()).await;
        let report = entry_named(session, "report.docx");
        assert_eq!(session.classify(&report), Association::External);

        assert!(session.set_association(".DOCX", Association::Internal));
        assert_eq!(session.classify(&report), Association::Internal);
    }

    #[tokio::test]
    async fn test_upload_routes_existing_names_to_update() {
        let runner = tree_runner();
        let imported = Arc::new(Mutex::new(Vec::new()));
        let seen = imported.clone();
        runner.on(Verb::Import, move |spec| {
            seen.lock().unwrap().push(spec.targets[1].clone());
            Ok(Vec::new())
        });
        runner.on(Verb::Update, |spec| {
            let wc = spec.working_dir.clone().unwrap();
            std::fs::write(wc.join(&spec.targets[0]), b"old").unwrap();
            Ok(Vec::new())
        });
        let scratch = tempfile::tempdir().unwrap();
        let session = &mut open(runner.clone(), scratch.path()).await;
        session.select(entry_named(session, "notes.txt"));

        let local = tempfile::tempdir().unwrap();
        let notes = local.path().join("notes.txt");
        let fresh = local.path().join("fresh.txt");
        std::fs::write(&notes, b"new notes").unwrap();
        std::fs::write(&fresh, b"fresh").unwrap();

        let report = session.upload_files(&[notes, fresh]).await;
        assert_eq!(report.succeeded, 2);
        assert!(report.failures.is_empty());
        assert_eq!(*imported.lock().unwrap(), vec![format!("{ROOT}/fresh.txt")]);

        let calls = runner.calls();
        let commit = calls.iter().find(|spec| spec.verb == Verb::Commit).unwrap();
        assert_eq!(commit.message.as_deref(), Some(DEFAULT_UPDATE_MESSAGE));
        let import = calls.iter().find(|spec| spec.verb == Verb::Import).unwrap();
        assert_eq!(import.message.as_deref(), Some(DEFAULT_UPLOAD_MESSAGE));
        assert_eq!(calls.last().unwrap().verb, Verb::List);
        assert!(session.selection().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_create_folder_reload_root() {
        let runner = tree_runner();
        let session = &mut open(runner.clone(), &std::env::temp_dir()).await;
        let notes = entry_named(session, "notes.txt");

        session.delete(&notes, None).await.unwrap();
        session.create_folder("docs", None).await.unwrap();

        let verbs = runner.verbs();
        assert_eq!(
            verbs,
            vec![Verb::List, Verb::Delete, Verb::List, Verb::Mkdir, Verb::List]
        );
        let calls = runner.calls();
        assert_eq!(calls[1].message.as_deref(), Some(DEFAULT_DELETE_MESSAGE));
        assert_eq!(calls[3].targets, vec![format!("{ROOT}/docs")]);
        assert_eq!(calls[3].message.as_deref(), Some(DEFAULT_MKDIR_MESSAGE));
    }

    #[tokio::test]
    async fn test_create_folder_rejects_nested_names() {
        let runner = tree_runner();
        let session = &mut open(runner.clone(), &std::env::temp_dir()).await;

        assert!(session.create_folder("a/b", None).await.is_err());
        assert!(session.create_folder("  ", None).await.is_err());
        assert!(!runner.verbs().contains(&Verb::Mkdir));
    }

    #[tokio::test]
    async fn test_download_selected_uses_selection() {
        let runner = tree_runner();
        runner.stream(vec![b"abc".to_vec()]);
        let session = &mut open(runner.clone(), &std::env::temp_dir()).await;
        session.select(entry_named(session, "notes.txt"));
        session.toggle_select(entry_named(session, "src"));

        let dest = tempfile::tempdir().unwrap();
        let report = session.download_selected(dest.path()).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(std::fs::read(dest.path().join("notes.txt")).unwrap(), b"abc");
        assert!(runner.verbs().contains(&Verb::Export));
    }

    #[tokio::test]
    async fn test_history_lists_log_entries() {
        let runner = tree_runner();
        runner.on_ok(
            Verb::Log,
            r#"<?xml version="1.0"?><log><logentry revision="7"><author>ann</author><date>2024-03-01T10:00:00.000000Z</date><msg>fix</msg></logentry></log>"#,
        );
        let session = open(runner, &std::env::temp_dir()).await;

        let history = session
            .history(&entry_named(&session, "notes.txt"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].revision, 7);
    }
}
