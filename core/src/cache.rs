//! Lazily populated directory tree.
//!
//! Nodes live in a flat arena keyed by normalized URL, so a directory's children are
//! either loaded or simply absent and there are no parent/child references to keep
//! in sync. Every `load` swaps the whole child list in one insert; readers only ever
//! see the previous list or the new one.

use crate::error::SvnError;
use crate::listing::RepositoryEntry;
use crate::path;
use crate::repository::Repository;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum Children {
    NotLoaded,
    Loaded(Arc<[RepositoryEntry]>),
}

#[derive(Debug)]
struct Node {
    children: Arc<[RepositoryEntry]>,
    expanded: bool,
}

/// A row of the flattened tree, as the presentation layer draws it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub depth: usize,
    pub expanded: bool,
    pub entry: RepositoryEntry,
}

pub struct DirectoryCache {
    repo: Arc<Repository>,
    nodes: DashMap<String, Node>,
}

impl DirectoryCache {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            nodes: DashMap::new(),
        }
    }

    /// Fetches `path` and replaces whatever was cached for it. A failed fetch leaves
    /// the previous listing in place.
    pub async fn load(&self, path: &str) -> Result<Arc<[RepositoryEntry]>, SvnError> {
        let key = path::normalize(path);

        let mut entries = match self.repo.list(&key).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("failed to list directory {key}: {err}");
                return Err(err);
            }
        };
        sort_entries(&mut entries);
        let children: Arc<[RepositoryEntry]> = entries.into();

        let expanded = self.is_expanded(&key);
        self.nodes.insert(
            key.clone(),
            Node {
                children: children.clone(),
                expanded,
            },
        );
        debug!("cached {} entries for {key}", children.len());

        Ok(children)
    }

    pub fn get_children(&self, path: &str) -> Option<Arc<[RepositoryEntry]>> {
        self.nodes
            .get(&path::normalize(path))
            .map(|node| node.children.clone())
    }

    pub fn children(&self, path: &str) -> Children {
        match self.get_children(path) {
            Some(children) => Children::Loaded(children),
            None => Children::NotLoaded,
        }
    }

    /// Drops the cached children of `path` and everything below it, collapsing them.
    pub fn invalidate(&self, path: &str) {
        let key = path::normalize(path);
        self.nodes.retain(|cached, _| !path::is_within(cached, &key));
        debug!("invalidated {key}");
    }

    /// Forgets every node outside `root`.
    pub fn retain_within(&self, root: &str) {
        let root = path::normalize(root);
        self.nodes.retain(|cached, _| path::is_within(cached, &root));
    }

    pub fn clear(&self) {
        self.nodes.clear();
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.nodes
            .get(&path::normalize(path))
            .map(|node| node.expanded)
            .unwrap_or(false)
    }

    pub fn expanded_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .nodes
            .iter()
            .filter(|node| node.expanded)
            .map(|node| node.key().clone())
            .collect();
        paths.sort();
        paths
    }

    /// Looks `path` up in its parent's cached listing.
    pub fn find_entry(&self, path: &str) -> Option<RepositoryEntry> {
        let key = path::normalize(path);
        let parent = path::parent(&key)?;
        let siblings = self.get_children(&parent)?;
        siblings
            .iter()
            .find(|entry| path::normalize(&entry.full_path) == key)
            .cloned()
    }

    /// Expands a directory that appears in a loaded listing, fetching its children
    /// first when they are not cached yet.
    pub async fn expand(&self, path: &str) -> Result<Arc<[RepositoryEntry]>, SvnError> {
        let key = path::normalize(path);
        match self.find_entry(&key) {
            Some(entry) if entry.is_dir() => {}
            _ => return Err(SvnError::NotExpandable { path: key }),
        }

        let children = match self.get_children(&key) {
            Some(children) => children,
            None => self.load(&key).await?,
        };

        if let Some(mut node) = self.nodes.get_mut(&key) {
            node.expanded = true;
        }
        Ok(children)
    }

    pub fn collapse(&self, path: &str) {
        if let Some(mut node) = self.nodes.get_mut(&path::normalize(path)) {
            node.expanded = false;
        }
    }

    /// Collapses an expanded directory or expands a collapsed one. Returns the new state.
    pub async fn toggle(&self, path: &str) -> Result<bool, SvnError> {
        if self.is_expanded(path) {
            self.collapse(path);
            return Ok(false);
        }
        self.expand(path).await?;
        Ok(true)
    }

    /// Depth-first rows under `root`, inlining the children of expanded directories.
    pub fn visible_rows(&self, root: &str) -> Vec<Row> {
        let mut rows = Vec::new();
        if let Some(children) = self.get_children(root) {
            self.push_rows(&children, 0, &mut rows);
        }
        rows
    }

    fn push_rows(&self, entries: &[RepositoryEntry], depth: usize, rows: &mut Vec<Row>) {
        for entry in entries {
            let expanded = entry.is_dir() && self.is_expanded(&entry.full_path);
            rows.push(Row {
                depth,
                expanded,
                entry: entry.clone(),
            });
            if expanded {
                if let Some(children) = self.get_children(&entry.full_path) {
                    self.push_rows(&children, depth + 1, rows);
                }
            }
        }
    }
}

/// Directories first, then files; each group case-insensitively alphabetical.
pub fn sort_entries(entries: &mut [RepositoryEntry]) {
    entries.sort_by(|a, b| {
        b.is_dir()
            .cmp(&a.is_dir())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
}
