//! An in-memory reference [`Provider`](super::Provider), standing in for
//! the out-of-scope Sia/S3/encrypt-passthrough backends. Ported from the
//! teacher's `examples/in_memory` filesystem: a single `RwLock<State>` with
//! a flat `api_path -> Entry` map, rather than a real directory tree, since
//! `ApiPath` is already fully qualified.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{FilesystemItem, ItemAddedCallback, Provider};
use crate::error::ApiError;
use crate::path::ApiPath;
use crate::stop_token::StopToken;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

enum EntryKind {
    Directory,
    File { data: Vec<u8> },
}

struct Entry {
    kind: EntryKind,
    modified: u64,
}

struct State {
    nodes: HashMap<ApiPath, Entry>,
}

impl State {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ApiPath::root(), Entry { kind: EntryKind::Directory, modified: now_secs() });
        Self { nodes }
    }
}

/// An in-memory `Provider`, good enough to drive the file manager, upload
/// manager, and eviction end to end in tests and the `demos/in_memory`
/// example.
pub struct MemoryProvider {
    state: RwLock<State>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self { state: RwLock::new(State::new()) }
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_item(&self, path: &ApiPath) -> Result<FilesystemItem, ApiError> {
        let state = self.state.read().await;
        let entry = state.nodes.get(path).ok_or(ApiError::NotFound)?;
        Ok(FilesystemItem {
            api_path: path.clone(),
            directory: matches!(entry.kind, EntryKind::Directory),
            size: match &entry.kind {
                EntryKind::File { data } => data.len() as u64,
                EntryKind::Directory => 0,
            },
            modified: entry.modified,
        })
    }

    async fn get_directory_items(&self, path: &ApiPath) -> Result<Vec<FilesystemItem>, ApiError> {
        let state = self.state.read().await;
        let parent = state.nodes.get(path).ok_or(ApiError::NotFound)?;
        if !matches!(parent.kind, EntryKind::Directory) {
            return Err(ApiError::NotADirectory);
        }
        let mut items = Vec::new();
        for (child_path, entry) in &state.nodes {
            if child_path != path && child_path.parent() == *path {
                items.push(FilesystemItem {
                    api_path: child_path.clone(),
                    directory: matches!(entry.kind, EntryKind::Directory),
                    size: match &entry.kind {
                        EntryKind::File { data } => data.len() as u64,
                        EntryKind::Directory => 0,
                    },
                    modified: entry.modified,
                });
            }
        }
        Ok(items)
    }

    async fn create_directory(&self, path: &ApiPath) -> Result<(), ApiError> {
        let mut state = self.state.write().await;
        if state.nodes.contains_key(path) {
            return Err(ApiError::AlreadyExists);
        }
        if !state.nodes.contains_key(&path.parent()) {
            return Err(ApiError::NotFound);
        }
        state.nodes.insert(path.clone(), Entry { kind: EntryKind::Directory, modified: now_secs() });
        Ok(())
    }

    async fn remove_directory(&self, path: &ApiPath) -> Result<(), ApiError> {
        let mut state = self.state.write().await;
        match state.nodes.get(path) {
            Some(entry) if matches!(entry.kind, EntryKind::Directory) => {}
            Some(_) => return Err(ApiError::NotADirectory),
            None => return Err(ApiError::NotFound),
        }
        if state.nodes.keys().any(|p| p != path && p.parent() == *path) {
            return Err(ApiError::NotEmpty);
        }
        state.nodes.remove(path);
        Ok(())
    }

    async fn create_file(&self, path: &ApiPath) -> Result<(), ApiError> {
        let mut state = self.state.write().await;
        if state.nodes.contains_key(path) {
            return Err(ApiError::AlreadyExists);
        }
        if !state.nodes.contains_key(&path.parent()) {
            return Err(ApiError::NotFound);
        }
        state.nodes.insert(path.clone(), Entry { kind: EntryKind::File { data: Vec::new() }, modified: now_secs() });
        Ok(())
    }

    async fn remove_file(&self, path: &ApiPath) -> Result<(), ApiError> {
        let mut state = self.state.write().await;
        match state.nodes.get(path) {
            Some(entry) if matches!(entry.kind, EntryKind::File { .. }) => {}
            Some(_) => return Err(ApiError::IsADirectory),
            None => return Err(ApiError::NotFound),
        }
        state.nodes.remove(path);
        Ok(())
    }

    async fn rename_item(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError> {
        let mut state = self.state.write().await;
        if state.nodes.contains_key(to) {
            return Err(ApiError::AlreadyExists);
        }
        let Some(mut entry) = state.nodes.remove(from) else {
            return Err(ApiError::NotFound);
        };
        entry.modified = now_secs();
        state.nodes.insert(to.clone(), entry);
        Ok(())
    }

    async fn read_file(&self, path: &ApiPath, offset: u64, len: usize) -> Result<Vec<u8>, ApiError> {
        let state = self.state.read().await;
        let entry = state.nodes.get(path).ok_or(ApiError::NotFound)?;
        let EntryKind::File { data } = &entry.kind else {
            return Err(ApiError::IsADirectory);
        };
        let start = (offset as usize).min(data.len());
        let end = (start + len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn write_file(&self, path: &ApiPath, offset: u64, data: &[u8]) -> Result<(), ApiError> {
        let mut state = self.state.write().await;
        let entry = state.nodes.get_mut(path).ok_or(ApiError::NotFound)?;
        let EntryKind::File { data: existing } = &mut entry.kind else {
            return Err(ApiError::IsADirectory);
        };
        let start = offset as usize;
        let end = start + data.len();
        if existing.len() < end {
            existing.resize(end, 0);
        }
        existing[start..end].copy_from_slice(data);
        entry.modified = now_secs();
        Ok(())
    }

    async fn resize_file(&self, path: &ApiPath, size: u64) -> Result<(), ApiError> {
        let mut state = self.state.write().await;
        let entry = state.nodes.get_mut(path).ok_or(ApiError::NotFound)?;
        let EntryKind::File { data } = &mut entry.kind else {
            return Err(ApiError::IsADirectory);
        };
        data.resize(size as usize, 0);
        entry.modified = now_secs();
        Ok(())
    }

    async fn is_rename_supported(&self) -> bool {
        true
    }

    async fn upload_file(&self, api_path: &ApiPath, source_path: &Path, stop: &StopToken) -> Result<(), ApiError> {
        if stop.is_stopped() {
            return Err(ApiError::CommError);
        }
        let data = tokio::fs::read(source_path).await.map_err(|_| ApiError::IoError)?;
        if stop.is_stopped() {
            return Err(ApiError::CommError);
        }

        let mut state = self.state.write().await;
        let entry = state
            .nodes
            .entry(api_path.clone())
            .or_insert_with(|| Entry { kind: EntryKind::File { data: Vec::new() }, modified: now_secs() });
        let EntryKind::File { data: existing } = &mut entry.kind else {
            return Err(ApiError::IsADirectory);
        };
        *existing = data;
        entry.modified = now_secs();
        Ok(())
    }

    async fn get_pinned_files(&self) -> Vec<ApiPath> {
        // Pin state lives in meta_db (spec.md §6); the in-memory backend
        // has no independent notion of it.
        Vec::new()
    }

    async fn get_total_drive_space(&self) -> u64 {
        1024 * 1024 * 1024 * 1024
    }

    async fn get_used_drive_space(&self) -> u64 {
        let state = self.state.read().await;
        state
            .nodes
            .values()
            .map(|entry| match &entry.kind {
                EntryKind::File { data } => data.len() as u64,
                EntryKind::Directory => 0,
            })
            .sum()
    }

    async fn start(&self, _on_item_added: ItemAddedCallback) {}

    async fn stop(&self) {}
}
