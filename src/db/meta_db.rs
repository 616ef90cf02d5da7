//! In-memory `meta_db` (spec.md §3 `api_meta_map`, §4.4).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;

use super::MetaDb;
use crate::error::ApiError;
use crate::path::ApiPath;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Per-path metadata. `extra` holds provider-specific key/value pairs the
/// core passes through without interpreting (spec.md's open-ended
/// "arbitrary metadata map" wording).
#[derive(Debug, Clone, Default)]
pub struct ApiMetaMap {
    pub size: u64,
    pub directory: bool,
    pub source_path: String,
    pub accessed: u64,
    pub modified: u64,
    pub pinned: bool,
    pub extra: HashMap<String, String>,
}

impl ApiMetaMap {
    pub fn new_file(source_path: String, size: u64) -> Self {
        let now = now_secs();
        Self { size, directory: false, source_path, accessed: now, modified: now, pinned: false, extra: HashMap::new() }
    }

    pub fn new_directory() -> Self {
        let now = now_secs();
        Self { size: 0, directory: true, source_path: String::new(), accessed: now, modified: now, pinned: false, extra: HashMap::new() }
    }

    pub fn touch_accessed(&mut self) {
        self.accessed = now_secs();
    }
}

/// `dashmap`-backed `meta_db`: one table keyed by `api_path`, plus a
/// `source_path -> api_path` reverse index kept in lock-step so renames
/// never leave the index stale (spec.md invariant 9).
pub struct InMemoryMetaDb {
    by_path: DashMap<ApiPath, ApiMetaMap>,
    by_source: DashMap<String, ApiPath>,
}

impl Default for InMemoryMetaDb {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetaDb {
    pub fn new() -> Self {
        Self { by_path: DashMap::new(), by_source: DashMap::new() }
    }
}

#[async_trait]
impl MetaDb for InMemoryMetaDb {
    async fn get(&self, path: &ApiPath) -> Option<ApiMetaMap> {
        self.by_path.get(path).map(|e| e.clone())
    }

    async fn put(&self, path: &ApiPath, meta: ApiMetaMap) {
        if !meta.source_path.is_empty() {
            self.by_source.insert(meta.source_path.clone(), path.clone());
        }
        self.by_path.insert(path.clone(), meta);
    }

    async fn remove(&self, path: &ApiPath) -> Option<ApiMetaMap> {
        let removed = self.by_path.remove(path).map(|(_, v)| v);
        if let Some(meta) = &removed {
            if !meta.source_path.is_empty() {
                self.by_source.remove(&meta.source_path);
            }
        }
        removed
    }

    async fn rename(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError> {
        if self.by_path.contains_key(to) {
            return Err(ApiError::AlreadyExists);
        }
        let Some((_, meta)) = self.by_path.remove(from) else {
            return Err(ApiError::NotFound);
        };
        if !meta.source_path.is_empty() {
            self.by_source.insert(meta.source_path.clone(), to.clone());
        }
        self.by_path.insert(to.clone(), meta);
        Ok(())
    }

    async fn source_path_to_api_path(&self, source_path: &str) -> Option<ApiPath> {
        self.by_source.get(source_path).map(|e| e.clone())
    }

    async fn set_pinned(&self, path: &ApiPath, pinned: bool) -> Result<(), ApiError> {
        let mut entry = self.by_path.get_mut(path).ok_or(ApiError::NotFound)?;
        entry.pinned = pinned;
        Ok(())
    }
}
