//! In-process file manager.
//!
//! Implements the same check-then-create path semantics as the remote
//! client against an in-memory tree. Used by tests and demos; sharing
//! grants are recorded so scenarios can assert on them.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{EntryMeta, FileManager, Principal, ShareRole, UserInfo};
use crate::error::FileError;
use crate::utils::path::{path_segments, split_parent};

const ROOT_ENTRY_ID: &str = "root";
const FOLDER_MIME: &str = "application/vnd.cloudroom.folder";

/// A sharing grant as recorded by the memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedGrant {
    pub entry_id: String,
    pub principal: Principal,
    pub role: ShareRole,
}

#[derive(Debug, Clone)]
struct MemEntry {
    meta: EntryMeta,
    parent: String,
    data: Vec<u8>,
}

#[derive(Debug)]
struct MemState {
    entries: HashMap<String, MemEntry>,
    grants: Vec<RecordedGrant>,
    next_id: u64,
}

impl MemState {
    fn child(&self, parent: &str, name: &str, folder: bool) -> Option<EntryMeta> {
        self.entries
            .values()
            .find(|e| e.parent == parent && e.meta.name == name && e.meta.folder == folder)
            .map(|e| e.meta.clone())
    }

    fn insert(&mut self, parent: &str, name: &str, mime_type: &str, folder: bool, data: Vec<u8>) -> EntryMeta {
        self.next_id += 1;
        let meta = EntryMeta {
            id: format!("mem-{}", self.next_id),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            folder,
        };
        self.entries.insert(
            meta.id.clone(),
            MemEntry {
                meta: meta.clone(),
                parent: parent.to_string(),
                data,
            },
        );
        meta
    }
}

pub struct MemoryFileManager {
    user: UserInfo,
    grant_access: bool,
    state: Mutex<MemState>,
}

impl MemoryFileManager {
    pub fn new(user: UserInfo) -> Self {
        Self {
            user,
            grant_access: true,
            state: Mutex::new(MemState {
                entries: HashMap::new(),
                grants: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// A backend whose `request_access` always reports denial.
    pub fn with_access_denied(user: UserInfo) -> Self {
        Self {
            grant_access: false,
            ..Self::new(user)
        }
    }

    /// All sharing grants issued so far, in issue order.
    pub async fn grants(&self) -> Vec<RecordedGrant> {
        self.state.lock().await.grants.clone()
    }

    /// Number of grants issued to a specific user.
    pub async fn grant_count_for(&self, email: &str) -> usize {
        self.state
            .lock()
            .await
            .grants
            .iter()
            .filter(|g| matches!(&g.principal, Principal::User(mail) if mail == email))
            .count()
    }

    /// Total number of entries, folders included.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

#[async_trait]
impl FileManager for MemoryFileManager {
    async fn request_access(&self, _interactive: bool) -> Result<bool, FileError> {
        Ok(self.grant_access)
    }

    async fn create_path(&self, path: &str) -> Result<EntryMeta, FileError> {
        let segments = path_segments(path);
        if segments.is_empty() {
            return Err(FileError::InvalidPath(path.to_string()));
        }

        let mut state = self.state.lock().await;
        let mut parent = ROOT_ENTRY_ID.to_string();
        let mut entry = None;
        for segment in &segments {
            let next = match state.child(&parent, segment, true) {
                Some(found) => found,
                None => state.insert(&parent, segment, FOLDER_MIME, true, Vec::new()),
            };
            parent = next.id.clone();
            entry = Some(next);
        }
        entry.ok_or_else(|| FileError::InvalidPath(path.to_string()))
    }

    async fn is_entry(&self, path: &str) -> Result<Option<EntryMeta>, FileError> {
        let segments = path_segments(path);
        if segments.is_empty() {
            return Ok(None);
        }

        let state = self.state.lock().await;
        let mut parent = ROOT_ENTRY_ID.to_string();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            match state.child(&parent, segment, !last) {
                Some(found) if last => return Ok(Some(found)),
                Some(found) => parent = found.id,
                None => return Ok(None),
            }
        }
        Ok(None)
    }

    async fn create(&self, path: &str, mime_type: &str) -> Result<EntryMeta, FileError> {
        let (parent_path, name) = split_parent(path);
        if name.is_empty() {
            return Err(FileError::InvalidPath(path.to_string()));
        }
        let parent = if parent_path.is_empty() {
            ROOT_ENTRY_ID.to_string()
        } else {
            self.create_path(&parent_path).await?.id
        };
        let mut state = self.state.lock().await;
        Ok(state.insert(&parent, &name, mime_type, false, Vec::new()))
    }

    async fn entry_meta(&self, id: &str) -> Result<EntryMeta, FileError> {
        let state = self.state.lock().await;
        state
            .entries
            .get(id)
            .map(|e| e.meta.clone())
            .ok_or_else(|| FileError::NotFound(id.to_string()))
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>, FileError> {
        let state = self.state.lock().await;
        state
            .entries
            .get(id)
            .map(|e| e.data.clone())
            .ok_or_else(|| FileError::NotFound(id.to_string()))
    }

    async fn write(&self, path: &str, bytes: &[u8], mime_type: &str) -> Result<EntryMeta, FileError> {
        let (parent_path, name) = split_parent(path);
        if name.is_empty() {
            return Err(FileError::InvalidPath(path.to_string()));
        }
        let parent = if parent_path.is_empty() {
            ROOT_ENTRY_ID.to_string()
        } else {
            self.create_path(&parent_path).await?.id
        };

        let mut state = self.state.lock().await;
        if let Some(existing) = state.child(&parent, &name, false) {
            if let Some(entry) = state.entries.get_mut(&existing.id) {
                entry.data = bytes.to_vec();
            }
            return Ok(existing);
        }
        Ok(state.insert(&parent, &name, mime_type, false, bytes.to_vec()))
    }

    async fn share(&self, id: &str, principal: &Principal, role: ShareRole) -> Result<(), FileError> {
        let mut state = self.state.lock().await;
        if !state.entries.contains_key(id) {
            return Err(FileError::NotFound(id.to_string()));
        }
        state.grants.push(RecordedGrant {
            entry_id: id.to_string(),
            principal: principal.clone(),
            role,
        });
        Ok(())
    }

    async fn current_user(&self) -> Result<UserInfo, FileError> {
        Ok(self.user.clone())
    }
}
