//! Cloud file-manager abstraction.
//!
//! `FileManager` defines the operation set every storage backend implements:
//! the remote document-store client for production, the in-process memory
//! backend for tests and demos.

pub mod memory;
pub mod remote;
mod types;

pub use memory::MemoryFileManager;
pub use remote::RemoteFileManager;
pub use types::{EntryMeta, Principal, ShareRole, UserInfo};

use async_trait::async_trait;

use crate::error::FileError;

/// Operation set of a cloud file manager.
#[async_trait]
pub trait FileManager: Send + Sync {
    /// Request authorization for the backing store. Denial is a normal
    /// outcome (`Ok(false)`), not an error. `interactive` permits prompting
    /// the user.
    async fn request_access(&self, interactive: bool) -> Result<bool, FileError>;

    /// Create a directory path, `mkdir -p` style: existing segments are
    /// reused, missing ones created. Returns the entry of the final segment.
    async fn create_path(&self, path: &str) -> Result<EntryMeta, FileError>;

    /// Look up a non-folder entry by path. `Ok(None)` when absent.
    async fn is_entry(&self, path: &str) -> Result<Option<EntryMeta>, FileError>;

    /// Create an empty entry at `path` with the given MIME type, creating
    /// parent folders as needed.
    async fn create(&self, path: &str, mime_type: &str) -> Result<EntryMeta, FileError>;

    /// Fetch entry metadata by id (the by-id fast path).
    async fn entry_meta(&self, id: &str) -> Result<EntryMeta, FileError>;

    /// Read an entry's bytes by id.
    async fn read(&self, id: &str) -> Result<Vec<u8>, FileError>;

    /// Write `bytes` to `path`, creating parent folders as needed.
    async fn write(&self, path: &str, bytes: &[u8], mime_type: &str) -> Result<EntryMeta, FileError>;

    /// Grant `principal` the given role on an entry.
    async fn share(&self, id: &str, principal: &Principal, role: ShareRole) -> Result<(), FileError>;

    /// Information about the authorized user. Cached for the lifetime of the
    /// client instance.
    async fn current_user(&self) -> Result<UserInfo, FileError>;

    /// Read an entry's bytes by path. `Ok(None)` when absent.
    async fn read_by_path(&self, path: &str) -> Result<Option<Vec<u8>>, FileError> {
        match self.is_entry(path).await? {
            Some(meta) => Ok(Some(self.read(&meta.id).await?)),
            None => Ok(None),
        }
    }

    /// Resolve a path, then grant `principal` the given role on it.
    async fn share_by_path(
        &self,
        path: &str,
        principal: &Principal,
        role: ShareRole,
    ) -> Result<(), FileError> {
        match self.is_entry(path).await? {
            Some(meta) => self.share(&meta.id, principal, role).await,
            None => Err(FileError::NotFound(path.to_string())),
        }
    }
}
