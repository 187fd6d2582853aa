//! cloudroom: a cloud file-manager abstraction and realtime collaboration
//! rooms on top of it.
//!
//! The [`fm`] layer talks to a path-addressed document store (or an
//! in-process stand-in) with token-aware retries. The [`collab`] layer
//! runs collaboration sessions over a shared document: a replace-only
//! collaboration object, a roster with data-file access fan-out, and a
//! chat log. The [`mail`] layer sends room invites out of band.

pub mod auth;
pub mod collab;
pub mod config;
pub mod error;
pub mod fm;
pub mod mail;
pub mod retry;
pub mod utils;

pub use auth::{RefreshTokenProvider, StaticTokenProvider, TokenProvider};
pub use collab::{
    ChatMessage, CollabEvents, CollabSession, CollabSettings, CollaboratorRecord, DataFileRecord,
    LocalDocHub, LoggingEvents, SessionState, SharedDocService,
};
pub use config::Config;
pub use error::{AuthError, CollabError, ConfigError, FileError, MailError, RemoteError};
pub use fm::{
    EntryMeta, FileManager, MemoryFileManager, Principal, RemoteFileManager, ShareRole, UserInfo,
};
pub use mail::{HttpMessageSender, InviteMailer, InviteOutcome, MessageSender};
pub use retry::Retrier;
