use std::fmt;

use serde_json::Value;
use tracing::info;

use super::model::{ChatMessage, CollaboratorRecord, DataFileRecord};

/// Lifecycle of a collaboration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unattached,
    Authorizing,
    Attaching,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unattached => write!(f, "unattached"),
            SessionState::Authorizing => write!(f, "authorizing"),
            SessionState::Attaching => write!(f, "attaching"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Callbacks the session raises toward the embedding application.
///
/// Delivery is single-threaded per session, in the order the underlying
/// shared document delivers changes. Implementations must not block; the
/// defaults just log, like an unconfigured embedder would want.
pub trait CollabEvents: Send + Sync {
    /// A collaborator's join record became visible (including this session's own).
    fn on_connect(&self, collaborator: &CollaboratorRecord) {
        info!(name = %collaborator.name, "on_connect not overridden: collaborator connected");
    }

    /// A remote collaborator's record was removed from the roster.
    fn on_disconnect(&self, collaborator: &CollaboratorRecord) {
        info!(name = %collaborator.name, "on_disconnect not overridden: collaborator disconnected");
    }

    /// The shared collaboration object was replaced by a remote session.
    /// Local replacements are not echoed.
    fn on_collab_obj_changed(&self, value: &Value) {
        info!(%value, "on_collab_obj_changed not overridden");
    }

    /// A collaborator's data-file access flag flipped to granted. Delivered
    /// to every attached session; each embedder filters for "is this me".
    fn on_data_files_shared(&self, collaborator: &CollaboratorRecord, files: &[DataFileRecord]) {
        info!(name = %collaborator.name, files = files.len(), "on_data_files_shared not overridden");
    }

    /// A chat message arrived from a remote collaborator. Local messages are
    /// not echoed.
    fn on_chat_message(&self, message: &ChatMessage) {
        info!(author = %message.author, "on_chat_message not overridden");
    }
}

/// Default event sink: every callback logs and nothing else.
pub struct LoggingEvents;

impl CollabEvents for LoggingEvents {}
