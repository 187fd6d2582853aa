//! Realtime collaboration over a shared document.

pub mod events;
pub mod hub;
pub mod model;
pub mod session;

pub use events::{CollabEvents, LoggingEvents, SessionState};
pub use hub::{LocalDocHub, RoomHandle, RoomUpdate, SharedDocService};
pub use model::{ChatMessage, CollaboratorRecord, DataFileRecord};
pub use session::{CollabSession, CollabSettings};
