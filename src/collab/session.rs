//! Collaboration session lifecycle.
//!
//! A session attaches to one room, either by creating it (owner) or by
//! joining an existing one (guest). After attach it mirrors the shared
//! document locally, publishes its own changes, and raises [`CollabEvents`]
//! callbacks for everything it observes. All cross-session reactions (the
//! owner granting data-file access to joiners) run off the same observed
//! roster changes, so they work no matter which side committed first.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use loro::LoroDoc;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::{CollabEvents, SessionState};
use super::hub::{RoomHandle, RoomUpdate, SharedDocService};
use super::model::{self, ChatMessage, CollaboratorRecord, DataFileRecord, ModelSnapshot};
use crate::config::Config;
use crate::error::CollabError;
use crate::fm::{FileManager, Principal, ShareRole};
use crate::mail::{InviteMailer, InviteOutcome};

/// MIME type of the realtime model file.
const REALTIME_MIME: &str = "application/vnd.cloudroom.realtime";

/// Store paths the session uses.
#[derive(Debug, Clone)]
pub struct CollabSettings {
    /// Well-known path of the realtime model file the owner creates.
    pub realtime_file_path: String,
    /// Folder the owner uploads data files into.
    pub data_files_base_dir: String,
}

impl CollabSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            realtime_file_path: config.realtime_file_path.clone(),
            data_files_base_dir: config.data_files_base_dir.clone(),
        }
    }
}

impl Default for CollabSettings {
    fn default() -> Self {
        Self {
            realtime_file_path: "/realtimeviewer/model/collab.realtime".to_string(),
            data_files_base_dir: "/realtimeviewer/data".to_string(),
        }
    }
}

struct SessionInner {
    state: SessionState,
    is_owner: bool,
    room_id: Option<String>,
    me: Option<CollaboratorRecord>,
    doc: Option<LoroDoc>,
    room: Option<RoomHandle>,
    last_seen: ModelSnapshot,
    pump: Option<JoinHandle<()>>,
    // collaborators whose baseline full-list grant is still running
    sharing_in_flight: HashSet<String>,
}

struct SessionCtx {
    files: Arc<dyn FileManager>,
    rooms: Arc<dyn SharedDocService>,
    events: Arc<dyn CollabEvents>,
    settings: CollabSettings,
    inner: Mutex<SessionInner>,
}

/// One participant's connection to a collaboration room.
pub struct CollabSession {
    ctx: Arc<SessionCtx>,
}

impl CollabSession {
    pub fn new(
        files: Arc<dyn FileManager>,
        rooms: Arc<dyn SharedDocService>,
        events: Arc<dyn CollabEvents>,
        settings: CollabSettings,
    ) -> Self {
        Self {
            ctx: Arc::new(SessionCtx {
                files,
                rooms,
                events,
                settings,
                inner: Mutex::new(SessionInner {
                    state: SessionState::Unattached,
                    is_owner: false,
                    room_id: None,
                    me: None,
                    doc: None,
                    room: None,
                    last_seen: ModelSnapshot::default(),
                    pump: None,
                    sharing_in_flight: HashSet::new(),
                }),
            }),
        }
    }

    /// Owner path: create the room and seed the collaboration object.
    ///
    /// Returns `Ok(false)` when the user denies authorization; the session
    /// stays `Unattached` and can be started again. Remote faults while
    /// attaching close the session.
    pub async fn start(&self, collab_obj: &Value) -> Result<bool, CollabError> {
        let mut inner = self.ctx.inner.lock().await;
        if inner.state != SessionState::Unattached {
            return Err(CollabError::InvalidState(inner.state));
        }

        inner.state = SessionState::Authorizing;
        let granted = match self.ctx.files.request_access(true).await {
            Ok(granted) => granted,
            Err(error) => {
                inner.state = SessionState::Closed;
                return Err(error.into());
            }
        };
        if !granted {
            info!("authorization denied, session stays unattached");
            inner.state = SessionState::Unattached;
            return Ok(false);
        }

        inner.state = SessionState::Attaching;
        inner.is_owner = true;
        if let Err(error) = attach_as_owner(&self.ctx, &mut inner, collab_obj).await {
            inner.state = SessionState::Closed;
            return Err(error);
        }
        Ok(true)
    }

    /// Guest path: join an existing room by id.
    ///
    /// Same authorization contract as [`start`](Self::start). An unknown
    /// room id closes the session with [`CollabError::RoomNotFound`].
    pub async fn join(&self, room_id: &str) -> Result<bool, CollabError> {
        let mut inner = self.ctx.inner.lock().await;
        if inner.state != SessionState::Unattached {
            return Err(CollabError::InvalidState(inner.state));
        }

        inner.state = SessionState::Authorizing;
        let granted = match self.ctx.files.request_access(true).await {
            Ok(granted) => granted,
            Err(error) => {
                inner.state = SessionState::Closed;
                return Err(error.into());
            }
        };
        if !granted {
            info!("authorization denied, session stays unattached");
            inner.state = SessionState::Unattached;
            return Ok(false);
        }

        inner.state = SessionState::Attaching;
        if let Err(error) = attach_as_guest(&self.ctx, &mut inner, room_id).await {
            inner.state = SessionState::Closed;
            return Err(error);
        }
        Ok(true)
    }

    /// Replace the shared collaboration object.
    pub async fn set_collab_obj(&self, value: &Value) -> Result<(), CollabError> {
        let mut inner = self.ctx.inner.lock().await;
        require_active(&inner)?;
        local_mutate(&self.ctx, &mut inner, |doc| model::set_collab_obj(doc, value))
    }

    /// The collaboration object as last observed.
    pub async fn collab_obj(&self) -> Option<Value> {
        self.ctx.inner.lock().await.last_seen.collab_obj.clone()
    }

    /// The roster as last observed.
    pub async fn collaborators(&self) -> Vec<CollaboratorRecord> {
        self.ctx.inner.lock().await.last_seen.roster.clone()
    }

    /// The shared data files as last observed.
    pub async fn data_files(&self) -> Vec<DataFileRecord> {
        self.ctx.inner.lock().await.last_seen.files.clone()
    }

    /// Upload a data file into the room's data folder and register it.
    ///
    /// Owner only. The uploaded entry is appended to the shared list and
    /// access is fanned out like for any registered file.
    pub async fn upload_data_file(
        &self,
        name: &str,
        bytes: &[u8],
        mime_type: &str,
        original_url: &str,
    ) -> Result<DataFileRecord, CollabError> {
        {
            let inner = self.ctx.inner.lock().await;
            require_active(&inner)?;
            if !inner.is_owner {
                return Err(CollabError::NotOwner);
            }
        }

        let path = format!(
            "{}/{}",
            self.ctx.settings.data_files_base_dir.trim_end_matches('/'),
            name
        );
        let meta = self.ctx.files.write(&path, bytes, mime_type).await?;
        let record = DataFileRecord {
            remote_id: meta.id,
            original_url: original_url.to_string(),
        };
        self.add_data_files(std::slice::from_ref(&record)).await?;
        Ok(record)
    }

    /// Register already-uploaded data files with the room.
    ///
    /// Owner only. Appends the records to the shared list, then fans the
    /// grants out to every other collaborator: ungranted ones get the full
    /// file list and the access flag, already-granted ones get just the
    /// new files.
    pub async fn add_data_files(&self, records: &[DataFileRecord]) -> Result<(), CollabError> {
        let mut inner = self.ctx.inner.lock().await;
        require_active(&inner)?;
        if !inner.is_owner {
            return Err(CollabError::NotOwner);
        }

        local_mutate(&self.ctx, &mut inner, |doc| {
            for record in records {
                model::push_data_file(doc, record)?;
            }
            Ok(())
        })?;

        let files = inner.last_seen.files.clone();
        let own_id = inner.me.as_ref().map(|m| m.session_id.clone());
        let roster = inner.last_seen.roster.clone();
        for collaborator in roster {
            if own_id.as_deref() == Some(collaborator.session_id.as_str()) {
                continue;
            }
            if collaborator.has_data_files_access
                || inner.sharing_in_flight.contains(&collaborator.session_id)
            {
                // the full list was (or is being) granted; top up the new files
                spawn_share(&self.ctx, &mut inner, collaborator, records.to_vec(), false);
            } else {
                spawn_share(&self.ctx, &mut inner, collaborator, files.clone(), true);
            }
        }
        Ok(())
    }

    /// Append a chat message authored by this session's user.
    pub async fn send_chat(&self, text: &str) -> Result<(), CollabError> {
        let mut inner = self.ctx.inner.lock().await;
        require_active(&inner)?;
        let author = inner
            .me
            .as_ref()
            .map(|m| m.name.clone())
            .ok_or(CollabError::NotAttached)?;
        let message = ChatMessage::new(author, text);
        local_mutate(&self.ctx, &mut inner, |doc| model::push_chat_message(doc, &message))
    }

    /// Invite people to this room by mail. Owner only.
    ///
    /// Send failures do not propagate; they are reported in the outcome.
    pub async fn send_room_invite(
        &self,
        mailer: &InviteMailer,
        addresses: &[String],
    ) -> Result<InviteOutcome, CollabError> {
        let room_id = {
            let inner = self.ctx.inner.lock().await;
            require_active(&inner)?;
            if !inner.is_owner {
                return Err(CollabError::NotOwner);
            }
            inner.room_id.clone().ok_or(CollabError::NotAttached)?
        };
        Ok(mailer.send_room_invite(addresses, &room_id).await)
    }

    /// Detach from the room. Guests remove their roster record first;
    /// the owner's record stays. Terminal: the session cannot be reused.
    pub async fn leave(&self) -> Result<(), CollabError> {
        let mut inner = self.ctx.inner.lock().await;
        if inner.state == SessionState::Closed {
            return Ok(());
        }

        if inner.state == SessionState::Active && !inner.is_owner {
            if let Some(session_id) = inner.me.as_ref().map(|m| m.session_id.clone()) {
                if let Err(error) =
                    local_mutate(&self.ctx, &mut inner, |doc| {
                        model::remove_collaborator(doc, &session_id).map(|_| ())
                    })
                {
                    warn!(%error, "failed to remove own roster record on leave");
                }
            }
        }

        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        inner.room = None;
        inner.doc = None;
        inner.state = SessionState::Closed;
        info!(room_id = inner.room_id.as_deref().unwrap_or(""), "session closed");
        Ok(())
    }

    pub async fn state(&self) -> SessionState {
        self.ctx.inner.lock().await.state
    }

    pub async fn is_owner(&self) -> bool {
        self.ctx.inner.lock().await.is_owner
    }

    /// The room id, available once attached. For owners this is the id of
    /// the realtime file the room was created around.
    pub async fn room_id(&self) -> Option<String> {
        self.ctx.inner.lock().await.room_id.clone()
    }
}

fn require_active(inner: &SessionInner) -> Result<(), CollabError> {
    if inner.state != SessionState::Active {
        return Err(CollabError::InvalidState(inner.state));
    }
    Ok(())
}

async fn attach_as_owner(
    ctx: &Arc<SessionCtx>,
    inner: &mut SessionInner,
    collab_obj: &Value,
) -> Result<(), CollabError> {
    let meta = ctx
        .files
        .create(&ctx.settings.realtime_file_path, REALTIME_MIME)
        .await?;
    // anyone holding the room id can open the model file
    ctx.files
        .share(&meta.id, &Principal::Anyone, ShareRole::Writer)
        .await?;

    let doc = LoroDoc::new();
    model::init_containers(&doc);
    model::set_collab_obj(&doc, collab_obj)?;
    doc.commit();
    let snapshot = doc
        .export(loro::ExportMode::Snapshot)
        .map_err(|e| CollabError::Snapshot(e.to_string()))?;

    let room = ctx.rooms.create_room(&meta.id, snapshot).await?;
    info!(room_id = %meta.id, "room created, attaching as owner");
    finish_attach(ctx, inner, meta.id, doc, room).await
}

async fn attach_as_guest(
    ctx: &Arc<SessionCtx>,
    inner: &mut SessionInner,
    room_id: &str,
) -> Result<(), CollabError> {
    let room = ctx.rooms.join_room(room_id).await?;

    let doc = LoroDoc::new();
    let snapshot = room.latest_snapshot();
    if !snapshot.is_empty() {
        doc.import(&snapshot)?;
    }
    model::init_containers(&doc);
    doc.commit();

    info!(room_id, "room joined, attaching as guest");
    finish_attach(ctx, inner, room_id.to_string(), doc, room).await
}

async fn finish_attach(
    ctx: &Arc<SessionCtx>,
    inner: &mut SessionInner,
    room_id: String,
    doc: LoroDoc,
    mut room: RoomHandle,
) -> Result<(), CollabError> {
    let user = ctx.files.current_user().await?;
    let me = CollaboratorRecord {
        session_id: Uuid::new_v4().to_string(),
        name: user.name,
        email: user.email,
        has_data_files_access: inner.is_owner,
    };

    // Baseline before appending the own record: pre-existing shared state
    // raises no events, the own join does.
    inner.last_seen = ModelSnapshot::read(&doc);
    inner.room_id = Some(room_id);
    inner.me = Some(me.clone());
    inner.doc = Some(doc);

    let publisher = room.publisher();
    if let Some(updates) = room.take_updates() {
        inner.pump = Some(spawn_pump(ctx, updates, publisher));
    }
    inner.room = Some(room);

    local_mutate(ctx, inner, |doc| model::push_collaborator(doc, &me))
}

/// Apply a local change, publish the result, and dispatch the observed
/// differences. Callbacks caused by the own commit run with echo
/// suppression for chat and collab-object changes.
fn local_mutate(
    ctx: &Arc<SessionCtx>,
    inner: &mut SessionInner,
    mutate: impl FnOnce(&LoroDoc) -> Result<(), CollabError>,
) -> Result<(), CollabError> {
    let doc = inner.doc.as_ref().ok_or(CollabError::NotAttached)?;
    mutate(doc)?;
    doc.commit();
    let snapshot = doc
        .export(loro::ExportMode::Snapshot)
        .map_err(|e| CollabError::Snapshot(e.to_string()))?;
    if let Some(room) = inner.room.as_ref() {
        room.publish(snapshot);
    }
    process_changes(ctx, inner, true);
    Ok(())
}

fn process_changes(ctx: &Arc<SessionCtx>, inner: &mut SessionInner, local: bool) {
    let Some(doc) = inner.doc.as_ref() else {
        return;
    };
    let fresh = ModelSnapshot::read(doc);
    let changes = model::diff(&inner.last_seen, &fresh);
    inner.last_seen = fresh;

    let own_id = inner.me.as_ref().map(|m| m.session_id.clone());
    for change in changes {
        match change {
            model::ModelChange::CollaboratorJoined(collaborator) => {
                let is_me = own_id.as_deref() == Some(collaborator.session_id.as_str());
                ctx.events.on_connect(&collaborator);
                if is_me && inner.state == SessionState::Attaching {
                    inner.state = SessionState::Active;
                    info!(name = %collaborator.name, "session active");
                } else if inner.is_owner && !is_me && !collaborator.has_data_files_access {
                    let files = inner.last_seen.files.clone();
                    spawn_share(ctx, inner, collaborator, files, true);
                }
            }
            model::ModelChange::CollaboratorLeft(collaborator) => {
                let is_me = own_id.as_deref() == Some(collaborator.session_id.as_str());
                if !(local && is_me) {
                    ctx.events.on_disconnect(&collaborator);
                }
            }
            model::ModelChange::AccessGranted(collaborator) => {
                ctx.events
                    .on_data_files_shared(&collaborator, &inner.last_seen.files);
            }
            model::ModelChange::CollabObjReplaced(value) => {
                if !local {
                    ctx.events.on_collab_obj_changed(&value);
                }
            }
            model::ModelChange::ChatAppended(message) => {
                if !local {
                    ctx.events.on_chat_message(&message);
                }
            }
        }
    }
}

fn spawn_pump(
    ctx: &Arc<SessionCtx>,
    mut updates: broadcast::Receiver<RoomUpdate>,
    publisher: Uuid,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(ctx);
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if update.publisher == publisher {
                        continue;
                    }
                    let Some(ctx) = weak.upgrade() else {
                        break;
                    };
                    let mut inner = ctx.inner.lock().await;
                    if inner.state == SessionState::Closed {
                        break;
                    }
                    match inner.doc.as_ref() {
                        Some(doc) => {
                            if let Err(error) = doc.import(&update.snapshot) {
                                warn!(%error, "failed to import room update");
                                continue;
                            }
                        }
                        None => continue,
                    }
                    process_changes(&ctx, &mut inner, false);
                }
                // A full snapshot follows with the next update, so a gap
                // only delays convergence.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "room update stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Grant the given data files to one collaborator.
///
/// With `mark_access` set this is the collaborator's baseline grant of the
/// full file list: the access flag flips only after every grant succeeded,
/// and at most one such grant runs per collaborator at a time. Without it
/// the grants are a top-up for files registered later; the flag is left
/// alone. With no files there is nothing to grant and the flag stays down
/// until files exist.
fn spawn_share(
    ctx: &Arc<SessionCtx>,
    inner: &mut SessionInner,
    collaborator: CollaboratorRecord,
    files: Vec<DataFileRecord>,
    mark_access: bool,
) {
    if files.is_empty() {
        return;
    }
    if mark_access && !inner.sharing_in_flight.insert(collaborator.session_id.clone()) {
        return;
    }
    let weak = Arc::downgrade(ctx);
    tokio::spawn(async move {
        let Some(ctx) = weak.upgrade() else {
            return;
        };

        let principal = Principal::User(collaborator.email.clone());
        let grants = files
            .iter()
            .map(|file| ctx.files.share(&file.remote_id, &principal, ShareRole::Reader));
        let granted = join_all(grants)
            .await
            .into_iter()
            .filter(Result::is_ok)
            .count();
        let complete = granted == files.len();
        if !complete {
            warn!(
                name = %collaborator.name,
                granted,
                total = files.len(),
                "data file grants incomplete"
            );
        }

        if !mark_access {
            if complete {
                info!(name = %collaborator.name, files = files.len(), "additional data files shared");
            }
            return;
        }

        let mut inner = ctx.inner.lock().await;
        inner.sharing_in_flight.remove(&collaborator.session_id);
        if !complete || inner.state != SessionState::Active {
            return;
        }
        let session_id = collaborator.session_id.clone();
        match local_mutate(&ctx, &mut inner, |doc| {
            model::mark_collaborator_access(doc, &session_id).map(|_| ())
        }) {
            Ok(()) => {
                info!(name = %collaborator.name, files = files.len(), "data files shared");
            }
            Err(error) => {
                warn!(%error, "failed to record data file access grant");
            }
        }
    });
}
