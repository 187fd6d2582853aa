//! Multi-session scenarios over the in-process hub and memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, timeout};

use cloudroom::{
    ChatMessage, CollabError, CollabEvents, CollabSession, CollabSettings, CollaboratorRecord,
    DataFileRecord, FileManager, LocalDocHub, MemoryFileManager, Principal, SessionState, UserInfo,
};

#[derive(Default)]
struct Recorder {
    connects: Mutex<Vec<CollaboratorRecord>>,
    disconnects: Mutex<Vec<CollaboratorRecord>>,
    obj_changes: Mutex<Vec<Value>>,
    shared: Mutex<Vec<(CollaboratorRecord, usize)>>,
    chat: Mutex<Vec<ChatMessage>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    fn shared_for(&self, email: &str) -> Option<usize> {
        self.shared
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c.email == email)
            .map(|(_, files)| *files)
    }
}

impl CollabEvents for Recorder {
    fn on_connect(&self, collaborator: &CollaboratorRecord) {
        self.connects.lock().unwrap().push(collaborator.clone());
    }

    fn on_disconnect(&self, collaborator: &CollaboratorRecord) {
        self.disconnects.lock().unwrap().push(collaborator.clone());
    }

    fn on_collab_obj_changed(&self, value: &Value) {
        self.obj_changes.lock().unwrap().push(value.clone());
    }

    fn on_data_files_shared(&self, collaborator: &CollaboratorRecord, files: &[DataFileRecord]) {
        self.shared
            .lock()
            .unwrap()
            .push((collaborator.clone(), files.len()));
    }

    fn on_chat_message(&self, message: &ChatMessage) {
        self.chat.lock().unwrap().push(message.clone());
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn user(name: &str, email: &str) -> UserInfo {
    UserInfo {
        id: format!("id-{name}"),
        name: name.to_string(),
        email: email.to_string(),
    }
}

fn session(
    fm: Arc<MemoryFileManager>,
    hub: Arc<LocalDocHub>,
    events: Arc<Recorder>,
) -> CollabSession {
    CollabSession::new(fm, hub, events, CollabSettings::default())
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let waited = timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for: {what}");
}

struct Room {
    hub: Arc<LocalDocHub>,
    owner_fm: Arc<MemoryFileManager>,
    owner_events: Arc<Recorder>,
    owner: CollabSession,
    room_id: String,
}

async fn owner_room(collab_obj: Value) -> Room {
    init_tracing();
    let hub = Arc::new(LocalDocHub::new());
    let owner_fm = Arc::new(MemoryFileManager::new(user("Ada", "ada@example.org")));
    let owner_events = Recorder::new();
    let owner = session(owner_fm.clone(), hub.clone(), owner_events.clone());

    assert!(owner.start(&collab_obj).await.unwrap());
    let room_id = owner.room_id().await.unwrap();
    Room {
        hub,
        owner_fm,
        owner_events,
        owner,
        room_id,
    }
}

async fn join_guest(room: &Room, name: &str, email: &str) -> (CollabSession, Arc<Recorder>) {
    let fm = Arc::new(MemoryFileManager::new(user(name, email)));
    let events = Recorder::new();
    let guest = session(fm, room.hub.clone(), events.clone());
    assert!(guest.join(&room.room_id).await.unwrap());
    (guest, events)
}

#[tokio::test]
async fn owner_bootstrap_reaches_active_with_seeded_object() {
    let room = owner_room(json!({"data": 0})).await;

    assert_eq!(room.owner.state().await, SessionState::Active);
    assert!(room.owner.is_owner().await);
    assert_eq!(room.owner.collab_obj().await, Some(json!({"data": 0})));

    // the model file exists in the store and is publicly writable
    let meta = room
        .owner_fm
        .is_entry("/realtimeviewer/model/collab.realtime")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.id, room.room_id);
    let grants = room.owner_fm.grants().await;
    assert!(grants
        .iter()
        .any(|g| g.entry_id == meta.id && g.principal == Principal::Anyone));

    // own join record fired on_connect and landed in the roster
    assert_eq!(room.owner_events.connect_count(), 1);
    let roster = room.owner.collaborators().await;
    assert_eq!(roster.len(), 1);
    assert!(roster[0].has_data_files_access);
}

#[tokio::test]
async fn guest_join_mirrors_owner_state() {
    let room = owner_room(json!({"data": 7})).await;
    let (guest, _) = join_guest(&room, "Grace", "grace@example.org").await;

    assert_eq!(guest.state().await, SessionState::Active);
    assert!(!guest.is_owner().await);
    assert_eq!(guest.collab_obj().await, Some(json!({"data": 7})));

    let owner_events = room.owner_events.clone();
    wait_until("owner sees guest connect", move || {
        owner_events.connect_count() == 2
    })
    .await;

    let roster = room.owner.collaborators().await;
    assert_eq!(roster.len(), 2);
}

#[tokio::test]
async fn data_files_are_granted_before_the_access_flag_flips() {
    let room = owner_room(json!({"data": 0})).await;

    // two uploaded data files registered with the room
    let f1 = room
        .owner
        .upload_data_file("a.bin", b"a", "application/octet-stream", "http://src/a")
        .await
        .unwrap();
    let f2 = room
        .owner
        .upload_data_file("b.bin", b"b", "application/octet-stream", "http://src/b")
        .await
        .unwrap();
    assert_ne!(f1.remote_id, f2.remote_id);

    let (guest, guest_events) = join_guest(&room, "Grace", "grace@example.org").await;

    let events = guest_events.clone();
    wait_until("guest sees its data file access", move || {
        events.shared_for("grace@example.org") == Some(2)
    })
    .await;

    // both grants were issued against the store before the flag flipped
    assert_eq!(room.owner_fm.grant_count_for("grace@example.org").await, 2);
    let roster = guest.collaborators().await;
    let grace = roster
        .iter()
        .find(|c| c.email == "grace@example.org")
        .unwrap();
    assert!(grace.has_data_files_access);
}

#[tokio::test]
async fn adding_files_later_fans_out_to_ungranted_guests() {
    let room = owner_room(json!({"data": 0})).await;
    let (_guest, guest_events) = join_guest(&room, "Grace", "grace@example.org").await;

    let owner_events = room.owner_events.clone();
    wait_until("owner sees guest connect", move || {
        owner_events.connect_count() == 2
    })
    .await;

    // with no files the guest's flag stays down
    let roster = room.owner.collaborators().await;
    assert!(!roster
        .iter()
        .find(|c| c.email == "grace@example.org")
        .unwrap()
        .has_data_files_access);

    room.owner
        .upload_data_file("late.bin", b"x", "application/octet-stream", "http://src/late")
        .await
        .unwrap();

    let events = guest_events.clone();
    wait_until("late file reaches the guest", move || {
        events.shared_for("grace@example.org") == Some(1)
    })
    .await;
    assert_eq!(room.owner_fm.grant_count_for("grace@example.org").await, 1);
}

#[tokio::test]
async fn late_uploads_reach_already_granted_guests() {
    let room = owner_room(json!({"data": 0})).await;
    room.owner
        .upload_data_file("a.bin", b"a", "application/octet-stream", "http://src/a")
        .await
        .unwrap();

    let (guest, guest_events) = join_guest(&room, "Grace", "grace@example.org").await;
    let events = guest_events.clone();
    wait_until("guest granted the initial file", move || {
        events.shared_for("grace@example.org") == Some(1)
    })
    .await;
    assert_eq!(room.owner_fm.grant_count_for("grace@example.org").await, 1);

    room.owner
        .upload_data_file("b.bin", b"b", "application/octet-stream", "http://src/b")
        .await
        .unwrap();

    let granted = timeout(Duration::from_secs(5), async {
        while room.owner_fm.grant_count_for("grace@example.org").await < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        granted.is_ok(),
        "second file was not granted to the already-granted guest"
    );

    let synced = timeout(Duration::from_secs(5), async {
        while guest.data_files().await.len() < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(synced.is_ok(), "guest never saw the second file record");

    // the flag flipped exactly once and no grant was duplicated
    sleep(Duration::from_millis(50)).await;
    assert_eq!(room.owner_fm.grant_count_for("grace@example.org").await, 2);
    assert_eq!(guest_events.shared.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn second_guest_does_not_reset_shared_state() {
    let room = owner_room(json!({"data": 1})).await;
    room.owner
        .add_data_files(&[DataFileRecord {
            remote_id: "ext-1".into(),
            original_url: "http://src/ext".into(),
        }])
        .await
        .unwrap();

    let (first, _) = join_guest(&room, "Grace", "grace@example.org").await;
    let (second, _) = join_guest(&room, "Edsger", "edsger@example.org").await;

    let owner_events = room.owner_events.clone();
    wait_until("owner sees both guests", move || {
        owner_events.connect_count() == 3
    })
    .await;

    assert_eq!(second.collab_obj().await, Some(json!({"data": 1})));
    assert_eq!(second.data_files().await.len(), 1);
    assert_eq!(room.owner.collaborators().await.len(), 3);
    assert_eq!(first.collaborators().await.len(), 3);
}

#[tokio::test]
async fn denied_authorization_leaves_the_session_unattached() {
    let hub = Arc::new(LocalDocHub::new());
    let fm = Arc::new(MemoryFileManager::with_access_denied(user(
        "Ada",
        "ada@example.org",
    )));
    let events = Recorder::new();
    let session = session(fm, hub, events.clone());

    assert!(!session.start(&json!({"data": 0})).await.unwrap());
    assert_eq!(session.state().await, SessionState::Unattached);
    assert_eq!(events.connect_count(), 0);
}

#[tokio::test]
async fn joining_an_unknown_room_closes_the_session() {
    let hub = Arc::new(LocalDocHub::new());
    let fm = Arc::new(MemoryFileManager::new(user("Ada", "ada@example.org")));
    let session = session(fm, hub, Recorder::new());

    let result = session.join("no-such-room").await;
    assert!(matches!(result, Err(CollabError::RoomNotFound(_))));
    assert_eq!(session.state().await, SessionState::Closed);
}

#[tokio::test]
async fn guest_leave_removes_its_record_and_notifies_the_peer() {
    let room = owner_room(json!({"data": 0})).await;
    let (guest, guest_events) = join_guest(&room, "Grace", "grace@example.org").await;

    let owner_events = room.owner_events.clone();
    wait_until("owner sees guest connect", move || {
        owner_events.connect_count() == 2
    })
    .await;

    guest.leave().await.unwrap();
    assert_eq!(guest.state().await, SessionState::Closed);

    let owner_events = room.owner_events.clone();
    wait_until("owner sees guest disconnect", move || {
        !owner_events.disconnects.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(room.owner.collaborators().await.len(), 1);
    // the leaving side does not hear its own disconnect
    assert!(guest_events.disconnects.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_is_delivered_remotely_and_suppressed_locally() {
    let room = owner_room(json!({"data": 0})).await;
    let (_guest, guest_events) = join_guest(&room, "Grace", "grace@example.org").await;

    room.owner.send_chat("hello room").await.unwrap();

    let events = guest_events.clone();
    wait_until("chat reaches the guest", move || {
        !events.chat.lock().unwrap().is_empty()
    })
    .await;

    let received = guest_events.chat.lock().unwrap().clone();
    assert_eq!(received[0].author, "Ada");
    assert_eq!(received[0].text, "hello room");
    assert!(room.owner_events.chat.lock().unwrap().is_empty());
}

#[tokio::test]
async fn collab_obj_replacement_reaches_the_peer_without_local_echo() {
    let room = owner_room(json!({"data": 0})).await;
    let (guest, guest_events) = join_guest(&room, "Grace", "grace@example.org").await;

    guest.set_collab_obj(&json!({"data": 1})).await.unwrap();

    let owner_events = room.owner_events.clone();
    wait_until("owner sees the replacement", move || {
        !owner_events.obj_changes.lock().unwrap().is_empty()
    })
    .await;

    assert_eq!(
        room.owner_events.obj_changes.lock().unwrap().last(),
        Some(&json!({"data": 1}))
    );
    assert_eq!(room.owner.collab_obj().await, Some(json!({"data": 1})));
    assert!(guest_events.obj_changes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn guest_cannot_register_data_files() {
    let room = owner_room(json!({"data": 0})).await;
    let (guest, _) = join_guest(&room, "Grace", "grace@example.org").await;

    let result = guest
        .add_data_files(&[DataFileRecord {
            remote_id: "ext-1".into(),
            original_url: "http://src/ext".into(),
        }])
        .await;
    assert!(matches!(result, Err(CollabError::NotOwner)));
}
