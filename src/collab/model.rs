//! Shared-document data model.
//!
//! The collaboration state lives in four root containers of a loro
//! document: a map holding the application's collaboration object as a
//! single replace-only entry, and three append-style lists for data files,
//! the collaborator roster, and the chat log. Records are stored as child
//! maps with scalar fields so the engine merges them per key.

use chrono::{DateTime, Utc};
use loro::{LoroDoc, LoroList, LoroMap, ToJson};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CollabError;

pub(crate) const COLLAB_MAP: &str = "collabMap";
pub(crate) const COLLAB_OBJ_KEY: &str = "collabObj";
pub(crate) const DATA_FILE_LIST: &str = "collabDataFileList";
pub(crate) const COLLABORATOR_LIST: &str = "collaboratorList";
pub(crate) const CHAT_LIST: &str = "chatList";

/// A participant's presence record in the shared roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollaboratorRecord {
    #[serde(rename = "id")]
    pub session_id: String,
    pub name: String,
    #[serde(rename = "mail")]
    pub email: String,
    #[serde(rename = "hasDataFilesAccess", default)]
    pub has_data_files_access: bool,
}

/// A data file uploaded by the owner, shared with joining collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataFileRecord {
    #[serde(rename = "id")]
    pub remote_id: String,
    #[serde(rename = "url")]
    pub original_url: String,
}

/// An append-only chat entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(rename = "msgId")]
    pub id: Uuid,
    #[serde(rename = "user")]
    pub author: String,
    #[serde(rename = "msg")]
    pub text: String,
    #[serde(rename = "sentAt")]
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: author.into(),
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// Touch the root containers so a fresh document carries all four slots.
///
/// Root containers are created on first access and untouched afterwards,
/// so a guest opening an initialized document never resets existing data.
pub(crate) fn init_containers(doc: &LoroDoc) {
    let _ = doc.get_map(COLLAB_MAP);
    let _ = doc.get_list(DATA_FILE_LIST);
    let _ = doc.get_list(COLLABORATOR_LIST);
    let _ = doc.get_list(CHAT_LIST);
}

/// Replace the collaboration object wholesale.
///
/// The value is stored as JSON text in a single register, so every update
/// is one last-writer-wins replacement, never an in-place mutation.
pub(crate) fn set_collab_obj(doc: &LoroDoc, value: &Value) -> Result<(), CollabError> {
    let text = serde_json::to_string(value)?;
    doc.get_map(COLLAB_MAP).insert(COLLAB_OBJ_KEY, text.as_str())?;
    Ok(())
}

pub(crate) fn push_collaborator(doc: &LoroDoc, record: &CollaboratorRecord) -> Result<(), CollabError> {
    push_record(&doc.get_list(COLLABORATOR_LIST), &serde_json::to_value(record)?)
}

pub(crate) fn push_data_file(doc: &LoroDoc, record: &DataFileRecord) -> Result<(), CollabError> {
    push_record(&doc.get_list(DATA_FILE_LIST), &serde_json::to_value(record)?)
}

pub(crate) fn push_chat_message(doc: &LoroDoc, message: &ChatMessage) -> Result<(), CollabError> {
    push_record(&doc.get_list(CHAT_LIST), &serde_json::to_value(message)?)
}

/// Remove a collaborator's roster record. Returns whether one was removed.
pub(crate) fn remove_collaborator(doc: &LoroDoc, session_id: &str) -> Result<bool, CollabError> {
    let roster: Vec<CollaboratorRecord> = read_list(doc, COLLABORATOR_LIST);
    let Some(idx) = roster.iter().position(|c| c.session_id == session_id) else {
        return Ok(false);
    };
    doc.get_list(COLLABORATOR_LIST).delete(idx, 1)?;
    Ok(true)
}

/// Flip a collaborator's data-file access flag to granted.
///
/// Returns `false` when the record is gone or already granted.
pub(crate) fn mark_collaborator_access(doc: &LoroDoc, session_id: &str) -> Result<bool, CollabError> {
    let roster: Vec<CollaboratorRecord> = read_list(doc, COLLABORATOR_LIST);
    let Some(idx) = roster.iter().position(|c| c.session_id == session_id) else {
        return Ok(false);
    };
    if roster[idx].has_data_files_access {
        return Ok(false);
    }

    let mut record = roster[idx].clone();
    record.has_data_files_access = true;

    let list = doc.get_list(COLLABORATOR_LIST);
    list.delete(idx, 1)?;
    let map = list.insert_container(idx, LoroMap::new())?;
    write_fields(&map, &serde_json::to_value(&record)?)?;
    Ok(true)
}

fn push_record(list: &LoroList, record: &Value) -> Result<(), CollabError> {
    let map = list.insert_container(list.len(), LoroMap::new())?;
    write_fields(&map, record)
}

fn write_fields(map: &LoroMap, record: &Value) -> Result<(), CollabError> {
    if let Value::Object(fields) = record {
        for (key, value) in fields {
            match value {
                Value::String(s) => map.insert(key.as_str(), s.as_str())?,
                Value::Bool(b) => map.insert(key.as_str(), *b)?,
                Value::Number(n) if n.is_i64() => map.insert(key.as_str(), n.as_i64().unwrap_or(0))?,
                Value::Number(n) => map.insert(key.as_str(), n.as_f64().unwrap_or(0.0))?,
                _ => continue,
            }
        }
    }
    Ok(())
}

fn read_list<T: DeserializeOwned>(doc: &LoroDoc, name: &str) -> Vec<T> {
    let json = doc.get_deep_value().to_json_value();
    parse_list(json.get(name))
}

fn parse_list<T: DeserializeOwned>(value: Option<&Value>) -> Vec<T> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// The shared state as observed at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ModelSnapshot {
    pub collab_obj: Option<Value>,
    pub files: Vec<DataFileRecord>,
    pub roster: Vec<CollaboratorRecord>,
    pub chat: Vec<ChatMessage>,
}

impl ModelSnapshot {
    pub fn read(doc: &LoroDoc) -> Self {
        let json = doc.get_deep_value().to_json_value();
        let collab_obj = json
            .get(COLLAB_MAP)
            .and_then(|m| m.get(COLLAB_OBJ_KEY))
            .and_then(Value::as_str)
            .and_then(|text| serde_json::from_str(text).ok());

        Self {
            collab_obj,
            files: parse_list(json.get(DATA_FILE_LIST)),
            roster: parse_list(json.get(COLLABORATOR_LIST)),
            chat: parse_list(json.get(CHAT_LIST)),
        }
    }
}

/// A single observed difference between two snapshots.
#[derive(Debug, Clone)]
pub(crate) enum ModelChange {
    CollaboratorJoined(CollaboratorRecord),
    CollaboratorLeft(CollaboratorRecord),
    AccessGranted(CollaboratorRecord),
    CollabObjReplaced(Value),
    ChatAppended(ChatMessage),
}

/// Compute the changes between two observations of the shared state.
///
/// The lists are append-style (the roster additionally supports removal
/// and the access-flag flip), so identity-based set differences recover
/// the exact records that changed. A collaboration-object write carrying
/// a value identical to the current one is indistinguishable from no
/// write at all and reports nothing.
pub(crate) fn diff(old: &ModelSnapshot, new: &ModelSnapshot) -> Vec<ModelChange> {
    let mut changes = Vec::new();

    for collaborator in &new.roster {
        match old.roster.iter().find(|c| c.session_id == collaborator.session_id) {
            None => changes.push(ModelChange::CollaboratorJoined(collaborator.clone())),
            Some(before)
                if !before.has_data_files_access && collaborator.has_data_files_access =>
            {
                changes.push(ModelChange::AccessGranted(collaborator.clone()));
            }
            Some(_) => {}
        }
    }

    for collaborator in &old.roster {
        if !new.roster.iter().any(|c| c.session_id == collaborator.session_id) {
            changes.push(ModelChange::CollaboratorLeft(collaborator.clone()));
        }
    }

    if new.collab_obj != old.collab_obj {
        if let Some(value) = &new.collab_obj {
            changes.push(ModelChange::CollabObjReplaced(value.clone()));
        }
    }

    for message in &new.chat {
        if !old.chat.iter().any(|m| m.id == message.id) {
            changes.push(ModelChange::ChatAppended(message.clone()));
        }
    }

    changes
}
