use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata of a document-store entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(default)]
    pub folder: bool,
}

/// Information about the authorized user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "mail")]
    pub email: String,
}

/// Who a sharing grant applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Anyone holding the entry id.
    Anyone,
    /// A specific user, addressed by email.
    User(String),
}

impl Principal {
    pub fn kind(&self) -> &'static str {
        match self {
            Principal::Anyone => "anyone",
            Principal::User(_) => "user",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Principal::Anyone => "",
            Principal::User(email) => email,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ShareRole {
    Reader,
    Writer,
}

impl fmt::Display for ShareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareRole::Reader => write!(f, "reader"),
            ShareRole::Writer => write!(f, "writer"),
        }
    }
}
