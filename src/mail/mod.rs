//! Room-invite side channel.
//!
//! Invites leave the collaboration path entirely: a plain text message
//! carrying the room id is composed, base64-encoded, and handed to the
//! messaging endpoint. Failures never interrupt a session; they are
//! reported in the outcome.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::TokenProvider;
use crate::config::Config;
use crate::error::{MailError, RemoteError};
use crate::retry::Retrier;

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .unwrap_or_else(|_| unreachable!("invalid address pattern"))
    })
}

/// What happened to one invite request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteOutcome {
    /// Addresses the message was sent to.
    pub accepted: Vec<String>,
    /// Addresses dropped because they are not valid email addresses.
    pub rejected: Vec<String>,
    /// Send failure, if any. `accepted` is empty when this is set.
    pub error: Option<String>,
}

/// Delivers one raw, base64-encoded message.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_raw(&self, encoded: &str) -> Result<(), MailError>;
}

/// Sends messages through the HTTP messaging endpoint, with the same
/// bearer-token and retry treatment as document-store calls.
pub struct HttpMessageSender {
    client: Client,
    send_url: String,
    auth: Arc<dyn TokenProvider>,
    retrier: Retrier,
}

impl HttpMessageSender {
    pub fn new(config: &Config, auth: Arc<dyn TokenProvider>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            send_url: config.mail_send_url.clone(),
            auth: auth.clone(),
            retrier: Retrier::from_config(auth, config),
        }
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send_raw(&self, encoded: &str) -> Result<(), MailError> {
        let client = self.client.clone();
        let url = self.send_url.clone();
        let auth = self.auth.clone();
        let body = json!({ "raw": encoded });

        self.retrier
            .run(move || {
                let request = client.post(&url).json(&body);
                let auth = auth.clone();
                async move {
                    let request = match auth.bearer_token().await {
                        Some(token) => request.bearer_auth(token),
                        None => request,
                    };
                    let response = request
                        .send()
                        .await
                        .map_err(|e| RemoteError::Transport(e.to_string()))?;
                    let status = response.status();
                    if !status.is_success() {
                        let message = response.text().await.unwrap_or_default();
                        return Err(RemoteError::Status {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    Ok(())
                }
            })
            .await?;
        Ok(())
    }
}

/// Composes and sends room invites.
pub struct InviteMailer {
    sender: Arc<dyn MessageSender>,
}

impl InviteMailer {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    /// Invite `addresses` to the room. Invalid addresses are dropped up
    /// front; with nothing valid left, no message goes out at all.
    pub async fn send_room_invite(&self, addresses: &[String], room_id: &str) -> InviteOutcome {
        let (accepted, rejected): (Vec<String>, Vec<String>) = addresses
            .iter()
            .cloned()
            .partition(|address| address_pattern().is_match(address));
        for address in &rejected {
            warn!(address, "dropping invalid invite address");
        }

        if accepted.is_empty() {
            return InviteOutcome {
                accepted,
                rejected,
                error: Some(MailError::NoRecipients.to_string()),
            };
        }

        let message = compose_invite(&accepted, room_id);
        let encoded = STANDARD.encode(message);
        match self.sender.send_raw(&encoded).await {
            Ok(()) => {
                info!(room_id, recipients = accepted.len(), "room invite sent");
                InviteOutcome {
                    accepted,
                    rejected,
                    error: None,
                }
            }
            Err(error) => {
                warn!(%error, room_id, "room invite failed");
                InviteOutcome {
                    accepted: Vec::new(),
                    rejected,
                    error: Some(error.to_string()),
                }
            }
        }
    }
}

fn compose_invite(addresses: &[String], room_id: &str) -> String {
    format!(
        "to: {}\nsubject: Collaboration room id: {room_id}\n\nCollaboration room id: {room_id}\n\nSee you there!",
        addresses.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSender {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSender {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_raw(&self, encoded: &str) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Remote(RemoteError::Transport("down".into())));
            }
            self.sent.lock().unwrap().push(encoded.to_string());
            Ok(())
        }
    }

    #[test]
    fn invite_carries_recipients_and_room_id() {
        let message = compose_invite(
            &["ada@example.org".to_string(), "grace@example.org".to_string()],
            "room-42",
        );
        assert!(message.starts_with("to: ada@example.org, grace@example.org\n"));
        assert!(message.contains("subject: Collaboration room id: room-42"));
        assert!(message.ends_with("See you there!"));
    }

    #[tokio::test]
    async fn invalid_addresses_are_dropped_before_sending() {
        let sender = RecordingSender::new(false);
        let mailer = InviteMailer::new(sender.clone());

        let outcome = mailer
            .send_room_invite(
                &["ada@example.org".to_string(), "not-an-address".to_string()],
                "room-42",
            )
            .await;

        assert_eq!(outcome.accepted, vec!["ada@example.org".to_string()]);
        assert_eq!(outcome.rejected, vec!["not-an-address".to_string()]);
        assert!(outcome.error.is_none());

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let decoded = String::from_utf8(STANDARD.decode(&sent[0]).unwrap()).unwrap();
        assert!(decoded.contains("room-42"));
        assert!(!decoded.contains("not-an-address"));
    }

    #[tokio::test]
    async fn nothing_valid_means_no_send() {
        let sender = RecordingSender::new(false);
        let mailer = InviteMailer::new(sender.clone());

        let outcome = mailer
            .send_room_invite(&["nope".to_string(), "@@".to_string()], "room-42")
            .await;

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected.len(), 2);
        assert!(outcome.error.is_some());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_lands_in_the_outcome() {
        let mailer = InviteMailer::new(RecordingSender::new(true));

        let outcome = mailer
            .send_room_invite(&["ada@example.org".to_string()], "room-42")
            .await;

        assert!(outcome.accepted.is_empty());
        assert!(outcome.error.as_deref().unwrap_or("").contains("down"));
    }
}
