//! Types for the Nostr relay protocol (NIP-01, NIP-42)
//!
//! Wire messages in both directions, the per-relay publish state machine and
//! the options and report a publish works with.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::types::{Event, EventId};

/// Prefix relays put on an `OK false` message when NIP-42 auth is needed.
pub const AUTH_REQUIRED_PREFIX: &str = "auth-required:";

/// Client-to-relay messages
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// ["EVENT", <event JSON>] - Publish an event
    Event(Event),

    /// ["AUTH", <signed kind-22242 event>] - Answer an auth challenge
    Auth(Event),

    /// ["CLOSE", <subscription_id>] - Close subscription
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Event(event) => json!(["EVENT", event.as_value()]),
            ClientMessage::Auth(event) => json!(["AUTH", event.as_value()]),
            ClientMessage::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        }
        .to_string()
    }
}

/// Relay-to-client messages
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Box<Event>,
    },

    /// ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },

    /// ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// ["NOTICE", <message>]
    Notice { message: String },

    /// ["AUTH", <challenge>]
    Auth { challenge: String },

    /// Well-formed frame with a type this client does not handle (COUNT, ...)
    Unknown { message_type: String },
}

impl RelayMessage {
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text).map_err(|_| RelayError::InvalidMessage)?;
        let parts = value.as_array().ok_or(RelayError::InvalidMessage)?;
        let str_at = |i: usize| -> Result<String, RelayError> {
            parts
                .get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(RelayError::InvalidMessage)
        };

        match str_at(0)?.as_str() {
            "EVENT" => {
                let raw = parts.get(2).cloned().ok_or(RelayError::InvalidMessage)?;
                let event = Event::from_value(raw).map_err(|_| RelayError::InvalidMessage)?;
                Ok(RelayMessage::Event {
                    subscription_id: str_at(1)?,
                    event: Box::new(event),
                })
            }
            "OK" => Ok(RelayMessage::Ok {
                event_id: str_at(1)?,
                accepted: parts
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or(RelayError::InvalidMessage)?,
                // Some relays omit the message on success.
                message: str_at(3).unwrap_or_default(),
            }),
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(1)?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(1)?,
                message: str_at(2).unwrap_or_default(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice { message: str_at(1)? }),
            "AUTH" => Ok(RelayMessage::Auth { challenge: str_at(1)? }),
            other => Ok(RelayMessage::Unknown {
                message_type: other.to_string(),
            }),
        }
    }
}

/// State of one relay's attempt within a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishStatus {
    /// Not started yet
    Pending,
    /// Opening the connection
    Connecting,
    /// Event sent, waiting for OK
    Publishing,
    /// Relay accepted the event
    Published,
    /// Connection, timeout or rejection
    Error,
    /// Relay wants NIP-42 auth before accepting
    AuthRequired,
    /// Stopped by the caller
    Cancelled,
}

impl PublishStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublishStatus::Published
                | PublishStatus::Error
                | PublishStatus::AuthRequired
                | PublishStatus::Cancelled
        )
    }

    fn stage(&self) -> u8 {
        match self {
            PublishStatus::Pending => 0,
            PublishStatus::Connecting => 1,
            PublishStatus::Publishing => 2,
            _ => 3,
        }
    }

    /// Forward only, except `AuthRequired -> Pending` for a retry and any
    /// unfinished attempt may be cancelled.
    pub fn can_transition_to(&self, next: PublishStatus) -> bool {
        if *self == PublishStatus::AuthRequired && next == PublishStatus::Pending {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == PublishStatus::Cancelled || next.stage() > self.stage()
    }
}

/// Progress event emitted while a publish is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatusUpdate {
    pub relay: String,
    pub status: PublishStatus,
    /// Relay or error message for terminal states
    pub message: Option<String>,
}

/// Per-call publish settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Answer NIP-42 challenges with the publisher's auth identity
    #[serde(default)]
    pub allow_auth: bool,
    #[serde(with = "crate::serde_millis")]
    pub connect_timeout: Duration,
    #[serde(with = "crate::serde_millis")]
    pub publish_timeout: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            allow_auth: false,
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a publish, one entry per relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub event_id: EventId,
    pub outcomes: BTreeMap<String, PublishStatus>,
    /// Last relay or error message seen per relay
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
}

impl PublishReport {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            outcomes: BTreeMap::new(),
            messages: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, update: &RelayStatusUpdate) {
        self.outcomes.insert(update.relay.clone(), update.status);
        if let Some(message) = &update.message {
            self.messages.insert(update.relay.clone(), message.clone());
        }
    }

    pub fn status(&self, relay: &str) -> Option<PublishStatus> {
        self.outcomes.get(relay).copied()
    }

    fn relays_with(&self, status: PublishStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(relay, _)| relay.as_str())
            .collect()
    }

    pub fn published(&self) -> Vec<&str> {
        self.relays_with(PublishStatus::Published)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.relays_with(PublishStatus::Error)
    }

    pub fn auth_required(&self) -> Vec<&str> {
        self.relays_with(PublishStatus::AuthRequired)
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.values().all(PublishStatus::is_terminal)
    }

    /// Fold a retry's report in. Relays the retry did not touch keep their outcome.
    pub fn merge(&mut self, retry: &PublishReport) {
        for (relay, status) in &retry.outcomes {
            self.outcomes.insert(relay.clone(), *status);
        }
        for (relay, message) in &retry.messages {
            self.messages.insert(relay.clone(), message.clone());
        }
    }
}

/// Error types for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Operation cancelled")]
    Cancelled,
}
