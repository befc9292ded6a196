use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{EventId, Kind, PublicKey, Timestamp, TypesError};

type Result<T> = std::result::Result<T, TypesError>;

pub fn timestamp_now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Canonical pre-image of an event id: `[0,pubkey,created_at,kind,tags,content]`.
///
/// Compact JSON, `/` left alone, non-ASCII left as UTF-8 and control characters
/// escaped the way every NIP-01 relay expects.
pub fn canonical_json(
    pubkey: &PublicKey,
    created_at: Timestamp,
    kind: Kind,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]).to_string()
}

pub fn compute_event_id(
    pubkey: &PublicKey,
    created_at: Timestamp,
    kind: Kind,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    let serialized = canonical_json(pubkey, created_at, kind, tags, content);
    EventId(Sha256::digest(serialized.as_bytes()).into())
}

// ============================================================================
// UnsignedEvent
// ============================================================================

/// An event before signing. The pubkey is filled in by the signer when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(kind: Kind, content: impl Into<String>, tags: Vec<Vec<String>>) -> Self {
        Self {
            pubkey: None,
            created_at: timestamp_now(),
            kind,
            tags,
            content: content.into(),
        }
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_pubkey(mut self, pubkey: PublicKey) -> Self {
        self.pubkey = Some(pubkey);
        self
    }

    pub fn add_tag(&mut self, tag: Vec<String>) {
        self.tags.push(tag);
    }

    /// Canonical serialization as bytes. Fails when no pubkey has been set.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let pubkey = self
            .pubkey
            .as_ref()
            .ok_or_else(|| TypesError::MissingField("pubkey".to_string()))?;
        Ok(canonical_json(pubkey, self.created_at, self.kind, &self.tags, &self.content).into_bytes())
    }

    /// Event id for this event as if signed by `pubkey`.
    pub fn id_for(&self, pubkey: &PublicKey) -> EventId {
        compute_event_id(pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    pub fn compute_id(&self) -> Result<EventId> {
        let pubkey = self
            .pubkey
            .as_ref()
            .ok_or_else(|| TypesError::MissingField("pubkey".to_string()))?;
        Ok(self.id_for(pubkey))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TypesError::InvalidFormat(e.to_string()))
    }
}

// ============================================================================
// Event
// ============================================================================

/// A signed event, in relay wire field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn tags(&self) -> &[Vec<String>] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn canonical_json(&self) -> String {
        canonical_json(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    /// Id recomputed from the event's fields, independent of `self.id`.
    pub fn compute_id(&self) -> EventId {
        compute_event_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: Some(self.pubkey),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Recompute the id and check the Schnorr signature against the pubkey.
    #[cfg(feature = "crypto")]
    pub fn verify(&self) -> Result<()> {
        use k256::schnorr::{Signature, VerifyingKey};
        use signature::hazmat::PrehashVerifier;

        if self.compute_id() != self.id {
            return Err(TypesError::InvalidFormat("Event id mismatch".to_string()));
        }

        let verifying_key = VerifyingKey::from_bytes(&self.pubkey.0)
            .map_err(|_| TypesError::InvalidFormat("Invalid public key".to_string()))?;
        let signature_bytes = hex::decode(&self.sig)
            .map_err(|_| TypesError::InvalidFormat("Invalid signature hex".to_string()))?;
        let signature = Signature::try_from(signature_bytes.as_slice())
            .map_err(|_| TypesError::InvalidFormat("Invalid signature format".to_string()))?;

        verifying_key
            .verify_prehash(&self.id.0, &signature)
            .map_err(|_| TypesError::InvalidFormat("Signature verification failed".to_string()))
    }

    /// Relay wire object `{id,pubkey,created_at,kind,tags,content,sig}`.
    pub fn to_json(&self) -> String {
        self.as_value().to_string()
    }

    pub fn as_value(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_hex(),
            "pubkey": self.pubkey.to_hex(),
            "created_at": self.created_at,
            "kind": self.kind,
            "tags": self.tags,
            "content": self.content,
            "sig": self.sig,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TypesError::InvalidFormat(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| TypesError::InvalidFormat(e.to_string()))
    }

    // ------------------------------------------------------------------------
    // Tag accessors
    // ------------------------------------------------------------------------

    /// Value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }

    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
            .collect()
    }

    pub fn p_tags(&self) -> Vec<&str> {
        self.tag_values("p")
    }

    pub fn e_tags(&self) -> Vec<&str> {
        self.tag_values("e")
    }

    /// Decoded invoice carried by a zap receipt's `bolt11` tag.
    pub fn bolt11(&self) -> Option<crate::bolt11::Bolt11Invoice> {
        self.tag_value("bolt11").and_then(crate::bolt11::decode)
    }
}
