//! Event model and key types
//!
//! Fixed-size identifiers (event ids, public keys, secret keys), the unsigned and
//! signed event structures with their canonical serialization, and the kinds
//! this crate builds.

pub mod event;
pub mod keys;
pub mod kind;

use thiserror::Error;

pub use event::{canonical_json, compute_event_id, timestamp_now, Event, UnsignedEvent};
pub use keys::{EventId, PublicKey, SecretKey};
pub use kind::ZapTarget;

#[cfg(feature = "crypto")]
pub use keys::Keys;

pub type Kind = u16;

// Just use u64 directly for timestamp
pub type Timestamp = u64;

/// Common result type for this module
pub type TypesResult<T> = Result<T, TypesError>;

/// Error types for the types module
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Other error: {0}")]
    Other(String),
}
