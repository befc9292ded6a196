//! nipcast core
//!
//! Nostr event construction, signing and relay publishing, plus the bech32
//! codecs the client needs around them (NIP-19 identifiers, BOLT11 invoices).

pub mod bech32;
pub mod bolt11;
pub mod nip19;
pub mod telemetry;
pub mod types;

// Signing and NIP-04 available only with 'crypto' feature
#[cfg(feature = "crypto")]
pub mod signer;

// Relay publishing available only with 'connections' feature
#[cfg(feature = "connections")]
pub mod relays;

pub(crate) mod serde_millis;

use thiserror::Error;

pub use bech32::Bech32Error;
pub use bolt11::{Bolt11Invoice, Network};
pub use nip19::{Nip19, Nip19Error};
pub use types::{Event, EventId, Kind, PublicKey, SecretKey, Timestamp, TypesError, UnsignedEvent};

#[cfg(feature = "crypto")]
pub use signer::{Signer, SignerConfig, SignerError, SigningIdentity};
#[cfg(feature = "crypto")]
pub use types::Keys;

#[cfg(feature = "connections")]
pub use relays::{PublishHandle, PublishOptions, PublishReport, PublishStatus, RelayError, RelayPublisher};

#[derive(Debug, Error)]
pub enum NostrError {
    #[error("Bech32 error: {0}")]
    Bech32(#[from] Bech32Error),
    #[error("NIP-19 error: {0}")]
    Nip19(#[from] Nip19Error),
    #[error("Types error: {0}")]
    Types(#[from] TypesError),
    #[cfg(feature = "crypto")]
    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),
    #[cfg(feature = "connections")]
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

// Common result type
pub type NostrResult<T> = Result<T, NostrError>;
