//! Relay publishing
//!
//! One-off publishes over connections owned by the publish itself:
//!
//! - Concurrent, independent attempts per relay with connect and publish timeouts
//! - Per-relay status stream and a final report
//! - NIP-42 authentication, and explicit retry of the relays that asked for it
//! - Cancellation through the handle

pub mod connection;
pub mod publisher;
pub mod types;
pub mod utils;

pub use connection::{RelayConnector, RelaySocket, WsConnector};
pub use publisher::{PublishHandle, RelayPublisher};
pub use types::{
    ClientMessage, PublishOptions, PublishReport, PublishStatus, RelayError, RelayMessage,
    RelayStatusUpdate,
};
pub use utils::{normalize_relay_url, rank_relay_hints, validate_relay_url};
