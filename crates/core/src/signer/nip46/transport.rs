use async_trait::async_trait;

use crate::signer::pk::PrivateKeySigner;
use crate::signer::SignerError;
use crate::types::kind::NOSTR_CONNECT;
use crate::types::{Event, PublicKey, UnsignedEvent};

/// Outbound half of the bunker channel. Responses come back through the pump.
#[async_trait]
pub trait Nip46Transport: Send + Sync {
    async fn send(&self, event: Event) -> Result<(), SignerError>;
}

/// Wrap an RPC payload in a kind-24133 event addressed to the bunker.
pub fn build_request_event(
    client: &PrivateKeySigner,
    remote_pubkey: &PublicKey,
    app_name: Option<&str>,
    payload: &str,
) -> Result<Event, SignerError> {
    let content = client.nip04_encrypt(remote_pubkey, payload)?;

    let mut tags = vec![vec!["p".to_string(), remote_pubkey.to_hex()]];
    if let Some(app) = app_name {
        tags.push(vec!["client".to_string(), app.to_string()]);
    }

    client.sign_event(&UnsignedEvent::new(NOSTR_CONNECT, content, tags))
}

#[cfg(feature = "connections")]
pub use self::relay::RelayNip46Transport;

#[cfg(feature = "connections")]
mod relay {
    use std::sync::Arc;

    use tracing::{debug, warn};

    use super::*;
    use crate::relays::{PublishOptions, RelayPublisher};

    /// Publishes request events to the bunker's relays.
    pub struct RelayNip46Transport {
        publisher: Arc<RelayPublisher>,
        relays: Vec<String>,
        options: PublishOptions,
    }

    impl RelayNip46Transport {
        pub fn new(publisher: Arc<RelayPublisher>, relays: Vec<String>) -> Self {
            Self {
                publisher,
                relays,
                options: PublishOptions::default(),
            }
        }

        pub fn with_options(mut self, options: PublishOptions) -> Self {
            self.options = options;
            self
        }
    }

    #[async_trait]
    impl Nip46Transport for RelayNip46Transport {
        async fn send(&self, event: Event) -> Result<(), SignerError> {
            let event_id = event.id;
            let report = self
                .publisher
                .publish(event, &self.relays, self.options.clone())
                .wait()
                .await;

            let accepted = report.published();
            if accepted.is_empty() {
                warn!("[nip46] request {} reached no relay", event_id);
                return Err(SignerError::Transport(format!(
                    "No relay accepted request {}",
                    event_id
                )));
            }
            debug!("[nip46] request {} accepted by {} relay(s)", event_id, accepted.len());
            Ok(())
        }
    }
}
