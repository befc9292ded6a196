use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::signer::SignerError;
use crate::types::PublicKey;

const BUNKER_SCHEME: &str = "bunker";

/// Configuration for a NIP-46 remote signer session (Nostr Connect).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nip46Config {
    /// Remote signer public key
    pub remote_signer_pubkey: PublicKey,
    /// Relays to use for the NIP-46 RPC traffic
    pub relays: Vec<String>,
    /// Optional app name or label to include as a tag in requests
    #[serde(default)]
    pub app_name: Option<String>,
    /// Connection secret handed out by the bunker
    #[serde(default)]
    pub secret: Option<String>,
    /// Upper bound for a single request/response round trip
    #[serde(with = "crate::serde_millis", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

impl Nip46Config {
    pub fn new(remote_signer_pubkey: PublicKey, relays: Vec<String>) -> Self {
        Self {
            remote_signer_pubkey,
            relays,
            app_name: None,
            secret: None,
            request_timeout: default_request_timeout(),
        }
    }

    /// Parse `bunker://<remote-pubkey>?relay=wss://...&relay=...&secret=...`.
    pub fn from_bunker_uri(uri: &str) -> Result<Self, SignerError> {
        let url = Url::parse(uri.trim())
            .map_err(|e| SignerError::Remote(format!("Invalid bunker uri: {}", e)))?;
        if url.scheme() != BUNKER_SCHEME {
            return Err(SignerError::Remote(format!(
                "Unsupported scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| SignerError::Remote("Missing remote signer pubkey".to_string()))?;
        let remote_signer_pubkey = PublicKey::from_hex(host)?;

        let mut config = Self::new(remote_signer_pubkey, Vec::new());
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay" => {
                    let relay = value.into_owned();
                    if !config.relays.contains(&relay) {
                        config.relays.push(relay);
                    }
                }
                "secret" => config.secret = Some(value.into_owned()),
                _ => {}
            }
        }

        if config.relays.is_empty() {
            return Err(SignerError::Remote("Bunker uri has no relay".to_string()));
        }
        Ok(config)
    }

    pub fn to_bunker_uri(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        if let Some(secret) = &self.secret {
            query.append_pair("secret", secret);
        }
        format!(
            "{}://{}?{}",
            BUNKER_SCHEME,
            self.remote_signer_pubkey.to_hex(),
            query.finish()
        )
    }
}
