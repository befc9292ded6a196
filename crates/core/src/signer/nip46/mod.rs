//! NIP-46 remote signer client
//!
//! Requests are JSON-RPC payloads encrypted to the bunker and carried in
//! kind-24133 events signed by a throwaway client key. Answers arrive through
//! the [`Pump`], which hands each one to the request waiting on its id.

pub mod config;
pub mod pump;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::signer::pk::PrivateKeySigner;
use crate::signer::remote::RemoteSigner;
use crate::signer::{SignerError, SignerResult};
use crate::types::kind::NOSTR_CONNECT;
use crate::types::{timestamp_now, Event, EventId, Keys, PublicKey, UnsignedEvent};

pub use config::Nip46Config;
pub use pump::{PendingRequests, Pump};
pub use transport::{build_request_event, Nip46Transport};

#[cfg(feature = "connections")]
pub use transport::RelayNip46Transport;

use pump::PendingGuard;

/// Client side of a Nostr Connect session.
pub struct Nip46Signer {
    config: Nip46Config,
    client: PrivateKeySigner,
    transport: Arc<dyn Nip46Transport>,
    pending: PendingRequests,
    id_counter: AtomicU64,
    user_pubkey: Mutex<Option<PublicKey>>,
}

impl Nip46Signer {
    /// New session with fresh client keys.
    pub fn new(config: Nip46Config, transport: Arc<dyn Nip46Transport>) -> SignerResult<Self> {
        let client_keys = Keys::generate()?;
        Ok(Self::with_client_keys(config, transport, client_keys))
    }

    pub fn with_client_keys(
        config: Nip46Config,
        transport: Arc<dyn Nip46Transport>,
        client_keys: Keys,
    ) -> Self {
        info!(
            "[nip46] session for {} via {} relay(s)",
            config.remote_signer_pubkey,
            config.relays.len()
        );
        Self {
            config,
            client: PrivateKeySigner::new(client_keys),
            transport,
            pending: PendingRequests::default(),
            id_counter: AtomicU64::new(timestamp_now()),
            user_pubkey: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Nip46Config {
        &self.config
    }

    pub fn client_pubkey(&self) -> PublicKey {
        self.client.public_key()
    }

    /// Pump that delivers this session's responses. Feed it every kind-24133
    /// event seen on the session relays.
    pub fn pump(&self) -> Pump {
        Pump::new(
            self.client.keys().clone(),
            self.config.remote_signer_pubkey,
            self.pending.clone(),
        )
    }

    /// REQ filter matching the responses addressed to this session.
    pub fn subscription_filter(&self) -> Value {
        json!({
            "kinds": [NOSTR_CONNECT],
            "#p": [self.client.public_key().to_hex()],
        })
    }

    pub fn bunker_uri(&self) -> String {
        self.config.to_bunker_uri()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Bunkers answer `ack`, or echo the secret for secret-based pairing.
    pub async fn connect(&self) -> SignerResult<()> {
        let mut params = vec![self.config.remote_signer_pubkey.to_hex()];
        if let Some(secret) = &self.config.secret {
            params.push(secret.clone());
        }
        let result = self.rpc_call("connect", params).await?;

        let accepted = result == "ack" || self.config.secret.as_deref() == Some(result.as_str());
        if !accepted {
            return Err(SignerError::Remote(format!("Unexpected connect result: {}", result)));
        }
        info!("[nip46] connected to {}", self.config.remote_signer_pubkey);
        Ok(())
    }

    /// The user's pubkey. Cached after the first answer.
    pub async fn get_public_key(&self) -> SignerResult<PublicKey> {
        if let Some(pk) = *self.user_pubkey_slot() {
            return Ok(pk);
        }
        let result = self.rpc_call("get_public_key", vec![]).await?;
        let pk = PublicKey::from_hex(result.trim())?;
        *self.user_pubkey_slot() = Some(pk);
        Ok(pk)
    }

    pub async fn ping(&self) -> SignerResult<()> {
        let result = self.rpc_call("ping", vec![]).await?;
        if result != "pong" {
            return Err(SignerError::Remote(format!("Unexpected ping result: {}", result)));
        }
        Ok(())
    }

    /// Methods the bunker says it supports.
    pub async fn describe(&self) -> SignerResult<Vec<String>> {
        let result = self.rpc_call("describe", vec![]).await?;
        serde_json::from_str(&result)
            .map_err(|e| SignerError::Remote(format!("Invalid describe result: {}", e)))
    }

    pub async fn nip04_encrypt(&self, peer: &PublicKey, plaintext: &str) -> SignerResult<String> {
        self.rpc_call("nip04_encrypt", vec![peer.to_hex(), plaintext.to_string()])
            .await
    }

    pub async fn nip04_decrypt(&self, peer: &PublicKey, ciphertext: &str) -> SignerResult<String> {
        self.rpc_call("nip04_decrypt", vec![peer.to_hex(), ciphertext.to_string()])
            .await
    }

    async fn rpc_call(&self, method: &str, params: Vec<String>) -> SignerResult<String> {
        let id = self.next_id();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();

        let request = build_request_event(
            &self.client,
            &self.config.remote_signer_pubkey,
            self.config.app_name.as_deref(),
            &payload,
        )?;

        // Register before sending so a fast answer is never missed.
        let response = self.pending.register(&id);
        let _guard = PendingGuard::new(&self.pending, id.clone());

        debug!("[nip46] -> {} id={}", method, id);
        self.transport.send(request).await?;

        match tokio::time::timeout(self.config.request_timeout, response).await {
            Ok(Ok(Ok(result))) => {
                debug!("[nip46] <- {} id={}", method, id);
                Ok(result)
            }
            Ok(Ok(Err(error))) => Err(SignerError::Remote(error)),
            Ok(Err(_)) => Err(SignerError::Remote("Response channel closed".to_string())),
            Err(_) => Err(SignerError::Timeout(self.config.request_timeout)),
        }
    }

    fn next_id(&self) -> String {
        let c = self.id_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        format!("{}-{}", c, self.client.public_key().to_hex().get(..8).unwrap_or_default())
    }

    fn user_pubkey_slot(&self) -> std::sync::MutexGuard<'_, Option<PublicKey>> {
        self.user_pubkey.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteSigner for Nip46Signer {
    async fn sign_event(&self, unsigned: &UnsignedEvent, id: &EventId) -> SignerResult<Event> {
        let template = json!({
            "kind": unsigned.kind,
            "content": unsigned.content,
            "tags": unsigned.tags,
            "created_at": unsigned.created_at,
        })
        .to_string();

        debug!("[nip46] requesting signature for {}", id);
        let result = self.rpc_call("sign_event", vec![template]).await?;
        Event::from_json(&result)
            .map_err(|e| SignerError::Remote(format!("Invalid signed event: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{nip04, Signer, SigningIdentity};
    use crate::types::kind::TEXT_NOTE;
    use futures::channel::mpsc;
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Answer,
        Deny,
        Silent,
        Twice,
    }

    /// Answers requests the way a bunker holding `user` would.
    struct LoopbackBunker {
        bunker: PrivateKeySigner,
        user: PrivateKeySigner,
        secret: Option<String>,
        mode: Mode,
        responses: mpsc::Sender<Event>,
    }

    impl LoopbackBunker {
        fn answer(&self, method: &str, params: &[String]) -> Value {
            match method {
                "connect" => match (&self.secret, params.get(1)) {
                    (Some(secret), Some(given)) if secret == given => json!(secret),
                    (Some(_), _) => json!(null),
                    (None, _) => json!("ack"),
                },
                "get_public_key" => json!(self.user.public_key().to_hex()),
                "ping" => json!("pong"),
                "describe" => json!(r#"["connect","sign_event","ping"]"#),
                "sign_event" => {
                    let template: Value = serde_json::from_str(&params[0]).unwrap();
                    let unsigned = UnsignedEvent {
                        pubkey: None,
                        created_at: template["created_at"].as_u64().unwrap(),
                        kind: template["kind"].as_u64().unwrap() as u16,
                        tags: serde_json::from_value(template["tags"].clone()).unwrap(),
                        content: template["content"].as_str().unwrap().to_string(),
                    };
                    json!(self.user.sign_event(&unsigned).unwrap().to_json())
                }
                _ => json!(null),
            }
        }
    }

    #[async_trait]
    impl Nip46Transport for LoopbackBunker {
        async fn send(&self, event: Event) -> SignerResult<()> {
            if self.mode == Mode::Silent {
                return Ok(());
            }
            let plaintext = nip04::decrypt(self.bunker.keys().secret_key(), &event.pubkey, &event.content)?;
            let request: Value = serde_json::from_str(&plaintext).unwrap();
            let id = request["id"].as_str().unwrap();
            let method = request["method"].as_str().unwrap();
            let params: Vec<String> = serde_json::from_value(request["params"].clone()).unwrap();

            let rpc = match self.mode {
                Mode::Deny => json!({"id": id, "result": "", "error": "not allowed"}),
                _ => match self.answer(method, &params) {
                    Value::Null => json!({"id": id, "result": "", "error": "bad request"}),
                    result => json!({"id": id, "result": result}),
                },
            };

            let copies = if self.mode == Mode::Twice { 2 } else { 1 };
            for _ in 0..copies {
                let content = self.bunker.nip04_encrypt(&event.pubkey, &rpc.to_string())?;
                let reply = UnsignedEvent::new(
                    NOSTR_CONNECT,
                    content,
                    vec![vec!["p".to_string(), event.pubkey.to_hex()]],
                );
                let reply = self.bunker.sign_event(&reply)?;
                self.responses
                    .clone()
                    .try_send(reply)
                    .map_err(|e| SignerError::Transport(e.to_string()))?;
            }
            Ok(())
        }
    }

    struct Session {
        signer: Arc<Nip46Signer>,
        user: PublicKey,
    }

    fn session(mode: Mode, secret: Option<&str>, request_timeout: Duration) -> Session {
        let bunker = PrivateKeySigner::new(Keys::generate().unwrap());
        let user = PrivateKeySigner::new(Keys::generate().unwrap());
        let user_pk = user.public_key();
        let (tx, rx) = mpsc::channel(16);

        let mut config = Nip46Config::new(bunker.public_key(), vec!["wss://relay.nsec.app".to_string()]);
        config.secret = secret.map(str::to_string);
        config.app_name = Some("nipcast".to_string());
        config.request_timeout = request_timeout;

        let transport = LoopbackBunker {
            bunker,
            user,
            secret: secret.map(str::to_string),
            mode,
            responses: tx,
        };
        let signer = Arc::new(Nip46Signer::new(config, Arc::new(transport)).unwrap());
        signer.pump().spawn(rx);
        Session { signer, user: user_pk }
    }

    #[tokio::test]
    async fn test_connect_and_basic_methods() {
        let s = session(Mode::Answer, None, Duration::from_secs(5));
        s.signer.connect().await.unwrap();
        s.signer.ping().await.unwrap();
        assert_eq!(s.signer.get_public_key().await.unwrap(), s.user);
        assert_eq!(
            s.signer.describe().await.unwrap(),
            vec!["connect", "sign_event", "ping"]
        );
        assert_eq!(s.signer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_connect_with_secret() {
        let s = session(Mode::Answer, Some("hunter2"), Duration::from_secs(5));
        s.signer.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let s = session(Mode::Deny, None, Duration::from_secs(5));
        let err = s.signer.ping().await.unwrap_err();
        assert!(matches!(err, SignerError::Remote(msg) if msg == "not allowed"));
    }

    #[tokio::test]
    async fn test_duplicate_response_is_ignored() {
        let s = session(Mode::Twice, None, Duration::from_secs(5));
        s.signer.ping().await.unwrap();
        s.signer.ping().await.unwrap();
        assert_eq!(s.signer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout_releases_pending() {
        let s = session(Mode::Silent, None, Duration::from_millis(50));
        let err = s.signer.ping().await.unwrap_err();
        assert!(matches!(err, SignerError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(s.signer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_sign_through_signer() {
        let s = session(Mode::Answer, None, Duration::from_secs(5));
        let identity = SigningIdentity::remote(s.user, s.signer.clone());
        let unsigned = UnsignedEvent::new(TEXT_NOTE, "signed in the bunker", vec![]);

        let event = Signer::default().sign(&unsigned, &identity).await.unwrap();
        assert_eq!(event.pubkey, s.user);
        assert_eq!(event.content, "signed in the bunker");
        assert!(event.verify().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_bunker_hits_sign_timeout() {
        let s = session(Mode::Silent, None, Duration::from_secs(20));
        let identity = SigningIdentity::remote(s.user, s.signer.clone());
        let unsigned = UnsignedEvent::new(TEXT_NOTE, "never signed", vec![]);

        let err = Signer::default().sign(&unsigned, &identity).await.unwrap_err();
        assert!(matches!(err, SignerError::Timeout(d) if d == Duration::from_secs(12)));
        assert_eq!(s.signer.pending_requests(), 0);
    }

    #[test]
    fn test_subscription_filter() {
        let s = Nip46Signer::new(
            Nip46Config::new(PublicKey([3; 32]), vec![]),
            Arc::new(LoopbackBunker {
                bunker: PrivateKeySigner::new(Keys::generate().unwrap()),
                user: PrivateKeySigner::new(Keys::generate().unwrap()),
                secret: None,
                mode: Mode::Silent,
                responses: mpsc::channel(1).0,
            }),
        )
        .unwrap();
        let filter = s.subscription_filter();
        assert_eq!(filter["kinds"], json!([24133]));
        assert_eq!(filter["#p"][0], json!(s.client_pubkey().to_hex()));
    }
}
