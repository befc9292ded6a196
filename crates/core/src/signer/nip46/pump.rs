use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc;
use futures::StreamExt;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::signer::nip04;
use crate::types::kind::NOSTR_CONNECT;
use crate::types::{Event, Keys, PublicKey};

/// Outcome of one RPC: the `result` string or the bunker's `error` message.
pub type RpcOutcome = Result<String, String>;

/// Waiters keyed by request id. Resolving removes the entry, so each id
/// completes at most once.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<FxHashMap<String, oneshot::Sender<RpcOutcome>>>>,
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, oneshot::Sender<RpcOutcome>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: &str) -> oneshot::Receiver<RpcOutcome> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id.to_string(), tx);
        rx
    }

    /// Deliver `outcome` to the waiter for `id`. Returns false when nobody is waiting.
    pub fn resolve(&self, id: &str, outcome: RpcOutcome) -> bool {
        let waiter = self.lock().remove(id);
        match waiter {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drops the pending entry when the waiting future goes away, whatever the reason.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: String,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingRequests, id: String) -> Self {
        Self { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Routes incoming kind-24133 events to the requests waiting on them.
#[derive(Clone)]
pub struct Pump {
    client_keys: Keys,
    remote_pubkey: PublicKey,
    pending: PendingRequests,
}

impl Pump {
    pub fn new(client_keys: Keys, remote_pubkey: PublicKey, pending: PendingRequests) -> Self {
        Self {
            client_keys,
            remote_pubkey,
            pending,
        }
    }

    /// Consume events until the channel closes.
    pub fn spawn(self, mut events: mpsc::Receiver<Event>) -> tokio::task::JoinHandle<()> {
        info!("[nip46] response pump started");
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                self.handle_event(&event);
            }
            info!("[nip46] response pump ended");
        })
    }

    /// Returns true when the event answered a request that was still waiting.
    pub fn handle_event(&self, event: &Event) -> bool {
        if event.kind != NOSTR_CONNECT {
            debug!("[nip46] Ignoring event kind: {}", event.kind);
            return false;
        }
        if event.pubkey != self.remote_pubkey {
            debug!("[nip46] Ignoring event from {}", event.pubkey);
            return false;
        }
        let client_pk = self.client_keys.public_key().to_hex();
        if !event.p_tags().contains(&client_pk.as_str()) {
            debug!("[nip46] Event not addressed to us (p-tag mismatch)");
            return false;
        }
        if let Err(e) = event.verify() {
            warn!("[nip46] Dropping response with bad signature: {}", e);
            return false;
        }

        let plaintext = match nip04::decrypt(self.client_keys.secret_key(), &event.pubkey, &event.content) {
            Ok(pt) => pt,
            Err(e) => {
                warn!("[nip46] Failed to decrypt response: {}", e);
                return false;
            }
        };

        let Some((id, outcome)) = parse_response(&plaintext) else {
            warn!("[nip46] Response is not a JSON-RPC object");
            return false;
        };

        let delivered = self.pending.resolve(&id, outcome);
        if delivered {
            debug!("[nip46] RPC response delivered: id={}", id);
        } else {
            debug!("[nip46] No waiter for response id={}, dropping", id);
        }
        delivered
    }
}

/// `{"id": .., "result": .., "error": ..}`. A non-empty `error` wins over `result`.
fn parse_response(plaintext: &str) -> Option<(String, RpcOutcome)> {
    let rpc: Value = serde_json::from_str(plaintext).ok()?;
    let id = rpc.get("id")?.as_str()?.to_string();

    let error = rpc
        .get("error")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    if let Some(error) = error {
        return Some((id, Err(error)));
    }

    let result = match rpc.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some((id, Ok(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::pk::PrivateKeySigner;
    use crate::types::UnsignedEvent;
    use futures::SinkExt;

    struct Fixture {
        client: Keys,
        bunker: PrivateKeySigner,
        pending: PendingRequests,
        pump: Pump,
    }

    fn fixture() -> Fixture {
        let client = Keys::generate().unwrap();
        let bunker = PrivateKeySigner::new(Keys::generate().unwrap());
        let pending = PendingRequests::default();
        let pump = Pump::new(client.clone(), bunker.public_key(), pending.clone());
        Fixture {
            client,
            bunker,
            pending,
            pump,
        }
    }

    fn response(f: &Fixture, payload: &str) -> Event {
        let content = f.bunker.nip04_encrypt(&f.client.public_key(), payload).unwrap();
        let tags = vec![vec!["p".to_string(), f.client.public_key().to_hex()]];
        f.bunker
            .sign_event(&UnsignedEvent::new(NOSTR_CONNECT, content, tags))
            .unwrap()
    }

    #[tokio::test]
    async fn test_response_resolves_waiter() {
        let f = fixture();
        let rx = f.pending.register("7");
        assert!(f.pump.handle_event(&response(&f, r#"{"id":"7","result":"pong"}"#)));
        assert_eq!(rx.await.unwrap(), Ok("pong".to_string()));
        assert!(f.pending.is_empty());
    }

    #[tokio::test]
    async fn test_error_response() {
        let f = fixture();
        let rx = f.pending.register("8");
        assert!(f.pump.handle_event(&response(&f, r#"{"id":"8","result":"","error":"denied"}"#)));
        assert_eq!(rx.await.unwrap(), Err("denied".to_string()));
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let f = fixture();
        let rx = f.pending.register("9");
        assert!(f.pump.handle_event(&response(&f, r#"{"id":"9","result":"first"}"#)));
        assert!(!f.pump.handle_event(&response(&f, r#"{"id":"9","result":"second"}"#)));
        assert_eq!(rx.await.unwrap(), Ok("first".to_string()));
    }

    #[test]
    fn test_late_response_after_guard_dropped() {
        let f = fixture();
        {
            let _rx = f.pending.register("10");
            let _guard = PendingGuard::new(&f.pending, "10".to_string());
        }
        assert!(f.pending.is_empty());
        assert!(!f.pump.handle_event(&response(&f, r#"{"id":"10","result":"late"}"#)));
    }

    #[test]
    fn test_ignores_foreign_events() {
        let f = fixture();
        let _rx = f.pending.register("11");

        // Signed by someone other than the bunker.
        let stranger = Fixture {
            bunker: PrivateKeySigner::new(Keys::generate().unwrap()),
            client: f.client.clone(),
            pending: f.pending.clone(),
            pump: f.pump.clone(),
        };
        assert!(!f.pump.handle_event(&response(&stranger, r#"{"id":"11","result":"x"}"#)));

        // Wrong kind.
        let mut wrong_kind = response(&f, r#"{"id":"11","result":"x"}"#);
        wrong_kind.kind = 1;
        assert!(!f.pump.handle_event(&wrong_kind));

        // Garbage plaintext.
        assert!(!f.pump.handle_event(&response(&f, "not json")));
        assert_eq!(f.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_pump_reads_channel() {
        let f = fixture();
        let rx = f.pending.register("12");
        let (mut tx, events) = mpsc::channel(4);
        let handle = f.pump.clone().spawn(events);

        tx.send(response(&f, r#"{"id":"12","result":{"ok":true}}"#)).await.unwrap();
        assert_eq!(rx.await.unwrap(), Ok(r#"{"ok":true}"#.to_string()));

        drop(tx);
        handle.await.unwrap();
    }
}
