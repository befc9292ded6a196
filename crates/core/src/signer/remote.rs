//! Signing through an external key holder
//!
//! The request and the timer run side by side; whichever finishes first decides
//! the outcome and the loser is dropped. Dropping the request future is what
//! releases its pending slot, so a response that shows up later has nowhere to go.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::signer::SignerError;
use crate::types::{Event, EventId, PublicKey, UnsignedEvent};

type Result<T> = std::result::Result<T, SignerError>;

/// A key holder reachable only asynchronously, such as a NIP-46 bunker.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Sign `unsigned`, whose pubkey is already set and whose id is `id`.
    async fn sign_event(&self, unsigned: &UnsignedEvent, id: &EventId) -> Result<Event>;
}

/// Race a remote signature against `timeout` and the caller's `cancel` token.
pub async fn sign_with_timeout(
    remote: &dyn RemoteSigner,
    unsigned: &UnsignedEvent,
    pubkey: &PublicKey,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Event> {
    let unsigned = unsigned.clone().with_pubkey(*pubkey);
    let id = unsigned.id_for(pubkey);

    let signed = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("[signer] remote signature for {} cancelled", id);
            return Err(SignerError::Cancelled);
        }
        result = remote.sign_event(&unsigned, &id) => result?,
        _ = tokio::time::sleep(timeout) => {
            warn!("[signer] remote signer did not answer within {:?}", timeout);
            return Err(SignerError::Timeout(timeout));
        }
    };

    validate_remote(signed, &id, pubkey)
}

/// A remote answer is only accepted when it is exactly the event we asked for.
fn validate_remote(event: Event, expected_id: &EventId, pubkey: &PublicKey) -> Result<Event> {
    if event.pubkey != *pubkey {
        return Err(SignerError::SigningFailure(format!(
            "remote signed with {} instead of {}",
            event.pubkey, pubkey
        )));
    }
    if event.id != *expected_id || event.compute_id() != *expected_id {
        return Err(SignerError::SigningFailure(format!(
            "remote returned event {} for request {}",
            event.id, expected_id
        )));
    }
    event
        .verify()
        .map_err(|e| SignerError::SigningFailure(format!("remote signature invalid: {}", e)))?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::pk::PrivateKeySigner;
    use crate::types::kind::TEXT_NOTE;
    use crate::types::Keys;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::sync::{oneshot, Mutex};

    /// Signs locally after an optional delay.
    struct DelayedSigner {
        inner: PrivateKeySigner,
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RemoteSigner for DelayedSigner {
        async fn sign_event(&self, unsigned: &UnsignedEvent, _id: &EventId) -> Result<Event> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            self.inner.sign_event(unsigned)
        }
    }

    /// Never answers on its own; the test can push a late answer through `late`.
    struct SilentSigner {
        late: Mutex<Option<oneshot::Receiver<Event>>>,
    }

    #[async_trait]
    impl RemoteSigner for SilentSigner {
        async fn sign_event(&self, _unsigned: &UnsignedEvent, _id: &EventId) -> Result<Event> {
            let rx = self.late.lock().await.take();
            match rx {
                Some(rx) => rx.await.map_err(|_| SignerError::Remote("dropped".into())),
                None => futures::future::pending().await,
            }
        }
    }

    /// Returns a correctly signed but different event.
    struct SwappingSigner(PrivateKeySigner);

    #[async_trait]
    impl RemoteSigner for SwappingSigner {
        async fn sign_event(&self, unsigned: &UnsignedEvent, _id: &EventId) -> Result<Event> {
            let mut other = unsigned.clone();
            other.content.push_str(" (edited)");
            self.0.sign_event(&other)
        }
    }

    fn note() -> UnsignedEvent {
        UnsignedEvent::new(TEXT_NOTE, "from the bunker", vec![])
    }

    #[tokio::test]
    async fn test_remote_answer_before_timeout() {
        let inner = PrivateKeySigner::new(Keys::generate().unwrap());
        let pubkey = inner.public_key();
        let remote = DelayedSigner {
            inner,
            delay: Duration::from_millis(10),
            finished: Arc::new(AtomicBool::new(false)),
        };
        let event = sign_with_timeout(&remote, &note(), &pubkey, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(event.pubkey, pubkey);
        assert!(event.verify().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_remote_times_out_at_twelve_seconds() {
        let remote = SilentSigner { late: Mutex::new(None) };
        let started = tokio::time::Instant::now();
        let result = sign_with_timeout(
            &remote,
            &note(),
            &PublicKey([2; 32]),
            crate::signer::REMOTE_SIGN_TIMEOUT,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(SignerError::Timeout(d)) if d == Duration::from_secs(12)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(12));
        assert!(elapsed < Duration::from_millis(12_100));
    }

    #[tokio::test]
    async fn test_timeout_within_tolerance_and_late_answer_ignored() {
        let inner = PrivateKeySigner::new(Keys::generate().unwrap());
        let pubkey = inner.public_key();
        let (late_tx, late_rx) = oneshot::channel();
        let remote = SilentSigner {
            late: Mutex::new(Some(late_rx)),
        };

        let started = Instant::now();
        let result = sign_with_timeout(
            &remote,
            &note(),
            &pubkey,
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await;
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(SignerError::Timeout(_))));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));

        // The waiting side is gone: the late answer cannot be delivered.
        let late = inner.sign_event(&note()).unwrap();
        assert!(late_tx.send(late).is_err());
    }

    #[tokio::test]
    async fn test_cancel_stops_race() {
        let finished = Arc::new(AtomicBool::new(false));
        let remote = DelayedSigner {
            inner: PrivateKeySigner::new(Keys::generate().unwrap()),
            delay: Duration::from_secs(30),
            finished: finished.clone(),
        };
        let pubkey = remote.inner.public_key();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = sign_with_timeout(&remote, &note(), &pubkey, Duration::from_secs(60), &cancel).await;
        assert!(matches!(result, Err(SignerError::Cancelled)));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_substituted_event_is_rejected() {
        let inner = PrivateKeySigner::new(Keys::generate().unwrap());
        let pubkey = inner.public_key();
        let remote = SwappingSigner(inner);
        let result = sign_with_timeout(&remote, &note(), &pubkey, Duration::from_secs(5), &CancellationToken::new()).await;
        assert!(matches!(result, Err(SignerError::SigningFailure(_))));
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_interfere() {
        let inner = PrivateKeySigner::new(Keys::generate().unwrap());
        let pubkey = inner.public_key();
        let remote = Arc::new(DelayedSigner {
            inner,
            delay: Duration::from_millis(5),
            finished: Arc::new(AtomicBool::new(false)),
        });

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let remote = remote.clone();
                tokio::spawn(async move {
                    let unsigned = UnsignedEvent::new(TEXT_NOTE, format!("n{}", i), vec![]);
                    sign_with_timeout(remote.as_ref(), &unsigned, &pubkey, Duration::from_secs(5), &CancellationToken::new())
                        .await
                        .map(|e| e.content)
                })
            })
            .collect();

        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), format!("n{}", i));
        }
    }
}
