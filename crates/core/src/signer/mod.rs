/*!
Signer module

Turns an [`UnsignedEvent`] into a signed [`Event`] for a given identity:
- `pk`     : local secret key, BIP-340 Schnorr over the event id, self-verified
- `remote` : the timeout race around any asynchronous key holder
- `nip46`  : the Nostr Connect ("bunker") remote signer
- `nip04`  : the encryption the bunker channel uses
*/

pub mod nip04;
pub mod nip46;
pub mod pk;
pub mod remote;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{Event, Keys, PublicKey, TypesError, UnsignedEvent};

pub use nip46::{Nip46Config, Nip46Signer};
pub use pk::PrivateKeySigner;
pub use remote::RemoteSigner;

/// How long a remote signer gets before the request is abandoned.
pub const REMOTE_SIGN_TIMEOUT: Duration = Duration::from_secs(12);

/// Error types specific to the signer module
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Private key missing for read-only account")]
    PrivateKeyMissing,

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Remote signer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Signing cancelled")]
    Cancelled,

    #[error("Remote signer error: {0}")]
    Remote(String),

    #[error("Invalid private key format: {0}")]
    InvalidPrivateKey(String),

    #[error("Cryptographic operation failed: {0}")]
    CryptoError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Types error: {0}")]
    Types(#[from] TypesError),
}

/// Result type for signer operations
pub type SignerResult<T> = Result<T, SignerError>;

/// Per-call signer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(with = "crate::serde_millis")]
    pub remote_timeout: Duration,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            remote_timeout: REMOTE_SIGN_TIMEOUT,
        }
    }
}

/// Where the key material for an identity lives.
#[derive(Clone)]
pub enum KeySource {
    Local(PrivateKeySigner),
    Remote(Arc<dyn RemoteSigner>),
    /// Public key only; signing is impossible.
    ReadOnly,
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Local(_) => f.write_str("Local"),
            KeySource::Remote(_) => f.write_str("Remote"),
            KeySource::ReadOnly => f.write_str("ReadOnly"),
        }
    }
}

/// The account an event is signed for.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    pubkey: PublicKey,
    source: KeySource,
}

impl SigningIdentity {
    pub fn local(keys: Keys) -> Self {
        Self {
            pubkey: keys.public_key(),
            source: KeySource::Local(PrivateKeySigner::new(keys)),
        }
    }

    pub fn remote(pubkey: PublicKey, signer: Arc<dyn RemoteSigner>) -> Self {
        Self {
            pubkey,
            source: KeySource::Remote(signer),
        }
    }

    pub fn read_only(pubkey: PublicKey) -> Self {
        Self {
            pubkey,
            source: KeySource::ReadOnly,
        }
    }

    pub fn pubkey(&self) -> PublicKey {
        self.pubkey
    }

    pub fn source(&self) -> &KeySource {
        &self.source
    }

    pub fn can_sign(&self) -> bool {
        !matches!(self.source, KeySource::ReadOnly)
    }
}

/// Signs events for any [`SigningIdentity`].
#[derive(Debug, Clone, Default)]
pub struct Signer {
    config: SignerConfig,
}

impl Signer {
    pub fn new(config: SignerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    pub async fn sign(&self, unsigned: &UnsignedEvent, identity: &SigningIdentity) -> SignerResult<Event> {
        self.sign_with_cancel(unsigned, identity, &CancellationToken::new())
            .await
    }

    /// Sign, giving up with [`SignerError::Cancelled`] once `cancel` fires.
    pub async fn sign_with_cancel(
        &self,
        unsigned: &UnsignedEvent,
        identity: &SigningIdentity,
        cancel: &CancellationToken,
    ) -> SignerResult<Event> {
        if let Some(requested) = unsigned.pubkey {
            if requested != identity.pubkey {
                return Err(SignerError::AccountNotFound(requested.to_hex()));
            }
        }
        if cancel.is_cancelled() {
            return Err(SignerError::Cancelled);
        }

        match &identity.source {
            KeySource::Local(signer) => signer.sign_event(unsigned),
            KeySource::Remote(remote) => {
                debug!("[signer] delegating kind {} to remote signer", unsigned.kind);
                remote::sign_with_timeout(
                    remote.as_ref(),
                    unsigned,
                    &identity.pubkey,
                    self.config.remote_timeout,
                    cancel,
                )
                .await
            }
            KeySource::ReadOnly => Err(SignerError::PrivateKeyMissing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::kind::TEXT_NOTE;
    use crate::types::EventId;
    use async_trait::async_trait;

    struct LocalBehindRemote(PrivateKeySigner);

    #[async_trait]
    impl RemoteSigner for LocalBehindRemote {
        async fn sign_event(&self, unsigned: &UnsignedEvent, _id: &EventId) -> SignerResult<Event> {
            self.0.sign_event(unsigned)
        }
    }

    fn note() -> UnsignedEvent {
        UnsignedEvent::new(TEXT_NOTE, "gm", vec![])
    }

    #[tokio::test]
    async fn test_local_identity_signs() {
        let identity = SigningIdentity::local(Keys::generate().unwrap());
        let event = Signer::default().sign(&note(), &identity).await.unwrap();
        assert_eq!(event.pubkey, identity.pubkey());
        assert!(event.verify().is_ok());
    }

    #[tokio::test]
    async fn test_remote_identity_signs() {
        let local = PrivateKeySigner::new(Keys::generate().unwrap());
        let pubkey = local.public_key();
        let identity = SigningIdentity::remote(pubkey, Arc::new(LocalBehindRemote(local)));
        let event = Signer::default().sign(&note(), &identity).await.unwrap();
        assert_eq!(event.pubkey, pubkey);
        assert!(event.verify().is_ok());
    }

    #[tokio::test]
    async fn test_read_only_identity() {
        let identity = SigningIdentity::read_only(PublicKey([4; 32]));
        assert!(!identity.can_sign());
        assert!(matches!(
            Signer::default().sign(&note(), &identity).await,
            Err(SignerError::PrivateKeyMissing)
        ));
    }

    #[tokio::test]
    async fn test_event_for_other_account() {
        let identity = SigningIdentity::local(Keys::generate().unwrap());
        let unsigned = note().with_pubkey(PublicKey([4; 32]));
        assert!(matches!(
            Signer::default().sign(&unsigned, &identity).await,
            Err(SignerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let identity = SigningIdentity::local(Keys::generate().unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            Signer::default().sign_with_cancel(&note(), &identity, &cancel).await,
            Err(SignerError::Cancelled)
        ));
    }

    #[test]
    fn test_config_default_and_serde() {
        let config = SignerConfig::default();
        assert_eq!(config.remote_timeout, Duration::from_secs(12));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"remote_timeout":12000}"#);
        assert_eq!(serde_json::from_str::<SignerConfig>(&json).unwrap(), config);
    }
}
