use signature::hazmat::{PrehashSigner, PrehashVerifier};
use tracing::{debug, info};

use crate::signer::{nip04, SignerError};
use crate::types::{Event, Keys, PublicKey, UnsignedEvent};

type Result<T> = std::result::Result<T, SignerError>;

/// Signs with a secret key held in memory.
#[derive(Clone)]
pub struct PrivateKeySigner {
    keys: Keys,
}

impl std::fmt::Debug for PrivateKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeySigner")
            .field("public_key", &self.keys.public_key())
            .finish()
    }
}

impl PrivateKeySigner {
    pub fn new(keys: Keys) -> Self {
        info!("[pk] signer ready for {}", keys.public_key());
        Self { keys }
    }

    /// Accepts a hex or `nsec` secret.
    pub fn parse(secret: &str) -> Result<Self> {
        let keys = Keys::parse(secret).map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self::new(keys))
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Fill in the pubkey, derive the id, sign it and check the signature before
    /// handing the event out.
    pub fn sign_event(&self, unsigned: &UnsignedEvent) -> Result<Event> {
        let pubkey = self.keys.public_key();
        if let Some(requested) = unsigned.pubkey {
            if requested != pubkey {
                return Err(SignerError::AccountNotFound(requested.to_hex()));
            }
        }

        let id = unsigned.id_for(&pubkey);

        let signing_key = self
            .keys
            .signing_key()
            .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;
        let verifying_key = signing_key.verifying_key();

        // Sign the 32-byte event id as a prehash message
        let signature = signing_key
            .sign_prehash(&id.0)
            .map_err(|e| SignerError::SigningFailure(format!("Schnorr prehash sign failed: {}", e)))?;

        verifying_key
            .verify_prehash(&id.0, &signature)
            .map_err(|e| SignerError::SigningFailure(format!("Local Schnorr verify failed: {}", e)))?;

        debug!("[pk] signed event {} kind={}", id, unsigned.kind);

        Ok(Event {
            id,
            pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags.clone(),
            content: unsigned.content.clone(),
            sig: hex::encode(signature.to_bytes()),
        })
    }

    pub fn nip04_encrypt(&self, recipient: &PublicKey, plaintext: &str) -> Result<String> {
        Ok(nip04::encrypt(self.keys.secret_key(), recipient, plaintext)?)
    }

    pub fn nip04_decrypt(&self, sender: &PublicKey, ciphertext: &str) -> Result<String> {
        Ok(nip04::decrypt(self.keys.secret_key(), sender, ciphertext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::kind::TEXT_NOTE;
    use k256::schnorr::{Signature, VerifyingKey};

    const BIP340_SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000003";
    const BIP340_PUBKEY: &str = "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";
    const BIP340_SIG: &str = "e907831f80848d1069a5371b402410364bdf1c5f8307b0084c55f1ce2dca821525f66a4a85ea8b71e482a74f382d2ce5ebeee8fdb2172f477df4900d310536c0";

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::parse(BIP340_SECRET).unwrap()
    }

    #[test]
    fn test_bip340_vector_verifies_with_prehash() {
        let key = VerifyingKey::from_bytes(&hex::decode(BIP340_PUBKEY).unwrap()).unwrap();
        let sig = Signature::try_from(hex::decode(BIP340_SIG).unwrap().as_slice()).unwrap();
        assert!(key.verify_prehash(&[0u8; 32], &sig).is_ok());
        assert!(key.verify_prehash(&[1u8; 32], &sig).is_err());
    }

    #[test]
    fn test_sign_fills_pubkey_and_verifies() {
        let signer = signer();
        let unsigned = UnsignedEvent::new(TEXT_NOTE, "hello", vec![]).with_created_at(1_700_000_000);
        let event = signer.sign_event(&unsigned).unwrap();

        assert_eq!(event.pubkey.to_hex(), BIP340_PUBKEY);
        assert_eq!(event.id, unsigned.id_for(&event.pubkey));
        assert_eq!(event.sig.len(), 128);
        assert!(event.verify().is_ok());
    }

    #[test]
    fn test_signing_many_events_all_verify() {
        let signer = PrivateKeySigner::new(Keys::generate().unwrap());
        for i in 0..16 {
            let unsigned = UnsignedEvent::new(TEXT_NOTE, format!("note {}", i), vec![vec!["t".into(), "x".into()]]);
            assert!(signer.sign_event(&unsigned).unwrap().verify().is_ok());
        }
    }

    #[test]
    fn test_foreign_pubkey_is_rejected() {
        let signer = signer();
        let unsigned = UnsignedEvent::new(TEXT_NOTE, "hi", vec![]).with_pubkey(PublicKey([1; 32]));
        assert!(matches!(
            signer.sign_event(&unsigned),
            Err(SignerError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_secret() {
        assert!(matches!(
            PrivateKeySigner::parse("1234"),
            Err(SignerError::InvalidPrivateKey(_))
        ));
    }

    #[test]
    fn test_nip04_between_signers() {
        let a = PrivateKeySigner::new(Keys::generate().unwrap());
        let b = PrivateKeySigner::new(Keys::generate().unwrap());
        let ct = a.nip04_encrypt(&b.public_key(), "hello bunker").unwrap();
        assert_eq!(b.nip04_decrypt(&a.public_key(), &ct).unwrap(), "hello bunker");
    }
}
