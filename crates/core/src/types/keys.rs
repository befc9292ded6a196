use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::TypesError;

type Result<T> = std::result::Result<T, TypesError>;

// ============================================================================
// Basic Types - 32 byte arrays with hex text form
// ============================================================================

fn decode_hex_32(s: &str, what: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s)
        .map_err(|_| TypesError::InvalidFormat(format!("Invalid hex for {}", what)))?;
    bytes
        .try_into()
        .map_err(|_| TypesError::InvalidFormat(format!("Invalid {} length", what)))
}

macro_rules! hex_bytes_type {
    ($name:ident, $what:literal) => {
        impl $name {
            pub fn from_hex(s: &str) -> Result<Self> {
                decode_hex_32(s, $what).map($name)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                bytes
                    .try_into()
                    .map($name)
                    .map_err(|_| TypesError::InvalidFormat(format!("Invalid {} length", $what)))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn to_bytes(&self) -> [u8; 32] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub [u8; 32]);
hex_bytes_type!(EventId, "event id");

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

/// X-only secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);
hex_bytes_type!(PublicKey, "public key");

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(pub [u8; 32]);

impl SecretKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex_32(s, "secret key").map(SecretKey)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

// ============================================================================
// Keys
// ============================================================================

#[cfg(feature = "crypto")]
pub use self::keypair::Keys;

#[cfg(feature = "crypto")]
mod keypair {
    use super::*;
    use k256::schnorr::SigningKey;

    /// A secret key with its derived x-only public key.
    #[derive(Clone)]
    pub struct Keys {
        secret_key: SecretKey,
        public_key: PublicKey,
    }

    impl fmt::Debug for Keys {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Keys")
                .field("public_key", &self.public_key)
                .finish_non_exhaustive()
        }
    }

    impl Keys {
        pub fn new(secret_key: SecretKey) -> Result<Self> {
            let signing_key = SigningKey::from_bytes(&secret_key.0)
                .map_err(|_| TypesError::InvalidFormat("Invalid secret key".to_string()))?;
            let public_key = PublicKey(signing_key.verifying_key().to_bytes().into());
            Ok(Self {
                secret_key,
                public_key,
            })
        }

        /// Parse a secret key given as hex or `nsec` bech32.
        pub fn parse(secret: &str) -> Result<Self> {
            let secret = secret.trim();
            if secret.starts_with("nsec1") {
                return match crate::nip19::decode(secret) {
                    Ok(crate::nip19::Nip19::Secret(sk)) => Self::new(sk),
                    Ok(_) => Err(TypesError::InvalidFormat("Expected nsec".to_string())),
                    Err(e) => Err(TypesError::InvalidFormat(e.to_string())),
                };
            }
            Self::new(SecretKey::from_hex(secret)?)
        }

        /// Fresh random keys from the OS entropy source.
        pub fn generate() -> Result<Self> {
            let mut bytes = [0u8; 32];
            loop {
                getrandom::getrandom(&mut bytes)
                    .map_err(|e| TypesError::Other(format!("Entropy unavailable: {}", e)))?;
                // Out-of-range scalars are astronomically rare; draw again.
                if let Ok(keys) = Self::new(SecretKey(bytes)) {
                    return Ok(keys);
                }
            }
        }

        pub fn secret_key(&self) -> &SecretKey {
            &self.secret_key
        }

        pub fn public_key(&self) -> PublicKey {
            self.public_key
        }

        pub(crate) fn signing_key(&self) -> Result<SigningKey> {
            SigningKey::from_bytes(&self.secret_key.0)
                .map_err(|_| TypesError::InvalidFormat("Invalid secret key".to_string()))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hex_id = "ab".repeat(32);
        let id = EventId::from_hex(&hex_id).unwrap();
        assert_eq!(id.to_hex(), hex_id);
        assert_eq!(id.to_string(), hex_id);
        assert_eq!(hex_id.parse::<EventId>().unwrap(), id);
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(PublicKey::from_hex(&"zz".repeat(32)).is_err());
        assert!(EventId::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let pk = PublicKey([1u8; 32]);
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
        assert!(serde_json::from_str::<PublicKey>("\"00\"").is_err());
    }
}
