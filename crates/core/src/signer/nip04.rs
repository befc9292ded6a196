//! NIP-04 encryption
//!
//! AES-256-CBC keyed by the raw x-coordinate of the secp256k1 ECDH point, with the
//! payload written as `base64(ciphertext)?iv=base64(iv)`. Remote signers still
//! speak it, so the bunker channel is encrypted this way.

use aes::Aes256;
use base64::engine::{general_purpose, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use getrandom::getrandom;
use k256::{PublicKey as K256PublicKey, SecretKey as K256SecretKey};

use crate::signer::SignerError;
use crate::types::{PublicKey, SecretKey};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum Nip04Error {
    #[error("Invalid content format")]
    InvalidContentFormat,

    #[error("Base64 decode error")]
    Base64Decode,

    #[error("Invalid IV length: {0}")]
    InvalidIv(usize),

    #[error("UTF-8 encoding error")]
    Utf8Encode,

    #[error("Wrong block mode")]
    WrongBlockMode,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Random generation failed")]
    RandomGenerationFailed,
}

impl From<Nip04Error> for SignerError {
    fn from(e: Nip04Error) -> Self {
        SignerError::CryptoError(e.to_string())
    }
}

/// ECDH x-coordinate between our secret and their x-only public key (even y assumed).
fn shared_key(secret_key: &SecretKey, public_key: &PublicKey) -> Result<[u8; 32], Nip04Error> {
    let sk = K256SecretKey::from_bytes((&secret_key.0).into())
        .map_err(|e| Nip04Error::InvalidKey(format!("Invalid secret key: {}", e)))?;

    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(&public_key.0);
    let pk = K256PublicKey::from_sec1_bytes(&sec1)
        .map_err(|e| Nip04Error::InvalidKey(format!("Invalid public key: {}", e)))?;

    let shared = k256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
    let mut key = [0u8; 32];
    key.copy_from_slice(shared.raw_secret_bytes());
    Ok(key)
}

pub fn encrypt(secret_key: &SecretKey, public_key: &PublicKey, content: &str) -> Result<String, Nip04Error> {
    let mut iv = [0u8; IV_LEN];
    getrandom(&mut iv).map_err(|_| Nip04Error::RandomGenerationFailed)?;
    encrypt_with_iv(secret_key, public_key, content, iv)
}

/// Encrypt with a caller supplied IV. Only deterministic tests should need this.
pub fn encrypt_with_iv(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    content: &str,
    iv: [u8; IV_LEN],
) -> Result<String, Nip04Error> {
    let key = shared_key(secret_key, public_key)?;
    let cipher = Aes256CbcEnc::new(&key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(content.as_bytes());

    Ok(format!(
        "{}?iv={}",
        general_purpose::STANDARD.encode(ciphertext),
        general_purpose::STANDARD.encode(iv)
    ))
}

pub fn decrypt(secret_key: &SecretKey, public_key: &PublicKey, encrypted_content: &str) -> Result<String, Nip04Error> {
    let (data, iv) = encrypted_content
        .split_once("?iv=")
        .ok_or(Nip04Error::InvalidContentFormat)?;

    let mut encrypted = general_purpose::STANDARD
        .decode(data)
        .map_err(|_| Nip04Error::Base64Decode)?;
    let iv = general_purpose::STANDARD
        .decode(iv)
        .map_err(|_| Nip04Error::Base64Decode)?;
    let iv: [u8; IV_LEN] = iv
        .as_slice()
        .try_into()
        .map_err(|_| Nip04Error::InvalidIv(iv.len()))?;

    let key = shared_key(secret_key, public_key)?;
    let cipher = Aes256CbcDec::new(&key.into(), &iv.into());
    let decrypted = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&mut encrypted)
        .map_err(|_| Nip04Error::WrongBlockMode)?;

    String::from_utf8(decrypted).map_err(|_| Nip04Error::Utf8Encode)
}
