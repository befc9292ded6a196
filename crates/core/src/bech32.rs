//! Bech32 codec (BIP-173, with the BIP-350 "bech32m" constant)
//!
//! Shared by the NIP-19 identifier codec and the BOLT11 decoder. Lightning
//! invoices and TLV identifiers routinely exceed the 90 character limit of
//! BIP-173, so decoding takes an explicit `limit` switch.

use thiserror::Error;

/// Base32 alphabet, indexed by 5-bit value.
pub const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Maximum string length when the BIP-173 limit is enforced.
pub const MAX_LENGTH: usize = 90;

const CHECKSUM_LENGTH: usize = 6;
const SEPARATOR: u8 = b'1';
const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

/// Reverse lookup for [`CHARSET`], -1 for characters outside the alphabet.
const CHARSET_REV: [i8; 128] = [
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, //
    15, -1, 10, 17, 21, 20, 26, 30, 7, 5, -1, -1, -1, -1, -1, -1, //
    -1, 29, -1, 24, 13, 25, 9, 8, 23, -1, 18, 22, 31, 27, 19, -1, //
    1, 0, 3, 16, 11, 28, 12, 14, 6, 4, 2, -1, -1, -1, -1, -1, //
    -1, 29, -1, 24, 13, 25, 9, 8, 23, -1, 18, 22, 31, 27, 19, -1, //
    1, 0, 3, 16, 11, 28, 12, 14, 6, 4, 2, -1, -1, -1, -1, -1, //
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Bech32Error {
    #[error("Invalid checksum")]
    InvalidChecksum,

    #[error("Invalid character: {0:?}")]
    InvalidCharacter(char),

    #[error("Invalid length: {0}")]
    InvalidLength(usize),

    #[error("Mixed case string")]
    MixedCase,

    #[error("Missing separator")]
    MissingSeparator,

    #[error("Invalid data value: {0}")]
    InvalidData(u8),

    #[error("Non-zero padding in bit conversion")]
    InvalidPadding,
}

type Result<T> = std::result::Result<T, Bech32Error>;

/// Checksum flavour. BOLT11 and NIP-19 both use the original [`Variant::Bech32`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Bech32,
    Bech32m,
}

impl Variant {
    fn constant(self) -> u32 {
        match self {
            Variant::Bech32 => 1,
            Variant::Bech32m => 0x2bc8_30a3,
        }
    }

    fn from_residue(residue: u32) -> Option<Self> {
        match residue {
            1 => Some(Variant::Bech32),
            0x2bc8_30a3 => Some(Variant::Bech32m),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Checksum
// ----------------------------------------------------------------------------

fn polymod(values: impl IntoIterator<Item = u8>) -> u32 {
    let mut chk: u32 = 1;
    for v in values {
        let top = chk >> 25;
        chk = ((chk & 0x01ff_ffff) << 5) ^ u32::from(v);
        for (i, g) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(hrp.len() * 2 + 1);
    out.extend(hrp.iter().map(|c| c >> 5));
    out.push(0);
    out.extend(hrp.iter().map(|c| c & 0x1f));
    out
}

fn create_checksum(hrp: &[u8], data: &[u8], variant: Variant) -> [u8; CHECKSUM_LENGTH] {
    let values = hrp_expand(hrp)
        .into_iter()
        .chain(data.iter().copied())
        .chain([0u8; CHECKSUM_LENGTH]);
    let modulus = polymod(values) ^ variant.constant();
    let mut checksum = [0u8; CHECKSUM_LENGTH];
    for (i, slot) in checksum.iter_mut().enumerate() {
        *slot = ((modulus >> (5 * (5 - i))) & 0x1f) as u8;
    }
    checksum
}

// ----------------------------------------------------------------------------
// Encode / decode
// ----------------------------------------------------------------------------

/// Encode a human readable part and 5-bit groups with the bech32 checksum.
pub fn encode(hrp: &str, data: &[u8]) -> Result<String> {
    encode_variant(hrp, data, Variant::Bech32)
}

pub fn encode_variant(hrp: &str, data: &[u8], variant: Variant) -> Result<String> {
    if hrp.is_empty() {
        return Err(Bech32Error::InvalidLength(0));
    }
    let hrp = validate_case(hrp)?;
    if let Some(&bad) = data.iter().find(|v| **v > 31) {
        return Err(Bech32Error::InvalidData(bad));
    }

    let checksum = create_checksum(hrp.as_bytes(), data, variant);
    let mut out = String::with_capacity(hrp.len() + 1 + data.len() + CHECKSUM_LENGTH);
    out.push_str(&hrp);
    out.push(SEPARATOR as char);
    for v in data.iter().chain(checksum.iter()) {
        out.push(CHARSET[*v as usize] as char);
    }
    Ok(out)
}

/// Decode a bech32 string into its lowercase human readable part and 5-bit groups
/// (checksum stripped). `limit` enforces the 90 character maximum.
pub fn decode(s: &str, limit: bool) -> Result<(String, Vec<u8>)> {
    let (hrp, data, variant) = decode_variant(s, limit)?;
    if variant != Variant::Bech32 {
        return Err(Bech32Error::InvalidChecksum);
    }
    Ok((hrp, data))
}

/// Like [`decode`], but accepts either checksum constant and reports which one matched.
pub fn decode_variant(s: &str, limit: bool) -> Result<(String, Vec<u8>, Variant)> {
    if limit && s.len() > MAX_LENGTH {
        return Err(Bech32Error::InvalidLength(s.len()));
    }
    let lower = validate_case(s)?;
    let bytes = lower.as_bytes();

    let pos = bytes
        .iter()
        .rposition(|b| *b == SEPARATOR)
        .ok_or(Bech32Error::MissingSeparator)?;
    if pos < 1 || pos + CHECKSUM_LENGTH + 1 > bytes.len() {
        return Err(Bech32Error::InvalidLength(bytes.len()));
    }

    let hrp = &bytes[..pos];
    let mut data = Vec::with_capacity(bytes.len() - pos - 1);
    for &b in &bytes[pos + 1..] {
        let v = CHARSET_REV[b as usize];
        if v < 0 {
            return Err(Bech32Error::InvalidCharacter(b as char));
        }
        data.push(v as u8);
    }

    let residue = polymod(hrp_expand(hrp).into_iter().chain(data.iter().copied()));
    let variant = Variant::from_residue(residue).ok_or(Bech32Error::InvalidChecksum)?;

    data.truncate(data.len() - CHECKSUM_LENGTH);
    Ok((lower[..pos].to_string(), data, variant))
}

/// Non-failing decode for untrusted input.
pub fn decode_opt(s: &str, limit: bool) -> Option<(String, Vec<u8>)> {
    decode(s, limit).ok()
}

/// Checks the printable range and rejects mixed case; returns the lowercased string.
fn validate_case(s: &str) -> Result<String> {
    let mut has_lower = false;
    let mut has_upper = false;
    for ch in s.chars() {
        if !(ch as u32 >= 33 && ch as u32 <= 126) {
            return Err(Bech32Error::InvalidCharacter(ch));
        }
        has_lower |= ch.is_ascii_lowercase();
        has_upper |= ch.is_ascii_uppercase();
    }
    if has_lower && has_upper {
        return Err(Bech32Error::MixedCase);
    }
    Ok(s.to_ascii_lowercase())
}

// ----------------------------------------------------------------------------
// Bit conversion
// ----------------------------------------------------------------------------

/// Regroup a sequence of `from`-bit values into `to`-bit values.
///
/// With `pad = false` the conversion fails when leftover bits are non-zero or a
/// whole input group would be dropped.
pub fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to) - 1;
    let max_acc: u32 = (1 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for &value in data {
        if u32::from(value) >> from != 0 {
            return Err(Bech32Error::InvalidData(value));
        }
        acc = ((acc << from) | u32::from(value)) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & maxv) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & maxv) != 0 {
        return Err(Bech32Error::InvalidPadding);
    }

    Ok(out)
}

/// Encode raw bytes (repacked to 5-bit groups) under `hrp`.
pub fn encode_bytes(hrp: &str, bytes: &[u8]) -> Result<String> {
    let groups = convert_bits(bytes, 8, 5, true)?;
    encode(hrp, &groups)
}

/// Decode to raw bytes (5-bit groups repacked to 8-bit).
pub fn decode_bytes(s: &str, limit: bool) -> Result<(String, Vec<u8>)> {
    let (hrp, groups) = decode(s, limit)?;
    let bytes = convert_bits(&groups, 5, 8, false)?;
    Ok((hrp, bytes))
}

/// Decode an `lnurl1...` string to the URL it wraps.
pub fn decode_lnurl(s: &str) -> Option<String> {
    let s = s.trim();
    let s = s
        .strip_prefix("lightning:")
        .or_else(|| s.strip_prefix("LIGHTNING:"))
        .unwrap_or(s);
    let (hrp, bytes) = decode_bytes(s, false).ok()?;
    if hrp != "lnurl" {
        return None;
    }
    String::from_utf8(bytes).ok()
}

pub fn encode_lnurl(url: &str) -> Result<String> {
    encode_bytes("lnurl", url.as_bytes())
}
