//! BOLT11 Lightning invoice decoder
//!
//! Only the fields the zap flow needs are extracted. Decoding never fails loudly:
//! invoices arrive from pasted text and QR codes, so anything malformed yields `None`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bech32;

const SIGNATURE_GROUPS: usize = 104;
const TIMESTAMP_GROUPS: usize = 7;
const HASH_GROUPS: usize = 52;
const PUBKEY_GROUPS: usize = 53;

// Tagged field types
const FIELD_PAYMENT_HASH: u8 = 1;
const FIELD_EXPIRY: u8 = 6;
const FIELD_DESCRIPTION: u8 = 13;
const FIELD_PAYEE: u8 = 19;
const FIELD_DESCRIPTION_HASH: u8 = 23;
const FIELD_MIN_FINAL_CLTV: u8 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
    Simnet,
}

impl Network {
    pub fn prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "lnbc",
            Network::Testnet => "lntb",
            Network::Regtest => "lnbcrt",
            Network::Simnet => "lnsb",
        }
    }

    /// Longest prefix first so that `lnbcrt` is never taken for `lnbc`.
    fn from_hrp(hrp: &str) -> Option<Self> {
        [
            Network::Regtest,
            Network::Mainnet,
            Network::Testnet,
            Network::Simnet,
        ]
        .into_iter()
        .find(|n| hrp.starts_with(n.prefix()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bolt11Invoice {
    pub network: Network,
    /// Creation time, unix seconds.
    pub timestamp: u64,
    pub amount_msat: Option<u64>,
    pub payment_hash: Option<[u8; 32]>,
    pub description: Option<String>,
    pub description_hash: Option<[u8; 32]>,
    pub payee: Option<Vec<u8>>,
    pub expiry: Option<Duration>,
    pub min_final_cltv_expiry: Option<u64>,
}

impl Bolt11Invoice {
    pub fn new(network: Network, timestamp: u64) -> Self {
        Self {
            network,
            timestamp,
            amount_msat: None,
            payment_hash: None,
            description: None,
            description_hash: None,
            payee: None,
            expiry: None,
            min_final_cltv_expiry: None,
        }
    }

    /// Amount in satoshis. Sub-satoshi amounts keep their fractional part.
    pub fn amount_sats(&self) -> Option<f64> {
        self.amount_msat.map(|msat| msat as f64 / 1000.0)
    }

    /// Whole satoshis, rounded down.
    pub fn amount_sats_floor(&self) -> Option<u64> {
        self.amount_msat.map(|msat| msat / 1000)
    }

    pub fn payment_hash_hex(&self) -> Option<String> {
        self.payment_hash.map(hex::encode)
    }

    /// Unix seconds after which the invoice should not be paid, using the
    /// BOLT11 default of one hour when no expiry field is present.
    pub fn expires_at(&self) -> u64 {
        let expiry = self.expiry.unwrap_or(Duration::from_secs(3600));
        self.timestamp.saturating_add(expiry.as_secs())
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at()
    }
}

/// Decode an invoice string. Accepts an optional `lightning:` URI prefix.
pub fn decode(invoice: &str) -> Option<Bolt11Invoice> {
    let trimmed = invoice.trim();
    let raw = strip_scheme(trimmed);

    let (hrp, data) = bech32::decode_opt(raw, false)?;
    let network = Network::from_hrp(&hrp)?;

    if data.len() < SIGNATURE_GROUPS + TIMESTAMP_GROUPS {
        return None;
    }
    let body = &data[..data.len() - SIGNATURE_GROUPS];

    let timestamp = groups_to_u64(&body[..TIMESTAMP_GROUPS])?;
    let mut invoice = Bolt11Invoice::new(network, timestamp);
    invoice.amount_msat = decode_amount(&hrp[network.prefix().len()..]);

    parse_tagged_fields(&body[TIMESTAMP_GROUPS..], invoice)
}

/// Amount from the part of the human readable prefix that follows the network,
/// converted to millisatoshis.
///
/// The amount is undefined unless the digits are followed by exactly one of the
/// `m`/`u`/`n`/`p` multipliers.
pub fn decode_amount(amount: &str) -> Option<u64> {
    let unit = amount.chars().last()?;
    let digits = &amount[..amount.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = digits.parse().ok()?;

    match unit {
        'm' => value.checked_mul(100_000_000),
        'u' => value.checked_mul(100_000),
        'n' => value.checked_mul(100),
        // 1 pico-BTC is a tenth of a millisatoshi
        'p' if value % 10 == 0 => Some(value / 10),
        _ => None,
    }
}

fn strip_scheme(s: &str) -> &str {
    match s.get(..10) {
        Some(scheme) if scheme.eq_ignore_ascii_case("lightning:") => &s[10..],
        _ => s,
    }
}

fn parse_tagged_fields(data: &[u8], mut invoice: Bolt11Invoice) -> Option<Bolt11Invoice> {
    let mut index = 0;
    while data.len() - index >= 3 {
        let field_type = data[index];
        let length = (usize::from(data[index + 1]) << 5) | usize::from(data[index + 2]);
        let start = index + 3;
        let end = start.checked_add(length)?;
        if end > data.len() {
            return None;
        }
        let payload = &data[start..end];
        index = end;

        match field_type {
            FIELD_PAYMENT_HASH if invoice.payment_hash.is_none() => {
                invoice.payment_hash = parse_hash(payload);
            }
            FIELD_DESCRIPTION if invoice.description.is_none() => {
                invoice.description = bech32::convert_bits(payload, 5, 8, false)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok());
            }
            FIELD_EXPIRY if invoice.expiry.is_none() => {
                invoice.expiry = groups_to_u64(payload).map(Duration::from_secs);
            }
            FIELD_DESCRIPTION_HASH if invoice.description_hash.is_none() => {
                invoice.description_hash = parse_hash(payload);
            }
            FIELD_PAYEE if invoice.payee.is_none() => {
                if payload.len() == PUBKEY_GROUPS {
                    invoice.payee = bech32::convert_bits(payload, 5, 8, false).ok();
                }
            }
            FIELD_MIN_FINAL_CLTV if invoice.min_final_cltv_expiry.is_none() => {
                invoice.min_final_cltv_expiry = groups_to_u64(payload);
            }
            _ => {}
        }
    }
    Some(invoice)
}

fn parse_hash(payload: &[u8]) -> Option<[u8; 32]> {
    if payload.len() != HASH_GROUPS {
        return None;
    }
    let bytes = bech32::convert_bits(payload, 5, 8, false).ok()?;
    bytes.try_into().ok()
}

/// Big-endian value of 5-bit groups, `None` if it does not fit in 64 bits.
fn groups_to_u64(groups: &[u8]) -> Option<u64> {
    groups.iter().try_fold(0u64, |acc, g| {
        if acc >> 59 != 0 {
            return None;
        }
        Some((acc << 5) | u64::from(*g))
    })
}
