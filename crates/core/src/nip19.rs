//! NIP-19 shareable identifiers
//!
//! Bare keys and ids (`npub`, `nsec`, `note`) are the 32 raw bytes. The others
//! (`nprofile`, `nevent`, `naddr`, `nrelay`) carry a type-length-value list:
//!
//! | type | meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | special: pubkey, event id, `d` identifier, relay url |
//! | 1    | relay hint, repeatable                               |
//! | 2    | author pubkey                                        |
//! | 3    | kind, u32 big-endian                                 |

use thiserror::Error;

use crate::bech32::{self, Bech32Error};
use crate::types::{EventId, Kind, PublicKey, SecretKey};

/// Relay hints written per identifier; decode keeps every hint found.
pub const MAX_RELAY_HINTS: usize = 3;

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

const URI_SCHEME: &str = "nostr:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Nip19Error {
    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),

    #[error("Invalid TLV: {0}")]
    InvalidTlv(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Bech32 error: {0}")]
    Bech32(#[from] Bech32Error),
}

type Result<T> = std::result::Result<T, Nip19Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nip19Profile {
    pub public_key: PublicKey,
    pub relays: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nip19Event {
    pub event_id: EventId,
    pub author: Option<PublicKey>,
    pub kind: Option<Kind>,
    pub relays: Vec<String>,
}

/// Address of a parameterized replaceable event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nip19Coordinate {
    pub identifier: String,
    pub public_key: PublicKey,
    pub kind: Kind,
    pub relays: Vec<String>,
}

impl Nip19Coordinate {
    /// Parse an `a` tag value, `"<kind>:<pubkey>:<d-tag>"`. The identifier may contain `:`.
    pub fn from_a_tag(a_tag: &str, relays: Vec<String>) -> Result<Self> {
        let mut parts = a_tag.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|k| k.parse::<Kind>().ok())
            .ok_or(Nip19Error::MissingField("kind"))?;
        let public_key = parts
            .next()
            .and_then(|pk| PublicKey::from_hex(pk).ok())
            .ok_or(Nip19Error::MissingField("author"))?;
        let identifier = parts
            .next()
            .ok_or(Nip19Error::MissingField("identifier"))?
            .to_string();
        Ok(Self {
            identifier,
            public_key,
            kind,
            relays,
        })
    }

    pub fn to_a_tag(&self) -> String {
        format!("{}:{}:{}", self.kind, self.public_key.to_hex(), self.identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nip19 {
    Pubkey(PublicKey),
    Secret(SecretKey),
    Note(EventId),
    Profile(Nip19Profile),
    Event(Nip19Event),
    Coordinate(Nip19Coordinate),
    Relay(String),
}

/// Loosely typed field set for building an identifier from a prefix chosen at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nip19Fields {
    /// Hex pubkey / event id / secret, the `d` identifier for `naddr`, or the url for `nrelay`.
    pub special: Option<String>,
    pub author: Option<PublicKey>,
    pub kind: Option<Kind>,
    /// Most preferred first.
    pub relays: Vec<String>,
}

impl Nip19 {
    pub fn prefix(&self) -> &'static str {
        match self {
            Nip19::Pubkey(_) => "npub",
            Nip19::Secret(_) => "nsec",
            Nip19::Note(_) => "note",
            Nip19::Profile(_) => "nprofile",
            Nip19::Event(_) => "nevent",
            Nip19::Coordinate(_) => "naddr",
            Nip19::Relay(_) => "nrelay",
        }
    }

    /// Assemble an identifier of type `prefix`, failing when a required field is absent.
    pub fn from_fields(prefix: &str, fields: &Nip19Fields) -> Result<Self> {
        let special = || fields.special.as_deref().ok_or(Nip19Error::MissingField("special"));
        let hex32 = |what: &'static str| -> Result<[u8; 32]> {
            let s = special()?;
            let bytes = hex::decode(s).map_err(|_| Nip19Error::MissingField(what))?;
            bytes.try_into().map_err(|_| Nip19Error::MissingField(what))
        };
        let relays = fields.relays.clone();

        Ok(match prefix {
            "npub" => Nip19::Pubkey(PublicKey(hex32("pubkey")?)),
            "nsec" => Nip19::Secret(SecretKey(hex32("secret key")?)),
            "note" => Nip19::Note(EventId(hex32("event id")?)),
            "nprofile" => Nip19::Profile(Nip19Profile {
                public_key: PublicKey(hex32("pubkey")?),
                relays,
            }),
            "nevent" => Nip19::Event(Nip19Event {
                event_id: EventId(hex32("event id")?),
                author: fields.author,
                kind: fields.kind,
                relays,
            }),
            "naddr" => Nip19::Coordinate(Nip19Coordinate {
                identifier: special()?.to_string(),
                public_key: fields.author.ok_or(Nip19Error::MissingField("author"))?,
                kind: fields.kind.ok_or(Nip19Error::MissingField("kind"))?,
                relays,
            }),
            "nrelay" => Nip19::Relay(special()?.to_string()),
            other => return Err(Nip19Error::InvalidPrefix(other.to_string())),
        })
    }

    pub fn to_bech32(&self) -> Result<String> {
        let bytes = match self {
            Nip19::Pubkey(pk) => pk.0.to_vec(),
            Nip19::Secret(sk) => sk.0.to_vec(),
            Nip19::Note(id) => id.0.to_vec(),
            Nip19::Profile(p) => {
                let mut tlv = Tlv::default();
                tlv.push(TLV_SPECIAL, &p.public_key.0)?;
                tlv.push_relays(&p.relays)?;
                tlv.0
            }
            Nip19::Event(e) => {
                let mut tlv = Tlv::default();
                tlv.push(TLV_SPECIAL, &e.event_id.0)?;
                tlv.push_relays(&e.relays)?;
                if let Some(author) = &e.author {
                    tlv.push(TLV_AUTHOR, &author.0)?;
                }
                if let Some(kind) = e.kind {
                    tlv.push(TLV_KIND, &u32::from(kind).to_be_bytes())?;
                }
                tlv.0
            }
            Nip19::Coordinate(c) => {
                let mut tlv = Tlv::default();
                tlv.push(TLV_SPECIAL, c.identifier.as_bytes())?;
                tlv.push_relays(&c.relays)?;
                tlv.push(TLV_AUTHOR, &c.public_key.0)?;
                tlv.push(TLV_KIND, &u32::from(c.kind).to_be_bytes())?;
                tlv.0
            }
            Nip19::Relay(url) => {
                let mut tlv = Tlv::default();
                tlv.push(TLV_SPECIAL, url.as_bytes())?;
                tlv.0
            }
        };
        Ok(bech32::encode_bytes(self.prefix(), &bytes)?)
    }

    pub fn from_bech32(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = match s.get(..URI_SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(URI_SCHEME) => &s[URI_SCHEME.len()..],
            _ => s,
        };

        let (hrp, bytes) = bech32::decode_bytes(s, false)?;
        match hrp.as_str() {
            "npub" => Ok(Nip19::Pubkey(PublicKey(exact_32(&bytes, "npub")?))),
            "nsec" => Ok(Nip19::Secret(SecretKey(exact_32(&bytes, "nsec")?))),
            "note" => Ok(Nip19::Note(EventId(exact_32(&bytes, "note")?))),
            "nprofile" => {
                let tlv = ParsedTlv::parse(&bytes)?;
                let special = tlv.special.ok_or(Nip19Error::MissingField("pubkey"))?;
                Ok(Nip19::Profile(Nip19Profile {
                    public_key: PublicKey(exact_32(special, "nprofile pubkey")?),
                    relays: tlv.relays,
                }))
            }
            "nevent" => {
                let tlv = ParsedTlv::parse(&bytes)?;
                let special = tlv.special.ok_or(Nip19Error::MissingField("event id"))?;
                Ok(Nip19::Event(Nip19Event {
                    event_id: EventId(exact_32(special, "nevent id")?),
                    author: tlv.author.map(PublicKey),
                    kind: tlv.kind,
                    relays: tlv.relays,
                }))
            }
            "naddr" => {
                let tlv = ParsedTlv::parse(&bytes)?;
                let special = tlv.special.ok_or(Nip19Error::MissingField("identifier"))?;
                let identifier = String::from_utf8(special.to_vec())
                    .map_err(|_| Nip19Error::InvalidTlv("identifier is not utf-8".to_string()))?;
                Ok(Nip19::Coordinate(Nip19Coordinate {
                    identifier,
                    public_key: tlv
                        .author
                        .map(PublicKey)
                        .ok_or(Nip19Error::MissingField("author"))?,
                    kind: tlv.kind.ok_or(Nip19Error::MissingField("kind"))?,
                    relays: tlv.relays,
                }))
            }
            "nrelay" => {
                let tlv = ParsedTlv::parse(&bytes)?;
                let special = tlv.special.ok_or(Nip19Error::MissingField("relay"))?;
                String::from_utf8(special.to_vec())
                    .map(Nip19::Relay)
                    .map_err(|_| Nip19Error::InvalidTlv("relay is not utf-8".to_string()))
            }
            other => Err(Nip19Error::InvalidPrefix(other.to_string())),
        }
    }
}

/// Encode `fields` under `prefix`.
pub fn encode(prefix: &str, fields: &Nip19Fields) -> Result<String> {
    Nip19::from_fields(prefix, fields)?.to_bech32()
}

pub fn decode(identifier: &str) -> Result<Nip19> {
    Nip19::from_bech32(identifier)
}

/// Non-failing decode for text scanned out of notes.
pub fn decode_opt(identifier: &str) -> Option<Nip19> {
    decode(identifier).ok()
}

pub fn npub(pubkey: &PublicKey) -> Result<String> {
    Nip19::Pubkey(*pubkey).to_bech32()
}

pub fn note(id: &EventId) -> Result<String> {
    Nip19::Note(*id).to_bech32()
}

pub fn nsec(secret: &SecretKey) -> Result<String> {
    Nip19::Secret(secret.clone()).to_bech32()
}

/// Hex pubkey from an `npub` or `nprofile`.
pub fn pubkey_from_bech32(s: &str) -> Option<PublicKey> {
    match decode_opt(s)? {
        Nip19::Pubkey(pk) => Some(pk),
        Nip19::Profile(p) => Some(p.public_key),
        _ => None,
    }
}

fn exact_32(bytes: &[u8], what: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| Nip19Error::InvalidTlv(format!("{} must be 32 bytes, got {}", what, bytes.len())))
}

// ----------------------------------------------------------------------------
// TLV
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Tlv(Vec<u8>);

impl Tlv {
    fn push(&mut self, t: u8, value: &[u8]) -> Result<()> {
        let len = u8::try_from(value.len())
            .map_err(|_| Nip19Error::InvalidTlv(format!("value of type {} too long", t)))?;
        self.0.push(t);
        self.0.push(len);
        self.0.extend_from_slice(value);
        Ok(())
    }

    fn push_relays(&mut self, relays: &[String]) -> Result<()> {
        for relay in relays.iter().take(MAX_RELAY_HINTS) {
            self.push(TLV_RELAY, relay.as_bytes())?;
        }
        Ok(())
    }
}

struct ParsedTlv<'a> {
    special: Option<&'a [u8]>,
    relays: Vec<String>,
    author: Option<[u8; 32]>,
    kind: Option<Kind>,
}

impl<'a> ParsedTlv<'a> {
    fn parse(mut data: &'a [u8]) -> Result<Self> {
        let mut parsed = ParsedTlv {
            special: None,
            relays: Vec::new(),
            author: None,
            kind: None,
        };

        while !data.is_empty() {
            if data.len() < 2 {
                return Err(Nip19Error::InvalidTlv("truncated header".to_string()));
            }
            let t = data[0];
            let l = usize::from(data[1]);
            if data.len() < 2 + l {
                return Err(Nip19Error::InvalidTlv("truncated value".to_string()));
            }
            let value = &data[2..2 + l];
            data = &data[2 + l..];

            match t {
                TLV_SPECIAL => {
                    if parsed.special.is_none() {
                        parsed.special = Some(value);
                    }
                }
                TLV_RELAY => {
                    if let Ok(relay) = std::str::from_utf8(value) {
                        parsed.relays.push(relay.to_string());
                    }
                }
                TLV_AUTHOR => {
                    if parsed.author.is_none() {
                        parsed.author = Some(exact_32(value, "author")?);
                    }
                }
                TLV_KIND => {
                    if parsed.kind.is_none() {
                        let bytes: [u8; 4] = value
                            .try_into()
                            .map_err(|_| Nip19Error::InvalidTlv("kind must be 4 bytes".to_string()))?;
                        let kind = Kind::try_from(u32::from_be_bytes(bytes))
                            .map_err(|_| Nip19Error::InvalidTlv("kind out of range".to_string()))?;
                        parsed.kind = Some(kind);
                    }
                }
                _ => {} // Skip unknown TLV types
            }
        }

        Ok(parsed)
    }
}
