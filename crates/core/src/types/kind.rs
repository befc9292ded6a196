//! Kind constants and builders for the events this crate produces.

use crate::types::{EventId, Kind, PublicKey, UnsignedEvent};

// Kind constants - plain numbers, matching the wire
pub const METADATA: Kind = 0;
pub const TEXT_NOTE: Kind = 1;
pub const CONTACT_LIST: Kind = 3;
pub const ENCRYPTED_DIRECT_MESSAGE: Kind = 4;
pub const DELETION: Kind = 5;
pub const REACTION: Kind = 7;
pub const ZAP_REQUEST: Kind = 9734;
pub const ZAP_RECEIPT: Kind = 9735;
pub const PIN_LIST: Kind = 10001;
pub const RELAY_LIST: Kind = 10002;
pub const CLIENT_AUTH: Kind = 22242;
pub const NOSTR_CONNECT: Kind = 24133;
pub const FOLLOW_SET: Kind = 30000;

/// Replaceable kinds keyed by `d` tag.
pub fn is_parameterized_replaceable(kind: Kind) -> bool {
    (30000..40000).contains(&kind)
}

pub fn is_replaceable(kind: Kind) -> bool {
    kind == METADATA || kind == CONTACT_LIST || (10000..20000).contains(&kind)
}

pub fn is_ephemeral(kind: Kind) -> bool {
    (20000..30000).contains(&kind)
}

fn tag(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Target of a zap: a profile, optionally narrowed to an event or an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapTarget {
    pub recipient: PublicKey,
    pub event_id: Option<EventId>,
    /// `<kind>:<pubkey>:<d-tag>` coordinate of a replaceable event.
    pub coordinate: Option<String>,
}

impl UnsignedEvent {
    pub fn text_note(content: impl Into<String>, tags: Vec<Vec<String>>) -> Self {
        Self::new(TEXT_NOTE, content, tags)
    }

    /// Deletion request for `ids`, with an optional human readable reason.
    pub fn deletion(ids: &[EventId], reason: Option<&str>) -> Self {
        let tags = ids.iter().map(|id| tag(&["e", &id.to_hex()])).collect();
        Self::new(DELETION, reason.unwrap_or_default(), tags)
    }

    /// Follow set (kind 30000) named by its `d` tag.
    pub fn follow_set(identifier: &str, title: Option<&str>, pubkeys: &[PublicKey]) -> Self {
        let mut tags = vec![tag(&["d", identifier])];
        if let Some(title) = title {
            tags.push(tag(&["title", title]));
        }
        tags.extend(pubkeys.iter().map(|pk| tag(&["p", &pk.to_hex()])));
        Self::new(FOLLOW_SET, "", tags)
    }

    pub fn pin_list(ids: &[EventId]) -> Self {
        let tags = ids.iter().map(|id| tag(&["e", &id.to_hex()])).collect();
        Self::new(PIN_LIST, "", tags)
    }

    /// NIP-57 zap request. `amount_msat` and `lnurl` are copied verbatim into tags.
    pub fn zap_request(
        target: &ZapTarget,
        amount_msat: u64,
        relays: &[String],
        lnurl: Option<&str>,
        comment: &str,
    ) -> Self {
        let mut relays_tag = Vec::with_capacity(relays.len() + 1);
        relays_tag.push("relays".to_string());
        relays_tag.extend(relays.iter().cloned());

        let mut tags = vec![relays_tag, tag(&["amount", &amount_msat.to_string()])];
        if let Some(lnurl) = lnurl {
            tags.push(tag(&["lnurl", lnurl]));
        }
        tags.push(tag(&["p", &target.recipient.to_hex()]));
        if let Some(id) = &target.event_id {
            tags.push(tag(&["e", &id.to_hex()]));
        }
        if let Some(coordinate) = &target.coordinate {
            tags.push(tag(&["a", coordinate]));
        }
        Self::new(ZAP_REQUEST, comment, tags)
    }

    /// NIP-42 authentication event answering `challenge` from `relay_url`.
    pub fn client_auth(relay_url: &str, challenge: &str) -> Self {
        Self::new(
            CLIENT_AUTH,
            "",
            vec![tag(&["relay", relay_url]), tag(&["challenge", challenge])],
        )
    }
}
