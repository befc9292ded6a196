use rustc_hash::FxHashSet;
use url::Url;

use crate::relays::types::RelayError;

/// Validate relay URL format
pub fn validate_relay_url(url: &str) -> Result<(), RelayError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(RelayError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let parsed = Url::parse(trimmed).map_err(|e| RelayError::InvalidUrl(format!("{}: {}", url, e)))?;
    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(RelayError::InvalidUrl(
            "URL must start with ws:// or wss://".to_string(),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(RelayError::InvalidUrl(format!("URL has no host: {}", url)));
    }

    Ok(())
}

/// Normalize relay URL (trim, lowercase scheme and host, drop the trailing slash)
pub fn normalize_relay_url(url: &str) -> String {
    let trimmed = url.trim();
    let mut normalized = match Url::parse(trimmed) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => trimmed.to_lowercase(),
    };
    if normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

/// Normalized, de-duplicated relays in caller order, plus the ones rejected.
pub fn partition_relays<S: AsRef<str>>(urls: &[S]) -> (Vec<String>, Vec<(String, RelayError)>) {
    let mut seen = FxHashSet::default();
    let mut valid = Vec::new();
    let mut invalid = Vec::new();

    for url in urls {
        let url = url.as_ref();
        if let Err(e) = validate_relay_url(url) {
            invalid.push((url.trim().to_string(), e));
            continue;
        }
        let normalized = normalize_relay_url(url);
        if seen.insert(normalized.clone()) {
            valid.push(normalized);
        }
    }

    (valid, invalid)
}

/// Relay hints for an identifier: valid URLs only, first occurrence wins, at
/// most `limit` of them. Candidates are expected best first.
pub fn rank_relay_hints<I, S>(candidates: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = FxHashSet::default();
    candidates
        .into_iter()
        .filter(|url| validate_relay_url(url.as_ref()).is_ok())
        .map(|url| normalize_relay_url(url.as_ref()))
        .filter(|url| seen.insert(url.clone()))
        .take(limit)
        .collect()
}
