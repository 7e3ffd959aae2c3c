//! Address validation and normalization.
//!
//! Every entry stored in a rule list passes through here first, so list
//! membership checks compare canonical forms only.

use std::net::IpAddr;

use thiserror::Error;

use crate::models::Category;

/// Errors raised for malformed list entries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("entry is empty")]
    Empty,
    #[error("not a valid IPv4 or IPv6 address: {0}")]
    InvalidIp(String),
    #[error("not a valid MAC address: {0}")]
    InvalidMac(String),
}

/// Normalize `raw` for the given list.
pub fn normalize(category: Category, raw: &str) -> Result<String, AddressError> {
    if category.is_mac() {
        normalize_mac(raw)
    } else {
        normalize_ip(raw)
    }
}

/// Canonical textual form of an IPv4 or IPv6 address.
pub fn normalize_ip(raw: &str) -> Result<String, AddressError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }
    trimmed
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| AddressError::InvalidIp(trimmed.to_string()))
}

/// Lowercase, colon-separated form of a MAC address.
///
/// Input must be six two-digit hex octets separated consistently by `:` or `-`.
pub fn normalize_mac(raw: &str) -> Result<String, AddressError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }
    let separator = if trimmed.contains(':') { ':' } else { '-' };
    let octets: Vec<&str> = trimmed.split(separator).collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(AddressError::InvalidMac(trimmed.to_string()));
    }
    Ok(octets.join(":").to_ascii_lowercase())
}

/// True for entries holding an IPv6 address.
pub fn is_ipv6(entry: &str) -> bool {
    matches!(entry.parse::<IpAddr>(), Ok(IpAddr::V6(_)))
}
