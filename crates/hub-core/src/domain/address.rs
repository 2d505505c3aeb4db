//! Bluetooth device address of the hub.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced when parsing a [`HubAddress`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The string does not split into six octets.
    #[error("invalid hub address {input:?}: expected six octets like 90:84:2B:4C:84:8A, found {found}")]
    OctetCount { input: String, found: usize },

    /// One of the octets is not two hex digits.
    #[error("invalid hub address {input:?}: {octet:?} is not a two-digit hex octet")]
    InvalidOctet { input: String, octet: String },
}

/// A six-octet Bluetooth address, most significant octet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HubAddress([u8; 6]);

impl HubAddress {
    /// Creates an address from raw octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for HubAddress {
    type Err = AddressError;

    /// Parses `AA:BB:CC:DD:EE:FF` (`-` is accepted as a separator too).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(|c: char| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(AddressError::OctetCount {
                input: s.to_string(),
                found: parts.len(),
            });
        }
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            let invalid = || AddressError::InvalidOctet {
                input: s.to_string(),
                octet: part.to_string(),
            };
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for HubAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}
