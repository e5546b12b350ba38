//! Peer link-layer addresses

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AddressParseError;

// ----------------------------------------------------------------------------
// Peer Address
// ----------------------------------------------------------------------------

/// Six-byte link-layer identifier of a connected peer, most-significant byte first.
///
/// Renders as `00:1a:7d:da:71:13`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    /// Address with every byte zero
    pub const ANY: PeerAddress = PeerAddress([0; 6]);

    /// Create an address from its six bytes
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create an address from the low 48 bits of a platform integer address
    pub fn from_u64(raw: u64) -> Self {
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (raw >> ((5 - i) * 8)) as u8;
        }
        Self(bytes)
    }

    /// Pack the address back into the low 48 bits of an integer
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// Raw bytes, most-significant first
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for PeerAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');

        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AddressParseError::new(s))?;
            if part.len() != 2 {
                return Err(AddressParseError::new(s));
            }
            let mut decoded = [0u8; 1];
            hex::decode_to_slice(part, &mut decoded).map_err(|_| AddressParseError::new(s))?;
            *byte = decoded[0];
        }

        if parts.next().is_some() {
            return Err(AddressParseError::new(s));
        }

        Ok(Self(bytes))
    }
}

impl Serialize for PeerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
