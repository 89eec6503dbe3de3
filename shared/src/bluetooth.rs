//! Addresses, PSMs and channel handles.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/*──────────────────────────── BthAddr ───────────────────────────────────*/

const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// 48-bit Bluetooth device address.
///
/// Stored in the low 48 bits of a `u64`; the upper 16 bits are always
/// zero. Displays as twelve upper-case hex digits (`001BDC0A1B2C`) and
/// parses from that form or from `00:1B:DC:0A:1B:2C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BthAddr(u64);

impl BthAddr {
    pub const fn new(raw: u64) -> Self {
        Self(raw & ADDR_MASK)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Octets in transmission order (most significant first).
    pub fn octets(self) -> [u8; 6] {
        let b = self.0.to_be_bytes();
        [b[2], b[3], b[4], b[5], b[6], b[7]]
    }
}

impl From<[u8; 6]> for BthAddr {
    fn from(o: [u8; 6]) -> Self {
        Self(u64::from_be_bytes([0, 0, o[0], o[1], o[2], o[3], o[4], o[5]]))
    }
}

impl fmt::Display for BthAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012X}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrParseError {
    #[error("address '{0}' must have 12 hex digits")]
    Length(String),

    #[error("address '{0}' contains a non-hex digit")]
    Digit(String),
}

impl FromStr for BthAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits: String = if trimmed.contains(':') || trimmed.contains('-') {
            let groups: Vec<&str> = trimmed.split([':', '-']).collect();
            if groups.len() != 6 || groups.iter().any(|g| g.len() != 2) {
                return Err(AddrParseError::Length(s.into()));
            }
            groups.concat()
        } else {
            trimmed.into()
        };

        if digits.len() != 12 {
            return Err(AddrParseError::Length(s.into()));
        }
        u64::from_str_radix(&digits, 16)
            .map(Self::new)
            .map_err(|_| AddrParseError::Digit(s.into()))
    }
}

impl TryFrom<String> for BthAddr {
    type Error = AddrParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BthAddr> for String {
    fn from(a: BthAddr) -> Self {
        a.to_string()
    }
}

/*──────────────────────────── Psm ───────────────────────────────────────*/

/// L2CAP protocol/service multiplexor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Psm(pub u16);

impl Psm {
    /// HID control channel.
    pub const HID_CONTROL: Psm = Psm(0x11);
    /// HID interrupt channel.
    pub const HID_INTERRUPT: Psm = Psm(0x13);
}

impl fmt::Display for Psm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u16> for Psm {
    fn from(v: u16) -> Self {
        Psm(v)
    }
}

/*──────────────────────────── ChannelHandle ─────────────────────────────*/

/// Opaque L2CAP channel handle assigned by the stack. Zero means "none yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelHandle(pub u64);
