//! Strongly-typed Windows security identifiers.
//!
//! Active Directory stores SIDs (`objectSid`, `tokenGroups`) in a packed
//! binary layout: revision byte, sub-authority count, a 48-bit big-endian
//! identifier authority, then little-endian 32-bit sub-authorities. This
//! module converts between that layout and the canonical `S-1-5-…` form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A Windows security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecurityIdentifier {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl SecurityIdentifier {
    /// Parses a SID from its packed binary representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSid`] if the buffer is truncated or the
    /// declared sub-authority count does not match the buffer length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::InvalidSid(format!(
                "buffer too short ({} bytes)",
                bytes.len()
            )));
        }

        let revision = bytes[0];
        let count = bytes[1] as usize;
        if bytes.len() != 8 + count * 4 {
            return Err(Error::InvalidSid(format!(
                "expected {} bytes for {count} sub-authorities, got {}",
                8 + count * 4,
                bytes.len()
            )));
        }

        let mut authority: u64 = 0;
        for byte in &bytes[2..8] {
            authority = (authority << 8) | u64::from(*byte);
        }

        let sub_authorities = bytes[8..]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Parses a SID from its canonical `S-R-A-S1-S2-…` string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSid`] if the string is not a canonical SID.
    pub fn parse_str(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidSid(input.to_string());

        let rest = input
            .strip_prefix("S-")
            .or_else(|| input.strip_prefix("s-"))
            .ok_or_else(invalid)?;
        let mut parts = rest.split('-');

        let revision = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let authority = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let sub_authorities = parts
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<u32>>>()?;

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Returns the packed binary representation.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.sub_authorities.len() * 4);
        bytes.push(self.revision);
        bytes.push(self.sub_authorities.len() as u8);
        bytes.extend_from_slice(&self.authority.to_be_bytes()[2..8]);
        for sub in &self.sub_authorities {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }
        bytes
    }

    /// Returns the last sub-authority (the RID), if any.
    #[must_use]
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }
}

impl fmt::Display for SecurityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for SecurityIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

impl TryFrom<String> for SecurityIdentifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse_str(&value)
    }
}

impl From<SecurityIdentifier> for String {
    fn from(sid: SecurityIdentifier) -> Self {
        sid.to_string()
    }
}
