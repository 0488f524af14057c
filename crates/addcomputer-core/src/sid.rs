//! Security identifiers as returned by SAMR domain lookups and the `objectSid` attribute.

use std::fmt;

use crate::error::{Error, Result};

const HEADER_LEN: usize = 8;

/// Windows security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    revision: u8,
    identifier_authority: [u8; 6],
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Builds a SID from its parts.
    #[must_use]
    pub fn new(revision: u8, identifier_authority: [u8; 6], sub_authorities: Vec<u32>) -> Self {
        Self {
            revision,
            identifier_authority,
            sub_authorities,
        }
    }

    /// Decodes the binary `SID` structure (revision, count, 48-bit big-endian authority,
    /// little-endian sub-authorities).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryOperation`] if the buffer is truncated or its length does not
    /// match the sub-authority count.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let malformed =
            || Error::DirectoryOperation(format!("malformed SID of {} bytes", bytes.len()));

        if bytes.len() < HEADER_LEN {
            return Err(malformed());
        }
        let (header, rest) = bytes.split_at(HEADER_LEN);
        let count = usize::from(header[1]);
        if rest.len() != count * 4 {
            return Err(malformed());
        }

        let mut identifier_authority = [0u8; 6];
        identifier_authority.copy_from_slice(&header[2..]);

        let sub_authorities = rest
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self::new(header[0], identifier_authority, sub_authorities))
    }

    /// Sub-authorities in order.
    #[must_use]
    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// Encodes the binary `SID` structure read by [`Sid::from_bytes`].
    ///
    /// Sub-authorities beyond the 255 a SID can count are dropped.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let subs = &self.sub_authorities[..self.sub_authorities.len().min(255)];
        let mut bytes = Vec::with_capacity(HEADER_LEN + subs.len() * 4);
        bytes.push(self.revision);
        bytes.extend(u8::try_from(subs.len()));
        bytes.extend_from_slice(&self.identifier_authority);
        for sub_authority in subs {
            bytes.extend_from_slice(&sub_authority.to_le_bytes());
        }
        bytes
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.revision)?;

        let mut be_bytes = [0u8; 8];
        be_bytes[2..].copy_from_slice(&self.identifier_authority);
        let authority = u64::from_be_bytes(be_bytes);
        if authority <= 0xFFFF_FFFF {
            write!(f, "-{authority}")?;
        } else {
            write!(f, "-0x{authority:X}")?;
        }

        for sub_authority in &self.sub_authorities {
            write!(f, "-{sub_authority}")?;
        }
        Ok(())
    }
}
