//! NDR20 marshalling for the handful of types the SAMR calls carry.
//!
//! Offsets and alignment are relative to the start of the stub. Embedded pointers are written
//! as referent IDs with their targets deferred until the enclosing structure is complete.

use addcomputer_core::{Error, Result, Sid};

use crate::protocol::RpcHandle;

const FIRST_REFERENT: u32 = 0x0002_0000;

/// Little-endian stub writer.
#[derive(Debug)]
pub(crate) struct NdrWriter {
    buf: Vec<u8>,
    next_referent: u32,
}

impl Default for NdrWriter {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            next_referent: FIRST_REFERENT,
        }
    }
}

impl NdrWriter {
    pub(crate) fn align(&mut self, to: usize) {
        while self.buf.len() % to != 0 {
            self.buf.push(0);
        }
    }

    pub(crate) fn u16(&mut self, value: u16) {
        self.align(2);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.align(4);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub(crate) fn referent(&mut self) -> u32 {
        let id = self.next_referent;
        self.next_referent += 4;
        self.u32(id);
        id
    }

    pub(crate) fn handle(&mut self, handle: &RpcHandle) {
        self.align(4);
        self.bytes(&handle.0);
    }

    /// Unique pointer to a `[string] wchar_t*`, NUL terminated.
    pub(crate) fn unique_wide_string(&mut self, value: &str) -> Result<()> {
        self.referent();
        let mut units: Vec<u16> = value.encode_utf16().collect();
        units.push(0);
        self.conformant_varying_units(&units)
    }

    /// Inline part of an `RPC_UNICODE_STRING`; the characters follow via
    /// [`NdrWriter::unicode_string_body`].
    pub(crate) fn unicode_string_header(&mut self, value: &str) -> Result<()> {
        let bytes = wide_len(value)?;
        self.u16(bytes);
        self.u16(bytes);
        self.referent();
        Ok(())
    }

    /// Deferred characters of an `RPC_UNICODE_STRING`, no terminator.
    pub(crate) fn unicode_string_body(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.conformant_varying_units(&units)
    }

    /// An `RPC_UNICODE_STRING` passed by value with nothing else deferred.
    pub(crate) fn unicode_string(&mut self, value: &str) -> Result<()> {
        self.unicode_string_header(value)?;
        self.unicode_string_body(value)
    }

    /// Conformant `RPC_SID` behind a reference pointer.
    pub(crate) fn sid(&mut self, sid: &Sid) {
        let bytes = sid.to_bytes();
        self.u32(u32::from(bytes.get(1).copied().unwrap_or_default()));
        self.bytes(&bytes);
    }

    fn conformant_varying_units(&mut self, units: &[u16]) -> Result<()> {
        let count = count_u32(units.len())?;
        self.u32(count);
        self.u32(0);
        self.u32(count);
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
        Ok(())
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn wide_len(value: &str) -> Result<u16> {
    u16::try_from(value.encode_utf16().count() * 2)
        .map_err(|_| Error::Configuration(format!("`{value}` is too long for an RPC string")))
}

pub(crate) fn count_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::Session("NDR array too large".to_string()))
}

/// Little-endian stub reader.
#[derive(Debug)]
pub(crate) struct NdrReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> NdrReader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn align(&mut self, to: usize) {
        let rem = self.pos % to;
        if rem != 0 {
            self.pos += to - rem;
        }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        let end = end.ok_or_else(|| {
            Error::Session(format!(
                "truncated RPC response: need {len} bytes at offset {} of {}",
                self.pos,
                self.buf.len()
            ))
        })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.align(2);
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.align(4);
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn handle(&mut self) -> Result<RpcHandle> {
        self.align(4);
        let mut handle = [0u8; 20];
        handle.copy_from_slice(self.take(20)?);
        Ok(RpcHandle(handle))
    }

    /// Inline part of an `RPC_UNICODE_STRING`: byte length and whether a body follows.
    pub(crate) fn unicode_string_header(&mut self) -> Result<(u16, bool)> {
        let len = self.u16()?;
        let _max = self.u16()?;
        let referent = self.u32()?;
        Ok((len, referent != 0))
    }

    pub(crate) fn unicode_string_body(&mut self) -> Result<String> {
        let _max = self.u32()?;
        let _offset = self.u32()?;
        let actual = usize::try_from(self.u32()?)
            .map_err(|_| Error::Session("RPC string too long".to_string()))?;
        let raw = self.take(actual * 2)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|err| Error::Session(format!("invalid UTF-16 in RPC string: {err}")))
    }

    /// Conformant `RPC_SID`.
    pub(crate) fn sid(&mut self) -> Result<Sid> {
        let count = self.u32()?;
        let len = 8 + 4 * usize::try_from(count)
            .map_err(|_| Error::Session("SID sub-authority count overflows".to_string()))?;
        let bytes = self.take(len)?;
        Sid::from_bytes(bytes).map_err(|err| Error::Session(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_is_a_unique_terminated_string() {
        let mut writer = NdrWriter::default();
        writer.unique_wide_string(r"\\dc").unwrap();
        writer.u32(0x30);
        let bytes = writer.into_bytes();

        assert_eq!(&bytes[..4], &FIRST_REFERENT.to_le_bytes());
        // max, offset and actual count include the terminator
        assert_eq!(&bytes[4..16], &[5, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0]);
        assert_eq!(&bytes[16..26], b"\\\0\\\0d\0c\0\0\0");
        // padded back to 4 before the next long
        assert_eq!(&bytes[26..28], &[0, 0]);
        assert_eq!(&bytes[28..], &[0x30, 0, 0, 0]);
    }

    #[test]
    fn unicode_string_has_no_terminator() {
        let mut writer = NdrWriter::default();
        writer.u16(7);
        writer.unicode_string("CORP").unwrap();
        let bytes = writer.into_bytes();

        assert_eq!(&bytes[2..4], &[8, 0]);
        assert_eq!(&bytes[4..6], &[8, 0]);
        assert_eq!(&bytes[8..12], &FIRST_REFERENT.to_le_bytes());
        assert_eq!(&bytes[12..24], &[4, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(&bytes[24..], b"C\0O\0R\0P\0");
    }

    #[test]
    fn referents_are_distinct() {
        let mut writer = NdrWriter::default();
        let first = writer.referent();
        let second = writer.referent();
        assert_ne!(first, second);
        assert_ne!(first, 0);
    }

    #[test]
    fn sid_is_conformant_on_its_count() {
        let sid = Sid::new(1, [0, 0, 0, 0, 0, 5], vec![21, 1, 2, 3]);
        let mut writer = NdrWriter::default();
        writer.sid(&sid);
        let bytes = writer.into_bytes();

        assert_eq!(&bytes[..4], &[4, 0, 0, 0]);
        assert_eq!(&bytes[4..], sid.to_bytes().as_slice());
        assert_eq!(NdrReader::new(&bytes).sid().unwrap(), sid);
    }

    #[test]
    fn reader_aligns_and_reports_truncation() {
        let bytes = [1u8, 0, 0, 0, 0x34, 0x12, 0, 0, 0xef, 0xbe, 0xad, 0xde];
        let mut reader = NdrReader::new(&bytes);
        assert_eq!(reader.u16().unwrap(), 1);
        assert_eq!(reader.u32().unwrap(), 0x1234);
        assert_eq!(reader.u32().unwrap(), 0xdead_beef);
        assert!(matches!(reader.u32(), Err(Error::Session(_))));
    }

    #[test]
    fn reads_back_unicode_string() {
        let mut writer = NdrWriter::default();
        writer.unicode_string("Builtin").unwrap();
        let bytes = writer.into_bytes();

        let mut reader = NdrReader::new(&bytes);
        assert_eq!(reader.unicode_string_header().unwrap(), (14, true));
        assert_eq!(reader.unicode_string_body().unwrap(), "Builtin");
    }
}
