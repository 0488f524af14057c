//! MIT keytab (format 0x0502) holding one client key.
//!
//! GSSAPI has no call that takes a raw long-term key, but MIT Kerberos will obtain initial
//! tickets from a client keytab. Layout: a big-endian version word, then length-prefixed
//! entries of principal, timestamp, key version and key block.

use addcomputer_core::{Error, LongTermKey, Result};

const KEYTAB_VERSION: u16 = 0x0502;
const NT_PRINCIPAL: u32 = 1;
const KEY_VERSION: u8 = 1;

/// Encodes a keytab with a single entry for `principal` (`user@REALM`).
pub(crate) fn client_keytab(principal: &str, key: &LongTermKey) -> Result<Vec<u8>> {
    let (user, realm) = principal
        .rsplit_once('@')
        .filter(|(user, realm)| !user.is_empty() && !realm.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!("`{principal}` is not a user@REALM principal"))
        })?;
    let components: Vec<&str> = user.split('/').collect();

    let mut entry = Vec::new();
    push_u16(&mut entry, length_u16(components.len())?);
    push_counted(&mut entry, realm.as_bytes())?;
    for component in &components {
        push_counted(&mut entry, component.as_bytes())?;
    }
    entry.extend_from_slice(&NT_PRINCIPAL.to_be_bytes());
    entry.extend_from_slice(&0u32.to_be_bytes());
    entry.push(KEY_VERSION);
    push_u16(&mut entry, key.enctype().number());
    push_counted(&mut entry, key.bytes())?;
    entry.extend_from_slice(&u32::from(KEY_VERSION).to_be_bytes());

    let entry_len = i32::try_from(entry.len())
        .map_err(|_| Error::Configuration("keytab entry too large".to_string()))?;
    let mut keytab = Vec::with_capacity(entry.len() + 6);
    push_u16(&mut keytab, KEYTAB_VERSION);
    keytab.extend_from_slice(&entry_len.to_be_bytes());
    keytab.extend_from_slice(&entry);
    Ok(keytab)
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn push_counted(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    push_u16(buf, length_u16(data.len())?);
    buf.extend_from_slice(data);
    Ok(())
}

fn length_u16(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::Configuration("keytab field too long".to_string()))
}
