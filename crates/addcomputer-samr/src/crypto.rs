//! Password obfuscation for `SamrSetInformationUser2`.

use md5::{Digest, Md5};
use rand::RngCore;

use addcomputer_core::{Error, Result};

/// Bytes available to the UTF-16 password inside the encrypted buffer.
const PASSWORD_AREA: usize = 512;
const SALT_LEN: usize = 16;

/// Length of `SAMPR_ENCRYPTED_USER_PASSWORD_NEW`.
pub(crate) const ENCRYPTED_PASSWORD_NEW_LEN: usize = PASSWORD_AREA + 4 + SALT_LEN;

/// Alleged RC4 keystream.
struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (slot, value) in state.iter_mut().zip(0u8..=255) {
            *slot = value;
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key[i % key.len()]);
            state.swap(i, usize::from(j));
        }
        Self { state, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[usize::from(self.i)]);
            self.state.swap(usize::from(self.i), usize::from(self.j));
            let index = self.state[usize::from(self.i)].wrapping_add(self.state[usize::from(self.j)]);
            *byte ^= self.state[usize::from(index)];
        }
    }
}

/// Builds `SAMPR_ENCRYPTED_USER_PASSWORD_NEW`.
///
/// The UTF-16LE password sits at the end of 512 random bytes, followed by its byte length; those
/// 516 bytes are RC4 encrypted with `MD5(salt || session_key)` and the clear salt is appended.
pub(crate) fn encrypt_password_new(
    password: &str,
    session_key: &[u8],
    rng: &mut impl RngCore,
) -> Result<[u8; ENCRYPTED_PASSWORD_NEW_LEN]> {
    if session_key.is_empty() {
        return Err(Error::Session(
            "no session key to encrypt the password with".to_string(),
        ));
    }
    let encoded: Vec<u8> = password
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    if encoded.len() > PASSWORD_AREA {
        return Err(Error::Configuration(
            "computer password is longer than 256 characters".to_string(),
        ));
    }

    let mut buffer = [0u8; ENCRYPTED_PASSWORD_NEW_LEN];
    rng.fill_bytes(&mut buffer[..PASSWORD_AREA]);
    buffer[PASSWORD_AREA - encoded.len()..PASSWORD_AREA].copy_from_slice(&encoded);
    let length = u32::try_from(encoded.len())
        .map_err(|_| Error::Configuration("computer password too long".to_string()))?;
    buffer[PASSWORD_AREA..PASSWORD_AREA + 4].copy_from_slice(&length.to_le_bytes());

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut hasher = Md5::new();
    hasher.update(salt);
    hasher.update(session_key);
    let key = hasher.finalize();

    Rc4::new(&key).apply(&mut buffer[..PASSWORD_AREA + 4]);
    buffer[PASSWORD_AREA + 4..].copy_from_slice(&salt);
    Ok(buffer)
}
