//! Authentication material for the domain controller.
//!
//! Exactly one [`AuthSecret`] drives authentication. Whether that secret is used for Kerberos or
//! NTLM is decided by [`Credentials::use_kerberos`].

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::error::{Error, Result};

/// LM hash of the empty password, used when only the NT half is supplied.
pub const EMPTY_LM_HASH: &str = "aad3b435b51404eeaad3b435b51404ee";

/// NUL units appended after the hex digits so NTLM clients read the password as an NT hash.
const NT_HASH_PASSWORD_PADDING: usize = 256;

/// LM/NT hash pair, both lowercase hex.
#[derive(Clone, PartialEq, Eq)]
pub struct NtlmHashes {
    lm: String,
    nt: String,
}

impl NtlmHashes {
    /// Parses `LMHASH:NTHASH`; an empty LM half becomes [`EMPTY_LM_HASH`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the separator is missing or either half is not
    /// 32 hex digits.
    pub fn parse(input: &str) -> Result<Self> {
        let (lm, nt) = input.split_once(':').ok_or_else(|| {
            Error::Configuration("hashes must use the LMHASH:NTHASH format".to_string())
        })?;

        let lm = if lm.is_empty() { EMPTY_LM_HASH } else { lm };
        Ok(Self {
            lm: normalize_hash(lm, "LM")?,
            nt: normalize_hash(nt, "NT")?,
        })
    }

    /// LM half as hex.
    #[must_use]
    pub fn lm(&self) -> &str {
        &self.lm
    }

    /// NT half as hex.
    #[must_use]
    pub fn nt(&self) -> &str {
        &self.nt
    }

    /// `LM:NT` form expected by NTLM binds.
    #[must_use]
    pub fn joined(&self) -> String {
        format!("{}:{}", self.lm, self.nt)
    }

    /// NT half as raw bytes, which is also the RC4-HMAC Kerberos key.
    #[must_use]
    pub fn nt_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        // `nt` is always 32 validated hex digits
        if let Ok(decoded) = hex::decode(&self.nt) {
            bytes.copy_from_slice(&decoded);
        }
        bytes
    }

    /// NT hash in the password form `sspi` NTLM clients treat as a precomputed hash.
    ///
    /// The uppercase hex digits are packed two per UTF-16 unit, so the UTF-16LE encoding of
    /// the result starts with the 32 ASCII digits, followed by 512 zero bytes.
    #[must_use]
    pub fn as_ntlm_password(&self) -> SecretString {
        let digits = self.nt.to_ascii_uppercase().into_bytes();
        let mut password: String = digits
            .chunks_exact(2)
            .filter_map(|pair| char::from_u32(u32::from(pair[0]) | (u32::from(pair[1]) << 8)))
            .collect();
        password.extend(std::iter::repeat('\0').take(NT_HASH_PASSWORD_PADDING));
        SecretString::from(password)
    }
}

impl fmt::Debug for NtlmHashes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NtlmHashes([REDACTED])")
    }
}

fn normalize_hash(value: &str, half: &str) -> Result<String> {
    let bytes = hex::decode(value)?;
    if bytes.len() != 16 {
        return Err(Error::Configuration(format!(
            "{half} hash must be 32 hex digits"
        )));
    }
    Ok(hex::encode(bytes))
}

/// The one secret that authenticates the principal.
#[derive(Debug, Clone)]
pub enum AuthSecret {
    /// Plaintext password (may be empty when a ticket cache is expected).
    Password(SecretString),
    /// NTLM hash pair.
    Hashes(NtlmHashes),
    /// Kerberos AES key, hex encoded (128 or 256 bit).
    AesKey(SecretString),
}

/// Kerberos encryption types a long-term key can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    /// `aes128-cts-hmac-sha1-96`.
    Aes128CtsHmacSha196,
    /// `aes256-cts-hmac-sha1-96`.
    Aes256CtsHmacSha196,
    /// `rc4-hmac`, keyed by the NT hash.
    Rc4Hmac,
}

impl EncryptionType {
    /// IANA encryption type number.
    #[must_use]
    pub const fn number(self) -> u16 {
        match self {
            Self::Aes128CtsHmacSha196 => 17,
            Self::Aes256CtsHmacSha196 => 18,
            Self::Rc4Hmac => 23,
        }
    }
}

/// A Kerberos long-term key supplied in place of a password.
#[derive(Clone, PartialEq, Eq)]
pub struct LongTermKey {
    enctype: EncryptionType,
    bytes: Vec<u8>,
}

impl LongTermKey {
    /// Encryption type of the key.
    #[must_use]
    pub const fn enctype(&self) -> EncryptionType {
        self.enctype
    }

    /// Raw key bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for LongTermKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LongTermKey")
            .field("enctype", &self.enctype)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl AuthSecret {
    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::Hashes(_) => "ntlm-hashes",
            Self::AesKey(_) => "aes-key",
        }
    }
}

/// Principal plus secret used to authenticate to the domain controller.
#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    domain: String,
    secret: AuthSecret,
    use_kerberos: bool,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// An AES key always implies Kerberos.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        domain: impl Into<String>,
        secret: AuthSecret,
        use_kerberos: bool,
    ) -> Self {
        let use_kerberos = use_kerberos || matches!(secret, AuthSecret::AesKey(_));
        Self {
            username: username.into(),
            domain: domain.into(),
            secret,
            use_kerberos,
        }
    }

    /// Authenticating principal name (without domain).
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Domain of the principal.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `DOMAIN\user` form used by NTLM binds.
    #[must_use]
    pub fn down_level_logon_name(&self) -> String {
        format!("{}\\{}", self.domain, self.username)
    }

    /// Secret material.
    #[must_use]
    pub const fn secret(&self) -> &AuthSecret {
        &self.secret
    }

    /// Returns true when Kerberos should be used.
    #[must_use]
    pub const fn use_kerberos(&self) -> bool {
        self.use_kerberos
    }

    /// Returns true when the principal itself is a machine account.
    #[must_use]
    pub fn is_machine_account(&self) -> bool {
        self.username.ends_with(crate::names::ACCOUNT_MARKER)
    }

    /// Kerberos realm: the domain in upper case.
    #[must_use]
    pub fn realm(&self) -> String {
        self.domain.to_ascii_uppercase()
    }

    /// `user@REALM` principal name used for Kerberos.
    #[must_use]
    pub fn kerberos_principal(&self) -> String {
        format!("{}@{}", self.username, self.realm())
    }

    /// Long-term Kerberos key carried by the secret, if it is not a password.
    ///
    /// An AES key selects AES128 or AES256 by length; an NT hash is an RC4-HMAC key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the AES key is not 32 or 64 hex digits.
    pub fn long_term_key(&self) -> Result<Option<LongTermKey>> {
        match &self.secret {
            AuthSecret::Password(_) => Ok(None),
            AuthSecret::Hashes(hashes) => Ok(Some(LongTermKey {
                enctype: EncryptionType::Rc4Hmac,
                bytes: hashes.nt_bytes().to_vec(),
            })),
            AuthSecret::AesKey(key) => {
                let bytes = hex::decode(key.expose_secret())?;
                let enctype = match bytes.len() {
                    16 => EncryptionType::Aes128CtsHmacSha196,
                    32 => EncryptionType::Aes256CtsHmacSha196,
                    _ => {
                        return Err(Error::Configuration(
                            "AES key must be 128 or 256 bits".to_string(),
                        ))
                    }
                };
                Ok(Some(LongTermKey { enctype, bytes }))
            }
        }
    }

    /// Plaintext password, if that is the configured secret.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        match &self.secret {
            AuthSecret::Password(password) => Some(password.expose_secret()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hash_pair() {
        let hashes = NtlmHashes::parse(
            "AAD3B435B51404EEAAD3B435B51404EE:31D6CFE0D16AE931B73C59D7E0C089C0",
        )
        .unwrap();
        assert_eq!(hashes.lm(), EMPTY_LM_HASH);
        assert_eq!(hashes.nt(), "31d6cfe0d16ae931b73c59d7e0c089c0");
    }

    #[test]
    fn empty_lm_half_defaults() {
        let hashes = NtlmHashes::parse(":31d6cfe0d16ae931b73c59d7e0c089c0").unwrap();
        assert_eq!(hashes.lm(), EMPTY_LM_HASH);
        assert_eq!(
            hashes.joined(),
            format!("{EMPTY_LM_HASH}:31d6cfe0d16ae931b73c59d7e0c089c0")
        );
    }

    #[test]
    fn reject_bad_hashes() {
        assert!(NtlmHashes::parse("31d6cfe0d16ae931b73c59d7e0c089c0").is_err());
        assert!(NtlmHashes::parse(":1234").is_err());
        assert!(NtlmHashes::parse(":zz d6cfe0d16ae931b73c59d7e0c089c0").is_err());
    }

    #[test]
    fn nt_hash_password_layout() {
        let hashes = NtlmHashes::parse(":31d6cfe0d16ae931b73c59d7e0c089c0").unwrap();
        let password = hashes.as_ntlm_password();
        let encoded: Vec<u8> = password
            .expose_secret()
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();

        assert_eq!(encoded.len(), 32 + 512);
        assert_eq!(&encoded[..32], b"31D6CFE0D16AE931B73C59D7E0C089C0");
        assert!(encoded[32..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn nt_bytes_decode_the_nt_half() {
        let hashes = NtlmHashes::parse(":31d6cfe0d16ae931b73c59d7e0c089c0").unwrap();
        assert_eq!(hashes.nt_bytes()[..4], [0x31, 0xd6, 0xcf, 0xe0]);
    }

    #[test]
    fn long_term_keys() {
        let aes256 = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::AesKey(SecretString::from("ab".repeat(32))),
            true,
        );
        let key = aes256.long_term_key().unwrap().unwrap();
        assert_eq!(key.enctype(), EncryptionType::Aes256CtsHmacSha196);
        assert_eq!(key.bytes().len(), 32);
        assert!(!format!("{key:?}").contains("abab"));

        let aes128 = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::AesKey(SecretString::from("ab".repeat(16))),
            true,
        );
        assert_eq!(
            aes128.long_term_key().unwrap().unwrap().enctype().number(),
            17
        );

        let rc4 = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::Hashes(NtlmHashes::parse(":31d6cfe0d16ae931b73c59d7e0c089c0").unwrap()),
            true,
        );
        let key = rc4.long_term_key().unwrap().unwrap();
        assert_eq!(key.enctype(), EncryptionType::Rc4Hmac);
        assert_eq!(key.bytes()[0], 0x31);

        let password = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::Password(SecretString::from("pw".to_string())),
            true,
        );
        assert!(password.long_term_key().unwrap().is_none());
        assert_eq!(password.kerberos_principal(), "alice@CORP.LOCAL");
    }

    #[test]
    fn debug_redacts_hashes() {
        let hashes = NtlmHashes::parse(":31d6cfe0d16ae931b73c59d7e0c089c0").unwrap();
        assert!(!format!("{hashes:?}").contains("31d6"));
    }

    #[test]
    fn aes_key_implies_kerberos() {
        let creds = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::AesKey(SecretString::from("00".repeat(16))),
            false,
        );
        assert!(creds.use_kerberos());
        assert!(creds.password().is_none());
    }

    #[test]
    fn machine_account_detection() {
        let machine = Credentials::new(
            "WS01$",
            "corp.local",
            AuthSecret::Password(SecretString::from("pw".to_string())),
            false,
        );
        assert!(machine.is_machine_account());
        assert_eq!(machine.down_level_logon_name(), "corp.local\\WS01$");

        let user = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::Password(SecretString::from("pw".to_string())),
            false,
        );
        assert!(!user.is_machine_account());
        assert_eq!(user.password(), Some("pw"));
    }
}
