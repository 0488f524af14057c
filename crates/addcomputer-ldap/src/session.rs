//! Directory session abstraction and establishment.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use addcomputer_core::{
    AuthSecret, Credentials, Error, LongTermKey, NtlmHashes, OperationDescriptor, Result,
};

/// LDAP result code for success.
pub const RESULT_SUCCESS: u32 = 0;
/// LDAP result code `insufficientAccessRights`.
pub const RESULT_INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
/// LDAP result code `unwillingToPerform`.
pub const RESULT_UNWILLING_TO_PERFORM: u32 = 53;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

/// LDAP entry representation used by the engines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Text-valued attributes.
    pub attributes: HashMap<String, Vec<String>>,
    /// Attributes whose values are not valid UTF-8.
    pub binary: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Returns the first text value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .get(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Returns all text values for the attribute.
    #[must_use]
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes.get(attribute).map_or(&[], Vec::as_slice)
    }

    /// Returns the first raw value, looking at binary values before text ones.
    #[must_use]
    pub fn first_bytes(&self, attribute: &str) -> Option<&[u8]> {
        self.binary
            .get(attribute)
            .and_then(|values| values.first().map(Vec::as_slice))
            .or_else(|| self.first(attribute).map(str::as_bytes))
    }
}

/// Request control attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryControl {
    /// Control OID.
    pub oid: String,
    /// Criticality flag.
    pub critical: bool,
    /// BER-encoded control value.
    pub value: Vec<u8>,
}

/// Entry to add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Distinguished name of the new entry.
    pub dn: String,
    /// Attributes in insertion order, `objectClass` included.
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
    /// Controls sent with the add request.
    pub controls: Vec<DirectoryControl>,
}

impl NewEntry {
    /// Returns the values of an attribute.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }
}

/// Replace all values of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeReplacement {
    /// Attribute to modify.
    pub attribute: String,
    /// Replacement values.
    pub values: Vec<Vec<u8>>,
}

/// Outcome of an update operation as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResult {
    /// LDAP result code.
    pub code: u32,
    /// Diagnostic message.
    pub message: String,
}

impl DirectoryResult {
    /// Successful result.
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: RESULT_SUCCESS,
            message: String::new(),
        }
    }

    /// Returns true when the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == RESULT_SUCCESS
    }
}

impl std::fmt::Display for DirectoryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "result {}: {}", self.code, self.message)
    }
}

/// Secret a Kerberos bind obtains its initial ticket with.
#[derive(Debug)]
pub enum KerberosSecret {
    /// Whatever the credential cache already holds.
    TicketCache,
    /// Password of the principal.
    Password(SecretString),
    /// AES key, or the NT hash as an RC4-HMAC key.
    Key(LongTermKey),
}

/// How to authenticate the session, in priority order Kerberos, NTLM hashes, NTLM password.
#[derive(Debug)]
pub enum BindRequest {
    /// SASL GSSAPI against the named server.
    Kerberos {
        /// DNS name of the directory server, used for its service principal.
        server: String,
        /// `user@REALM`.
        principal: String,
        /// Where the initial ticket comes from.
        secret: KerberosSecret,
    },
    /// NTLM with a hash pair.
    NtlmHashes {
        /// `DOMAIN\user`.
        user: String,
        /// LM/NT pair.
        hashes: NtlmHashes,
    },
    /// NTLM with a plaintext password.
    NtlmPassword {
        /// `DOMAIN\user`.
        user: String,
        /// Password.
        password: SecretString,
    },
}

impl BindRequest {
    /// Picks the bind mechanism for `credentials`.
    ///
    /// Kerberos uses the configured secret when there is one and falls back to the ticket
    /// cache when the password is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the AES key cannot be decoded, or if one is supplied
    /// without Kerberos.
    pub fn for_credentials(credentials: &Credentials, server: &str) -> Result<Self> {
        if credentials.use_kerberos() {
            let secret = match credentials.long_term_key()? {
                Some(key) => KerberosSecret::Key(key),
                None => match credentials.password() {
                    Some(password) if !password.is_empty() => {
                        KerberosSecret::Password(SecretString::from(password.to_string()))
                    }
                    _ => KerberosSecret::TicketCache,
                },
            };
            return Ok(Self::Kerberos {
                server: server.to_string(),
                principal: credentials.kerberos_principal(),
                secret,
            });
        }

        let user = credentials.down_level_logon_name();
        match credentials.secret() {
            AuthSecret::Hashes(hashes) => Ok(Self::NtlmHashes {
                user,
                hashes: hashes.clone(),
            }),
            AuthSecret::Password(password) => Ok(Self::NtlmPassword {
                user,
                password: SecretString::from(password.expose_secret().to_string()),
            }),
            AuthSecret::AesKey(_) => Err(Error::Configuration(
                "an AES key can only be used with Kerberos".to_string(),
            )),
        }
    }

    /// Mechanism label for logs.
    #[must_use]
    pub const fn mechanism(&self) -> &'static str {
        match self {
            Self::Kerberos { .. } => "kerberos",
            Self::NtlmHashes { .. } => "ntlm-hashes",
            Self::NtlmPassword { .. } => "ntlm-password",
        }
    }
}

/// TLS settings to negotiate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProfile {
    /// TLS 1.2 or newer.
    Modern,
    /// TLS 1.0 only, for servers that cannot negotiate anything newer.
    Legacy,
}

/// Where and how to reach the directory server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEndpoint {
    /// Host or address to connect to.
    pub address: String,
    /// TLS port.
    pub port: u16,
    /// Connect timeout.
    pub timeout: Duration,
}

impl DirectoryEndpoint {
    /// Endpoint for `descriptor`, preferring the explicit DC address.
    #[must_use]
    pub fn from_descriptor(descriptor: &OperationDescriptor) -> Self {
        Self {
            address: descriptor.connect_address().to_string(),
            port: descriptor.port(),
            timeout: descriptor.connection_timeout(),
        }
    }

    /// `ldaps://` URL for the endpoint; IPv6 literals are bracketed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the address does not form a valid URL.
    pub fn url(&self) -> Result<Url> {
        let host = if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        };
        Url::parse(&format!("ldaps://{host}:{}", self.port)).map_err(|err| {
            Error::Configuration(format!("invalid LDAP address `{}`: {err}", self.address))
        })
    }
}

/// An open directory connection.
///
/// Transport failures are returned as errors; server refusals of update operations are returned
/// as a [`DirectoryResult`] so callers can branch on the result code.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySession: Send {
    /// Authenticates the connection.
    async fn bind(&mut self, request: &BindRequest) -> Result<()>;
    /// Searches and returns the matching entries.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>>;
    /// Adds an entry.
    async fn add(&mut self, entry: &NewEntry) -> Result<DirectoryResult>;
    /// Replaces attribute values on an entry.
    async fn modify(
        &mut self,
        dn: &str,
        replacements: &[AttributeReplacement],
    ) -> Result<DirectoryResult>;
    /// Deletes an entry.
    async fn delete(&mut self, dn: &str) -> Result<DirectoryResult>;
    /// Closes the connection.
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens TLS connections to a directory server.
///
/// A failure to open the TLS channel must be reported as [`Error::TlsHandshake`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Connects to `endpoint` with the given TLS profile.
    async fn connect(
        &self,
        endpoint: &DirectoryEndpoint,
        profile: TlsProfile,
    ) -> Result<Box<dyn DirectorySession>>;
}

/// Connects and binds, retrying once with [`TlsProfile::Legacy`] if the modern handshake fails.
///
/// # Errors
///
/// Returns [`Error::Session`] when the connection or bind fails.
pub async fn open_session(
    connector: &dyn DirectoryConnector,
    descriptor: &OperationDescriptor,
) -> Result<Box<dyn DirectorySession>> {
    let endpoint = DirectoryEndpoint::from_descriptor(descriptor);
    let url = endpoint.url()?;
    let request = BindRequest::for_credentials(descriptor.credentials(), descriptor.target_host())?;
    debug!(%url, mechanism = request.mechanism(), "Opening directory session");

    match connect_and_bind(connector, &endpoint, TlsProfile::Modern, &request).await {
        Ok(session) => Ok(session),
        Err(Error::TlsHandshake(reason)) => {
            warn!(%reason, "TLS 1.2 handshake failed, retrying with TLS 1.0");
            connect_and_bind(connector, &endpoint, TlsProfile::Legacy, &request)
                .await
                .map_err(into_session)
        }
        Err(err) => Err(into_session(err)),
    }
}

async fn connect_and_bind(
    connector: &dyn DirectoryConnector,
    endpoint: &DirectoryEndpoint,
    profile: TlsProfile,
    request: &BindRequest,
) -> Result<Box<dyn DirectorySession>> {
    let mut session = connector.connect(endpoint, profile).await?;
    session.bind(request).await?;
    info!(mechanism = request.mechanism(), ?profile, "Bound to directory");
    Ok(session)
}

fn into_session(err: Error) -> Error {
    match err {
        Error::Session(_) => err,
        other => Error::Session(other.to_string()),
    }
}
