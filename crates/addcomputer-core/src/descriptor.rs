//! The resolved, immutable description of one account operation.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::dn::DistinguishedName;
use crate::error::Error;

/// Default transport connect timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Protocol path used to reach the domain controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Account management over RPC on SMB named pipes.
    Samr,
    /// Directory operations over TLS-wrapped LDAP.
    Ldaps,
}

impl Method {
    /// Destination port used when none is configured.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Samr => 445,
            Self::Ldaps => 636,
        }
    }

    /// Canonical option spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Samr => "SAMR",
            Self::Ldaps => "LDAPS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("SAMR") {
            Ok(Self::Samr)
        } else if s.eq_ignore_ascii_case("LDAPS") {
            Ok(Self::Ldaps)
        } else {
            Err(Error::Configuration(format!("Unsupported method {s}")))
        }
    }
}

/// Lifecycle operation to perform on the machine account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Add a new account and set its password.
    Create,
    /// Only set the password of an existing account.
    SetPassword,
    /// Remove an existing account.
    Delete,
}

impl OperationKind {
    /// Maps the `--no-add` / `--delete` flags; delete wins when both are set.
    #[must_use]
    pub const fn from_flags(no_add: bool, delete: bool) -> Self {
        if delete {
            Self::Delete
        } else if no_add {
            Self::SetPassword
        } else {
            Self::Create
        }
    }

    /// Verb phrase used in messages, e.g. "set password for".
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Create => "create a machine account",
            Self::SetPassword => "set password for",
            Self::Delete => "delete",
        }
    }
}

/// Where computer accounts live in the directory (LDAPS only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryScope {
    base_dn: DistinguishedName,
    computer_container: DistinguishedName,
}

impl DirectoryScope {
    /// Creates a new scope.
    #[must_use]
    pub const fn new(base_dn: DistinguishedName, computer_container: DistinguishedName) -> Self {
        Self {
            base_dn,
            computer_container,
        }
    }

    /// Search base for account lookups.
    #[must_use]
    pub const fn base_dn(&self) -> &DistinguishedName {
        &self.base_dn
    }

    /// Parent of newly created computer entries.
    #[must_use]
    pub const fn computer_container(&self) -> &DistinguishedName {
        &self.computer_container
    }
}

/// Fully resolved operation. Built by [`crate::config::AccountOptions::resolve`].
#[derive(Debug)]
pub struct OperationDescriptor {
    pub(crate) method: Method,
    pub(crate) target_host: String,
    pub(crate) target_ip: Option<String>,
    pub(crate) port: u16,
    pub(crate) domain_fqdn: String,
    pub(crate) domain_netbios: String,
    pub(crate) directory: Option<DirectoryScope>,
    pub(crate) computer_name: Option<String>,
    pub(crate) computer_password: SecretString,
    pub(crate) credentials: Credentials,
    pub(crate) operation: OperationKind,
    pub(crate) kdc_host: Option<String>,
    pub(crate) connection_timeout_secs: u64,
}

impl OperationDescriptor {
    /// Selected protocol path.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// DC host name (or the domain when no DC was named).
    #[must_use]
    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    /// Explicit DC address, if configured.
    #[must_use]
    pub fn target_ip(&self) -> Option<&str> {
        self.target_ip.as_deref()
    }

    /// Address to open sockets to: the explicit IP when present, else the host name.
    #[must_use]
    pub fn connect_address(&self) -> &str {
        self.target_ip.as_deref().unwrap_or(&self.target_host)
    }

    /// Destination port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// DNS name of the domain.
    #[must_use]
    pub fn domain_fqdn(&self) -> &str {
        &self.domain_fqdn
    }

    /// NetBIOS name used to pick a domain on multi-domain servers.
    #[must_use]
    pub fn domain_netbios(&self) -> &str {
        &self.domain_netbios
    }

    /// Base DN and computer container; present for [`Method::Ldaps`] only.
    #[must_use]
    pub const fn directory(&self) -> Option<&DirectoryScope> {
        self.directory.as_ref()
    }

    /// Explicit computer account name (with trailing `$`), if supplied.
    #[must_use]
    pub fn computer_name(&self) -> Option<&str> {
        self.computer_name.as_deref()
    }

    /// Password to set on the computer account.
    #[must_use]
    pub fn computer_password(&self) -> &str {
        self.computer_password.expose_secret()
    }

    /// Authentication material.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Operation to perform.
    #[must_use]
    pub const fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Returns true when Kerberos should be used.
    #[must_use]
    pub const fn use_kerberos(&self) -> bool {
        self.credentials.use_kerberos()
    }

    /// KDC to contact for Kerberos.
    #[must_use]
    pub fn kdc_host(&self) -> Option<&str> {
        self.kdc_host.as_deref()
    }

    /// Transport connect timeout.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Overrides the transport connect timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing() {
        assert_eq!("SAMR".parse::<Method>().unwrap(), Method::Samr);
        assert_eq!("ldaps".parse::<Method>().unwrap(), Method::Ldaps);
        assert!(matches!(
            "LDAP".parse::<Method>(),
            Err(Error::Configuration(message)) if message == "Unsupported method LDAP"
        ));
    }

    #[test]
    fn default_ports() {
        assert_eq!(Method::Samr.default_port(), 445);
        assert_eq!(Method::Ldaps.default_port(), 636);
    }

    #[test]
    fn delete_wins_over_no_add() {
        assert_eq!(OperationKind::from_flags(true, true), OperationKind::Delete);
        assert_eq!(
            OperationKind::from_flags(true, false),
            OperationKind::SetPassword
        );
        assert_eq!(OperationKind::from_flags(false, false), OperationKind::Create);
    }
}
