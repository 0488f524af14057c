//! Raw option values and their resolution into an [`OperationDescriptor`].

use secrecy::SecretString;
use tracing::warn;
use validator::{Validate, ValidationError};

use crate::credentials::{AuthSecret, Credentials, NtlmHashes};
use crate::descriptor::{
    DirectoryScope, Method, OperationDescriptor, OperationKind, DEFAULT_CONNECTION_TIMEOUT_SECS,
};
use crate::dn::DistinguishedName;
use crate::error::{Error, Result};
use crate::names;

/// Option values as supplied by the operator, before any defaulting.
#[derive(Debug, Validate)]
pub struct AccountOptions {
    /// `SAMR` or `LDAPS`.
    pub method: String,
    /// Authenticating principal.
    #[validate(length(min = 1, message = "username cannot be empty"))]
    pub username: String,
    /// DNS domain of the principal.
    #[validate(length(min = 1, message = "Domain should be specified!"))]
    pub domain: String,
    /// Plaintext password of the principal.
    pub password: Option<SecretString>,
    /// `LMHASH:NTHASH` pair.
    #[validate(custom(function = "validate_hashes"))]
    pub hashes: Option<String>,
    /// Hex AES key for Kerberos.
    #[validate(custom(function = "validate_aes_key"))]
    pub aes_key: Option<String>,
    /// Use Kerberos authentication.
    pub kerberos: bool,
    /// DC host name.
    pub dc_host: Option<String>,
    /// DC address.
    pub dc_ip: Option<String>,
    /// Computer account to add, re-password or delete.
    #[validate(length(min = 1, message = "computer name cannot be empty"))]
    pub computer_name: Option<String>,
    /// Password to set on the computer account.
    pub computer_password: Option<SecretString>,
    /// Only set the password of an existing account.
    pub no_add: bool,
    /// Delete an existing account.
    pub delete: bool,
    /// LDAP base DN.
    pub base_dn: Option<String>,
    /// LDAP container for new computer accounts.
    pub computer_group: Option<String>,
    /// NetBIOS domain name.
    pub domain_netbios: Option<String>,
    /// Destination port.
    #[validate(range(min = 1, message = "port cannot be zero"))]
    pub port: Option<u16>,
}

fn validate_hashes(value: &str) -> std::result::Result<(), ValidationError> {
    NtlmHashes::parse(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("hashes").with_message("expected LMHASH:NTHASH".into()))
}

fn validate_aes_key(value: &str) -> std::result::Result<(), ValidationError> {
    let valid_len = value.len() == 32 || value.len() == 64;
    if valid_len && value.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::new("aes_key")
            .with_message("AES key must be 128 or 256 bits of hex".into()))
    }
}

impl AccountOptions {
    /// Options for `username@domain` with every optional value unset and the SAMR method.
    #[must_use]
    pub fn new(username: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            method: Method::Samr.as_str().to_string(),
            username: username.into(),
            domain: domain.into(),
            password: None,
            hashes: None,
            aes_key: None,
            kerberos: false,
            dc_host: None,
            dc_ip: None,
            computer_name: None,
            computer_password: None,
            no_add: false,
            delete: false,
            base_dn: None,
            computer_group: None,
            domain_netbios: None,
            port: None,
        }
    }

    /// Resolves the options into a complete descriptor.
    ///
    /// Performs no network activity; the only side effect is logging warnings about domain
    /// names that do not look fully qualified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for unsupported methods, invalid values, Kerberos without
    /// a DC host name, and password-set or delete requests without a computer name.
    pub fn resolve(self) -> Result<OperationDescriptor> {
        self.validate()?;
        let method: Method = self.method.parse()?;
        let use_kerberos = self.kerberos || self.aes_key.is_some();

        if use_kerberos && self.dc_host.is_none() {
            return Err(Error::Configuration(
                "Kerberos auth requires DNS name of the target DC. Use --dc-host.".to_string(),
            ));
        }

        let operation = OperationKind::from_flags(self.no_add, self.delete);
        let computer_name = match (self.computer_name, operation) {
            (Some(name), _) => Some(names::with_marker(&name)),
            (None, OperationKind::Create) => None,
            (None, OperationKind::SetPassword) => {
                return Err(Error::Configuration(
                    "You have to provide a computer name when using --no-add.".to_string(),
                ))
            }
            (None, OperationKind::Delete) => {
                return Err(Error::Configuration(
                    "You have to provide a computer name when using --delete.".to_string(),
                ))
            }
        };

        let computer_password = self
            .computer_password
            .unwrap_or_else(|| SecretString::from(names::generate_password()));

        let domain = self.domain;
        let looks_qualified = domain.contains('.');
        let target_host = self.dc_host.clone().unwrap_or_else(|| {
            if !looks_qualified {
                warn!(
                    "No DC host set and '{domain}' doesn't look like a FQDN. \
                     DNS resolution of short names will probably fail."
                );
            }
            domain.clone()
        });

        let port = self.port.unwrap_or_else(|| method.default_port());
        let domain_netbios = self.domain_netbios.unwrap_or_else(|| domain.clone());

        let directory = match method {
            Method::Ldaps => Some(resolve_scope(
                &domain,
                self.base_dn.as_deref(),
                self.computer_group.as_deref(),
            )?),
            Method::Samr => None,
        };

        let secret = if let Some(key) = self.aes_key {
            AuthSecret::AesKey(SecretString::from(key))
        } else if let Some(hashes) = self.hashes {
            AuthSecret::Hashes(NtlmHashes::parse(&hashes)?)
        } else {
            AuthSecret::Password(self.password.unwrap_or_else(|| {
                if !use_kerberos {
                    warn!("No password given, authenticating with an empty password");
                }
                SecretString::from(String::new())
            }))
        };
        let credentials = Credentials::new(self.username, domain.clone(), secret, use_kerberos);

        let kdc_host = self.dc_ip.clone().or(self.dc_host);

        Ok(OperationDescriptor {
            method,
            target_host,
            target_ip: self.dc_ip,
            port,
            domain_fqdn: domain,
            domain_netbios,
            directory,
            computer_name,
            computer_password,
            credentials,
            operation,
            kdc_host,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
        })
    }
}

fn resolve_scope(
    domain: &str,
    base_dn: Option<&str>,
    computer_group: Option<&str>,
) -> Result<DirectoryScope> {
    let base_dn = match base_dn {
        Some(dn) => DistinguishedName::parse(dn)?,
        None => {
            if !domain.contains('.') {
                warn!("'{domain}' doesn't look like a FQDN. Generating baseDN will probably fail.");
            }
            DistinguishedName::from_domain(domain)?
        }
    };

    let container = match computer_group {
        Some(dn) => DistinguishedName::parse(dn)?,
        None => DistinguishedName::computers_container(&base_dn),
    };

    Ok(DirectoryScope::new(base_dn, container))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::EMPTY_LM_HASH;
    use proptest::prelude::*;

    fn ldaps(username: &str, domain: &str) -> AccountOptions {
        AccountOptions {
            method: "LDAPS".to_string(),
            ..AccountOptions::new(username, domain)
        }
    }

    #[test]
    fn samr_defaults() {
        let descriptor = AccountOptions::new("alice", "corp.local").resolve().unwrap();
        assert_eq!(descriptor.method(), Method::Samr);
        assert_eq!(descriptor.port(), 445);
        assert_eq!(descriptor.target_host(), "corp.local");
        assert_eq!(descriptor.connect_address(), "corp.local");
        assert_eq!(descriptor.domain_netbios(), "corp.local");
        assert_eq!(descriptor.operation(), OperationKind::Create);
        assert!(descriptor.computer_name().is_none());
        assert!(descriptor.directory().is_none());
        assert_eq!(descriptor.computer_password().len(), 32);
        assert!(!descriptor.use_kerberos());
    }

    #[test]
    fn ldaps_derives_scope() {
        let descriptor = ldaps("alice", "corp.example.local").resolve().unwrap();
        assert_eq!(descriptor.port(), 636);
        let scope = descriptor.directory().unwrap();
        assert_eq!(scope.base_dn().as_str(), "dc=corp,dc=example,dc=local");
        assert_eq!(
            scope.computer_container().as_str(),
            "CN=Computers,dc=corp,dc=example,dc=local"
        );
    }

    #[test]
    fn ldaps_explicit_scope() {
        let options = AccountOptions {
            base_dn: Some("DC=lab,DC=test".to_string()),
            computer_group: Some("OU=Servers,DC=lab,DC=test".to_string()),
            port: Some(3269),
            ..ldaps("alice", "corp.local")
        };
        let descriptor = options.resolve().unwrap();
        let scope = descriptor.directory().unwrap();
        assert_eq!(scope.base_dn().as_str(), "DC=lab,DC=test");
        assert_eq!(scope.computer_container().as_str(), "OU=Servers,DC=lab,DC=test");
        assert_eq!(descriptor.port(), 3269);
    }

    #[test]
    fn invalid_base_dn_is_configuration_error() {
        let options = AccountOptions {
            base_dn: Some("DC=lab,".to_string()),
            ..ldaps("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(_))));
    }

    #[test]
    fn unsupported_method() {
        let options = AccountOptions {
            method: "LDAP".to_string(),
            ..AccountOptions::new("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(_))));
    }

    #[test]
    fn kerberos_requires_dc_host() {
        let options = AccountOptions {
            kerberos: true,
            dc_ip: Some("10.0.0.1".to_string()),
            ..AccountOptions::new("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(_))));

        let options = AccountOptions {
            aes_key: Some("ab".repeat(16)),
            ..AccountOptions::new("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(_))));
    }

    #[test]
    fn kerberos_prefers_ip_as_kdc() {
        let options = AccountOptions {
            kerberos: true,
            dc_host: Some("dc01.corp.local".to_string()),
            dc_ip: Some("10.0.0.1".to_string()),
            ..AccountOptions::new("alice", "corp.local")
        };
        let descriptor = options.resolve().unwrap();
        assert!(descriptor.use_kerberos());
        assert_eq!(descriptor.target_host(), "dc01.corp.local");
        assert_eq!(descriptor.connect_address(), "10.0.0.1");
        assert_eq!(descriptor.kdc_host(), Some("10.0.0.1"));
    }

    #[test]
    fn name_required_for_set_password_and_delete() {
        let options = AccountOptions {
            no_add: true,
            ..AccountOptions::new("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(m)) if m.contains("--no-add")));

        let options = AccountOptions {
            delete: true,
            ..AccountOptions::new("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(m)) if m.contains("--delete")));
    }

    #[test]
    fn explicit_password_is_kept() {
        let options = AccountOptions {
            computer_name: Some("WS01".to_string()),
            computer_password: Some(SecretString::from("Summer2024!".to_string())),
            no_add: true,
            ..AccountOptions::new("alice", "corp.local")
        };
        let descriptor = options.resolve().unwrap();
        assert_eq!(descriptor.computer_name(), Some("WS01$"));
        assert_eq!(descriptor.computer_password(), "Summer2024!");
        assert_eq!(descriptor.operation(), OperationKind::SetPassword);
    }

    #[test]
    fn hashes_select_ntlm_secret() {
        let options = AccountOptions {
            hashes: Some(":31d6cfe0d16ae931b73c59d7e0c089c0".to_string()),
            ..AccountOptions::new("alice", "corp.local")
        };
        let descriptor = options.resolve().unwrap();
        match descriptor.credentials().secret() {
            AuthSecret::Hashes(hashes) => assert_eq!(hashes.lm(), EMPTY_LM_HASH),
            other => panic!("unexpected secret {other:?}"),
        }
    }

    #[test]
    fn missing_password_falls_back_to_empty() {
        let descriptor = AccountOptions::new("alice", "corp.local").resolve().unwrap();
        assert_eq!(descriptor.credentials().password(), Some(""));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let options = AccountOptions {
            hashes: Some("nothex".to_string()),
            ..AccountOptions::new("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(_))));

        assert!(matches!(
            AccountOptions::new("alice", "").resolve(),
            Err(Error::Configuration(_))
        ));

        let options = AccountOptions {
            port: Some(0),
            ..AccountOptions::new("alice", "corp.local")
        };
        assert!(matches!(options.resolve(), Err(Error::Configuration(_))));
    }

    proptest! {
        #[test]
        fn resolved_name_has_one_marker(name in "[A-Za-z0-9-]{1,15}\\$?") {
            let options = AccountOptions {
                computer_name: Some(name.clone()),
                ..AccountOptions::new("alice", "corp.local")
            };
            let resolved = options.resolve().unwrap();
            let resolved_name = resolved.computer_name().unwrap().to_string();
            prop_assert!(resolved_name.ends_with('$'));
            prop_assert_eq!(resolved_name.matches('$').count(), 1);

            let again = AccountOptions {
                computer_name: Some(resolved_name.clone()),
                ..AccountOptions::new("alice", "corp.local")
            };
            let again_resolved = again.resolve().unwrap();
            prop_assert_eq!(again_resolved.computer_name(), Some(resolved_name.as_str()));
        }
    }
}
