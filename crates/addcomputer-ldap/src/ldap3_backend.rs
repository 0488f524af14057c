//! `ldap3`-backed directory connector.

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use native_tls::{Protocol, TlsConnector};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashSet;
use tracing::debug;

use addcomputer_core::{Error, Result};

use crate::keytab::client_keytab;
use crate::session::{
    AttributeReplacement, BindRequest, DirectoryConnector, DirectoryEndpoint, DirectoryEntry,
    DirectoryResult, DirectorySession, KerberosSecret, NewEntry, SearchScope, TlsProfile,
};

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Real LDAP connector backed by `ldap3` over `native-tls`.
///
/// Certificates and host names are not verified.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ldap3Connector;

impl Ldap3Connector {
    /// Creates a new connector instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(
        &self,
        endpoint: &DirectoryEndpoint,
        profile: TlsProfile,
    ) -> Result<Box<dyn DirectorySession>> {
        let url = endpoint.url()?;
        let settings = build_ldap_settings(endpoint, profile)?;
        let (conn, ldap) = LdapConnAsync::from_url_with_settings(settings, &url)
            .await
            .map_err(|err| Error::TlsHandshake(err.to_string()))?;
        ldap3::drive!(conn);
        Ok(Box::new(Ldap3Session { inner: ldap }))
    }
}

struct Ldap3Session {
    inner: ldap3::Ldap,
}

/// Where a GSSAPI bind gets its initiator credentials.
#[derive(Debug)]
enum GssapiSource {
    Cache,
    Password(SecretString),
    Keytab(Vec<u8>),
}

/// The `ldap3` SASL call a [`BindRequest`] resolves to.
#[derive(Debug)]
enum SaslBind {
    /// `sasl_ntlm_bind`; a hash pair travels in the password slot, encoded the way `sspi`
    /// recognizes an NT hash.
    Ntlm { user: String, password: SecretString },
    Gssapi {
        server: String,
        principal: String,
        source: GssapiSource,
    },
}

impl SaslBind {
    fn plan(request: &BindRequest) -> Result<Self> {
        Ok(match request {
            BindRequest::NtlmPassword { user, password } => Self::Ntlm {
                user: user.clone(),
                password: password.clone(),
            },
            BindRequest::NtlmHashes { user, hashes } => Self::Ntlm {
                user: user.clone(),
                password: hashes.as_ntlm_password(),
            },
            BindRequest::Kerberos {
                server,
                principal,
                secret,
            } => Self::Gssapi {
                server: server.clone(),
                principal: principal.clone(),
                source: match secret {
                    KerberosSecret::TicketCache => GssapiSource::Cache,
                    KerberosSecret::Password(password) => GssapiSource::Password(password.clone()),
                    KerberosSecret::Key(key) => GssapiSource::Keytab(client_keytab(principal, key)?),
                },
            },
        })
    }
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn bind(&mut self, request: &BindRequest) -> Result<()> {
        let result = match SaslBind::plan(request)? {
            SaslBind::Ntlm { user, password } => self
                .inner
                .sasl_ntlm_bind(&user, password.expose_secret())
                .await
                .map_err(map_bind_error)?,
            SaslBind::Gssapi {
                server,
                principal,
                source,
            } => self.gssapi_bind(&server, &principal, source).await?,
        };
        result.success().map_err(map_bind_error)?;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        let result = self
            .inner
            .search(base_dn, scope.into(), filter, attributes.to_vec())
            .await
            .map_err(map_ldap_error)?;
        let (entries, _) = result.success().map_err(map_ldap_error)?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs,
                binary: entry.bin_attrs,
            })
            .collect())
    }

    async fn add(&mut self, entry: &NewEntry) -> Result<DirectoryResult> {
        let attributes = entry
            .attributes
            .iter()
            .map(|(name, values)| {
                (
                    name.as_bytes().to_vec(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();
        let controls = entry
            .controls
            .iter()
            .map(|control| RawControl {
                ctype: control.oid.clone(),
                crit: control.critical,
                val: Some(control.value.clone()),
            })
            .collect::<Vec<_>>();

        let result = if controls.is_empty() {
            self.inner.add(&entry.dn, attributes).await
        } else {
            self.inner
                .with_controls(controls)
                .add(&entry.dn, attributes)
                .await
        }
        .map_err(map_ldap_error)?;
        Ok(into_directory_result(result))
    }

    async fn modify(
        &mut self,
        dn: &str,
        replacements: &[AttributeReplacement],
    ) -> Result<DirectoryResult> {
        let mods = replacements
            .iter()
            .map(|replacement| {
                Mod::Replace(
                    replacement.attribute.as_bytes().to_vec(),
                    replacement.values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();
        let result = self.inner.modify(dn, mods).await.map_err(map_ldap_error)?;
        Ok(into_directory_result(result))
    }

    async fn delete(&mut self, dn: &str) -> Result<DirectoryResult> {
        let result = self.inner.delete(dn).await.map_err(map_ldap_error)?;
        Ok(into_directory_result(result))
    }

    async fn unbind(&mut self) -> Result<()> {
        self.inner.unbind().await.map_err(map_ldap_error)
    }
}

impl Ldap3Session {
    #[cfg(feature = "kerberos")]
    async fn gssapi_bind(
        &mut self,
        server: &str,
        principal: &str,
        source: GssapiSource,
    ) -> Result<ldap3::LdapResult> {
        match source {
            GssapiSource::Cache => {
                debug!(%server, "Binding with GSSAPI from the credential cache");
                self.inner
                    .sasl_gssapi_bind(server)
                    .await
                    .map_err(map_bind_error)
            }
            GssapiSource::Password(password) => {
                debug!(%server, %principal, "Binding with GSSAPI from a password");
                let cred = gssapi::with_password(principal, password.expose_secret())?;
                self.inner
                    .sasl_gssapi_cred_bind(cred, server)
                    .await
                    .map_err(map_bind_error)
            }
            GssapiSource::Keytab(keytab) => {
                debug!(%server, %principal, "Binding with GSSAPI from a long-term key");
                // the keytab has to outlive the bind, tickets are requested lazily
                let (cred, _keytab) = gssapi::with_keytab(principal, &keytab)?;
                self.inner
                    .sasl_gssapi_cred_bind(cred, server)
                    .await
                    .map_err(map_bind_error)
            }
        }
    }

    #[cfg(not(feature = "kerberos"))]
    async fn gssapi_bind(
        &mut self,
        server: &str,
        _principal: &str,
        _source: GssapiSource,
    ) -> Result<ldap3::LdapResult> {
        debug!(%server, "GSSAPI bind requested without Kerberos support");
        Err(Error::Session(
            "Kerberos authentication requires the `kerberos` feature".to_string(),
        ))
    }
}

#[cfg(feature = "kerberos")]
mod gssapi {
    use libgssapi::credential::{Cred, CredUsage};
    use libgssapi::name::Name;
    use libgssapi::oid::{OidSet, GSS_MECH_KRB5, GSS_NT_KRB5_PRINCIPAL};
    use std::io::Write;
    use tempfile::NamedTempFile;

    use addcomputer_core::{Error, Result};

    fn kerberos_mechs() -> Result<OidSet> {
        let mut mechs = OidSet::new().map_err(gss_error)?;
        mechs.add(&GSS_MECH_KRB5).map_err(gss_error)?;
        Ok(mechs)
    }

    fn principal_name(principal: &str) -> Result<Name> {
        Name::new(principal.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL)).map_err(gss_error)
    }

    pub(super) fn with_password(principal: &str, password: &str) -> Result<cross_krb5::Cred> {
        let name = principal_name(principal)?;
        let cred = Cred::acquire_with_password(
            Some(&name),
            password,
            None,
            CredUsage::Initiate,
            Some(&kerberos_mechs()?),
        )
        .map_err(gss_error)?;
        Ok(cred.into())
    }

    /// Acquires initiator credentials backed by a client keytab; the returned file must be kept
    /// until the bind completes.
    pub(super) fn with_keytab(
        principal: &str,
        keytab: &[u8],
    ) -> Result<(cross_krb5::Cred, NamedTempFile)> {
        let mut file = NamedTempFile::new().map_err(keytab_error)?;
        file.write_all(keytab).map_err(keytab_error)?;
        file.flush().map_err(keytab_error)?;

        std::env::set_var(
            "KRB5_CLIENT_KTNAME",
            format!("FILE:{}", file.path().display()),
        );
        std::env::set_var("KRB5CCNAME", "MEMORY:addcomputer");

        let name = principal_name(principal)?;
        let cred = Cred::acquire(Some(&name), None, CredUsage::Initiate, Some(&kerberos_mechs()?))
            .map_err(gss_error)?;
        Ok((cred.into(), file))
    }

    fn gss_error(err: libgssapi::error::Error) -> Error {
        Error::Session(format!("GSSAPI: {err}"))
    }

    fn keytab_error(err: std::io::Error) -> Error {
        Error::Session(format!("cannot write client keytab: {err}"))
    }
}

fn build_ldap_settings(endpoint: &DirectoryEndpoint, profile: TlsProfile) -> Result<LdapConnSettings> {
    let mut builder = TlsConnector::builder();
    builder
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true);
    match profile {
        TlsProfile::Modern => {
            builder.min_protocol_version(Some(Protocol::Tlsv12));
        }
        TlsProfile::Legacy => {
            builder
                .min_protocol_version(Some(Protocol::Tlsv10))
                .max_protocol_version(Some(Protocol::Tlsv10));
        }
    }
    let connector = builder.build().map_err(|err| {
        Error::Configuration(format!("failed to construct TLS connector: {err}"))
    })?;

    Ok(LdapConnSettings::new()
        .set_conn_timeout(endpoint.timeout)
        .set_connector(connector)
        .set_no_tls_verify(true))
}

fn into_directory_result(result: ldap3::LdapResult) -> DirectoryResult {
    DirectoryResult {
        code: result.rc,
        message: result.text,
    }
}

fn map_ldap_error(err: ldap3::LdapError) -> Error {
    Error::DirectoryOperation(err.to_string())
}

fn map_bind_error(err: ldap3::LdapError) -> Error {
    Error::Session(format!("bind failed: {err}"))
}
