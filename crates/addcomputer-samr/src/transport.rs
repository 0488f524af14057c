//! Preparing an RPC transport for the account-management interface.
//!
//! Resolution produces a binding string through an [`EndpointMapper`]; an
//! [`RpcTransportFactory`] turns the resulting [`TransportSettings`] into a ready-to-bind
//! [`SamrRpc`] connection. Nothing is opened here; the engine connects and binds.

use std::time::Duration;

use tracing::debug;

use addcomputer_core::{Credentials, Error, OperationDescriptor, Result};

use crate::protocol::{InterfaceId, SamrRpc, SAMR_INTERFACE};

/// Protocol sequence for RPC over SMB named pipes.
pub const NAMED_PIPE_PROTOCOL: &str = "ncacn_np";

const SAMR_PIPE: &str = r"\pipe\samr";

/// Resolves an interface to a binding string on a target.
#[cfg_attr(test, mockall::automock)]
pub trait EndpointMapper: Send + Sync {
    /// Returns a binding string such as `ncacn_np:dc01[\pipe\samr]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface is not reachable over `protocol` on `target`.
    fn map(&self, target: &str, interface: InterfaceId, protocol: &str) -> Result<String>;
}

/// Maps interfaces that listen on fixed named pipes without asking the endpoint mapper service.
#[derive(Debug, Default, Clone, Copy)]
pub struct WellKnownPipeMapper;

impl EndpointMapper for WellKnownPipeMapper {
    fn map(&self, target: &str, interface: InterfaceId, protocol: &str) -> Result<String> {
        if protocol != NAMED_PIPE_PROTOCOL {
            return Err(Error::Session(format!(
                "no well-known endpoint for protocol {protocol}"
            )));
        }
        if interface != SAMR_INTERFACE {
            return Err(Error::Session(format!(
                "no well-known pipe for interface {} v{}.{}",
                interface.uuid, interface.major, interface.minor
            )));
        }
        Ok(format!("{protocol}:{target}[{SAMR_PIPE}]"))
    }
}

/// Kerberos mode for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KerberosSettings {
    /// KDC to request tickets from, if not discovered from the realm.
    pub kdc_host: Option<String>,
}

/// Everything a factory needs to build a transport.
#[derive(Debug)]
pub struct TransportSettings<'a> {
    /// Binding string from the endpoint mapper.
    pub binding: String,
    /// Destination port (139 or 445).
    pub port: u16,
    /// Address sockets are opened to.
    pub remote_host: String,
    /// Name presented to the server, kept when connecting by IP.
    pub remote_name: String,
    /// Credentials to inject; `None` when the transport cannot take them.
    pub credentials: Option<&'a Credentials>,
    /// Set when Kerberos authentication was requested.
    pub kerberos: Option<KerberosSettings>,
    /// Connect timeout.
    pub timeout: Duration,
}

/// Builds RPC connections from resolved settings.
pub trait RpcTransportFactory: Send + Sync {
    /// Returns true if the transport accepts injected credentials.
    fn supports_credentials(&self) -> bool;

    /// Creates an unconnected transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be turned into a transport.
    fn create(&self, settings: &TransportSettings<'_>) -> Result<Box<dyn SamrRpc>>;
}

/// Resolves the SAMR endpoint and builds the transport for `descriptor`.
///
/// # Errors
///
/// Returns [`Error::Session`] if endpoint resolution or transport creation fails.
pub fn prepare_transport(
    descriptor: &OperationDescriptor,
    mapper: &dyn EndpointMapper,
    factory: &dyn RpcTransportFactory,
) -> Result<Box<dyn SamrRpc>> {
    let settings = transport_settings(descriptor, mapper, factory.supports_credentials())?;
    debug!(
        binding = %settings.binding,
        port = settings.port,
        kerberos = settings.kerberos.is_some(),
        "Prepared SAMR transport"
    );
    factory.create(&settings).map_err(into_session)
}

fn transport_settings<'a>(
    descriptor: &'a OperationDescriptor,
    mapper: &dyn EndpointMapper,
    inject_credentials: bool,
) -> Result<TransportSettings<'a>> {
    let remote_host = descriptor.connect_address().to_string();
    let binding = mapper
        .map(&remote_host, SAMR_INTERFACE, NAMED_PIPE_PROTOCOL)
        .map_err(into_session)?;

    let kerberos = descriptor.use_kerberos().then(|| KerberosSettings {
        kdc_host: descriptor.kdc_host().map(str::to_string),
    });

    Ok(TransportSettings {
        binding,
        port: descriptor.port(),
        remote_host,
        remote_name: descriptor.target_host().to_string(),
        credentials: inject_credentials.then(|| descriptor.credentials()),
        kerberos,
        timeout: descriptor.connection_timeout(),
    })
}

fn into_session(err: Error) -> Error {
    match err {
        Error::Session(_) => err,
        other => Error::Session(other.to_string()),
    }
}
