//! SAMR machine-account engine.
//!
//! Drives account creation, password reset and deletion through the account-management RPC
//! interface. The engine talks to an implementation of [`SamrRpc`]; [`SmbTransportFactory`]
//! provides one over SMB2 named pipes with NTLM authentication.

#![deny(missing_docs)]

mod crypto;
mod dcerpc;
mod engine;
mod handles;
mod messages;
mod ndr;
mod ntlm;
mod protocol;
mod smb;
mod smb2;
mod spnego;
mod transport;

pub use engine::{select_domain, SamrAccountEngine};
pub use handles::HandleChain;
pub use protocol::{
    CreatedUser, InterfaceId, RpcHandle, SamrRpc, BUILTIN_DOMAIN, DELETE, DOMAIN_CREATE_USER,
    DOMAIN_LOOKUP, MAXIMUM_ALLOWED, SAMR_INTERFACE, SAM_SERVER_ENUMERATE_DOMAINS,
    SAM_SERVER_LOOKUP_DOMAIN, STATUS_ACCESS_DENIED, STATUS_DS_MACHINE_ACCOUNT_QUOTA_EXCEEDED,
    STATUS_NONE_MAPPED, USER_FORCE_PASSWORD_CHANGE, USER_WORKSTATION_TRUST_ACCOUNT,
};
pub use smb::SmbTransportFactory;
pub use transport::{
    prepare_transport, EndpointMapper, KerberosSettings, RpcTransportFactory, TransportSettings,
    WellKnownPipeMapper, NAMED_PIPE_PROTOCOL,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = addcomputer_core::Result<T>;
