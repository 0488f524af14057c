//! The account-management RPC surface the engine drives.
//!
//! Wire encoding lives behind [`SamrRpc`]; this module only fixes the interface identifier,
//! access masks and status codes the engine reasons about.

use async_trait::async_trait;
use uuid::{uuid, Uuid};

use addcomputer_core::{Result, Sid};

/// SAMR interface identifier.
pub const SAMR_INTERFACE: InterfaceId = InterfaceId {
    uuid: uuid!("12345778-1234-abcd-ef00-0123456789ac"),
    major: 1,
    minor: 0,
};

/// Server access: enumerate domains.
pub const SAM_SERVER_ENUMERATE_DOMAINS: u32 = 0x0000_0010;
/// Server access: look up a domain by name.
pub const SAM_SERVER_LOOKUP_DOMAIN: u32 = 0x0000_0020;
/// Domain access: look up names.
pub const DOMAIN_LOOKUP: u32 = 0x0000_0200;
/// Domain access: create user accounts.
pub const DOMAIN_CREATE_USER: u32 = 0x0000_0010;
/// Standard right to delete the object.
pub const DELETE: u32 = 0x0001_0000;
/// User access: set the password without knowing the old one.
pub const USER_FORCE_PASSWORD_CHANGE: u32 = 0x0000_0040;
/// Generic request for every right the caller holds.
pub const MAXIMUM_ALLOWED: u32 = 0x0200_0000;

/// Account-control bit for workstation trust accounts.
pub const USER_WORKSTATION_TRUST_ACCOUNT: u32 = 0x0000_0080;

/// The name does not map to an account.
pub const STATUS_NONE_MAPPED: u32 = 0xC000_0073;
/// Access was denied.
pub const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;
/// The caller reached its machine-account quota.
pub const STATUS_DS_MACHINE_ACCOUNT_QUOTA_EXCEEDED: u32 = 0xC000_02E7;

/// Name of the built-in domain every server exposes.
pub const BUILTIN_DOMAIN: &str = "Builtin";

/// RPC interface identifier and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceId {
    /// Interface UUID.
    pub uuid: Uuid,
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
}

/// Opaque context handle returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHandle(pub [u8; 20]);

/// A user created by the create-user call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedUser {
    /// Handle opened with the requested access.
    pub handle: RpcHandle,
    /// Relative identifier of the new account.
    pub rid: u32,
}

/// Account-management operations over a DCE/RPC binding.
///
/// Server failures surface as [`addcomputer_core::Error::RpcProtocol`] carrying the NTSTATUS.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SamrRpc: Send {
    /// Opens the underlying transport.
    async fn connect(&mut self) -> Result<()>;
    /// Binds the connection to an RPC interface.
    async fn bind(&mut self, interface: InterfaceId) -> Result<()>;
    /// `SamrConnect5`.
    async fn connect_server(&mut self, server_name: &str, access: u32) -> Result<RpcHandle>;
    /// `SamrEnumerateDomainsInSamServer`.
    async fn enumerate_domains(&mut self, server: &RpcHandle) -> Result<Vec<String>>;
    /// `SamrLookupDomainInSamServer`.
    async fn lookup_domain(&mut self, server: &RpcHandle, name: &str) -> Result<Sid>;
    /// `SamrOpenDomain`.
    async fn open_domain(
        &mut self,
        server: &RpcHandle,
        access: u32,
        domain: &Sid,
    ) -> Result<RpcHandle>;
    /// `SamrLookupNamesInDomain`; returns one RID per name.
    async fn lookup_names(&mut self, domain: &RpcHandle, names: &[String]) -> Result<Vec<u32>>;
    /// `SamrOpenUser`.
    async fn open_user(&mut self, domain: &RpcHandle, access: u32, rid: u32)
        -> Result<RpcHandle>;
    /// `SamrCreateUser2InDomain`.
    async fn create_user(
        &mut self,
        domain: &RpcHandle,
        name: &str,
        account_type: u32,
        access: u32,
    ) -> Result<CreatedUser>;
    /// `SamrDeleteUser`; the handle is invalid afterwards.
    async fn delete_user(&mut self, user: &RpcHandle) -> Result<()>;
    /// `SamrSetInformationUser2` with the internal4 new-password class.
    async fn set_password(&mut self, user: &RpcHandle, password: &str) -> Result<()>;
    /// `SamrSetInformationUser2` with the user-control class.
    async fn set_account_control(&mut self, user: &RpcHandle, control: u32) -> Result<()>;
    /// `SamrCloseHandle`.
    async fn close_handle(&mut self, handle: &RpcHandle) -> Result<()>;
    /// Tears down the transport.
    async fn disconnect(&mut self) -> Result<()>;
}
