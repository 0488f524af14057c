//! Secure LDAP machine-account engine.
//!
//! Opens a TLS directory session (falling back once to a legacy TLS version), then adds,
//! re-keys or deletes computer entries. When the caller is itself a machine account and has
//! exhausted its creation quota, the engine can place the new computer inside a storage group
//! created under the caller's own entry.

#![deny(missing_docs)]

mod engine;
mod entry;
mod keytab;
mod ldap3_backend;
mod quota;
mod session;

pub use engine::DirectoryAccountEngine;
pub use entry::{
    account_filter, computer_entry, encode_unicode_password, escape_filter_value,
    parse_sub_code, password_replacement, sd_flags_control, storage_group_entry,
    ALLOW_EVERYONE_FULL_CONTROL, COMPUTER_OBJECT_CLASSES, SD_FLAGS_OID,
    STORAGE_GROUP_OBJECT_CLASSES, UF_WORKSTATION_TRUST_ACCOUNT,
};
pub use ldap3_backend::Ldap3Connector;
pub use quota::{bypass_machine_quota, ComputerSpec, QUOTA_EXCEEDED_SUB_CODE};
pub use session::{
    open_session, AttributeReplacement, BindRequest, DirectoryConnector, DirectoryControl,
    DirectoryEndpoint, DirectoryEntry, DirectoryResult, DirectorySession, KerberosSecret, NewEntry,
    SearchScope, TlsProfile, RESULT_INSUFFICIENT_ACCESS_RIGHTS, RESULT_SUCCESS,
    RESULT_UNWILLING_TO_PERFORM,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = addcomputer_core::Result<T>;
