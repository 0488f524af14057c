//! Error types for machine-account operations.
//!
//! Every failure a run can produce is one variant of [`Error`]. Expected business outcomes
//! (missing account, existing account, missing rights) are distinguished by kind so callers can
//! branch on them without reading server messages.

use thiserror::Error;

/// Main error type for machine-account operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid option combination, detected before any network activity
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Authentication or transport establishment failed
    #[error("Session error: {0}")]
    Session(String),

    /// The connection or TLS negotiation failed while opening the channel
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// The server hosts several domains and none matched the NetBIOS name
    #[error(
        "This server provides multiple domains and '{requested}' isn't one of them. \
         Available domain(s): {}. Consider using --domain-netbios to specify which one you meant.",
        .candidates.join(", ")
    )]
    AmbiguousDomain {
        /// NetBIOS name that was configured
        requested: String,
        /// Non-builtin domains offered by the server
        candidates: Vec<String>,
    },

    /// The server does not expose any non-builtin domain
    #[error("No usable domain on server: {0}")]
    DomainUnavailable(String),

    /// The machine account does not exist
    #[error("Account {account} not found in {scope}!")]
    AccountNotFound {
        /// Account name, with the trailing `$`
        account: String,
        /// Domain or base DN that was searched
        scope: String,
    },

    /// The machine account already exists
    #[error("Account {0} already exists! If you just want to set a password, use --no-add.")]
    AccountAlreadyExists(String),

    /// The authenticating principal lacks the rights for the operation
    #[error("User {user} doesn't have right to {action} {account}!")]
    InsufficientRights {
        /// Authenticating principal
        user: String,
        /// Human-readable operation, e.g. `delete`
        action: String,
        /// Target account
        account: String,
    },

    /// The directory server rejected an operation
    #[error("Directory operation failed: {0}")]
    DirectoryOperation(String),

    /// The RPC server returned a failure status
    #[error("RPC error 0x{status:08x}: {message}")]
    RpcProtocol {
        /// NTSTATUS returned by the server
        status: u32,
        /// Server or transport supplied message
        message: String,
    },

    /// The principal reached its machine-account creation quota
    #[error("User {0} machine quota exceeded!")]
    QuotaExceeded(String),
}

/// Specialized result type for machine-account operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Session(_) => "SESSION_ERROR",
            Self::TlsHandshake(_) => "TLS_HANDSHAKE_ERROR",
            Self::AmbiguousDomain { .. } => "AMBIGUOUS_DOMAIN",
            Self::DomainUnavailable(_) => "DOMAIN_UNAVAILABLE",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::AccountAlreadyExists(_) => "ACCOUNT_ALREADY_EXISTS",
            Self::InsufficientRights { .. } => "INSUFFICIENT_RIGHTS",
            Self::DirectoryOperation(_) => "DIRECTORY_OPERATION_ERROR",
            Self::RpcProtocol { .. } => "RPC_PROTOCOL_ERROR",
            Self::QuotaExceeded(_) => "QUOTA_EXCEEDED",
        }
    }

    /// Returns true for outcomes an operator is expected to hit during normal use.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound { .. }
                | Self::AccountAlreadyExists(_)
                | Self::InsufficientRights { .. }
        )
    }

    /// Returns the NTSTATUS carried by an RPC failure.
    #[must_use]
    pub const fn rpc_status(&self) -> Option<u32> {
        match self {
            Self::RpcProtocol { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Self::Configuration(format!("invalid hex value: {err}"))
    }
}
