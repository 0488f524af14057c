//! Result of a successful account operation.

use std::fmt;

use crate::dn::DistinguishedName;

/// What a run changed on the domain controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    /// A new machine account was added and its password set.
    Created {
        /// Account name, with the trailing `$`.
        account: String,
        /// Password that was set.
        password: String,
        /// Scratch container that now holds the account and must be removed by the operator.
        leftover_container: Option<DistinguishedName>,
    },
    /// The password of an existing account was replaced.
    PasswordSet {
        /// Account name, with the trailing `$`.
        account: String,
        /// Password that was set.
        password: String,
    },
    /// An existing account was removed.
    Deleted {
        /// Account name, with the trailing `$`.
        account: String,
    },
}

impl AccountOutcome {
    /// Account the outcome refers to.
    #[must_use]
    pub fn account(&self) -> &str {
        match self {
            Self::Created { account, .. }
            | Self::PasswordSet { account, .. }
            | Self::Deleted { account } => account,
        }
    }
}

impl fmt::Display for AccountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created {
                account,
                password,
                leftover_container: None,
            } => write!(
                f,
                "Successfully added machine account {account} with password {password}."
            ),
            Self::Created {
                account,
                password,
                leftover_container: Some(container),
            } => write!(
                f,
                "Successfully added machine account {account} with password {password} \
                 under `{container}`. DON'T FORGET TO CLEANUP the container."
            ),
            Self::PasswordSet { account, password } => {
                write!(f, "Successfully set password of {account} to {password}.")
            }
            Self::Deleted { account } => write!(f, "Successfully deleted {account}."),
        }
    }
}
