//! # addcomputer-core
//!
//! Shared building blocks for adding, re-passwording and deleting machine accounts in an
//! Active Directory domain.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy shared by both protocol engines
//! - [`config`] - Raw operator options and their resolution
//! - [`descriptor`] - The resolved [`OperationDescriptor`]
//! - [`credentials`] - Principal and secret material
//! - [`dn`] - Distinguished names
//! - [`names`] - Account naming rules and random name/password generation
//! - [`sid`] - Security identifier rendering
//! - [`outcome`] - What a successful run changed

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod dn;
pub mod error;
pub mod names;
pub mod outcome;
pub mod sid;

// Re-export commonly used types
pub use config::AccountOptions;
pub use credentials::{AuthSecret, Credentials, EncryptionType, LongTermKey, NtlmHashes};
pub use descriptor::{DirectoryScope, Method, OperationDescriptor, OperationKind};
pub use dn::DistinguishedName;
pub use error::{Error, Result};
pub use names::{NameSource, RandomNames};
pub use outcome::AccountOutcome;
pub use sid::Sid;
