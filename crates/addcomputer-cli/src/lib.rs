//! # addcomputer-cli
//!
//! Command-line front end: parses the operator's arguments, installs logging and hands the
//! resolved operation to the [`orchestrator::Orchestrator`].
//!
//! ## Modules
//!
//! - [`cli`] - clap argument definitions
//! - [`identity`] - `[domain/]username[:password]` parsing
//! - [`logging`] - tracing subscriber setup
//! - [`orchestrator`] - Method dispatch and outcome reporting

#![deny(missing_docs)]

pub mod cli;
pub mod identity;
pub mod logging;
pub mod orchestrator;

pub use cli::Cli;
pub use identity::Identity;
pub use orchestrator::{Diagnostics, Orchestrator};
