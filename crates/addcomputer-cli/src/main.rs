//! # addcomputer
//!
//! Adds, re-passwords or deletes a computer account in an Active Directory domain.

#![forbid(unsafe_code)]

use clap::{CommandFactory, Parser};
use tracing::error;

use addcomputer_cli::{logging, Cli, Diagnostics, Orchestrator};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if std::env::args_os().len() == 1 {
        let _ = Cli::command().print_help();
        std::process::exit(1);
    }

    let cli = Cli::parse();
    logging::init(cli.ts, cli.debug);
    let diagnostics = Diagnostics { verbose: cli.debug };

    let descriptor = match cli.into_options().and_then(|options| options.resolve()) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if Orchestrator::new(descriptor, diagnostics).run().await.is_err() {
        std::process::exit(1);
    }
}
