//! `[domain/]username[:password]` parsing.

use secrecy::SecretString;

use addcomputer_core::{Error, Result};

/// Principal named on the command line.
#[derive(Debug)]
pub struct Identity {
    /// Domain part, before the first `/`.
    pub domain: String,
    /// Account name.
    pub username: String,
    /// Password, present when the string carried a `:`.
    pub password: Option<SecretString>,
}

impl Identity {
    /// Parses `[domain/]username[:password]`.
    ///
    /// The password is everything after the first `:` and may itself contain `:` or `/`.
    /// A `/` that appears only after the first `:` does not start a domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no domain is given.
    pub fn parse(input: &str) -> Result<Self> {
        let (principal, password) = match input.split_once(':') {
            Some((principal, password)) => (principal, Some(password)),
            None => (input, None),
        };
        let (domain, username) = principal.split_once('/').unwrap_or(("", principal));

        if domain.is_empty() {
            return Err(Error::Configuration("Domain should be specified!".to_string()));
        }

        Ok(Self {
            domain: domain.to_string(),
            username: username.to_string(),
            password: password.map(|value| SecretString::from(value.to_string())),
        })
    }
}
