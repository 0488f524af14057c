//! Machine-account naming and secret generation.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Trailing character that marks a machine account name.
pub const ACCOUNT_MARKER: char = '$';

/// Prefix of generated computer names.
pub const GENERATED_NAME_PREFIX: &str = "DESKTOP-";

/// Length of generated computer passwords.
pub const GENERATED_PASSWORD_LEN: usize = 32;

const NAME_SUFFIX_LEN: usize = 8;
const CONTAINER_NAME_LEN: usize = 8;
const UPPER_ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Appends [`ACCOUNT_MARKER`] unless the name already ends with it.
#[must_use]
pub fn with_marker(name: &str) -> String {
    if name.ends_with(ACCOUNT_MARKER) {
        name.to_string()
    } else {
        format!("{name}{ACCOUNT_MARKER}")
    }
}

/// Host name of an account: the account name without its trailing marker.
#[must_use]
pub fn hostname(account: &str) -> &str {
    account.strip_suffix(ACCOUNT_MARKER).unwrap_or(account)
}

/// Random `[A-Za-z0-9]{32}` password.
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn random_from(charset: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(charset[rng.gen_range(0..charset.len())]))
        .collect()
}

/// Source of candidate names for accounts created without an explicit name.
///
/// The engines check each candidate and only accept one the server reports as absent.
pub trait NameSource: Send {
    /// Next candidate computer account name, marker included.
    fn next_computer_name(&mut self) -> String;

    /// Next name for a scratch container entry.
    fn next_container_name(&mut self) -> String;
}

/// Random names: `DESKTOP-[A-Z0-9]{8}$` for accounts, `[A-Z]{8}` for containers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNames;

impl NameSource for RandomNames {
    fn next_computer_name(&mut self) -> String {
        format!(
            "{GENERATED_NAME_PREFIX}{}{ACCOUNT_MARKER}",
            random_from(UPPER_ALNUM, NAME_SUFFIX_LEN)
        )
    }

    fn next_container_name(&mut self) -> String {
        random_from(UPPER, CONTAINER_NAME_LEN)
    }
}
