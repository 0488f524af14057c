//! CLI argument parsing.

use clap::Parser;
use secrecy::SecretString;

use addcomputer_core::{AccountOptions, Result};

use crate::identity::Identity;

/// Adds a computer account to a domain, or re-passwords or deletes an existing one.
#[derive(Debug, Parser)]
#[command(name = "addcomputer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Account used to authenticate to the DC.
    #[arg(value_name = "[domain/]username[:password]")]
    pub account: String,

    /// Method of adding the computer. SAMR works over SMB; LDAPS needs a DC certificate.
    #[arg(long, default_value = "SAMR", value_parser = ["SAMR", "LDAPS"], ignore_case = true)]
    pub method: String,

    /// Name of the computer to add. Random DESKTOP-XXXXXXXX$ when omitted.
    #[arg(long, value_name = "COMPUTER-NAME$")]
    pub computer_name: Option<String>,

    /// Password to set on the computer. Random 32 characters when omitted.
    #[arg(long, value_name = "PASSWORD")]
    pub computer_pass: Option<String>,

    /// Don't add a computer, only set the password on an existing one.
    #[arg(long)]
    pub no_add: bool,

    /// Delete an existing computer.
    #[arg(long)]
    pub delete: bool,

    /// Base DN for LDAP. Derived from the domain when omitted.
    #[arg(long, value_name = "DC=test,DC=local", help_heading = "LDAP")]
    pub base_dn: Option<String>,

    /// Container the account is added to. CN=Computers under the base DN when omitted.
    #[arg(
        long,
        value_name = "CN=Computers,DC=test,DC=local",
        help_heading = "LDAP"
    )]
    pub computer_group: Option<String>,

    /// Domain NetBIOS name. Required if the DC serves multiple domains.
    #[arg(long, value_name = "NETBIOSNAME")]
    pub domain_netbios: Option<String>,

    /// Destination port. SAMR defaults to 445, LDAPS to 636.
    #[arg(long, value_parser = parse_port)]
    pub port: Option<u16>,

    /// Use Kerberos authentication from the credential cache (KRB5CCNAME).
    #[arg(short = 'k', long, help_heading = "Authentication")]
    pub kerberos: bool,

    /// NTLM hashes.
    #[arg(long, value_name = "LMHASH:NTHASH", help_heading = "Authentication")]
    pub hashes: Option<String>,

    /// AES key to use for Kerberos authentication (128 or 256 bits).
    #[arg(long, value_name = "HEX KEY", help_heading = "Authentication")]
    pub aes_key: Option<String>,

    /// Host name of the domain controller. The domain is used when omitted.
    #[arg(long, value_name = "HOSTNAME", help_heading = "Authentication")]
    pub dc_host: Option<String>,

    /// IP address of the domain controller.
    #[arg(long, value_name = "IP", help_heading = "Authentication")]
    pub dc_ip: Option<String>,

    /// Add a timestamp to every log line.
    #[arg(long)]
    pub ts: bool,

    /// Turn debug output on.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Builds the raw account options from the parsed arguments.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the identity names no domain.
    pub fn into_options(self) -> Result<AccountOptions> {
        let identity = Identity::parse(&self.account)?;

        let mut options = AccountOptions::new(identity.username, identity.domain);
        options.method = self.method;
        options.password = identity.password;
        options.hashes = self.hashes;
        options.aes_key = self.aes_key;
        options.kerberos = self.kerberos;
        options.dc_host = self.dc_host;
        options.dc_ip = self.dc_ip;
        options.computer_name = self.computer_name;
        options.computer_password = self.computer_pass.map(SecretString::from);
        options.no_add = self.no_add;
        options.delete = self.delete;
        options.base_dn = self.base_dn;
        options.computer_group = self.computer_group;
        options.domain_netbios = self.domain_netbios;
        options.port = self.port;
        Ok(options)
    }
}

fn parse_port(value: &str) -> std::result::Result<u16, String> {
    match value.parse::<u16>() {
        Ok(port @ (139 | 445 | 636)) => Ok(port),
        _ => Err(format!("'{value}' is not one of 139, 445, 636")),
    }
}
