//! Distinguished names of the containers and entries this tool writes.
//!
//! User-supplied DNs are parsed strictly; base DNs are derived from the DNS domain; new entries
//! are named `CN=<value>,<parent>` with RFC 4514 escaping applied to the value.

use std::fmt;
use thiserror::Error;

use crate::error::Error;

/// Why a distinguished name could not be parsed or derived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// Nothing but whitespace.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component is empty, has no `=`, or is multi-valued.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// Nothing to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// Nothing to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// Trailing backslash.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
    /// The domain has an empty label (e.g. `corp..local`).
    #[error("domain `{0}` cannot be turned into a base DN")]
    InvalidDomain(String),
}

impl From<DistinguishedNameError> for Error {
    fn from(err: DistinguishedNameError) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// One `attribute=value` pair, value kept unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Component {
    attribute: String,
    value: String,
}

impl Component {
    fn new(attribute: &str, value: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    fn write_escaped(&self, out: &mut String) {
        out.push_str(&self.attribute);
        out.push('=');
        let last = self.value.chars().count().saturating_sub(1);
        for (idx, ch) in self.value.chars().enumerate() {
            let special = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=');
            let edge_space = ch == ' ' && (idx == 0 || idx == last);
            if special || edge_space || (idx == 0 && ch == '#') {
                out.push('\\');
            }
            out.push(ch);
        }
    }
}

/// A parsed distinguished name, leaf component first.
///
/// Multi-valued components (`a=1+b=2`) are rejected; none of the containers involved use them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    text: String,
    components: Vec<Component>,
}

impl DistinguishedName {
    /// Parses a DN such as `CN=Computers,DC=corp,DC=local`.
    ///
    /// Whitespace around components and around the `=` is dropped; the canonical form is
    /// re-rendered from the parsed components.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] for empty input or malformed components.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let input = input.as_ref().trim();
        if input.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let mut components = Vec::new();
        for raw in split_components(input)? {
            components.push(parse_component(&raw)?);
        }
        Ok(Self::from_components(components))
    }

    /// `dc=<label>` for every label of a DNS domain.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError::InvalidDomain`] for an empty domain or empty labels.
    pub fn from_domain(domain: &str) -> std::result::Result<Self, DistinguishedNameError> {
        let domain = domain.trim().trim_end_matches('.');
        let labels: Vec<&str> = domain.split('.').collect();
        if domain.is_empty() || labels.iter().any(|label| label.is_empty()) {
            return Err(DistinguishedNameError::InvalidDomain(domain.to_string()));
        }
        Ok(Self::from_components(
            labels
                .into_iter()
                .map(|label| Component::new("dc", label))
                .collect(),
        ))
    }

    /// `CN=Computers,<base>`.
    #[must_use]
    pub fn computers_container(base: &Self) -> Self {
        base.child("CN", "Computers")
    }

    /// DN of a direct child named `attribute=value`.
    #[must_use]
    pub fn child(&self, attribute: &str, value: &str) -> Self {
        let components = std::iter::once(Component::new(attribute, value))
            .chain(self.components.iter().cloned())
            .collect();
        Self::from_components(components)
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn from_components(components: Vec<Component>) -> Self {
        let mut text = String::new();
        for (idx, component) in components.iter().enumerate() {
            if idx > 0 {
                text.push(',');
            }
            component.write_escaped(&mut text);
        }
        Self { text, components }
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Splits on unescaped commas, keeping escapes in place for [`parse_component`].
fn split_components(input: &str) -> std::result::Result<Vec<String>, DistinguishedNameError> {
    let mut parts = vec![String::new()];
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or(DistinguishedNameError::UnterminatedEscape)?;
                if let Some(current) = parts.last_mut() {
                    current.push('\\');
                    current.push(escaped);
                }
            }
            ',' => parts.push(String::new()),
            _ => {
                if let Some(current) = parts.last_mut() {
                    current.push(ch);
                }
            }
        }
    }

    let parts: Vec<String> = parts.iter().map(|part| part.trim().to_string()).collect();
    if parts.iter().any(String::is_empty) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn parse_component(raw: &str) -> std::result::Result<Component, DistinguishedNameError> {
    let (attribute, escaped_value) = raw
        .split_once('=')
        .ok_or_else(|| DistinguishedNameError::InvalidComponent(raw.to_string()))?;
    let attribute = attribute.trim();
    let escaped_value = escaped_value.trim_start();
    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(raw.to_string()));
    }
    if escaped_value.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute.to_string()));
    }

    let mut value = String::with_capacity(escaped_value.len());
    let mut chars = escaped_value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            // split_components guarantees a character follows every backslash
            '\\' => value.extend(chars.next()),
            '+' => return Err(DistinguishedNameError::InvalidComponent(raw.to_string())),
            _ => value.push(ch),
        }
    }
    Ok(Component::new(attribute, &value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_renders_canonical_form() {
        let dn = DistinguishedName::parse(" CN = Computers, DC=corp,DC=local ").unwrap();
        assert_eq!(dn.as_str(), "CN=Computers,DC=corp,DC=local");
        assert_eq!(dn.to_string(), dn.as_str());
    }

    #[test]
    fn escaped_comma_stays_in_value() {
        let dn = DistinguishedName::parse("CN=Smith\\, John,CN=Users,DC=corp,DC=local").unwrap();
        assert_eq!(dn.as_str(), "CN=Smith\\, John,CN=Users,DC=corp,DC=local");
    }

    #[test]
    fn reject_malformed() {
        assert_eq!(
            DistinguishedName::parse("  ").unwrap_err(),
            DistinguishedNameError::Empty
        );
        assert!(matches!(
            DistinguishedName::parse("CN=WS01,").unwrap_err(),
            DistinguishedNameError::InvalidComponent(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("=x,DC=corp").unwrap_err(),
            DistinguishedNameError::MissingAttribute(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("CN=,DC=corp").unwrap_err(),
            DistinguishedNameError::MissingValue(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("CN=a+UID=b,DC=corp").unwrap_err(),
            DistinguishedNameError::InvalidComponent(_)
        ));
        assert_eq!(
            DistinguishedName::parse("CN=trailing\\").unwrap_err(),
            DistinguishedNameError::UnterminatedEscape
        );
    }

    #[test]
    fn base_dn_from_domain() {
        let dn = DistinguishedName::from_domain("corp.example.local").unwrap();
        assert_eq!(dn.as_str(), "dc=corp,dc=example,dc=local");

        let single = DistinguishedName::from_domain("CORP").unwrap();
        assert_eq!(single.as_str(), "dc=CORP");

        assert!(DistinguishedName::from_domain("corp..local").is_err());
        assert!(DistinguishedName::from_domain("").is_err());
    }

    #[test]
    fn computers_container_and_children() {
        let base = DistinguishedName::from_domain("corp.local").unwrap();
        let container = DistinguishedName::computers_container(&base);
        assert_eq!(container.as_str(), "CN=Computers,dc=corp,dc=local");

        let entry = container.child("CN", "WS,01");
        assert_eq!(entry.as_str(), "CN=WS\\,01,CN=Computers,dc=corp,dc=local");

        let padded = container.child("CN", " #lead ");
        assert_eq!(padded.as_str(), "CN=\\ #lead\\ ,CN=Computers,dc=corp,dc=local");
    }
}
