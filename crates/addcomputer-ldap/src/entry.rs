//! Attribute payloads for computer and scratch container entries.

use addcomputer_core::names;
use addcomputer_core::DistinguishedName;

use crate::session::{AttributeReplacement, DirectoryControl, NewEntry};

/// `userAccountControl` value of a workstation trust account.
pub const UF_WORKSTATION_TRUST_ACCOUNT: u32 = 0x1000;

/// Object classes of a computer entry.
pub const COMPUTER_OBJECT_CLASSES: &[&str] =
    &["top", "person", "organizationalPerson", "user", "computer"];

/// Object classes of the scratch container used to escape the machine quota.
pub const STORAGE_GROUP_OBJECT_CLASSES: &[&str] = &["top", "container", "msExchStorageGroup"];

/// OID of the security descriptor flags control.
pub const SD_FLAGS_OID: &str = "1.2.840.113556.1.4.801";

/// `DACL_SECURITY_INFORMATION`.
pub const DACL_SECURITY_INFORMATION: u8 = 0x04;

/// Self-relative security descriptor whose DACL grants full control to Everyone.
pub const ALLOW_EVERYONE_FULL_CONTROL: [u8; 68] = [
    0x01, 0x00, 0x04, 0x9c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x14, 0x00, 0x00, 0x00, 0x02, 0x00, 0x30, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x00,
    0xff, 0x01, 0x0f, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x0a, 0x14, 0x00, 0x00, 0x00, 0x00, 0x10, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00,
];

/// `unicodePwd` value: the password in double quotes, UTF-16LE encoded.
#[must_use]
pub fn encode_unicode_password(password: &str) -> Vec<u8> {
    format!("\"{password}\"")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Replacement that sets a new password on an existing account.
#[must_use]
pub fn password_replacement(password: &str) -> AttributeReplacement {
    AttributeReplacement {
        attribute: "unicodePwd".to_string(),
        values: vec![encode_unicode_password(password)],
    }
}

/// Computer entry for `account` under `parent`.
#[must_use]
pub fn computer_entry(
    parent: &DistinguishedName,
    account: &str,
    domain_fqdn: &str,
    password: &str,
) -> NewEntry {
    let host = names::hostname(account);
    let fqdn = format!("{host}.{domain_fqdn}");
    let spns = [
        format!("HOST/{host}"),
        format!("HOST/{fqdn}"),
        format!("RestrictedKrbHost/{host}"),
        format!("RestrictedKrbHost/{fqdn}"),
    ];

    NewEntry {
        dn: parent.child("CN", host).to_string(),
        attributes: vec![
            object_classes(COMPUTER_OBJECT_CLASSES),
            text("dnsHostName", [fqdn.as_str()]),
            text(
                "userAccountControl",
                [UF_WORKSTATION_TRUST_ACCOUNT.to_string().as_str()],
            ),
            text("servicePrincipalName", spns.iter().map(String::as_str)),
            text("sAMAccountName", [account]),
            (
                "unicodePwd".to_string(),
                vec![encode_unicode_password(password)],
            ),
        ],
        controls: Vec::new(),
    }
}

/// Scratch container entry at `dn`, open to everyone.
#[must_use]
pub fn storage_group_entry(dn: &DistinguishedName) -> NewEntry {
    NewEntry {
        dn: dn.to_string(),
        attributes: vec![
            object_classes(STORAGE_GROUP_OBJECT_CLASSES),
            (
                "nTSecurityDescriptor".to_string(),
                vec![ALLOW_EVERYONE_FULL_CONTROL.to_vec()],
            ),
        ],
        controls: vec![sd_flags_control(DACL_SECURITY_INFORMATION)],
    }
}

/// Security descriptor flags control: `SEQUENCE { INTEGER flags }`.
#[must_use]
pub fn sd_flags_control(flags: u8) -> DirectoryControl {
    DirectoryControl {
        oid: SD_FLAGS_OID.to_string(),
        critical: true,
        value: vec![0x30, 0x03, 0x02, 0x01, flags],
    }
}

fn object_classes(classes: &[&str]) -> (String, Vec<Vec<u8>>) {
    text("objectClass", classes.iter().copied())
}

fn text<'a>(attribute: &str, values: impl IntoIterator<Item = &'a str>) -> (String, Vec<Vec<u8>>) {
    (
        attribute.to_string(),
        values
            .into_iter()
            .map(|value| value.as_bytes().to_vec())
            .collect(),
    )
}

/// Escapes a value for use inside an LDAP search filter.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value
        .chars()
        .flat_map(|ch| match ch {
            '*' => "\\2a".chars().collect::<Vec<_>>(),
            '(' => "\\28".chars().collect(),
            ')' => "\\29".chars().collect(),
            '\\' => "\\5c".chars().collect(),
            '\0' => "\\00".chars().collect(),
            _ => vec![ch],
        })
        .collect::<String>()
}

/// Filter matching an account by `sAMAccountName`.
#[must_use]
pub fn account_filter(account: &str) -> String {
    format!("(sAMAccountName={})", escape_filter_value(account))
}

/// Extracts the hexadecimal sub-code that prefixes Active Directory diagnostic messages,
/// e.g. `0000216D: SvcErr: ...`.
#[must_use]
pub fn parse_sub_code(message: &str) -> Option<u32> {
    let prefix = message.split(':').next()?.trim();
    u32::from_str_radix(prefix, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> DistinguishedName {
        DistinguishedName::parse("CN=Computers,DC=corp,DC=local").unwrap()
    }

    fn text_values(entry: &NewEntry, attribute: &str) -> Vec<String> {
        entry
            .values(attribute)
            .unwrap()
            .iter()
            .map(|value| String::from_utf8(value.clone()).unwrap())
            .collect()
    }

    #[test]
    fn unicode_password_is_quoted_utf16le() {
        assert_eq!(
            encode_unicode_password("ab"),
            vec![0x22, 0x00, 0x61, 0x00, 0x62, 0x00, 0x22, 0x00]
        );
    }

    #[test]
    fn computer_entry_attributes() {
        let entry = computer_entry(&container(), "WS01$", "corp.local", "pw");

        assert_eq!(entry.dn, "CN=WS01,CN=Computers,DC=corp,DC=local");
        assert_eq!(
            text_values(&entry, "objectClass"),
            ["top", "person", "organizationalPerson", "user", "computer"]
        );
        assert_eq!(text_values(&entry, "dnsHostName"), ["WS01.corp.local"]);
        assert_eq!(text_values(&entry, "userAccountControl"), ["4096"]);
        assert_eq!(
            text_values(&entry, "servicePrincipalName"),
            [
                "HOST/WS01",
                "HOST/WS01.corp.local",
                "RestrictedKrbHost/WS01",
                "RestrictedKrbHost/WS01.corp.local",
            ]
        );
        assert_eq!(text_values(&entry, "sAMAccountName"), ["WS01$"]);
        assert_eq!(
            entry.values("unicodePwd").unwrap(),
            [encode_unicode_password("pw")]
        );
        assert!(entry.controls.is_empty());
    }

    #[test]
    fn storage_group_carries_sd_flags_control() {
        let dn =
            DistinguishedName::parse("CN=ABCDEFGH,CN=WS99,CN=Computers,DC=corp,DC=local").unwrap();
        let entry = storage_group_entry(&dn);

        assert_eq!(entry.dn, "CN=ABCDEFGH,CN=WS99,CN=Computers,DC=corp,DC=local");
        assert_eq!(
            text_values(&entry, "objectClass"),
            ["top", "container", "msExchStorageGroup"]
        );
        assert_eq!(
            entry.values("nTSecurityDescriptor").unwrap()[0].len(),
            ALLOW_EVERYONE_FULL_CONTROL.len()
        );
        assert_eq!(
            entry.controls,
            vec![DirectoryControl {
                oid: "1.2.840.113556.1.4.801".to_string(),
                critical: true,
                value: vec![0x30, 0x03, 0x02, 0x01, 0x04],
            }]
        );
    }

    #[test]
    fn filter_escaping() {
        assert_eq!(account_filter("WS01$"), "(sAMAccountName=WS01$)");
        assert_eq!(
            account_filter("a*(b)\\"),
            "(sAMAccountName=a\\2a\\28b\\29\\5c)"
        );
    }

    #[test]
    fn sub_code_parsing() {
        assert_eq!(
            parse_sub_code("0000216D: SvcErr: DSID-031A1236, problem 5003 (WILL_NOT_PERFORM)"),
            Some(0x216D)
        );
        assert_eq!(parse_sub_code("  00002077 : SvcErr"), Some(0x2077));
        assert_eq!(parse_sub_code("Will not perform"), None);
        assert_eq!(parse_sub_code(""), None);
    }
}
