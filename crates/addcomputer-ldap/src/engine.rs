//! Machine-account lifecycle over secure LDAP.

use tracing::{debug, error, info};

use addcomputer_core::{
    AccountOutcome, DirectoryScope, Error, NameSource, OperationDescriptor, OperationKind,
    RandomNames, Result,
};

use crate::entry::{account_filter, computer_entry, parse_sub_code, password_replacement};
use crate::quota::{bypass_machine_quota, ComputerSpec, QUOTA_EXCEEDED_SUB_CODE};
use crate::session::{
    open_session, DirectoryConnector, DirectoryEntry, DirectoryResult, DirectorySession,
    SearchScope, RESULT_INSUFFICIENT_ACCESS_RIGHTS, RESULT_UNWILLING_TO_PERFORM,
};

const ACCOUNT_ATTRIBUTES: &[&str] = &["sAMAccountName"];

/// Drives one account operation against a directory server.
pub struct DirectoryAccountEngine<'a, N = RandomNames> {
    descriptor: &'a OperationDescriptor,
    names: N,
}

impl<'a> DirectoryAccountEngine<'a, RandomNames> {
    /// Creates an engine that generates random names when none is configured.
    #[must_use]
    pub const fn new(descriptor: &'a OperationDescriptor) -> Self {
        Self {
            descriptor,
            names: RandomNames,
        }
    }
}

impl<'a, N: NameSource> DirectoryAccountEngine<'a, N> {
    /// Creates an engine with a custom name source.
    #[must_use]
    pub const fn with_names(descriptor: &'a OperationDescriptor, names: N) -> Self {
        Self { descriptor, names }
    }

    /// Opens a session through `connector`, runs the operation and unbinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if no session can be established, otherwise the first failure
    /// of the operation.
    pub async fn run(&mut self, connector: &dyn DirectoryConnector) -> Result<AccountOutcome> {
        let scope = self.scope()?;
        let mut session = open_session(connector, self.descriptor).await?;

        let result = self.execute(&mut *session, scope).await;
        if let Err(err) = session.unbind().await {
            debug!(error = %err, "LDAP unbind failed");
        }
        result
    }

    /// Runs the operation on an already bound session.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation.
    pub async fn execute(
        &mut self,
        session: &mut dyn DirectorySession,
        scope: &DirectoryScope,
    ) -> Result<AccountOutcome> {
        match self.descriptor.operation() {
            OperationKind::Create => self.create(session, scope).await,
            operation => {
                let account = self.descriptor.computer_name().ok_or_else(|| {
                    Error::Configuration(format!(
                        "a computer name is required to {}",
                        operation.action()
                    ))
                })?;
                self.modify_existing(session, scope, account, operation)
                    .await
            }
        }
    }

    fn scope(&self) -> Result<&'a DirectoryScope> {
        self.descriptor.directory().ok_or_else(|| {
            Error::Configuration("LDAPS operations need a base DN and computer container".to_string())
        })
    }

    async fn modify_existing(
        &self,
        session: &mut dyn DirectorySession,
        scope: &DirectoryScope,
        account: &str,
        operation: OperationKind,
    ) -> Result<AccountOutcome> {
        let entry = find_account(session, scope, account)
            .await?
            .ok_or_else(|| Error::AccountNotFound {
                account: account.to_string(),
                scope: scope.base_dn().to_string(),
            })?;

        let password = self.descriptor.computer_password();
        let result = if operation == OperationKind::Delete {
            session.delete(&entry.dn).await?
        } else {
            session
                .modify(&entry.dn, &[password_replacement(password)])
                .await?
        };
        self.ensure_success(result, operation, account)?;

        Ok(if operation == OperationKind::Delete {
            AccountOutcome::Deleted {
                account: account.to_string(),
            }
        } else {
            AccountOutcome::PasswordSet {
                account: account.to_string(),
                password: password.to_string(),
            }
        })
    }

    async fn create(
        &mut self,
        session: &mut dyn DirectorySession,
        scope: &DirectoryScope,
    ) -> Result<AccountOutcome> {
        let account = match self.descriptor.computer_name() {
            Some(name) => {
                if find_account(session, scope, name).await?.is_some() {
                    return Err(Error::AccountAlreadyExists(name.to_string()));
                }
                name.to_string()
            }
            None => loop {
                let candidate = self.names.next_computer_name();
                if find_account(session, scope, &candidate).await?.is_none() {
                    break candidate;
                }
                debug!(account = %candidate, "Generated name already taken");
            },
        };

        let password = self.descriptor.computer_password();
        let entry = computer_entry(
            scope.computer_container(),
            &account,
            self.descriptor.domain_fqdn(),
            password,
        );
        info!(dn = %entry.dn, "Adding computer entry");
        let result = session.add(&entry).await?;

        if result.is_success() {
            return Ok(AccountOutcome::Created {
                account,
                password: password.to_string(),
                leftover_container: None,
            });
        }
        if result.code != RESULT_UNWILLING_TO_PERFORM
            || parse_sub_code(&result.message) != Some(QUOTA_EXCEEDED_SUB_CODE)
        {
            return Err(self.failure(result, OperationKind::Create, &account));
        }

        let credentials = self.descriptor.credentials();
        let username = credentials.username();
        error!("User {username} machine quota exceeded!");
        if !credentials.is_machine_account() {
            return Err(Error::QuotaExceeded(username.to_string()));
        }

        info!("Trying to bypass machine quota with `msExchStorageGroup` object");
        let container = bypass_machine_quota(
            session,
            &mut self.names,
            scope.base_dn(),
            username,
            ComputerSpec {
                account: &account,
                domain_fqdn: self.descriptor.domain_fqdn(),
                password,
            },
        )
        .await?;

        Ok(AccountOutcome::Created {
            account,
            password: password.to_string(),
            leftover_container: Some(container),
        })
    }

    fn ensure_success(
        &self,
        result: DirectoryResult,
        operation: OperationKind,
        account: &str,
    ) -> Result<()> {
        if result.is_success() {
            Ok(())
        } else {
            Err(self.failure(result, operation, account))
        }
    }

    fn failure(&self, result: DirectoryResult, operation: OperationKind, account: &str) -> Error {
        if result.code == RESULT_INSUFFICIENT_ACCESS_RIGHTS {
            Error::InsufficientRights {
                user: self.descriptor.credentials().username().to_string(),
                action: operation.action().to_string(),
                account: account.to_string(),
            }
        } else {
            Error::DirectoryOperation(result.to_string())
        }
    }
}

async fn find_account(
    session: &mut dyn DirectorySession,
    scope: &DirectoryScope,
    account: &str,
) -> Result<Option<DirectoryEntry>> {
    let entries = session
        .search(
            scope.base_dn().as_str(),
            SearchScope::Subtree,
            &account_filter(account),
            ACCOUNT_ATTRIBUTES,
        )
        .await?;
    Ok(entries.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::encode_unicode_password;
    use crate::session::{
        AttributeReplacement, MockDirectoryConnector, MockDirectorySession, NewEntry,
    };
    use addcomputer_core::AccountOptions;
    use mockall::predicate::{always, eq};
    use mockall::Sequence;
    use std::collections::HashMap;

    const BASE_DN: &str = "dc=corp,dc=local";
    const WS01_DN: &str = "CN=WS01,CN=Computers,DC=corp,DC=local";

    struct Names(Vec<&'static str>);

    impl NameSource for Names {
        fn next_computer_name(&mut self) -> String {
            self.0.remove(0).to_string()
        }

        fn next_container_name(&mut self) -> String {
            "QWERTYUI".to_string()
        }
    }

    fn descriptor(configure: impl FnOnce(&mut AccountOptions)) -> OperationDescriptor {
        let mut options = AccountOptions::new("alice", "corp.local");
        options.method = "LDAPS".to_string();
        options.password = Some("Passw0rd".to_string().into());
        options.computer_password = Some("S3cret!".to_string().into());
        configure(&mut options);
        options.resolve().unwrap()
    }

    fn scope_of(descriptor: &OperationDescriptor) -> &DirectoryScope {
        descriptor.directory().unwrap()
    }

    fn found(dn: &str) -> Vec<DirectoryEntry> {
        vec![DirectoryEntry {
            dn: dn.to_string(),
            attributes: HashMap::new(),
            binary: HashMap::new(),
        }]
    }

    fn refused(code: u32, message: &str) -> DirectoryResult {
        DirectoryResult {
            code,
            message: message.to_string(),
        }
    }

    fn expect_lookup(
        session: &mut MockDirectorySession,
        seq: &mut Sequence,
        filter: &'static str,
        result: Vec<DirectoryEntry>,
    ) {
        session
            .expect_search()
            .with(eq(BASE_DN), eq(SearchScope::Subtree), eq(filter), always())
            .times(1)
            .in_sequence(seq)
            .return_once(move |_, _, _, _| Ok(result));
    }

    const QUOTA_MESSAGE: &str = "0000216D: SvcErr: DSID-031A1236, problem 5003 (WILL_NOT_PERFORM)";

    #[tokio::test]
    async fn create_existing_account_aborts_before_add() {
        let descriptor = descriptor(|options| options.computer_name = Some("WS01".to_string()));
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", found(WS01_DN));
        session.expect_add().never();

        let err = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap_err();
        assert_eq!(err, Error::AccountAlreadyExists("WS01$".to_string()));
    }

    #[tokio::test]
    async fn create_generated_name() {
        let descriptor = descriptor(|_| {});
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(
            &mut session,
            &mut seq,
            "(sAMAccountName=DESKTOP-TAKEN001$)",
            found("CN=DESKTOP-TAKEN001,CN=Computers,DC=corp,DC=local"),
        );
        expect_lookup(
            &mut session,
            &mut seq,
            "(sAMAccountName=DESKTOP-FREE0002$)",
            Vec::new(),
        );
        session
            .expect_add()
            .withf(|entry: &NewEntry| {
                entry.dn == "CN=DESKTOP-FREE0002,CN=Computers,dc=corp,dc=local"
                    && entry.values("unicodePwd")
                        == Some(&[encode_unicode_password("S3cret!")][..])
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(DirectoryResult::success()));

        let names = Names(vec!["DESKTOP-TAKEN001$", "DESKTOP-FREE0002$"]);
        let outcome = DirectoryAccountEngine::with_names(&descriptor, names)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap();
        assert_eq!(
            outcome.to_string(),
            "Successfully added machine account DESKTOP-FREE0002$ with password S3cret!."
        );
    }

    #[tokio::test]
    async fn create_without_rights() {
        let descriptor = descriptor(|options| options.computer_name = Some("WS01".to_string()));
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", Vec::new());
        session
            .expect_add()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(refused(50, "00002098: SecErr: DSID-03150F94")));

        let err = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::InsufficientRights {
                user: "alice".to_string(),
                action: "create a machine account".to_string(),
                account: "WS01$".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unwilling_with_other_sub_code_is_generic_failure() {
        let descriptor = descriptor(|options| options.computer_name = Some("WS01".to_string()));
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", Vec::new());
        session
            .expect_add()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(refused(53, "0000052D: SvcErr: DSID-031A12D2, problem 5003")));

        let err = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DirectoryOperation(message) if message.contains("0000052D")));
    }

    #[tokio::test]
    async fn quota_for_user_principal_skips_bypass() {
        let descriptor = descriptor(|options| options.computer_name = Some("WS01".to_string()));
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", Vec::new());
        session
            .expect_add()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(refused(53, QUOTA_MESSAGE)));

        let err = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap_err();
        assert_eq!(err, Error::QuotaExceeded("alice".to_string()));
    }

    #[tokio::test]
    async fn quota_for_machine_principal_attempts_bypass_once() {
        let descriptor = descriptor(|options| {
            options.username = "OWNED$".to_string();
            options.computer_name = Some("WS01".to_string());
        });
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", Vec::new());
        session
            .expect_add()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(refused(53, QUOTA_MESSAGE)));
        session
            .expect_search()
            .with(eq(""), eq(SearchScope::Base), always(), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(Vec::new()));

        let err = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap_err();
        assert_eq!(err, Error::QuotaExceeded("OWNED$".to_string()));
    }

    #[tokio::test]
    async fn set_password_replaces_unicode_pwd() {
        let descriptor = descriptor(|options| {
            options.computer_name = Some("WS01".to_string());
            options.no_add = true;
        });
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", found(WS01_DN));
        session
            .expect_modify()
            .withf(|dn: &str, replacements: &[AttributeReplacement]| {
                dn == WS01_DN
                    && replacements
                        == [AttributeReplacement {
                            attribute: "unicodePwd".to_string(),
                            values: vec![encode_unicode_password("S3cret!")],
                        }]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(DirectoryResult::success()));

        let outcome = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AccountOutcome::PasswordSet {
                account: "WS01$".to_string(),
                password: "S3cret!".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn delete_missing_account() {
        let descriptor = descriptor(|options| {
            options.computer_name = Some("WS01".to_string());
            options.delete = true;
        });
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", Vec::new());
        session.expect_delete().never();

        let err = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::AccountNotFound {
                account: "WS01$".to_string(),
                scope: BASE_DN.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn delete_without_rights() {
        let descriptor = descriptor(|options| {
            options.computer_name = Some("WS01".to_string());
            options.delete = true;
        });
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", found(WS01_DN));
        session
            .expect_delete()
            .with(eq(WS01_DN))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(refused(50, "insufficient access")));

        let err = DirectoryAccountEngine::new(&descriptor)
            .execute(&mut session, scope_of(&descriptor))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientRights { action, .. } if action == "delete"
        ));
    }

    #[tokio::test]
    async fn run_unbinds_after_failure() {
        let descriptor = descriptor(|options| {
            options.computer_name = Some("WS01".to_string());
            options.delete = true;
        });
        let mut session = MockDirectorySession::new();
        session.expect_bind().times(1).returning(|_| Ok(()));
        session
            .expect_search()
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));
        session.expect_unbind().times(1).returning(|| Ok(()));

        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(session)));

        let err = DirectoryAccountEngine::new(&descriptor)
            .run(&connector)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound { .. }));
    }

    #[tokio::test]
    async fn refused_password_change_is_directory_failure_and_unbinds() {
        let descriptor = descriptor(|options| {
            options.computer_name = Some("WS01".to_string());
            options.no_add = true;
        });
        let mut session = MockDirectorySession::new();
        let mut seq = Sequence::new();
        session
            .expect_bind()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        expect_lookup(&mut session, &mut seq, "(sAMAccountName=WS01$)", found(WS01_DN));
        session
            .expect_modify()
            .withf(|dn: &str, _: &[AttributeReplacement]| dn == WS01_DN)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(refused(
                    19,
                    "0000052D: Constraint violation - check_password_restrictions",
                ))
            });
        session
            .expect_unbind()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(session)));

        let err = DirectoryAccountEngine::new(&descriptor)
            .run(&connector)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DirectoryOperation(message)
                if message.starts_with("result 19:") && message.contains("0000052D")
        ));
    }
}
