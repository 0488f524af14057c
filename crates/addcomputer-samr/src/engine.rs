//! Machine-account lifecycle over SAMR.

use tracing::{debug, info};

use addcomputer_core::{
    AccountOutcome, Error, NameSource, OperationDescriptor, OperationKind, RandomNames, Result,
};

use crate::handles::HandleChain;
use crate::protocol::{
    RpcHandle, SamrRpc, BUILTIN_DOMAIN, DELETE, DOMAIN_CREATE_USER, DOMAIN_LOOKUP, MAXIMUM_ALLOWED,
    SAMR_INTERFACE, SAM_SERVER_ENUMERATE_DOMAINS, SAM_SERVER_LOOKUP_DOMAIN, STATUS_ACCESS_DENIED,
    STATUS_DS_MACHINE_ACCOUNT_QUOTA_EXCEEDED, STATUS_NONE_MAPPED, USER_FORCE_PASSWORD_CHANGE,
    USER_WORKSTATION_TRUST_ACCOUNT,
};

/// Drives one account operation through the SAMR state machine.
pub struct SamrAccountEngine<'a, N = RandomNames> {
    descriptor: &'a OperationDescriptor,
    names: N,
}

impl<'a> SamrAccountEngine<'a, RandomNames> {
    /// Creates an engine that generates random names when none is configured.
    #[must_use]
    pub const fn new(descriptor: &'a OperationDescriptor) -> Self {
        Self {
            descriptor,
            names: RandomNames,
        }
    }
}

impl<'a, N: NameSource> SamrAccountEngine<'a, N> {
    /// Creates an engine with a custom name source.
    #[must_use]
    pub const fn with_names(descriptor: &'a OperationDescriptor, names: N) -> Self {
        Self { descriptor, names }
    }

    /// Runs the operation on `rpc`.
    ///
    /// Every handle acquired is closed (user, domain, server) and the transport is disconnected
    /// before this returns, on success and on every error path.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the sequence, mapped to [`Error`] kinds where the status
    /// code identifies an expected outcome.
    pub async fn run(&mut self, rpc: &mut dyn SamrRpc) -> Result<AccountOutcome> {
        let mut handles = HandleChain::default();
        let result = self.execute(rpc, &mut handles).await;

        handles.release(rpc).await;
        if let Err(err) = rpc.disconnect().await {
            debug!(error = %err, "SAMR disconnect failed");
        }
        result
    }

    async fn execute(
        &mut self,
        rpc: &mut dyn SamrRpc,
        handles: &mut HandleChain,
    ) -> Result<AccountOutcome> {
        rpc.connect().await?;
        rpc.bind(SAMR_INTERFACE).await?;

        let server_name = format!(r"\\{}", self.descriptor.target_host());
        let server = rpc
            .connect_server(
                &server_name,
                SAM_SERVER_ENUMERATE_DOMAINS | SAM_SERVER_LOOKUP_DOMAIN,
            )
            .await?;
        handles.set_server(server.clone());

        let domains = rpc.enumerate_domains(&server).await?;
        let selected = select_domain(&domains, self.descriptor.domain_netbios())?;

        let domain_sid = rpc.lookup_domain(&server, &selected).await?;
        info!(domain = %selected, sid = %domain_sid, "Opening domain");
        let domain = rpc
            .open_domain(&server, DOMAIN_LOOKUP | DOMAIN_CREATE_USER, &domain_sid)
            .await?;
        handles.set_domain(domain.clone());

        match self.descriptor.operation() {
            OperationKind::Create => self.create(rpc, handles, &domain).await,
            operation => {
                let account = self.descriptor.computer_name().ok_or_else(|| {
                    Error::Configuration(format!(
                        "a computer name is required to {}",
                        operation.action()
                    ))
                })?;
                self.modify_existing(rpc, handles, &domain, &selected, account, operation)
                    .await
            }
        }
    }

    async fn modify_existing(
        &self,
        rpc: &mut dyn SamrRpc,
        handles: &mut HandleChain,
        domain: &RpcHandle,
        domain_name: &str,
        account: &str,
        operation: OperationKind,
    ) -> Result<AccountOutcome> {
        let rid = match lookup_rid(rpc, domain, account).await {
            Err(err) if err.rpc_status() == Some(STATUS_NONE_MAPPED) => {
                return Err(Error::AccountNotFound {
                    account: account.to_string(),
                    scope: format!("domain {domain_name}"),
                })
            }
            other => other?,
        };

        let access = if operation == OperationKind::Delete {
            DELETE
        } else {
            USER_FORCE_PASSWORD_CHANGE
        };
        let user = rpc
            .open_user(domain, access, rid)
            .await
            .map_err(|err| self.map_access_denied(err, operation, account))?;
        handles.set_user(user.clone());

        if operation == OperationKind::Delete {
            rpc.delete_user(&user).await?;
            handles.discard_user();
            return Ok(AccountOutcome::Deleted {
                account: account.to_string(),
            });
        }

        let password = self.descriptor.computer_password();
        rpc.set_password(&user, password).await?;
        Ok(AccountOutcome::PasswordSet {
            account: account.to_string(),
            password: password.to_string(),
        })
    }

    async fn create(
        &mut self,
        rpc: &mut dyn SamrRpc,
        handles: &mut HandleChain,
        domain: &RpcHandle,
    ) -> Result<AccountOutcome> {
        let account = match self.descriptor.computer_name() {
            Some(name) => {
                if account_exists(rpc, domain, name).await? {
                    return Err(Error::AccountAlreadyExists(name.to_string()));
                }
                name.to_string()
            }
            None => loop {
                let candidate = self.names.next_computer_name();
                if !account_exists(rpc, domain, &candidate).await? {
                    break candidate;
                }
                debug!(account = %candidate, "Generated name already taken");
            },
        };

        let created = rpc
            .create_user(
                domain,
                &account,
                USER_WORKSTATION_TRUST_ACCOUNT,
                USER_FORCE_PASSWORD_CHANGE,
            )
            .await
            .map_err(|err| match err.rpc_status() {
                Some(STATUS_DS_MACHINE_ACCOUNT_QUOTA_EXCEEDED) => {
                    Error::QuotaExceeded(self.descriptor.credentials().username().to_string())
                }
                _ => self.map_access_denied(err, OperationKind::Create, &account),
            })?;
        handles.set_user(created.handle.clone());

        let password = self.descriptor.computer_password();
        rpc.set_password(&created.handle, password).await?;

        if let Some(handle) = handles.take_user() {
            rpc.close_handle(&handle).await?;
        }
        let user = rpc.open_user(domain, MAXIMUM_ALLOWED, created.rid).await?;
        handles.set_user(user.clone());
        rpc.set_account_control(&user, USER_WORKSTATION_TRUST_ACCOUNT)
            .await?;

        Ok(AccountOutcome::Created {
            account,
            password: password.to_string(),
            leftover_container: None,
        })
    }

    fn map_access_denied(&self, err: Error, operation: OperationKind, account: &str) -> Error {
        if err.rpc_status() == Some(STATUS_ACCESS_DENIED) {
            Error::InsufficientRights {
                user: self.descriptor.credentials().username().to_string(),
                action: operation.action().to_string(),
                account: account.to_string(),
            }
        } else {
            err
        }
    }
}

async fn lookup_rid(rpc: &mut dyn SamrRpc, domain: &RpcHandle, account: &str) -> Result<u32> {
    let rids = rpc.lookup_names(domain, &[account.to_string()]).await?;
    rids.first().copied().ok_or_else(|| Error::RpcProtocol {
        status: STATUS_NONE_MAPPED,
        message: format!("no RID returned for {account}"),
    })
}

async fn account_exists(rpc: &mut dyn SamrRpc, domain: &RpcHandle, account: &str) -> Result<bool> {
    match lookup_rid(rpc, domain, account).await {
        Ok(_) => Ok(true),
        Err(err) if err.rpc_status() == Some(STATUS_NONE_MAPPED) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Picks the domain to operate on from the names a server enumerates.
///
/// The built-in domain is ignored. A single remaining domain is used as is; with several, the
/// NetBIOS name must match one of them (case-insensitively).
///
/// # Errors
///
/// Returns [`Error::DomainUnavailable`] when nothing but the built-in domain exists, and
/// [`Error::AmbiguousDomain`] when several remain and none matches `netbios`.
pub fn select_domain(domains: &[String], netbios: &str) -> Result<String> {
    let candidates: Vec<&String> = domains
        .iter()
        .filter(|name| !name.eq_ignore_ascii_case(BUILTIN_DOMAIN))
        .collect();

    match candidates.as_slice() {
        [] => Err(Error::DomainUnavailable(format!(
            "server only offers {}",
            domains.join(", ")
        ))),
        [only] => Ok((*only).clone()),
        _ => {
            let mut matching = candidates
                .iter()
                .filter(|name| name.eq_ignore_ascii_case(netbios));
            match (matching.next(), matching.next()) {
                (Some(name), None) => Ok((*name).clone()),
                _ => Err(Error::AmbiguousDomain {
                    requested: netbios.to_string(),
                    candidates: candidates.into_iter().cloned().collect(),
                }),
            }
        }
    }
}
