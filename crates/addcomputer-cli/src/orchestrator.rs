//! Dispatch of a resolved operation to the engine for its method.

use tracing::{debug, error, info};

use addcomputer_core::{AccountOutcome, Error, Method, OperationDescriptor, Result};
use addcomputer_ldap::{DirectoryAccountEngine, DirectoryConnector, Ldap3Connector};
use addcomputer_samr::{
    prepare_transport, EndpointMapper, RpcTransportFactory, SamrAccountEngine, SmbTransportFactory,
    WellKnownPipeMapper,
};

/// How much detail failures are reported with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Log the full `Debug` form of errors.
    pub verbose: bool,
}

/// Runs one account operation with the engine selected by [`OperationDescriptor::method`].
pub struct Orchestrator {
    descriptor: OperationDescriptor,
    diagnostics: Diagnostics,
    directory: Box<dyn DirectoryConnector>,
    endpoints: Box<dyn EndpointMapper>,
    rpc_transport: Box<dyn RpcTransportFactory>,
}

impl Orchestrator {
    /// Creates an orchestrator with the `ldap3` directory connector, the well-known pipe
    /// endpoint mapper and the SMB2 named-pipe RPC transport.
    #[must_use]
    pub fn new(descriptor: OperationDescriptor, diagnostics: Diagnostics) -> Self {
        Self {
            descriptor,
            diagnostics,
            directory: Box::new(Ldap3Connector::new()),
            endpoints: Box::new(WellKnownPipeMapper),
            rpc_transport: Box::new(SmbTransportFactory),
        }
    }

    /// Replaces the directory connector.
    #[must_use]
    pub fn with_directory_connector(mut self, connector: impl DirectoryConnector + 'static) -> Self {
        self.directory = Box::new(connector);
        self
    }

    /// Replaces the endpoint mapper.
    #[must_use]
    pub fn with_endpoint_mapper(mut self, mapper: impl EndpointMapper + 'static) -> Self {
        self.endpoints = Box::new(mapper);
        self
    }

    /// Replaces the RPC transport used by the SAMR method.
    #[must_use]
    pub fn with_rpc_transport(mut self, factory: impl RpcTransportFactory + 'static) -> Self {
        self.rpc_transport = Box::new(factory);
        self
    }

    /// Resolved operation.
    #[must_use]
    pub const fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    /// Runs the operation without logging its outcome.
    ///
    /// # Errors
    ///
    /// Returns the engine failure, or [`Error::Session`] when the SAMR transport cannot be
    /// prepared.
    pub async fn execute(&self) -> Result<AccountOutcome> {
        debug!(
            method = %self.descriptor.method(),
            target = %self.descriptor.target_host(),
            port = self.descriptor.port(),
            "Dispatching account operation"
        );
        match self.descriptor.method() {
            Method::Samr => self.execute_samr().await,
            Method::Ldaps => {
                DirectoryAccountEngine::new(&self.descriptor)
                    .run(self.directory.as_ref())
                    .await
            }
        }
    }

    /// Runs the operation and logs its outcome.
    ///
    /// # Errors
    ///
    /// Returns the same failures as [`Self::execute`], after logging them.
    pub async fn run(&self) -> Result<AccountOutcome> {
        match self.execute().await {
            Ok(outcome) => {
                info!(account = outcome.account(), "{outcome}");
                Ok(outcome)
            }
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }

    async fn execute_samr(&self) -> Result<AccountOutcome> {
        let mut rpc = prepare_transport(
            &self.descriptor,
            self.endpoints.as_ref(),
            self.rpc_transport.as_ref(),
        )?;
        SamrAccountEngine::new(&self.descriptor)
            .run(rpc.as_mut())
            .await
    }

    fn report(&self, err: &Error) {
        if self.diagnostics.verbose {
            error!(code = err.error_code(), details = ?err, "{err}");
        } else {
            error!("{err}");
        }
    }
}
