//! Ownership of the server → domain → user handle chain.

use tracing::debug;

use crate::protocol::{RpcHandle, SamrRpc};

/// Holds zero to three nested handles and releases them in reverse acquisition order.
///
/// The engine stores every handle here the moment it is acquired, and always calls
/// [`HandleChain::release`] before the transport is disconnected, whichever step failed.
#[derive(Debug, Default)]
pub struct HandleChain {
    server: Option<RpcHandle>,
    domain: Option<RpcHandle>,
    user: Option<RpcHandle>,
}

impl HandleChain {
    /// Records the server handle.
    pub fn set_server(&mut self, handle: RpcHandle) {
        self.server = Some(handle);
    }

    /// Records the domain handle.
    pub fn set_domain(&mut self, handle: RpcHandle) {
        self.domain = Some(handle);
    }

    /// Records the user handle.
    pub fn set_user(&mut self, handle: RpcHandle) {
        self.user = Some(handle);
    }

    /// Forgets the user handle without closing it (the server already invalidated it).
    pub fn discard_user(&mut self) {
        self.user = None;
    }

    /// Takes the user handle so it can be closed early.
    pub fn take_user(&mut self) -> Option<RpcHandle> {
        self.user.take()
    }

    /// Server handle, if acquired.
    #[must_use]
    pub const fn server(&self) -> Option<&RpcHandle> {
        self.server.as_ref()
    }

    /// Domain handle, if acquired.
    #[must_use]
    pub const fn domain(&self) -> Option<&RpcHandle> {
        self.domain.as_ref()
    }

    /// User handle, if acquired.
    #[must_use]
    pub const fn user(&self) -> Option<&RpcHandle> {
        self.user.as_ref()
    }

    /// Closes user, then domain, then server, skipping any never acquired.
    ///
    /// Close failures are logged and do not stop the remaining closes.
    pub async fn release(&mut self, rpc: &mut dyn SamrRpc) {
        for (kind, handle) in [
            ("user", self.user.take()),
            ("domain", self.domain.take()),
            ("server", self.server.take()),
        ] {
            let Some(handle) = handle else { continue };
            if let Err(err) = rpc.close_handle(&handle).await {
                debug!(handle = kind, error = %err, "failed to close SAMR handle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MockSamrRpc;
    use addcomputer_core::Error;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn handle(tag: u8) -> RpcHandle {
        RpcHandle([tag; 20])
    }

    #[tokio::test]
    async fn releases_in_reverse_order() {
        let mut rpc = MockSamrRpc::new();
        let mut seq = Sequence::new();
        for tag in [3u8, 2, 1] {
            rpc.expect_close_handle()
                .with(eq(handle(tag)))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let mut chain = HandleChain::default();
        chain.set_server(handle(1));
        chain.set_domain(handle(2));
        chain.set_user(handle(3));
        chain.release(&mut rpc).await;

        assert!(chain.server().is_none());
        assert!(chain.domain().is_none());
        assert!(chain.user().is_none());
    }

    #[tokio::test]
    async fn skips_missing_and_continues_after_failure() {
        let mut rpc = MockSamrRpc::new();
        let mut seq = Sequence::new();
        rpc.expect_close_handle()
            .with(eq(handle(2)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::Session("pipe closed".to_string())));
        rpc.expect_close_handle()
            .with(eq(handle(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut chain = HandleChain::default();
        chain.set_server(handle(1));
        chain.set_domain(handle(2));
        chain.release(&mut rpc).await;
    }

    #[tokio::test]
    async fn discarded_user_is_not_closed() {
        let mut rpc = MockSamrRpc::new();
        rpc.expect_close_handle()
            .with(eq(handle(1)))
            .times(1)
            .returning(|_| Ok(()));

        let mut chain = HandleChain::default();
        chain.set_server(handle(1));
        chain.set_user(handle(3));
        chain.discard_user();
        chain.release(&mut rpc).await;
    }
}
