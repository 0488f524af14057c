//! SAMR over `ncacn_np`: DCE/RPC on a named pipe of an SMB2 `IPC$` tree.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::OsRng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use addcomputer_core::{Credentials, Error, Result, Sid};

use crate::crypto::encrypt_password_new;
use crate::dcerpc::{MessagePipe, RpcChannel};
use crate::messages::{self, DomainPage};
use crate::protocol::{CreatedUser, InterfaceId, RpcHandle, SamrRpc};
use crate::smb2::{netbios_session_request, FileId, Smb2Client};
use crate::transport::{RpcTransportFactory, TransportSettings};

const NETBIOS_SESSION_PORT: u16 = 139;

/// Called name a server accepts when it is reached by address.
const ANY_SMB_SERVER: &str = "*SMBSERVER";

/// Builds SAMR connections over SMB2 named pipes, authenticated with NTLM.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmbTransportFactory;

impl RpcTransportFactory for SmbTransportFactory {
    fn supports_credentials(&self) -> bool {
        true
    }

    fn create(&self, settings: &TransportSettings<'_>) -> Result<Box<dyn SamrRpc>> {
        if settings.kerberos.is_some() {
            return Err(Error::Session(
                "Kerberos is not available over the SMB transport; use --method LDAPS".to_string(),
            ));
        }
        let credentials = settings.credentials.ok_or_else(|| {
            Error::Session("the SMB transport needs credentials to authenticate".to_string())
        })?;
        Ok(Box::new(SmbSamrClient {
            target: SmbTarget {
                remote_host: settings.remote_host.clone(),
                remote_name: settings.remote_name.clone(),
                port: settings.port,
                pipe: pipe_name(&settings.binding)?,
                credentials: credentials.clone(),
                timeout: settings.timeout,
            },
            stub: None,
        }))
    }
}

#[derive(Debug)]
struct SmbTarget {
    remote_host: String,
    remote_name: String,
    port: u16,
    pipe: String,
    credentials: Credentials,
    timeout: Duration,
}

/// Pipe name from a binding such as `ncacn_np:dc01[\pipe\samr]`.
fn pipe_name(binding: &str) -> Result<String> {
    let endpoint = binding
        .split_once('[')
        .and_then(|(_, rest)| rest.strip_suffix(']'))
        .ok_or_else(|| Error::Session(format!("binding {binding} names no endpoint")))?;
    let name = endpoint
        .get(..6)
        .filter(|prefix| prefix.eq_ignore_ascii_case(r"\pipe\"))
        .map_or(endpoint, |_| &endpoint[6..]);
    if name.is_empty() {
        return Err(Error::Session(format!("binding {binding} names no pipe")));
    }
    Ok(name.to_string())
}

/// NetBIOS name to call on port 139.
fn called_name(remote_name: &str) -> &str {
    if remote_name.parse::<IpAddr>().is_ok() {
        ANY_SMB_SERVER
    } else {
        remote_name.split('.').next().unwrap_or(remote_name)
    }
}

/// An open pipe on an SMB2 session.
struct SmbPipe<S> {
    client: Smb2Client<S>,
    file: FileId,
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> MessagePipe for SmbPipe<S> {
    async fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.client.transceive(self.file, request).await
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        self.client.read(self.file).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SmbPipe<S> {
    async fn shutdown(mut self) -> Result<()> {
        let closed = self.client.close(self.file).await;
        let disconnected = self.client.disconnect().await;
        closed.and(disconnected)
    }
}

/// SAMR calls over a bound RPC channel.
struct SamrStub<P> {
    channel: RpcChannel<P>,
    session_key: Vec<u8>,
}

impl<P: MessagePipe> SamrStub<P> {
    const fn new(pipe: P, session_key: Vec<u8>) -> Self {
        Self {
            channel: RpcChannel::new(pipe),
            session_key,
        }
    }

    async fn connect_server(&mut self, server_name: &str, access: u32) -> Result<RpcHandle> {
        let request = messages::connect5_request(server_name, access)?;
        let reply = self.channel.call(messages::OP_CONNECT5, &request).await?;
        messages::connect5_response(&reply)
    }

    async fn enumerate_domains(&mut self, server: &RpcHandle) -> Result<Vec<String>> {
        let mut domains = Vec::new();
        let mut context = 0;
        loop {
            let request = messages::enumerate_domains_request(server, context);
            let reply = self
                .channel
                .call(messages::OP_ENUMERATE_DOMAINS, &request)
                .await?;
            let DomainPage {
                context: next,
                names,
                more,
            } = messages::enumerate_domains_response(&reply)?;
            domains.extend(names);
            if !more {
                return Ok(domains);
            }
            context = next;
        }
    }

    async fn lookup_domain(&mut self, server: &RpcHandle, name: &str) -> Result<Sid> {
        let request = messages::lookup_domain_request(server, name)?;
        let reply = self.channel.call(messages::OP_LOOKUP_DOMAIN, &request).await?;
        messages::lookup_domain_response(&reply)
    }

    async fn open_domain(
        &mut self,
        server: &RpcHandle,
        access: u32,
        domain: &Sid,
    ) -> Result<RpcHandle> {
        let request = messages::open_domain_request(server, access, domain);
        let reply = self.channel.call(messages::OP_OPEN_DOMAIN, &request).await?;
        messages::handle_response(&reply, "SamrOpenDomain")
    }

    async fn lookup_names(&mut self, domain: &RpcHandle, names: &[String]) -> Result<Vec<u32>> {
        let request = messages::lookup_names_request(domain, names)?;
        let reply = self.channel.call(messages::OP_LOOKUP_NAMES, &request).await?;
        messages::lookup_names_response(&reply)
    }

    async fn open_user(&mut self, domain: &RpcHandle, access: u32, rid: u32) -> Result<RpcHandle> {
        let request = messages::open_user_request(domain, access, rid);
        let reply = self.channel.call(messages::OP_OPEN_USER, &request).await?;
        messages::handle_response(&reply, "SamrOpenUser")
    }

    async fn create_user(
        &mut self,
        domain: &RpcHandle,
        name: &str,
        account_type: u32,
        access: u32,
    ) -> Result<CreatedUser> {
        let request = messages::create_user2_request(domain, name, account_type, access)?;
        let reply = self.channel.call(messages::OP_CREATE_USER2, &request).await?;
        let (handle, rid) = messages::create_user2_response(&reply)?;
        Ok(CreatedUser { handle, rid })
    }

    async fn delete_user(&mut self, user: &RpcHandle) -> Result<()> {
        let request = messages::handle_request(user);
        let reply = self.channel.call(messages::OP_DELETE_USER, &request).await?;
        messages::handle_response(&reply, "SamrDeleteUser").map(|_| ())
    }

    async fn set_password(&mut self, user: &RpcHandle, password: &str) -> Result<()> {
        let encrypted = encrypt_password_new(password, &self.session_key, &mut OsRng)?;
        let request = messages::set_password_request(user, &encrypted);
        let reply = self
            .channel
            .call(messages::OP_SET_INFORMATION_USER2, &request)
            .await?;
        messages::status_response(&reply, "SamrSetInformationUser2")
    }

    async fn set_account_control(&mut self, user: &RpcHandle, control: u32) -> Result<()> {
        let request = messages::set_account_control_request(user, control);
        let reply = self
            .channel
            .call(messages::OP_SET_INFORMATION_USER2, &request)
            .await?;
        messages::status_response(&reply, "SamrSetInformationUser2")
    }

    async fn close_handle(&mut self, handle: &RpcHandle) -> Result<()> {
        let request = messages::handle_request(handle);
        let reply = self.channel.call(messages::OP_CLOSE_HANDLE, &request).await?;
        messages::handle_response(&reply, "SamrCloseHandle").map(|_| ())
    }
}

/// SAMR client on one SMB2 connection; unusable until [`SamrRpc::connect`] succeeds.
struct SmbSamrClient {
    target: SmbTarget,
    stub: Option<SamrStub<SmbPipe<TcpStream>>>,
}

impl SmbSamrClient {
    fn stub(&mut self) -> Result<&mut SamrStub<SmbPipe<TcpStream>>> {
        self.stub
            .as_mut()
            .ok_or_else(|| Error::Session("SAMR pipe is not connected".to_string()))
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        let target = &self.target;
        let address = (target.remote_host.as_str(), target.port);
        let mut stream = tokio::time::timeout(target.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                Error::Session(format!(
                    "connection to {}:{} timed out after {:?}",
                    target.remote_host, target.port, target.timeout
                ))
            })?
            .map_err(|err| {
                Error::Session(format!(
                    "failed to connect to {}:{}: {err}",
                    target.remote_host, target.port
                ))
            })?;
        if target.port == NETBIOS_SESSION_PORT {
            tokio::time::timeout(
                target.timeout,
                netbios_session_request(&mut stream, called_name(&target.remote_name)),
            )
            .await
            .map_err(|_| Error::Session("NetBIOS session request timed out".to_string()))??;
        }
        Ok(stream)
    }
}

#[async_trait]
impl SamrRpc for SmbSamrClient {
    async fn connect(&mut self) -> Result<()> {
        let stream = self.open_stream().await?;
        let target = &self.target;
        let mut client = Smb2Client::new(stream, target.timeout);
        client.negotiate().await?;
        client.authenticate(&target.credentials).await?;
        client
            .tree_connect(&format!(r"\\{}\IPC$", target.remote_name))
            .await?;
        let file = client.open_pipe(&target.pipe).await?;
        let session_key = client.session_key().to_vec();
        info!(
            host = %target.remote_host,
            port = target.port,
            pipe = %target.pipe,
            "SMB named pipe opened"
        );
        self.stub = Some(SamrStub::new(SmbPipe { client, file }, session_key));
        Ok(())
    }

    async fn bind(&mut self, interface: InterfaceId) -> Result<()> {
        self.stub()?.channel.bind(interface).await
    }

    async fn connect_server(&mut self, server_name: &str, access: u32) -> Result<RpcHandle> {
        self.stub()?.connect_server(server_name, access).await
    }

    async fn enumerate_domains(&mut self, server: &RpcHandle) -> Result<Vec<String>> {
        self.stub()?.enumerate_domains(server).await
    }

    async fn lookup_domain(&mut self, server: &RpcHandle, name: &str) -> Result<Sid> {
        self.stub()?.lookup_domain(server, name).await
    }

    async fn open_domain(
        &mut self,
        server: &RpcHandle,
        access: u32,
        domain: &Sid,
    ) -> Result<RpcHandle> {
        self.stub()?.open_domain(server, access, domain).await
    }

    async fn lookup_names(&mut self, domain: &RpcHandle, names: &[String]) -> Result<Vec<u32>> {
        self.stub()?.lookup_names(domain, names).await
    }

    async fn open_user(
        &mut self,
        domain: &RpcHandle,
        access: u32,
        rid: u32,
    ) -> Result<RpcHandle> {
        self.stub()?.open_user(domain, access, rid).await
    }

    async fn create_user(
        &mut self,
        domain: &RpcHandle,
        name: &str,
        account_type: u32,
        access: u32,
    ) -> Result<CreatedUser> {
        self.stub()?
            .create_user(domain, name, account_type, access)
            .await
    }

    async fn delete_user(&mut self, user: &RpcHandle) -> Result<()> {
        self.stub()?.delete_user(user).await
    }

    async fn set_password(&mut self, user: &RpcHandle, password: &str) -> Result<()> {
        self.stub()?.set_password(user, password).await
    }

    async fn set_account_control(&mut self, user: &RpcHandle, control: u32) -> Result<()> {
        self.stub()?.set_account_control(user, control).await
    }

    async fn close_handle(&mut self, handle: &RpcHandle) -> Result<()> {
        self.stub()?.close_handle(handle).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self.stub.take() {
            Some(stub) => {
                debug!(host = %self.target.remote_host, "Closing SMB named pipe");
                stub.channel.into_pipe().shutdown().await
            }
            None => Ok(()),
        }
    }
}
