//! Minimal SMB 2.0.2/2.1 client for talking to a named pipe on `IPC$`.
//!
//! Messages are framed with the 4-byte direct-TCP header; on port 139 a NetBIOS session is
//! requested first. Requests are signed with HMAC-SHA256 when the server requires it.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use addcomputer_core::{Credentials, Error, Result};

use crate::ntlm::NtlmContext;
use crate::spnego;

const PROTOCOL_ID: [u8; 4] = [0xfe, b'S', b'M', b'B'];
const HEADER_LEN: usize = 64;
const SIGNATURE_RANGE: std::ops::Range<usize> = 48..64;

const NEGOTIATE: u16 = 0x0000;
const SESSION_SETUP: u16 = 0x0001;
const LOGOFF: u16 = 0x0002;
const TREE_CONNECT: u16 = 0x0003;
const TREE_DISCONNECT: u16 = 0x0004;
const CREATE: u16 = 0x0005;
const CLOSE: u16 = 0x0006;
const READ: u16 = 0x0008;
const IOCTL: u16 = 0x000b;

const FLAG_ASYNC: u32 = 0x0000_0002;
const FLAG_SIGNED: u32 = 0x0000_0008;

const DIALECT_202: u16 = 0x0202;
const DIALECT_210: u16 = 0x0210;

const SECURITY_SIGNING_ENABLED: u16 = 0x0001;
const SECURITY_SIGNING_REQUIRED: u16 = 0x0002;
const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
const SESSION_FLAG_IS_NULL: u16 = 0x0002;

const STATUS_SUCCESS: u32 = 0x0000_0000;
const STATUS_PENDING: u32 = 0x0000_0103;
const STATUS_BUFFER_OVERFLOW: u32 = 0x8000_0005;
const STATUS_MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
const STATUS_END_OF_FILE: u32 = 0xC000_0011;
const STATUS_PIPE_EMPTY: u32 = 0xC000_00D9;

const FSCTL_PIPE_TRANSCEIVE: u32 = 0x0011_C017;
const IOCTL_IS_FSCTL: u32 = 0x0000_0001;

/// `FILE_READ_DATA | FILE_WRITE_DATA | FILE_APPEND_DATA | FILE_READ_EA | FILE_WRITE_EA |
/// FILE_READ_ATTRIBUTES | FILE_WRITE_ATTRIBUTES | READ_CONTROL | SYNCHRONIZE`
const PIPE_ACCESS: u32 = 0x0012_019f;
const IMPERSONATION: u32 = 2;
const FILE_SHARE_READ_WRITE: u32 = 0x0000_0003;
const FILE_OPEN: u32 = 0x0000_0001;
const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;

const CREDITS_REQUESTED: u16 = 64;
const MAX_FRAME: usize = 0x00ff_ffff;

/// Largest chunk read back from the pipe at once.
const PIPE_CHUNK: u32 = 65_536;

const NETBIOS_SESSION_MESSAGE: u8 = 0x00;
const NETBIOS_SESSION_REQUEST: u8 = 0x81;
const NETBIOS_POSITIVE_RESPONSE: u8 = 0x82;
const NETBIOS_NEGATIVE_RESPONSE: u8 = 0x83;
const NETBIOS_KEEP_ALIVE: u8 = 0x85;

/// Server-side handle of an open file or pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileId([u8; 16]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestHeader {
    command: u16,
    message_id: u64,
    tree_id: u32,
    session_id: u64,
}

impl RequestHeader {
    fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&PROTOCOL_ID);
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.command.to_le_bytes());
        out.extend_from_slice(&CREDITS_REQUESTED.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.tree_id.to_le_bytes());
        out.extend_from_slice(&self.session_id.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResponseHeader {
    status: u32,
    command: u16,
    flags: u32,
    message_id: u64,
    tree_id: u32,
    session_id: u64,
}

impl ResponseHeader {
    fn decode(message: &[u8]) -> Result<Self> {
        if message.len() < HEADER_LEN || message[..4] != PROTOCOL_ID {
            return Err(Error::Session(
                "reply is not an SMB2 message".to_string(),
            ));
        }
        let flags = le_u32(message, 16);
        Ok(Self {
            status: le_u32(message, 8),
            command: le_u16(message, 12),
            flags,
            message_id: le_u64(message, 24),
            // async replies carry an async id where the tree id would be
            tree_id: if flags & FLAG_ASYNC == 0 {
                le_u32(message, 36)
            } else {
                0
            },
            session_id: le_u64(message, 40),
        })
    }
}

/// A reply with its header decoded; offsets inside the body are relative to the header.
#[derive(Debug)]
struct Response {
    header: ResponseHeader,
    message: Vec<u8>,
}

impl Response {
    fn body(&self) -> &[u8] {
        &self.message[HEADER_LEN..]
    }

    fn field_u16(&self, offset: usize) -> Result<u16> {
        self.body()
            .get(offset..offset + 2)
            .map(|raw| u16::from_le_bytes([raw[0], raw[1]]))
            .ok_or_else(|| self.truncated())
    }

    fn field_u32(&self, offset: usize) -> Result<u32> {
        self.body()
            .get(offset..offset + 4)
            .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .ok_or_else(|| self.truncated())
    }

    fn buffer(&self, offset: usize, len: usize) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        self.message
            .get(offset..offset + len)
            .ok_or_else(|| self.truncated())
    }

    fn require(&self, accepted: &[u32]) -> Result<()> {
        if accepted.contains(&self.header.status) {
            Ok(())
        } else {
            Err(Error::Session(format!(
                "{} failed: {}",
                command_name(self.header.command),
                status_name(self.header.status)
            )))
        }
    }

    fn truncated(&self) -> Error {
        Error::Session(format!(
            "truncated {} reply",
            command_name(self.header.command)
        ))
    }
}

/// Client side of one SMB2 connection.
pub(crate) struct Smb2Client<S> {
    stream: S,
    timeout: Duration,
    next_message_id: u64,
    session_id: u64,
    tree_id: u32,
    signing_required: bool,
    signing_key: Option<Vec<u8>>,
    session_key: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Smb2Client<S> {
    pub(crate) const fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream,
            timeout,
            next_message_id: 0,
            session_id: 0,
            tree_id: 0,
            signing_required: false,
            signing_key: None,
            session_key: Vec::new(),
        }
    }

    /// Key of the authenticated session, used by RPC calls that encrypt secrets.
    pub(crate) fn session_key(&self) -> &[u8] {
        &self.session_key
    }

    /// Agrees on SMB 2.0.2 or 2.1 and learns whether signing is mandatory.
    pub(crate) async fn negotiate(&mut self) -> Result<()> {
        let dialects = [DIALECT_202, DIALECT_210];
        let mut body = Vec::with_capacity(36 + 2 * dialects.len());
        body.extend_from_slice(&36u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&SECURITY_SIGNING_ENABLED.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        for dialect in dialects {
            body.extend_from_slice(&dialect.to_le_bytes());
        }

        let response = self.exchange(NEGOTIATE, &body).await?;
        response.require(&[STATUS_SUCCESS])?;
        let security_mode = response.field_u16(2)?;
        let dialect = response.field_u16(4)?;
        if dialect != DIALECT_202 && dialect != DIALECT_210 {
            return Err(Error::Session(format!(
                "server chose unsupported SMB dialect 0x{dialect:04x}"
            )));
        }
        self.signing_required = security_mode & SECURITY_SIGNING_REQUIRED != 0;
        debug!(
            dialect = format_args!("0x{dialect:04x}"),
            signing_required = self.signing_required,
            "SMB2 negotiated"
        );
        Ok(())
    }

    /// Runs the NTLM exchange in `SESSION_SETUP` round trips.
    pub(crate) async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let mut context = NtlmContext::new(credentials)?;
        let mut token = context.step(&[])?;
        loop {
            let response = self.exchange(SESSION_SETUP, &session_setup_body(&token)?).await?;
            self.session_id = response.header.session_id;
            match response.header.status {
                STATUS_MORE_PROCESSING_REQUIRED => {
                    let offset = usize::from(response.field_u16(4)?);
                    let len = usize::from(response.field_u16(6)?);
                    let challenge = spnego::ntlm_token(response.buffer(offset, len)?)?;
                    token = context.step(challenge)?;
                }
                STATUS_SUCCESS => {
                    let session_flags = response.field_u16(2)?;
                    let anonymous =
                        session_flags & (SESSION_FLAG_IS_GUEST | SESSION_FLAG_IS_NULL) != 0;
                    let mut key = context.session_key()?;
                    key.truncate(16);
                    if self.signing_required && !anonymous {
                        self.signing_key = Some(key.clone());
                    }
                    self.session_key = key;
                    debug!(session_id = self.session_id, anonymous, "SMB2 session established");
                    return Ok(());
                }
                _ => response.require(&[])?,
            }
        }
    }

    /// Connects to `\\server\share`.
    pub(crate) async fn tree_connect(&mut self, unc: &str) -> Result<()> {
        let path = utf16le(unc);
        let mut body = Vec::with_capacity(8 + path.len());
        body.extend_from_slice(&9u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&buffer_offset(8).to_le_bytes());
        body.extend_from_slice(&length_u16(path.len())?.to_le_bytes());
        body.extend_from_slice(&path);

        let response = self.exchange(TREE_CONNECT, &body).await?;
        response.require(&[STATUS_SUCCESS])?;
        self.tree_id = response.header.tree_id;
        debug!(%unc, tree_id = self.tree_id, "SMB2 tree connected");
        Ok(())
    }

    /// Opens a named pipe on the connected tree.
    pub(crate) async fn open_pipe(&mut self, name: &str) -> Result<FileId> {
        let name = utf16le(name);
        let mut body = Vec::with_capacity(56 + name.len());
        body.extend_from_slice(&57u16.to_le_bytes());
        body.push(0);
        body.push(0);
        body.extend_from_slice(&IMPERSONATION.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&PIPE_ACCESS.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&FILE_SHARE_READ_WRITE.to_le_bytes());
        body.extend_from_slice(&FILE_OPEN.to_le_bytes());
        body.extend_from_slice(&FILE_NON_DIRECTORY_FILE.to_le_bytes());
        body.extend_from_slice(&buffer_offset(56).to_le_bytes());
        body.extend_from_slice(&length_u16(name.len())?.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&name);

        let response = self.exchange(CREATE, &body).await?;
        response.require(&[STATUS_SUCCESS])?;
        let mut id = [0u8; 16];
        id.copy_from_slice(
            response
                .body()
                .get(64..80)
                .ok_or_else(|| response.truncated())?,
        );
        Ok(FileId(id))
    }

    /// Writes `input` to the pipe and returns the first part of the reply.
    pub(crate) async fn transceive(&mut self, file: FileId, input: &[u8]) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(56 + input.len());
        body.extend_from_slice(&57u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&FSCTL_PIPE_TRANSCEIVE.to_le_bytes());
        body.extend_from_slice(&file.0);
        body.extend_from_slice(&u32::from(buffer_offset(56)).to_le_bytes());
        body.extend_from_slice(&length_u32(input.len())?.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&PIPE_CHUNK.to_le_bytes());
        body.extend_from_slice(&IOCTL_IS_FSCTL.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(input);

        let response = self.exchange(IOCTL, &body).await?;
        response.require(&[STATUS_SUCCESS, STATUS_BUFFER_OVERFLOW])?;
        let offset = to_usize(response.field_u32(32)?);
        let len = to_usize(response.field_u32(36)?);
        Ok(response.buffer(offset, len)?.to_vec())
    }

    /// Reads whatever the pipe holds next; empty once the pipe has nothing left.
    pub(crate) async fn read(&mut self, file: FileId) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(49);
        body.extend_from_slice(&49u16.to_le_bytes());
        body.push(0x50);
        body.push(0);
        body.extend_from_slice(&PIPE_CHUNK.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&file.0);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.push(0);

        let response = self.exchange(READ, &body).await?;
        if matches!(
            response.header.status,
            STATUS_END_OF_FILE | STATUS_PIPE_EMPTY
        ) {
            return Ok(Vec::new());
        }
        response.require(&[STATUS_SUCCESS, STATUS_BUFFER_OVERFLOW])?;
        let offset = usize::from(response.body().get(2).copied().unwrap_or_default());
        let len = to_usize(response.field_u32(4)?);
        Ok(response.buffer(offset, len)?.to_vec())
    }

    pub(crate) async fn close(&mut self, file: FileId) -> Result<()> {
        let mut body = Vec::with_capacity(24);
        body.extend_from_slice(&24u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&file.0);
        self.exchange(CLOSE, &body).await?.require(&[STATUS_SUCCESS])
    }

    /// Leaves the tree and logs the session off.
    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        let body = [4u8, 0, 0, 0];
        if self.tree_id != 0 {
            self.exchange(TREE_DISCONNECT, &body)
                .await?
                .require(&[STATUS_SUCCESS])?;
            self.tree_id = 0;
        }
        if self.session_id != 0 {
            self.exchange(LOGOFF, &body).await?.require(&[STATUS_SUCCESS])?;
            self.session_id = 0;
        }
        self.stream.shutdown().await.map_err(io_error)
    }

    async fn exchange(&mut self, command: u16, body: &[u8]) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.round_trip(command, body))
            .await
            .map_err(|_| {
                Error::Session(format!(
                    "{} timed out after {:?}",
                    command_name(command),
                    self.timeout
                ))
            })?
    }

    async fn round_trip(&mut self, command: u16, body: &[u8]) -> Result<Response> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        let mut message = Vec::with_capacity(HEADER_LEN + body.len());
        RequestHeader {
            command,
            message_id,
            tree_id: self.tree_id,
            session_id: self.session_id,
        }
        .encode(&mut message);
        message.extend_from_slice(body);
        if let Some(key) = &self.signing_key {
            sign(&mut message, key)?;
        }
        trace!(command = command_name(command), message_id, "SMB2 request");
        write_frame(&mut self.stream, &message).await?;

        loop {
            let reply = read_frame(&mut self.stream).await?;
            let header = ResponseHeader::decode(&reply)?;
            if header.message_id != message_id {
                return Err(Error::Session(format!(
                    "SMB2 reply for message {} while waiting for {message_id}",
                    header.message_id
                )));
            }
            if header.status == STATUS_PENDING && header.flags & FLAG_ASYNC != 0 {
                continue;
            }
            return Ok(Response {
                header,
                message: reply,
            });
        }
    }
}

fn session_setup_body(token: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(24 + token.len());
    body.extend_from_slice(&25u16.to_le_bytes());
    body.push(0);
    body.push(SECURITY_SIGNING_ENABLED as u8);
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&buffer_offset(24).to_le_bytes());
    body.extend_from_slice(&length_u16(token.len())?.to_le_bytes());
    body.extend_from_slice(&0u64.to_le_bytes());
    body.extend_from_slice(token);
    Ok(body)
}

/// HMAC-SHA256 signature truncated to 16 bytes, computed with a zeroed signature field.
fn sign(message: &mut [u8], key: &[u8]) -> Result<()> {
    let flags = le_u32(message, 16) | FLAG_SIGNED;
    message[16..20].copy_from_slice(&flags.to_le_bytes());
    message[SIGNATURE_RANGE].fill(0);
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|err| Error::Session(format!("invalid SMB2 signing key: {err}")))?;
    mac.update(message);
    let digest = mac.finalize().into_bytes();
    message[SIGNATURE_RANGE].copy_from_slice(&digest[..16]);
    Ok(())
}

/// Offset from the header start of a buffer that follows `fixed` bytes of body.
const fn buffer_offset(fixed: u16) -> u16 {
    HEADER_LEN as u16 + fixed
}

fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn length_u16(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::Session(format!("SMB2 field of {len} bytes too long")))
}

fn length_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::Session(format!("SMB2 buffer of {len} bytes too long")))
}

fn to_usize(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn command_name(command: u16) -> &'static str {
    match command {
        NEGOTIATE => "NEGOTIATE",
        SESSION_SETUP => "SESSION_SETUP",
        LOGOFF => "LOGOFF",
        TREE_CONNECT => "TREE_CONNECT",
        TREE_DISCONNECT => "TREE_DISCONNECT",
        CREATE => "CREATE",
        CLOSE => "CLOSE",
        READ => "READ",
        IOCTL => "IOCTL",
        _ => "SMB2 command",
    }
}

fn status_name(status: u32) -> String {
    let name = match status {
        0xC000_0022 => "STATUS_ACCESS_DENIED",
        0xC000_006D => "STATUS_LOGON_FAILURE",
        0xC000_0072 => "STATUS_ACCOUNT_DISABLED",
        0xC000_0071 => "STATUS_PASSWORD_EXPIRED",
        0xC000_0234 => "STATUS_ACCOUNT_LOCKED_OUT",
        0xC000_0034 => "STATUS_OBJECT_NAME_NOT_FOUND",
        0xC000_00CC => "STATUS_BAD_NETWORK_NAME",
        0xC000_00BB => "STATUS_NOT_SUPPORTED",
        _ => return format!("status 0x{status:08x}"),
    };
    format!("{name} (0x{status:08x})")
}

fn io_error(err: std::io::Error) -> Error {
    Error::Session(format!("SMB transport: {err}"))
}

async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME {
        return Err(Error::Session(format!(
            "SMB2 message of {} bytes is too large",
            payload.len()
        )));
    }
    let len = payload.len().to_be_bytes();
    let header = [
        NETBIOS_SESSION_MESSAGE,
        len[len.len() - 3],
        len[len.len() - 2],
        len[len.len() - 1],
    ];
    stream.write_all(&header).await.map_err(io_error)?;
    stream.write_all(payload).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)
}

async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    loop {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.map_err(io_error)?;
        let len = (usize::from(header[1]) << 16)
            | (usize::from(header[2]) << 8)
            | usize::from(header[3]);
        match header[0] {
            NETBIOS_KEEP_ALIVE => continue,
            NETBIOS_SESSION_MESSAGE => {
                let mut payload = vec![0u8; len];
                stream.read_exact(&mut payload).await.map_err(io_error)?;
                return Ok(payload);
            }
            other => {
                return Err(Error::Session(format!(
                    "unexpected NetBIOS packet type 0x{other:02x}"
                )))
            }
        }
    }
}

/// First-level encoding of a NetBIOS name: padded to 15 characters, suffix byte appended,
/// each nibble mapped onto `A`..`P`.
fn encode_netbios_name(name: &str, suffix: u8) -> Vec<u8> {
    let mut raw = [b' '; 16];
    for (slot, byte) in raw.iter_mut().zip(name.bytes().take(15)) {
        *slot = byte.to_ascii_uppercase();
    }
    raw[15] = suffix;

    let mut encoded = Vec::with_capacity(34);
    encoded.push(32);
    for byte in raw {
        encoded.push(b'A' + (byte >> 4));
        encoded.push(b'A' + (byte & 0x0f));
    }
    encoded.push(0);
    encoded
}

/// Opens a NetBIOS session to `called` on port 139.
pub(crate) async fn netbios_session_request<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    called: &str,
) -> Result<()> {
    let mut names = encode_netbios_name(called, 0x20);
    names.extend(encode_netbios_name("ADDCOMPUTER", 0x00));
    let len = length_u16(names.len())?.to_be_bytes();

    let mut packet = vec![NETBIOS_SESSION_REQUEST, 0, len[0], len[1]];
    packet.extend_from_slice(&names);
    stream.write_all(&packet).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(io_error)?;
    match reply[0] {
        NETBIOS_POSITIVE_RESPONSE => Ok(()),
        NETBIOS_NEGATIVE_RESPONSE => {
            let mut code = [0u8; 1];
            stream.read_exact(&mut code).await.map_err(io_error)?;
            Err(Error::Session(format!(
                "NetBIOS session to {called} refused with code 0x{:02x}",
                code[0]
            )))
        }
        other => Err(Error::Session(format!(
            "unexpected NetBIOS session reply 0x{other:02x}"
        ))),
    }
}
