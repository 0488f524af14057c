//! Connection-oriented DCE/RPC v5 over a message pipe.
//!
//! Only what a client of a single interface needs: one presentation context negotiated with
//! `BIND`, `REQUEST` calls, and response reassembly across fragments.

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::{uuid, Uuid};

use addcomputer_core::{Error, Result};

use crate::ndr::count_u32;
use crate::protocol::InterfaceId;

const RPC_VERSION: u8 = 5;
const HEADER_LEN: usize = 16;
const REQUEST_HEADER_LEN: usize = HEADER_LEN + 8;
const RESPONSE_HEADER_LEN: usize = HEADER_LEN + 8;

const PTYPE_REQUEST: u8 = 0;
const PTYPE_RESPONSE: u8 = 2;
const PTYPE_FAULT: u8 = 3;
const PTYPE_BIND: u8 = 11;
const PTYPE_BIND_ACK: u8 = 12;
const PTYPE_BIND_NAK: u8 = 13;

const PFC_FIRST_FRAG: u8 = 0x01;
const PFC_LAST_FRAG: u8 = 0x02;

/// Little-endian integers, ASCII characters, IEEE floats.
const DATA_REPRESENTATION: [u8; 4] = [0x10, 0, 0, 0];

/// Largest fragment either side will send.
pub(crate) const MAX_FRAGMENT: u16 = 4280;

/// NDR 2.0 transfer syntax.
const NDR_SYNTAX: Uuid = uuid!("8a885d04-1ceb-11c9-9fe8-08002b104860");
const NDR_SYNTAX_VERSION: u32 = 2;

/// A byte pipe carrying whole RPC messages in each direction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait MessagePipe: Send {
    /// Writes one message and returns the first chunk of the reply.
    async fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>>;
    /// Reads the next chunk of a reply that did not fit in the previous one.
    async fn read(&mut self) -> Result<Vec<u8>>;
}

/// Fields common to every PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    ptype: u8,
    flags: u8,
    frag_length: u16,
    call_id: u32,
}

impl Header {
    fn encode(self, out: &mut Vec<u8>) {
        out.push(RPC_VERSION);
        out.push(0);
        out.push(self.ptype);
        out.push(self.flags);
        out.extend_from_slice(&DATA_REPRESENTATION);
        out.extend_from_slice(&self.frag_length.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.call_id.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Session(format!(
                "RPC PDU of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        if bytes[0] != RPC_VERSION {
            return Err(Error::Session(format!(
                "unsupported RPC version {}.{}",
                bytes[0], bytes[1]
            )));
        }
        if bytes[4] & 0xf0 != DATA_REPRESENTATION[0] {
            return Err(Error::Session(
                "big-endian RPC responses are not supported".to_string(),
            ));
        }
        Ok(Self {
            ptype: bytes[2],
            flags: bytes[3],
            frag_length: u16::from_le_bytes([bytes[8], bytes[9]]),
            call_id: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }
}

fn bind_pdu(interface: InterfaceId, call_id: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(56);
    body.extend_from_slice(&MAX_FRAGMENT.to_le_bytes());
    body.extend_from_slice(&MAX_FRAGMENT.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    // one presentation context, id 0, one transfer syntax
    body.extend_from_slice(&[1, 0, 0, 0]);
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&[1, 0]);
    body.extend_from_slice(&interface.uuid.to_bytes_le());
    body.extend_from_slice(&interface.major.to_le_bytes());
    body.extend_from_slice(&interface.minor.to_le_bytes());
    body.extend_from_slice(&NDR_SYNTAX.to_bytes_le());
    body.extend_from_slice(&NDR_SYNTAX_VERSION.to_le_bytes());

    let mut pdu = Vec::with_capacity(HEADER_LEN + body.len());
    Header {
        ptype: PTYPE_BIND,
        flags: PFC_FIRST_FRAG | PFC_LAST_FRAG,
        // fixed size, well below u16::MAX
        frag_length: 72,
        call_id,
    }
    .encode(&mut pdu);
    pdu.extend_from_slice(&body);
    pdu
}

/// Checks the single presentation result of a `BIND_ACK`.
fn check_bind_ack(pdu: &[u8]) -> Result<()> {
    let header = Header::decode(pdu)?;
    match header.ptype {
        PTYPE_BIND_ACK => {}
        PTYPE_BIND_NAK => {
            let reason = pdu
                .get(HEADER_LEN..HEADER_LEN + 2)
                .map_or(0, |raw| u16::from_le_bytes([raw[0], raw[1]]));
            return Err(Error::Session(format!(
                "RPC bind rejected, reason {reason}"
            )));
        }
        other => {
            return Err(Error::Session(format!(
                "expected BIND_ACK, got PDU type {other}"
            )))
        }
    }

    let truncated = || Error::Session("truncated BIND_ACK".to_string());
    let secondary = HEADER_LEN + 8;
    let addr_len = pdu
        .get(secondary..secondary + 2)
        .map(|raw| usize::from(u16::from_le_bytes([raw[0], raw[1]])))
        .ok_or_else(truncated)?;
    let mut offset = secondary + 2 + addr_len;
    offset += (4 - offset % 4) % 4;
    let results = pdu.get(offset..offset + 8).ok_or_else(truncated)?;
    if results[0] == 0 {
        return Err(truncated());
    }
    let result = u16::from_le_bytes([results[4], results[5]]);
    let reason = u16::from_le_bytes([results[6], results[7]]);
    if result != 0 {
        return Err(Error::Session(format!(
            "RPC presentation context rejected: result {result}, reason {reason}"
        )));
    }
    Ok(())
}

fn request_pdu(call_id: u32, opnum: u16, stub: &[u8]) -> Result<Vec<u8>> {
    let frag_length = u16::try_from(REQUEST_HEADER_LEN + stub.len())
        .ok()
        .filter(|len| *len <= MAX_FRAGMENT)
        .ok_or_else(|| {
            Error::Session(format!(
                "RPC request of {} bytes does not fit in one fragment",
                stub.len()
            ))
        })?;

    let mut pdu = Vec::with_capacity(usize::from(frag_length));
    Header {
        ptype: PTYPE_REQUEST,
        flags: PFC_FIRST_FRAG | PFC_LAST_FRAG,
        frag_length,
        call_id,
    }
    .encode(&mut pdu);
    pdu.extend_from_slice(&count_u32(stub.len())?.to_le_bytes());
    pdu.extend_from_slice(&0u16.to_le_bytes());
    pdu.extend_from_slice(&opnum.to_le_bytes());
    pdu.extend_from_slice(stub);
    Ok(pdu)
}

/// Reassembles response fragments into one stub.
#[derive(Debug, Default)]
struct Reassembly {
    pending: Vec<u8>,
    stub: Vec<u8>,
}

impl Reassembly {
    /// Consumes whole PDUs from `chunk`; returns true once the last fragment has arrived.
    fn feed(&mut self, chunk: &[u8], call_id: u32) -> Result<bool> {
        self.pending.extend_from_slice(chunk);
        loop {
            if self.pending.len() < HEADER_LEN {
                return Ok(false);
            }
            let header = Header::decode(&self.pending)?;
            let frag_length = usize::from(header.frag_length);
            if frag_length < RESPONSE_HEADER_LEN {
                return Err(Error::Session(format!(
                    "RPC fragment length {frag_length} is too short"
                )));
            }
            if self.pending.len() < frag_length {
                return Ok(false);
            }
            let pdu: Vec<u8> = self.pending.drain(..frag_length).collect();
            if header.call_id != call_id {
                return Err(Error::Session(format!(
                    "RPC response for call {} while waiting for {call_id}",
                    header.call_id
                )));
            }
            match header.ptype {
                PTYPE_RESPONSE => {
                    self.stub.extend_from_slice(&pdu[RESPONSE_HEADER_LEN..]);
                    if header.flags & PFC_LAST_FRAG != 0 {
                        return Ok(true);
                    }
                }
                PTYPE_FAULT => {
                    let status = pdu
                        .get(24..28)
                        .map_or(0, |raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
                    return Err(Error::RpcProtocol {
                        status,
                        message: "RPC fault".to_string(),
                    });
                }
                other => {
                    return Err(Error::Session(format!(
                        "unexpected RPC PDU type {other} in response"
                    )))
                }
            }
        }
    }
}

/// A DCE/RPC association bound to one interface.
pub(crate) struct RpcChannel<P> {
    pipe: P,
    call_id: u32,
}

impl<P: MessagePipe> RpcChannel<P> {
    pub(crate) const fn new(pipe: P) -> Self {
        Self { pipe, call_id: 1 }
    }

    /// Negotiates the NDR presentation context for `interface`.
    pub(crate) async fn bind(&mut self, interface: InterfaceId) -> Result<()> {
        let call_id = self.next_call_id();
        let reply = self.pipe.transact(&bind_pdu(interface, call_id)).await?;
        check_bind_ack(&reply)?;
        debug!(interface = %interface.uuid, "RPC interface bound");
        Ok(())
    }

    /// Invokes `opnum` and returns the reassembled response stub.
    pub(crate) async fn call(&mut self, opnum: u16, stub: &[u8]) -> Result<Vec<u8>> {
        let call_id = self.next_call_id();
        trace!(opnum, call_id, len = stub.len(), "RPC request");
        let request = request_pdu(call_id, opnum, stub)?;

        let mut reassembly = Reassembly::default();
        let mut chunk = self.pipe.transact(&request).await?;
        while !reassembly.feed(&chunk, call_id)? {
            chunk = self.pipe.read().await?;
            if chunk.is_empty() {
                return Err(Error::Session(
                    "pipe closed in the middle of an RPC response".to_string(),
                ));
            }
        }
        Ok(reassembly.stub)
    }

    pub(crate) fn into_pipe(self) -> P {
        self.pipe
    }

    fn next_call_id(&mut self) -> u32 {
        let id = self.call_id;
        self.call_id = self.call_id.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SAMR_INTERFACE;
    use mockall::Sequence;

    fn response(call_id: u32, flags: u8, stub: &[u8]) -> Vec<u8> {
        let mut pdu = Vec::new();
        Header {
            ptype: PTYPE_RESPONSE,
            flags,
            frag_length: u16::try_from(RESPONSE_HEADER_LEN + stub.len()).unwrap(),
            call_id,
        }
        .encode(&mut pdu);
        pdu.extend_from_slice(&u32::try_from(stub.len()).unwrap().to_le_bytes());
        pdu.extend_from_slice(&[0, 0, 0, 0]);
        pdu.extend_from_slice(stub);
        pdu
    }

    fn bind_ack(result: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&MAX_FRAGMENT.to_le_bytes());
        body.extend_from_slice(&MAX_FRAGMENT.to_le_bytes());
        body.extend_from_slice(&0x1234u32.to_le_bytes());
        body.extend_from_slice(&13u16.to_le_bytes());
        body.extend_from_slice(b"\\PIPE\\lsass\0");
        // pad header (16) + 8 + 2 + 13 = 39 up to 40
        body.push(0);
        body.extend_from_slice(&[1, 0, 0, 0]);
        body.extend_from_slice(&result.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&NDR_SYNTAX.to_bytes_le());
        body.extend_from_slice(&NDR_SYNTAX_VERSION.to_le_bytes());

        let mut pdu = Vec::new();
        Header {
            ptype: PTYPE_BIND_ACK,
            flags: PFC_FIRST_FRAG | PFC_LAST_FRAG,
            frag_length: u16::try_from(HEADER_LEN + body.len()).unwrap(),
            call_id: 1,
        }
        .encode(&mut pdu);
        pdu.extend_from_slice(&body);
        pdu
    }

    #[test]
    fn bind_carries_interface_and_ndr() {
        let pdu = bind_pdu(SAMR_INTERFACE, 1);
        assert_eq!(pdu.len(), 72);
        assert_eq!(&pdu[..4], &[5, 0, PTYPE_BIND, 3]);
        assert_eq!(&pdu[8..10], &72u16.to_le_bytes());
        assert_eq!(&pdu[32..48], &SAMR_INTERFACE.uuid.to_bytes_le());
        assert_eq!(&pdu[48..52], &[1, 0, 0, 0]);
        assert_eq!(&pdu[52..68], &NDR_SYNTAX.to_bytes_le());
        assert_eq!(&pdu[68..], &[2, 0, 0, 0]);
    }

    #[test]
    fn bind_ack_result_is_checked() {
        assert!(check_bind_ack(&bind_ack(0)).is_ok());
        assert!(matches!(
            check_bind_ack(&bind_ack(2)),
            Err(Error::Session(message)) if message.contains("rejected")
        ));
    }

    #[test]
    fn request_header_and_size_limit() {
        let pdu = request_pdu(7, 64, &[0xaa; 8]).unwrap();
        assert_eq!(pdu[2], PTYPE_REQUEST);
        assert_eq!(&pdu[8..10], &32u16.to_le_bytes());
        assert_eq!(&pdu[12..16], &7u32.to_le_bytes());
        assert_eq!(&pdu[16..20], &8u32.to_le_bytes());
        assert_eq!(&pdu[22..24], &64u16.to_le_bytes());

        assert!(request_pdu(8, 1, &vec![0; usize::from(MAX_FRAGMENT)]).is_err());
    }

    #[test]
    fn fault_carries_status() {
        let mut pdu = response(3, PFC_FIRST_FRAG | PFC_LAST_FRAG, &[0, 0, 0, 0]);
        pdu[2] = PTYPE_FAULT;
        pdu[24..28].copy_from_slice(&0x1c01_0002u32.to_le_bytes());

        let err = Reassembly::default().feed(&pdu, 3).unwrap_err();
        assert_eq!(err.rpc_status(), Some(0x1c01_0002));
    }

    #[tokio::test]
    async fn call_reads_remaining_fragments() {
        let mut pipe = MockMessagePipe::new();
        let mut seq = Sequence::new();

        // first fragment split across the transact reply and a read
        let first = response(1, PFC_FIRST_FRAG, b"abcd");
        let (head, tail) = first.split_at(10);
        let (head, tail) = (head.to_vec(), tail.to_vec());
        pipe.expect_transact()
            .withf(|request: &[u8]| request[2] == PTYPE_REQUEST && request[22] == 17)
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(head));
        pipe.expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move || Ok(tail));
        pipe.expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(response(1, PFC_LAST_FRAG, b"efgh")));

        let mut channel = RpcChannel::new(pipe);
        let stub = channel.call(17, &[1, 2, 3, 4]).await.unwrap();
        assert_eq!(stub, b"abcdefgh");
    }

    #[tokio::test]
    async fn mismatched_call_id_is_rejected() {
        let mut pipe = MockMessagePipe::new();
        pipe.expect_transact()
            .times(1)
            .return_once(|_| Ok(response(9, PFC_FIRST_FRAG | PFC_LAST_FRAG, b"")));

        let err = RpcChannel::new(pipe).call(1, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Session(message) if message.contains("call 9")));
    }
}
