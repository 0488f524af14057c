//! Unwrapping the NTLM token from a SPNEGO `NegTokenResp`.
//!
//! Tokens are sent to the server as bare NTLMSSP messages, which the negotiate package accepts;
//! a server may still answer inside SPNEGO, so replies are unwrapped when needed.

use addcomputer_core::{Error, Result};

const NTLMSSP_SIGNATURE: &[u8] = b"NTLMSSP\0";
const NEG_TOKEN_RESP: u8 = 0xa1;
const SEQUENCE: u8 = 0x30;
const RESPONSE_TOKEN: u8 = 0xa2;
const OCTET_STRING: u8 = 0x04;

/// Returns the NTLM message carried by `token`, which may already be bare.
pub(crate) fn ntlm_token(token: &[u8]) -> Result<&[u8]> {
    if token.starts_with(NTLMSSP_SIGNATURE) {
        return Ok(token);
    }
    let (tag, resp, _) = element(token)?;
    if tag != NEG_TOKEN_RESP {
        return Err(malformed(format!("unexpected tag 0x{tag:02x}")));
    }
    let (tag, mut fields, _) = element(resp)?;
    if tag != SEQUENCE {
        return Err(malformed(format!("expected SEQUENCE, got 0x{tag:02x}")));
    }
    while !fields.is_empty() {
        let (tag, content, rest) = element(fields)?;
        if tag == RESPONSE_TOKEN {
            let (tag, inner, _) = element(content)?;
            if tag != OCTET_STRING {
                return Err(malformed("responseToken is not an OCTET STRING".to_string()));
            }
            return Ok(inner);
        }
        fields = rest;
    }
    Err(malformed("no responseToken".to_string()))
}

/// Splits one DER element into tag, content and what follows.
fn element(input: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input
        .split_first()
        .ok_or_else(|| malformed("empty element".to_string()))?;
    let (&first, rest) = rest
        .split_first()
        .ok_or_else(|| malformed("missing length".to_string()))?;

    let (len, rest) = if first & 0x80 == 0 {
        (usize::from(first), rest)
    } else {
        let octets = usize::from(first & 0x7f);
        if octets == 0 || octets > 4 || rest.len() < octets {
            return Err(malformed(format!("bad length form 0x{first:02x}")));
        }
        let len = rest[..octets]
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte));
        (len, &rest[octets..])
    };
    if rest.len() < len {
        return Err(malformed(format!(
            "element of {len} bytes with {} left",
            rest.len()
        )));
    }
    Ok((tag, &rest[..len], &rest[len..]))
}

fn malformed(reason: String) -> Error {
    Error::Session(format!("malformed SPNEGO token: {reason}"))
}
