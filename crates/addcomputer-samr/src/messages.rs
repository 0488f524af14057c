//! Request and response stubs of the SAMR calls the engine makes.

use addcomputer_core::{Error, Result, Sid};

use crate::crypto::ENCRYPTED_PASSWORD_NEW_LEN;
use crate::ndr::{count_u32, NdrReader, NdrWriter};
use crate::protocol::{
    RpcHandle, STATUS_ACCESS_DENIED, STATUS_DS_MACHINE_ACCOUNT_QUOTA_EXCEEDED, STATUS_NONE_MAPPED,
};

pub(crate) const OP_CLOSE_HANDLE: u16 = 1;
pub(crate) const OP_LOOKUP_DOMAIN: u16 = 5;
pub(crate) const OP_ENUMERATE_DOMAINS: u16 = 6;
pub(crate) const OP_OPEN_DOMAIN: u16 = 7;
pub(crate) const OP_LOOKUP_NAMES: u16 = 17;
pub(crate) const OP_OPEN_USER: u16 = 34;
pub(crate) const OP_DELETE_USER: u16 = 35;
pub(crate) const OP_CREATE_USER2: u16 = 50;
pub(crate) const OP_SET_INFORMATION_USER2: u16 = 58;
pub(crate) const OP_CONNECT5: u16 = 64;

/// More entries remain to be enumerated.
pub(crate) const STATUS_MORE_ENTRIES: u32 = 0x0000_0105;

const USER_CONTROL_INFORMATION: u16 = 16;
const USER_INTERNAL4_INFORMATION_NEW: u16 = 25;

/// `SAMPR_USER_ALL_INFORMATION` is 196 bytes; `WhichFields` sits at offset 172.
const USER_ALL_INFORMATION_LEN: usize = 196;
const WHICH_FIELDS_OFFSET: usize = 172;
const USER_ALL_NTPASSWORDPRESENT: u32 = 0x0100_0000;
const USER_ALL_PASSWORDEXPIRED: u32 = 0x0800_0000;

/// Upper bound the server accepts for names per lookup.
const LOOKUP_NAMES_MAX: u32 = 1000;

/// Splits the trailing NTSTATUS from a response and fails on error severities.
fn checked<'a>(stub: &'a [u8], call: &str) -> Result<NdrReader<'a>> {
    let split = stub
        .len()
        .checked_sub(4)
        .ok_or_else(|| Error::Session(format!("{call} response has no status")))?;
    let (body, status) = stub.split_at(split);
    let status = u32::from_le_bytes([status[0], status[1], status[2], status[3]]);
    if status >= 0x8000_0000 {
        return Err(Error::RpcProtocol {
            status,
            message: format!("{call}: {}", status_name(status)),
        });
    }
    Ok(NdrReader::new(body))
}

fn status_name(status: u32) -> &'static str {
    match status {
        STATUS_ACCESS_DENIED => "STATUS_ACCESS_DENIED",
        STATUS_NONE_MAPPED => "STATUS_NONE_MAPPED",
        STATUS_DS_MACHINE_ACCOUNT_QUOTA_EXCEEDED => "STATUS_DS_MACHINE_ACCOUNT_QUOTA_EXCEEDED",
        0xC000_0008 => "STATUS_INVALID_HANDLE",
        0xC000_000D => "STATUS_INVALID_PARAMETER",
        0xC000_0063 => "STATUS_USER_EXISTS",
        0xC000_0064 => "STATUS_NO_SUCH_USER",
        0xC000_006C => "STATUS_PASSWORD_RESTRICTION",
        0xC000_00DF => "STATUS_NO_SUCH_DOMAIN",
        _ => "unrecognised status",
    }
}

pub(crate) fn connect5_request(server_name: &str, access: u32) -> Result<Vec<u8>> {
    let mut stub = NdrWriter::default();
    stub.unique_wide_string(server_name)?;
    stub.u32(access);
    // InVersion 1, revision info v1 {Revision 3, SupportedFeatures 0}
    stub.u32(1);
    stub.u32(1);
    stub.u32(3);
    stub.u32(0);
    Ok(stub.into_bytes())
}

pub(crate) fn connect5_response(stub: &[u8]) -> Result<RpcHandle> {
    let mut reader = checked(stub, "SamrConnect5")?;
    let _out_version = reader.u32()?;
    let _tag = reader.u32()?;
    let _revision = reader.u32()?;
    let _features = reader.u32()?;
    reader.handle()
}

pub(crate) fn enumerate_domains_request(server: &RpcHandle, context: u32) -> Vec<u8> {
    let mut stub = NdrWriter::default();
    stub.handle(server);
    stub.u32(context);
    stub.u32(u32::MAX);
    stub.into_bytes()
}

/// One page of domain names; `more` is set while the server holds further entries.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DomainPage {
    pub(crate) context: u32,
    pub(crate) names: Vec<String>,
    pub(crate) more: bool,
}

pub(crate) fn enumerate_domains_response(stub: &[u8]) -> Result<DomainPage> {
    let more = stub.len() >= 4 && stub[stub.len() - 4..] == STATUS_MORE_ENTRIES.to_le_bytes();
    let mut reader = checked(stub, "SamrEnumerateDomainsInSamServer")?;
    let context = reader.u32()?;
    let mut names = Vec::new();
    if reader.u32()? != 0 {
        let entries = reader.u32()?;
        if reader.u32()? != 0 {
            let _max = reader.u32()?;
            let mut bodies = Vec::new();
            for _ in 0..entries {
                let _rid = reader.u32()?;
                bodies.push(reader.unicode_string_header()?.1);
            }
            for has_body in bodies {
                if has_body {
                    names.push(reader.unicode_string_body()?);
                }
            }
        }
    }
    Ok(DomainPage {
        context,
        names,
        more,
    })
}

pub(crate) fn lookup_domain_request(server: &RpcHandle, name: &str) -> Result<Vec<u8>> {
    let mut stub = NdrWriter::default();
    stub.handle(server);
    stub.unicode_string(name)?;
    Ok(stub.into_bytes())
}

pub(crate) fn lookup_domain_response(stub: &[u8]) -> Result<Sid> {
    let mut reader = checked(stub, "SamrLookupDomainInSamServer")?;
    if reader.u32()? == 0 {
        return Err(Error::Session(
            "SamrLookupDomainInSamServer returned no SID".to_string(),
        ));
    }
    reader.sid()
}

pub(crate) fn open_domain_request(server: &RpcHandle, access: u32, domain: &Sid) -> Vec<u8> {
    let mut stub = NdrWriter::default();
    stub.handle(server);
    stub.u32(access);
    stub.sid(domain);
    stub.into_bytes()
}

pub(crate) fn lookup_names_request(domain: &RpcHandle, names: &[String]) -> Result<Vec<u8>> {
    let count = count_u32(names.len())?;
    if count > LOOKUP_NAMES_MAX {
        return Err(Error::Configuration(format!(
            "cannot look up more than {LOOKUP_NAMES_MAX} names at once"
        )));
    }
    let mut stub = NdrWriter::default();
    stub.handle(domain);
    stub.u32(count);
    stub.u32(LOOKUP_NAMES_MAX);
    stub.u32(0);
    stub.u32(count);
    for name in names {
        stub.unicode_string_header(name)?;
    }
    for name in names {
        stub.unicode_string_body(name)?;
    }
    Ok(stub.into_bytes())
}

pub(crate) fn lookup_names_response(stub: &[u8]) -> Result<Vec<u32>> {
    let mut reader = checked(stub, "SamrLookupNamesInDomain")?;
    let count = reader.u32()?;
    let mut rids = Vec::new();
    if reader.u32()? != 0 {
        let max = reader.u32()?;
        if max != count {
            return Err(Error::Session(format!(
                "SamrLookupNamesInDomain returned {max} RIDs for a count of {count}"
            )));
        }
        for _ in 0..count {
            rids.push(reader.u32()?);
        }
    }
    Ok(rids)
}

pub(crate) fn open_user_request(domain: &RpcHandle, access: u32, rid: u32) -> Vec<u8> {
    let mut stub = NdrWriter::default();
    stub.handle(domain);
    stub.u32(access);
    stub.u32(rid);
    stub.into_bytes()
}

/// Response of every call that returns only a context handle.
pub(crate) fn handle_response(stub: &[u8], call: &str) -> Result<RpcHandle> {
    checked(stub, call)?.handle()
}

pub(crate) fn create_user2_request(
    domain: &RpcHandle,
    name: &str,
    account_type: u32,
    access: u32,
) -> Result<Vec<u8>> {
    let mut stub = NdrWriter::default();
    stub.handle(domain);
    stub.unicode_string(name)?;
    stub.u32(account_type);
    stub.u32(access);
    Ok(stub.into_bytes())
}

/// Handle and RID of the created account.
pub(crate) fn create_user2_response(stub: &[u8]) -> Result<(RpcHandle, u32)> {
    let mut reader = checked(stub, "SamrCreateUser2InDomain")?;
    let handle = reader.handle()?;
    let _granted = reader.u32()?;
    let rid = reader.u32()?;
    Ok((handle, rid))
}

/// Request of every call that takes only a context handle.
pub(crate) fn handle_request(handle: &RpcHandle) -> Vec<u8> {
    let mut stub = NdrWriter::default();
    stub.handle(handle);
    stub.into_bytes()
}

pub(crate) fn set_account_control_request(user: &RpcHandle, control: u32) -> Vec<u8> {
    let mut stub = NdrWriter::default();
    stub.handle(user);
    stub.u16(USER_CONTROL_INFORMATION);
    stub.u16(USER_CONTROL_INFORMATION);
    stub.u32(control);
    stub.into_bytes()
}

pub(crate) fn set_password_request(
    user: &RpcHandle,
    encrypted: &[u8; ENCRYPTED_PASSWORD_NEW_LEN],
) -> Vec<u8> {
    let mut all = [0u8; USER_ALL_INFORMATION_LEN];
    all[WHICH_FIELDS_OFFSET..WHICH_FIELDS_OFFSET + 4].copy_from_slice(
        &(USER_ALL_NTPASSWORDPRESENT | USER_ALL_PASSWORDEXPIRED).to_le_bytes(),
    );

    let mut stub = NdrWriter::default();
    stub.handle(user);
    stub.u16(USER_INTERNAL4_INFORMATION_NEW);
    stub.u16(USER_INTERNAL4_INFORMATION_NEW);
    stub.align(4);
    stub.bytes(&all);
    stub.bytes(encrypted);
    stub.into_bytes()
}

/// Response of calls that return nothing but a status.
pub(crate) fn status_response(stub: &[u8], call: &str) -> Result<()> {
    checked(stub, call).map(|_| ())
}
