//! NTLM client context for the SMB session, driven through `sspi`.

use sspi::builders::AcquireCredentialsHandleResult;
use sspi::{
    AuthIdentity, AuthIdentityBuffers, BufferType, ClientRequestFlags, CredentialUse,
    DataRepresentation, Ntlm, SecurityBuffer, SecurityStatus, Sspi, SspiImpl, Username,
};

use addcomputer_core::{AuthSecret, Credentials, Error, Result};
use secrecy::ExposeSecret;

/// One NTLM authentication exchange.
pub(crate) struct NtlmContext {
    ntlm: Ntlm,
    credentials: AcquireCredentialsHandleResult<Option<AuthIdentityBuffers>>,
}

impl NtlmContext {
    /// Prepares an exchange for `credentials`; a hash pair is handed to `sspi` in its
    /// NT-hash password form.
    pub(crate) fn new(credentials: &Credentials) -> Result<Self> {
        let password = match credentials.secret() {
            AuthSecret::Password(password) => password.expose_secret().to_string(),
            AuthSecret::Hashes(hashes) => hashes.as_ntlm_password().expose_secret().to_string(),
            AuthSecret::AesKey(_) => {
                return Err(Error::Session(
                    "an AES key needs Kerberos, which the SMB transport does not offer".to_string(),
                ))
            }
        };
        let username = Username::parse(&credentials.down_level_logon_name())
            .map_err(|err| Error::Configuration(format!("invalid NTLM user name: {err}")))?;
        let identity = AuthIdentity {
            username,
            password: password.into(),
        };

        let mut ntlm = Ntlm::new();
        let credentials = ntlm
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&identity)
            .execute(&mut ntlm)
            .map_err(sspi_error)?;
        Ok(Self { ntlm, credentials })
    }

    /// Produces the next token from the server's previous one (empty for the first call).
    pub(crate) fn step(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut input = vec![SecurityBuffer::new(input.to_vec(), BufferType::Token)];
        let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let mut builder = self
            .ntlm
            .initialize_security_context()
            .with_credentials_handle(&mut self.credentials.credentials_handle)
            .with_context_requirements(ClientRequestFlags::ALLOCATE_MEMORY)
            .with_target_data_representation(DataRepresentation::Native)
            .with_input(&mut input)
            .with_output(&mut output);
        let result = self
            .ntlm
            .initialize_security_context_impl(&mut builder)
            .map_err(sspi_error)?
            .resolve_to_result()
            .map_err(sspi_error)?;
        if matches!(
            result.status,
            SecurityStatus::CompleteNeeded | SecurityStatus::CompleteAndContinue
        ) {
            self.ntlm
                .complete_auth_token(&mut output)
                .map_err(sspi_error)?;
        }
        Ok(output.swap_remove(0).buffer)
    }

    /// Exported session key, available once the final token has been produced.
    pub(crate) fn session_key(&self) -> Result<Vec<u8>> {
        let keys = self.ntlm.query_context_session_key().map_err(sspi_error)?;
        Ok(keys.session_key.as_ref().clone())
    }
}

fn sspi_error(err: sspi::Error) -> Error {
    Error::Session(format!("NTLM: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use addcomputer_core::NtlmHashes;
    use secrecy::SecretString;

    const NTLMSSP: &[u8] = b"NTLMSSP\0";

    #[test]
    fn first_token_is_a_negotiate_message() {
        let credentials = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::Password(SecretString::from("Passw0rd")),
            false,
        );
        let mut context = NtlmContext::new(&credentials).unwrap();
        let token = context.step(&[]).unwrap();

        assert_eq!(&token[..8], NTLMSSP);
        assert_eq!(&token[8..12], &1u32.to_le_bytes());
        assert!(context.session_key().is_err());
    }

    #[test]
    fn hashes_are_accepted() {
        let credentials = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::Hashes(NtlmHashes::parse(":31d6cfe0d16ae931b73c59d7e0c089c0").unwrap()),
            false,
        );
        let mut context = NtlmContext::new(&credentials).unwrap();
        assert_eq!(&context.step(&[]).unwrap()[..8], NTLMSSP);
    }

    #[test]
    fn aes_key_is_refused() {
        let credentials = Credentials::new(
            "alice",
            "corp.local",
            AuthSecret::AesKey(SecretString::from("00".repeat(16))),
            true,
        );
        assert!(matches!(
            NtlmContext::new(&credentials),
            Err(Error::Session(_))
        ));
    }
}
