use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

/// Authentication error message produced by an authenticator.
pub type AuthError = String;

/// One SASL exchange with the server. A fresh session is started per
/// connection; challenges are fed back until AUTH_SUCCESS.
#[async_trait]
pub trait AuthenticatorSession: Send + Sync {
    /// Produces a token answering a server challenge. The challenge
    /// payload is authentication-mechanism specific and may be absent.
    async fn evaluate_challenge(
        &mut self,
        token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError>;

    /// Handles the final AUTH_SUCCESS payload.
    async fn success(&mut self, token: Option<&[u8]>) -> Result<(), AuthError>;
}

/// Factory of [AuthenticatorSession]s, registered once per session via
/// `SessionConfig::authenticator`.
#[async_trait]
pub trait AuthenticatorProvider: Send + Sync {
    /// Returns the initial AUTH_RESPONSE token and a session driving
    /// the rest of the exchange. `authenticator_name` is the class name
    /// the server sent in AUTHENTICATE.
    async fn start_authentication_session(
        &self,
        authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError>;
}

struct PlainTextAuthenticatorSession;

#[async_trait]
impl AuthenticatorSession for PlainTextAuthenticatorSession {
    async fn evaluate_challenge(
        &mut self,
        _token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        Err("Challenges are not expected during plain text authentication".to_string())
    }

    async fn success(&mut self, _token: Option<&[u8]>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Username/password authentication, the mechanism of Cassandra's
/// `PasswordAuthenticator`.
pub struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl PlainTextAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        PlainTextAuthenticator {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthenticatorProvider for PlainTextAuthenticator {
    async fn start_authentication_session(
        &self,
        _authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError> {
        let mut response = BytesMut::new();
        response.put_u8(0);
        response.put_slice(self.username.as_bytes());
        response.put_u8(0);
        response.put_slice(self.password.as_bytes());

        Ok((
            Some(response.to_vec()),
            Box::new(PlainTextAuthenticatorSession),
        ))
    }
}
