//! Stream Credentials and Login Handshake
//!
//! Both Alpaca streams expect the client to log in right after the socket
//! opens and drop it after [`AUTH_TIMEOUT`] otherwise. The exchange:
//!
//! ```text
//! server: [{"T":"success","msg":"connected"}]        (greeting, optional)
//! client: {"action":"auth","key":"...","secret":"..."}
//! server: [{"T":"success","msg":"authenticated"}]    or an error frame
//! ```
//!
//! A rejected login ends the session; the reconnect loop dials again.

use std::time::Duration;

use thiserror::Error;

use super::messages::{AuthRequest, ErrorMessage, SuccessKind, SuccessMessage};

/// Deadline for the `authenticated` reply.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Login failures, one per documented upstream code.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// 401: a request arrived before login.
    #[error("stream rejected request sent before login (401)")]
    NotAuthenticated,

    /// 402: key or secret rejected.
    #[error("stream rejected API key or secret (402)")]
    InvalidCredentials,

    /// 403: login sent twice on one socket.
    #[error("stream session already logged in (403)")]
    AlreadyAuthenticated,

    /// 404, or no reply before [`AUTH_TIMEOUT`].
    #[error("stream login timed out")]
    Timeout,

    /// 406: account is over its connection allowance.
    #[error("stream connection limit reached (406)")]
    ConnectionLimitExceeded,

    /// Empty key or secret in configuration.
    #[error("unusable credentials: {0}")]
    InvalidInput(String),

    /// Any other error code.
    #[error("stream login error {code}: {message}")]
    ServerError {
        /// Upstream code.
        code: i32,
        /// Upstream text.
        message: String,
    },
}

impl From<&ErrorMessage> for AuthError {
    fn from(err: &ErrorMessage) -> Self {
        match err.code {
            401 => Self::NotAuthenticated,
            402 => Self::InvalidCredentials,
            403 => Self::AlreadyAuthenticated,
            404 => Self::Timeout,
            406 => Self::ConnectionLimitExceeded,
            code => Self::ServerError {
                code,
                message: err.msg.clone(),
            },
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// API key pair shared by the streams and the REST clients.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Build a key pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidInput`] when either half is blank.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        let secret = secret.into();

        for (name, value) in [("key", &key), ("secret", &secret)] {
            if value.trim().is_empty() {
                return Err(AuthError::InvalidInput(format!("API {name} is blank")));
            }
        }

        Ok(Self { key, secret })
    }

    /// Key id, sent as `APCA-API-KEY-ID`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Secret, sent as `APCA-API-SECRET-KEY`.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Login action carrying this pair.
    #[must_use]
    pub fn to_auth_request(&self) -> AuthRequest {
        AuthRequest::new(self.key.clone(), self.secret.clone())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Where one socket is in the login exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Nothing sent.
    #[default]
    Idle,
    /// Login sent, no verdict yet.
    Pending,
    /// `authenticated` received.
    Accepted,
    /// Error frame received.
    Rejected,
}

/// Login bookkeeping for a single socket.
#[derive(Debug)]
pub struct AuthHandler {
    credentials: Credentials,
    state: AuthState,
}

impl AuthHandler {
    /// Start idle.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: AuthState::Idle,
        }
    }

    /// Current handshake state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Produce the login action and mark it pending.
    #[must_use]
    pub fn begin(&mut self) -> AuthRequest {
        self.state = AuthState::Pending;
        self.credentials.to_auth_request()
    }

    /// Feed a success frame; `true` once logged in. The greeting is ignored.
    pub fn accept(&mut self, msg: &SuccessMessage) -> bool {
        if let SuccessKind::Authenticated = msg.msg {
            self.state = AuthState::Accepted;
        }
        matches!(self.state, AuthState::Accepted)
    }

    /// Feed an error frame and return the mapped failure.
    pub fn reject(&mut self, msg: &ErrorMessage) -> AuthError {
        self.state = AuthState::Rejected;
        AuthError::from(msg)
    }
}
