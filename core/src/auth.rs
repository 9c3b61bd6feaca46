//! Request authentication.
//!
//! Credential acquisition is left to the host application; an
//! `Authenticator` only decorates an already-built request. It runs once per
//! logical call, so every retry attempt carries the same credentials.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::AuthError;
use crate::http::{self, HttpRequest};

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &mut HttpRequest) -> Result<(), AuthError>;
}

/// Sends requests unauthenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn authenticate(&self, _request: &mut HttpRequest) -> Result<(), AuthError> {
        Ok(())
    }
}

/// `Authorization: Bearer <token>` with a token obtained elsewhere.
#[derive(Clone)]
pub struct BearerTokenAuthenticator {
    token: String,
}

impl BearerTokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for BearerTokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenAuthenticator")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Authenticator for BearerTokenAuthenticator {
    fn authenticate(&self, request: &mut HttpRequest) -> Result<(), AuthError> {
        if self.token.trim().is_empty() {
            return Err(AuthError("bearer token is empty".to_string()));
        }
        request.set_header(http::AUTHORIZATION, format!("Bearer {}", self.token));
        Ok(())
    }
}

/// HTTP basic authentication.
#[derive(Clone)]
pub struct BasicAuthenticator {
    username: String,
    password: String,
}

impl BasicAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthenticator")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, request: &mut HttpRequest) -> Result<(), AuthError> {
        if self.username.is_empty() {
            return Err(AuthError("username is empty".to_string()));
        }
        if self.username.contains(':') {
            return Err(AuthError("username must not contain ':'".to_string()));
        }
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        request.set_header(http::AUTHORIZATION, format!("Basic {encoded}"));
        Ok(())
    }
}
