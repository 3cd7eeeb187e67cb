//! Credentials for the tabular query service.
//!
//! A [`Credential`] is an opaque, possibly time-limited token. It never
//! appears in logs; use [`Credential::fingerprint`] to correlate requests.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised by a [`CredentialProvider`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The provider cannot mint a fresh credential.
    #[error("credential refresh is not supported by this provider")]
    RefreshUnsupported,

    /// The identity provider rejected the refresh.
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

/// A bearer-style token sent in the service's auth header.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<SystemTime>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: SystemTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Raw token, for the auth header only.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| at <= SystemTime::now())
            .unwrap_or(false)
    }

    /// First 12 hex digits of the token's SHA-256.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.token.as_bytes());
        digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Re-authentication hook consulted when the service rejects a credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Mint a fresh credential to replace `stale`.
    async fn refresh(&self, stale: &Credential) -> Result<Credential, AuthError>;
}

/// A provider that only ever hands back one fixed token.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    credential: Credential,
}

impl StaticCredential {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn refresh(&self, stale: &Credential) -> Result<Credential, AuthError> {
        if stale == &self.credential {
            return Err(AuthError::RefreshUnsupported);
        }
        Ok(self.credential.clone())
    }
}
