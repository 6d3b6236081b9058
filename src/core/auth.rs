//! Credential check
//!
//! The realtime and execution paths only need an accept/reject decision
//! before work starts; token issuance lives elsewhere.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::{AuthConfig, AuthMode};
use crate::error::{Error, Result};

/// Who a verified credential belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Stable subject label (never the credential itself)
    pub subject: String,
}

impl Principal {
    /// Principal used when authentication is disabled
    pub fn anonymous() -> Self {
        Principal {
            subject: "anonymous".to_string(),
        }
    }
}

/// Accept or reject a bearer credential
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `token`; `None` means the client sent no credential
    async fn verify(&self, token: Option<&str>) -> Result<Principal>;
}

/// Authenticator backed by the static token list from configuration
pub struct StaticTokenAuthenticator {
    mode: AuthMode,
    tokens: Vec<SecretString>,
}

impl StaticTokenAuthenticator {
    /// Create from configuration
    pub fn new(config: &AuthConfig) -> Self {
        StaticTokenAuthenticator {
            mode: config.mode,
            tokens: config.tokens.clone(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn verify(&self, token: Option<&str>) -> Result<Principal> {
        if self.mode == AuthMode::None {
            return Ok(Principal::anonymous());
        }

        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("missing token".to_string()))?;

        // Check every entry so timing does not reveal which one matched
        let mut matched = None;
        for (index, candidate) in self.tokens.iter().enumerate() {
            if constant_time_eq(candidate.expose_secret().as_bytes(), token.as_bytes()) {
                matched = Some(index);
            }
        }

        matched
            .map(|index| Principal {
                subject: format!("token-{}", index),
            })
            .ok_or_else(|| Error::Unauthorized("invalid token".to_string()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_config(tokens: &[&str]) -> AuthConfig {
        AuthConfig {
            mode: AuthMode::Token,
            tokens: tokens.iter().map(|t| SecretString::from(t.to_string())).collect(),
        }
    }

    #[tokio::test]
    async fn test_disabled_accepts_everything() {
        let auth = StaticTokenAuthenticator::new(&AuthConfig::default());
        assert_eq!(auth.verify(None).await.unwrap(), Principal::anonymous());
        assert_eq!(auth.verify(Some("anything")).await.unwrap(), Principal::anonymous());
    }

    #[tokio::test]
    async fn test_token_mode() {
        let auth = StaticTokenAuthenticator::new(&token_config(&["alpha", "beta"]));

        let principal = auth.verify(Some("beta")).await.unwrap();
        assert_eq!(principal.subject, "token-1");

        assert!(matches!(auth.verify(Some("gamma")).await, Err(Error::Unauthorized(_))));
        assert!(matches!(auth.verify(Some("")).await, Err(Error::Unauthorized(_))));
        assert!(matches!(auth.verify(None).await, Err(Error::Unauthorized(_))));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
