//! Actor and sender verification seams.
//!
//! Credential mechanics live outside this crate; the pipeline only needs an
//! actor id for a credential ([`IdentityVerifier`]) and a yes/no on whether a
//! push delivery really came from the broker ([`PushVerifier`]).

use std::collections::HashMap;

use async_trait::async_trait;
use subtle::ConstantTimeEq;

use crate::channel::Delivery;
use crate::error::AuthError;

pub type ActorId = String;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<ActorId, AuthError>;
}

/// Fixed token → actor table. Used by the CLI and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, ActorId>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, actor: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), actor.into());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<ActorId, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        self.tokens
            .iter()
            .find(|(token, _)| bool::from(token.as_bytes().ct_eq(credential.as_bytes())))
            .map(|(_, actor)| actor.clone())
            .ok_or(AuthError::InvalidCredential)
    }
}

/// Authenticates the sender of a push delivery before its payload is trusted.
pub trait PushVerifier: Send + Sync {
    fn verify(&self, delivery: &Delivery) -> Result<(), AuthError>;
}

/// Accepts deliveries carrying the configured shared token.
pub struct SharedSecretPushVerifier {
    token: String,
}

impl SharedSecretPushVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl PushVerifier for SharedSecretPushVerifier {
    fn verify(&self, delivery: &Delivery) -> Result<(), AuthError> {
        let presented = delivery
            .push_token
            .as_deref()
            .ok_or(AuthError::UntrustedSender)?;
        if self.token.is_empty() || !bool::from(presented.as_bytes().ct_eq(self.token.as_bytes())) {
            return Err(AuthError::UntrustedSender);
        }
        Ok(())
    }
}

/// For in-process channels where the sender is the same process.
pub struct TrustLocalPushVerifier;

impl PushVerifier for TrustLocalPushVerifier {
    fn verify(&self, _delivery: &Delivery) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(token: Option<&str>) -> Delivery {
        Delivery {
            delivery_id: "d".into(),
            message_id: "m".into(),
            attempt: 1,
            payload: Vec::new(),
            push_token: token.map(String::from),
        }
    }

    #[tokio::test]
    async fn static_tokens_resolve_actor() {
        let v = StaticTokenVerifier::new().with_token("tok-alice", "alice");
        assert_eq!(v.verify("tok-alice").await.unwrap(), "alice");
        assert_eq!(v.verify("tok-bob").await, Err(AuthError::InvalidCredential));
        assert_eq!(v.verify("  ").await, Err(AuthError::MissingCredential));
    }

    #[test]
    fn shared_secret_checks_token() {
        let v = SharedSecretPushVerifier::new("s3cret");
        assert!(v.verify(&delivery(Some("s3cret"))).is_ok());
        assert_eq!(
            v.verify(&delivery(Some("nope"))),
            Err(AuthError::UntrustedSender)
        );
        assert_eq!(v.verify(&delivery(None)), Err(AuthError::UntrustedSender));
    }

    #[test]
    fn empty_secret_trusts_nobody() {
        let v = SharedSecretPushVerifier::new("");
        assert!(v.verify(&delivery(Some(""))).is_err());
    }
}
