//! External verification capabilities: pledge-target popularity and
//! abuse-challenge tokens.

use crate::error::Result;
use async_trait::async_trait;

/// Looks up how popular an external handle is (e.g. repository stars).
#[async_trait]
pub trait PopularityVerifier: Send + Sync {
    /// Popularity of `handle`. Errors mean the handle could not be verified.
    async fn popularity(&self, handle: &str) -> Result<u32>;
}

/// Verifies abuse-challenge tokens (reCAPTCHA and the like).
#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    /// Verify `token` for a request coming from `ip`.
    ///
    /// Returns the verification response, which is stored with the order.
    async fn verify(&self, token: &str, ip: Option<&str>) -> Result<serde_json::Value>;
}
