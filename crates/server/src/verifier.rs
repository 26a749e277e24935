//! Bearer assertions verified by an external identity provider.

use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

/// Subject of a verified assertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedSubject {
    pub subject: String,
    pub expires_at: Option<OffsetDateTime>,
}

/// Checks bearer credentials that are not stored tokens.
///
/// Returns `None` for anything it does not recognize or cannot verify.
#[async_trait]
pub trait BearerVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<VerifiedSubject>;
}

/// Fixed table of accepted assertions, for tests and local setups.
#[derive(Clone, Debug, Default)]
pub struct StaticVerifier {
    subjects: HashMap<String, VerifiedSubject>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: impl Into<String>, subject: VerifiedSubject) -> Self {
        self.subjects.insert(token.into(), subject);
        self
    }
}

#[async_trait]
impl BearerVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Option<VerifiedSubject> {
        let subject = self.subjects.get(token)?;
        match subject.expires_at {
            Some(exp) if OffsetDateTime::now_utc() >= exp => None,
            _ => Some(subject.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn test_static_verifier_rejects_unknown_and_expired() {
        let now = OffsetDateTime::now_utc();
        let verifier = StaticVerifier::new()
            .with(
                "live",
                VerifiedSubject {
                    subject: "alice".to_string(),
                    expires_at: Some(now + Duration::hours(1)),
                },
            )
            .with(
                "stale",
                VerifiedSubject {
                    subject: "bob".to_string(),
                    expires_at: Some(now - Duration::seconds(1)),
                },
            );

        assert_eq!(verifier.verify("live").await.unwrap().subject, "alice");
        assert!(verifier.verify("stale").await.is_none());
        assert!(verifier.verify("other").await.is_none());
    }
}
