//! External reasoning service used by the router to pick tools.
pub mod gemini;

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use gemini::GeminiClient;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReasoningError {
    /// 429 or an explicit quota/resource-exhausted reply.
    #[error("quota exceeded: {0}")]
    Quota(String),
    /// Transport failure, timeout or 5xx.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ReasoningError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReasoningError::Unavailable(_))
    }
}

/// Whether an error body reads like a quota failure.
pub fn is_quota_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("resource_exhausted") || lower.contains("quota")
}

pub trait ReasoningService: Send + Sync {
    fn model_name(&self) -> &str;
    /// Completion for `prompt`, cut before the first of `stop`.
    fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String, ReasoningError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, initial_delay_ms: 500, max_delay_ms: 8_000, backoff_multiplier: 2.0 }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((base as u64).min(self.max_delay_ms))
    }
}

/// Retries transient failures with exponential backoff. Quota and
/// rejection errors are returned on the first occurrence.
pub struct RetryingReasoner<R: ReasoningService> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: ReasoningService> RetryingReasoner<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<R: ReasoningService> ReasoningService for RetryingReasoner<R> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String, ReasoningError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt, stop) {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying reasoning request"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedReasoner;

    fn fast() -> RetryPolicy {
        RetryPolicy { max_retries: 2, initial_delay_ms: 1, max_delay_ms: 2, backoff_multiplier: 2.0 }
    }

    #[test]
    fn quota_detection() {
        assert!(is_quota_message(r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#));
        assert!(is_quota_message("You exceeded your current Quota"));
        assert!(!is_quota_message("internal error"));
    }

    #[test]
    fn transient_failures_are_retried() {
        let script = ScriptedReasoner::new(vec![
            Err(ReasoningError::Unavailable("503".into())),
            Ok("Final Answer: ok".into()),
        ]);
        let retrying = RetryingReasoner::new(script.clone(), fast());
        assert_eq!(retrying.complete("p", &[]).expect("retried"), "Final Answer: ok");
        assert_eq!(script.prompts().len(), 2);
    }

    #[test]
    fn quota_is_not_retried() {
        let script = ScriptedReasoner::new(vec![Err(ReasoningError::Quota("429".into())), Ok("never".into())]);
        let retrying = RetryingReasoner::new(script.clone(), fast());
        assert_eq!(retrying.complete("p", &[]), Err(ReasoningError::Quota("429".into())));
        assert_eq!(script.prompts().len(), 1);
    }

    #[test]
    fn retries_are_bounded() {
        let script = ScriptedReasoner::new(vec![Err(ReasoningError::Unavailable("down".into())); 5]);
        let retrying = RetryingReasoner::new(script.clone(), fast());
        assert!(retrying.complete("p", &[]).is_err());
        assert_eq!(script.prompts().len(), 3);
    }
}
