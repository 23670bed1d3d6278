//! Caller and per-attempt execution context

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Free-form operation parameters handed to the operation and to fallbacks
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Parameter key holding the image reference that fallbacks rewrite
pub const IMAGE_PARAM: &str = "image";

/// Caller-supplied context for one `execute_with_retry` invocation
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Cancelling this token aborts the retry loop at the next suspension point
    pub cancellation: CancellationToken,
    /// Correlation tags such as `request_id` and `session_id`, copied onto
    /// every attempt record
    pub tags: BTreeMap<String, String>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to an existing cancellation token
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation, tags: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Context passed to the operation for a single attempt
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub operation: String,
    /// 1-indexed attempt number
    pub attempt: u32,
    pub params: Parameters,
    /// Child of the caller token; cancelled when the attempt times out
    pub cancellation: CancellationToken,
    /// Instant after which the attempt is abandoned, if the policy sets one
    pub deadline: Option<Instant>,
}

impl AttemptContext {
    /// Time left before the attempt deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The `image` parameter, when present as a string
    pub fn image(&self) -> Option<&str> {
        self.params.get(IMAGE_PARAM).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for execution context.

    use super::*;

    /// Validates tag building and token sharing.
    #[test]
    fn test_operation_context_builder() {
        let token = CancellationToken::new();
        let ctx = OperationContext::with_cancellation(token.clone())
            .with_tag("request_id", "req-42")
            .with_tag("session_id", "sess-7");
        assert_eq!(ctx.tags.get("request_id").map(String::as_str), Some("req-42"));
        assert_eq!(ctx.tags.len(), 2);

        token.cancel();
        assert!(ctx.cancellation.is_cancelled());
    }

    /// Validates attempt helpers.
    #[tokio::test(start_paused = true)]
    async fn test_attempt_helpers() {
        let mut params = Parameters::new();
        params.insert(IMAGE_PARAM.into(), serde_json::json!("nginx:1.25"));
        let attempt = AttemptContext {
            operation: "docker_pull".into(),
            attempt: 1,
            params,
            cancellation: CancellationToken::new(),
            deadline: Some(Instant::now() + Duration::from_secs(5)),
        };
        assert_eq!(attempt.image(), Some("nginx:1.25"));
        assert_eq!(attempt.remaining(), Some(Duration::from_secs(5)));
    }
}
