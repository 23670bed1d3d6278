//! Integration tests for the error module
//!
//! Exercises `CommonError` construction, classification and the conversion
//! macros from the point of view of a downstream crate.

#![cfg(feature = "foundation")]

use std::time::Duration;

use shipyard_common::error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
use shipyard_common::{impl_error_classification, impl_error_conversion};

/// Module error in the shape downstream crates declare
#[derive(Debug, thiserror::Error)]
enum PullError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("manifest unknown for {image}")]
    ManifestUnknown { image: String },

    #[error("registry throttled")]
    Throttled { retry_in: Duration },
}

impl_error_conversion!(PullError, Common);
impl_error_classification!(PullError, Common,
    Self::ManifestUnknown { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::Throttled { retry_in } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
        retry_after: Some(*retry_in),
    }
);

fn parse_manifest(raw: &str) -> Result<serde_json::Value, PullError> {
    Ok(serde_json::from_str(raw)?)
}

/// Validates that module errors delegate classification to `CommonError`.
///
/// Assertions:
/// - Confirms a wrapped timeout is retryable with warning severity.
/// - Confirms a wrapped internal error is critical.
#[test]
fn test_delegated_classification() {
    let timeout = PullError::from(CommonError::timeout("docker_pull", Duration::from_secs(30)));
    assert!(timeout.is_retryable());
    assert_eq!(timeout.severity(), ErrorSeverity::Warning);
    assert!(!timeout.is_critical());
    assert_eq!(timeout.to_string(), "Operation 'docker_pull' timed out after 30s");

    let internal = PullError::from(CommonError::internal("state corrupted"));
    assert!(internal.is_critical());
    assert_eq!(internal.severity(), ErrorSeverity::Critical);
}

/// Validates module-specific classification arms.
///
/// Assertions:
/// - Confirms `retry_after` comes from the variant when declared.
/// - Confirms variants without `retry_after` fall through to `None`.
#[test]
fn test_variant_classification() {
    let throttled = PullError::Throttled { retry_in: Duration::from_secs(5) };
    assert!(throttled.is_retryable());
    assert_eq!(throttled.retry_after(), Some(Duration::from_secs(5)));

    let unknown = PullError::ManifestUnknown { image: "nginx:9".into() };
    assert!(!unknown.is_retryable());
    assert_eq!(unknown.retry_after(), None);
    assert_eq!(unknown.to_string(), "manifest unknown for nginx:9");
}

/// Validates the conversions generated by `impl_error_conversion!`.
#[test]
fn test_generated_conversions() {
    let err = parse_manifest("{not json").unwrap_err();
    assert!(matches!(err, PullError::Common(CommonError::Serialization { .. })));
    assert!(err.to_string().starts_with("Serialization error (JSON)"));

    let io: PullError = std::io::Error::other("disk full").into();
    assert!(matches!(io, PullError::Common(CommonError::Persistence { .. })));

    let toml_err = toml::from_str::<toml::Table>("= broken").unwrap_err();
    let converted: PullError = toml_err.into();
    assert!(converted.to_string().starts_with("Serialization error (TOML)"));
}

/// Validates `CommonError` display for the helpers downstream code uses most.
#[test]
fn test_common_error_display() {
    let cases = [
        (CommonError::config("missing policies"), "Configuration error: missing policies"),
        (
            CommonError::config_field("base_delay", "must be positive"),
            "Configuration error in field 'base_delay': must be positive",
        ),
        (
            CommonError::validation_with_value("jitter_range", "must be in [0, 1]", "1.5"),
            "Validation error for field 'jitter_range' (value: '1.5'): must be in [0, 1]",
        ),
        (CommonError::not_found_with_id("Circuit breaker", "standard"), "Circuit breaker not found: 'standard'"),
        (
            CommonError::persistence_op("write_history", "disk full"),
            "Persistence error during 'write_history': disk full",
        ),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

/// Validates severity ordering and retry hints used for alerting.
#[test]
fn test_severity_and_retry_hints() {
    assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
    assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
    assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");

    let timeout = CommonError::timeout("registry", Duration::from_secs(10));
    assert!(timeout.is_retryable());
    assert_eq!(timeout.retry_after(), None);

    let invalid: CommonResult<()> = Err(CommonError::validation("max_attempts", "must be >= 1"));
    let err = invalid.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(err.error_type_name(), "validation");
}
