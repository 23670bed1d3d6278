//! Fallback handler capability and the built-in strategies
//!
//! Every strategy kind implements [`FallbackHandler`]. The built-ins rewrite
//! the `image` parameter of container operations or report a degraded
//! success; custom kinds are registered on the engine by name.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shipyard_common::error::CommonError;
use shipyard_common::impl_error_conversion;
use shipyard_common::resilience::ErrorCategory;
use thiserror::Error;
use tracing::info;

use super::chain::FallbackStrategy;
use crate::context::{Parameters, IMAGE_PARAM};

/// Reasons a fallback strategy or chain did not produce a result
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("no fallback chain available for operation '{0}'")]
    NoChain(String),

    #[error("fallback chain '{0}' is disabled")]
    ChainDisabled(String),

    #[error("{0} parameter required")]
    MissingParameter(&'static str),

    #[error("no variant mapping found for image: {0}")]
    NoVariant(String),

    #[error("no cached image available for: {0}")]
    NotCached(String),

    #[error("fallback handler '{0}' is not registered")]
    UnknownHandler(String),

    #[error("fallback strategy '{strategy}' timed out after {timeout:?}")]
    TimedOut { strategy: String, timeout: Duration },

    #[error("fallback cancelled")]
    Cancelled,

    #[error("all fallback strategies failed for operation '{0}'")]
    Exhausted(String),

    #[error("{0}")]
    Failed(String),
}

impl_error_conversion!(FallbackError, Common);

/// Everything a handler may inspect about the failed invocation
#[derive(Debug, Clone, Copy)]
pub struct FallbackRequest<'a> {
    pub operation: &'a str,
    pub strategy: &'a FallbackStrategy,
    pub params: &'a Parameters,
    /// Rendered last error of the retry loop
    pub last_error: &'a str,
    pub category: ErrorCategory,
    /// Attempts made by the invocation before falling back
    pub attempts: u32,
}

impl FallbackRequest<'_> {
    /// The `image` parameter, required by the image-rewriting strategies
    ///
    /// # Errors
    /// Returns [`FallbackError::MissingParameter`] if it is absent or not a
    /// string.
    pub fn image(&self) -> Result<&str, FallbackError> {
        self.params
            .get(IMAGE_PARAM)
            .and_then(serde_json::Value::as_str)
            .ok_or(FallbackError::MissingParameter(IMAGE_PARAM))
    }
}

/// Substitute outcome produced by a successful fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResult {
    /// Name of the strategy that produced this result
    pub strategy: String,
    /// Strategy kind label, e.g. `registry_switch`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitute_image: Option<String>,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: Parameters,
}

impl FallbackResult {
    /// Empty result of the given kind; the orchestrator fills in `strategy`
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            strategy: String::new(),
            kind: kind.into(),
            original_image: None,
            substitute_image: None,
            degraded: false,
            message: None,
            details: Parameters::new(),
        }
    }

    /// Result that replaces `original` with `substitute`
    pub fn substitute(
        kind: impl Into<String>,
        original: impl Into<String>,
        substitute: impl Into<String>,
    ) -> Self {
        Self {
            original_image: Some(original.into()),
            substitute_image: Some(substitute.into()),
            ..Self::new(kind)
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Capability implemented by every fallback strategy kind
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Try to absorb the failure described by `request`
    async fn execute(&self, request: &FallbackRequest<'_>) -> Result<FallbackResult, FallbackError>;
}

/// Point the image reference at another registry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySwitch {
    pub alternative_registry: String,
}

impl RegistrySwitch {
    pub fn new(alternative_registry: impl Into<String>) -> Self {
        Self { alternative_registry: alternative_registry.into() }
    }

    /// Replace the registry host of `image`, or prefix one if it has none
    pub fn rewrite(&self, image: &str) -> String {
        let registry = self.alternative_registry.trim_end_matches('/');
        match image.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => format!("{registry}/{rest}"),
            _ => format!("{registry}/{image}"),
        }
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

#[async_trait]
impl FallbackHandler for RegistrySwitch {
    async fn execute(&self, request: &FallbackRequest<'_>) -> Result<FallbackResult, FallbackError> {
        if self.alternative_registry.trim().is_empty() {
            return Err(FallbackError::MissingParameter("alternative_registry"));
        }
        let image = request.image()?;
        let rewritten = self.rewrite(image);

        info!(original_image = image, fallback_image = %rewritten, "Switching to alternative registry");

        Ok(FallbackResult::substitute("registry_switch", image, rewritten)
            .with_detail("alternative_registry", json!(self.alternative_registry)))
    }
}

/// Swap a base-image token for a configured variant
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageVariant {
    /// Substring of the image reference mapped to its replacement
    pub variant_mapping: BTreeMap<String, String>,
}

impl ImageVariant {
    pub fn new<I, K, V>(mapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { variant_mapping: mapping.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    /// First mapping (in key order) whose token occurs in `image`
    pub fn rewrite(&self, image: &str) -> Option<String> {
        self.variant_mapping
            .iter()
            .find(|(base, _)| !base.is_empty() && image.contains(base.as_str()))
            .map(|(base, variant)| image.replacen(base.as_str(), variant, 1))
    }
}

#[async_trait]
impl FallbackHandler for ImageVariant {
    async fn execute(&self, request: &FallbackRequest<'_>) -> Result<FallbackResult, FallbackError> {
        let image = request.image()?;
        let variant =
            self.rewrite(image).ok_or_else(|| FallbackError::NoVariant(image.to_string()))?;

        info!(original_image = image, variant_image = %variant, "Using image variant fallback");

        Ok(FallbackResult::substitute("image_variant", image, variant))
    }
}

fn default_cached_images() -> Vec<String> {
    ["nginx:latest", "alpine:latest", "ubuntu:latest"].map(String::from).to_vec()
}

/// Substitute an image known to be available locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedImage {
    #[serde(default = "default_cached_images")]
    pub cached_images: Vec<String>,
}

impl Default for CachedImage {
    fn default() -> Self {
        Self { cached_images: default_cached_images() }
    }
}

impl CachedImage {
    /// First cached image whose repository name occurs in `image`
    pub fn lookup(&self, image: &str) -> Option<&str> {
        self.cached_images
            .iter()
            .map(String::as_str)
            .find(|cached| {
                let repository = cached.split(':').next().unwrap_or(cached);
                !repository.is_empty() && image.contains(repository)
            })
    }
}

#[async_trait]
impl FallbackHandler for CachedImage {
    async fn execute(&self, request: &FallbackRequest<'_>) -> Result<FallbackResult, FallbackError> {
        let image = request.image()?;
        let cached =
            self.lookup(image).ok_or_else(|| FallbackError::NotCached(image.to_string()))?;

        info!(original_image = image, cached_image = cached, "Using cached image fallback");

        Ok(FallbackResult::substitute("cached_image", image, cached))
    }
}

fn default_degraded_message() -> String {
    "Operation completed in degraded mode".to_string()
}

/// Report a synthetic success so the caller can continue with reduced
/// functionality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedMode {
    #[serde(default = "default_degraded_message")]
    pub message: String,
}

impl Default for DegradedMode {
    fn default() -> Self {
        Self { message: default_degraded_message() }
    }
}

#[async_trait]
impl FallbackHandler for DegradedMode {
    async fn execute(&self, request: &FallbackRequest<'_>) -> Result<FallbackResult, FallbackError> {
        info!(operation = request.operation, "Operating in degraded mode");

        Ok(FallbackResult {
            original_image: request.image().ok().map(str::to_string),
            degraded: true,
            message: Some(self.message.clone()),
            ..FallbackResult::new("degraded_mode")
        }
        .with_detail("status", json!("degraded")))
    }
}

/// Strategy dispatched to a handler registered on the engine under `handler`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAction {
    pub handler: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: Parameters,
}

#[cfg(test)]
mod tests {
    //! Unit tests for the built-in fallback handlers.

    use super::super::chain::{FallbackAction, FallbackStrategy};
    use super::*;

    fn params(image: Option<&str>) -> Parameters {
        let mut params = Parameters::new();
        if let Some(image) = image {
            params.insert(IMAGE_PARAM.into(), json!(image));
        }
        params
    }

    fn request<'a>(strategy: &'a FallbackStrategy, params: &'a Parameters) -> FallbackRequest<'a> {
        FallbackRequest {
            operation: "docker_pull",
            strategy,
            params,
            last_error: "network unreachable",
            category: ErrorCategory::Network,
            attempts: 3,
        }
    }

    /// Validates registry host detection in `RegistrySwitch::rewrite`.
    ///
    /// Assertions:
    /// - Confirms hosts with a dot, a port or `localhost` are replaced.
    /// - Confirms bare and namespaced Docker Hub references are prefixed.
    #[test]
    fn test_registry_rewrite() {
        let switch = RegistrySwitch::new("mirror.gcr.io/");
        assert_eq!(switch.rewrite("ghcr.io/acme/api:1.2"), "mirror.gcr.io/acme/api:1.2");
        assert_eq!(switch.rewrite("localhost:5000/app"), "mirror.gcr.io/app");
        assert_eq!(switch.rewrite("localhost/app"), "mirror.gcr.io/app");
        assert_eq!(switch.rewrite("nginx:latest"), "mirror.gcr.io/nginx:latest");
        assert_eq!(switch.rewrite("library/nginx"), "mirror.gcr.io/library/nginx");
    }

    /// Validates registry switch results and parameter checks.
    #[tokio::test]
    async fn test_registry_switch_execute() {
        let switch = RegistrySwitch::new("docker.io");
        let strategy =
            FallbackStrategy::new("alt", FallbackAction::RegistrySwitch(switch.clone()));

        let with_image = params(Some("quay.io/org/app:2"));
        let result = switch.execute(&request(&strategy, &with_image)).await.unwrap();
        assert_eq!(result.kind, "registry_switch");
        assert_eq!(result.original_image.as_deref(), Some("quay.io/org/app:2"));
        assert_eq!(result.substitute_image.as_deref(), Some("docker.io/org/app:2"));
        assert!(!result.degraded);

        let without_image = params(None);
        let err = switch.execute(&request(&strategy, &without_image)).await.unwrap_err();
        assert_eq!(err.to_string(), "image parameter required");

        let empty = RegistrySwitch::default();
        let err = empty.execute(&request(&strategy, &with_image)).await.unwrap_err();
        assert_eq!(err.to_string(), "alternative_registry parameter required");
    }

    /// Validates image variant substitution.
    ///
    /// Assertions:
    /// - Confirms only the first occurrence of the token is replaced.
    /// - Confirms unmapped images fail with the image in the message.
    #[tokio::test]
    async fn test_image_variant() {
        let variant = ImageVariant::new([("ubuntu", "alpine"), ("centos", "alpine")]);
        assert_eq!(variant.rewrite("ubuntu:22.04-ubuntu").as_deref(), Some("alpine:22.04-ubuntu"));

        let strategy = FallbackStrategy::new("variant", FallbackAction::ImageVariant(variant.clone()));
        let unmapped = params(Some("debian:12"));
        let err = variant.execute(&request(&strategy, &unmapped)).await.unwrap_err();
        assert_eq!(err.to_string(), "no variant mapping found for image: debian:12");
    }

    /// Validates cached image lookup against the default cache list.
    #[tokio::test]
    async fn test_cached_image() {
        let cached = CachedImage::default();
        assert_eq!(cached.lookup("registry.local/nginx:1.25"), Some("nginx:latest"));
        assert_eq!(cached.lookup("redis:7"), None);

        let strategy = FallbackStrategy::new("cache", FallbackAction::CachedImage(cached.clone()));
        let image = params(Some("ubuntu:20.04"));
        let result = cached.execute(&request(&strategy, &image)).await.unwrap();
        assert_eq!(result.kind, "cached_image");
        assert_eq!(result.substitute_image.as_deref(), Some("ubuntu:latest"));
    }

    /// Validates that degraded mode needs no parameters.
    #[tokio::test]
    async fn test_degraded_mode() {
        let degraded = DegradedMode::default();
        let strategy = FallbackStrategy::new("degraded", FallbackAction::DegradedMode(degraded.clone()));
        let empty = params(None);
        let result = degraded.execute(&request(&strategy, &empty)).await.unwrap();
        assert!(result.degraded);
        assert_eq!(result.message.as_deref(), Some("Operation completed in degraded mode"));
        assert_eq!(result.details.get("status"), Some(&json!("degraded")));
        assert!(result.original_image.is_none());
    }
}
