//! Fallback chain, strategy and condition model

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipyard_common::error::{CommonError, CommonResult};
use shipyard_common::option_duration_millis;
use shipyard_common::resilience::ErrorCategory;

use super::handler::{
    CachedImage, CustomAction, DegradedMode, FallbackRequest, ImageVariant, RegistrySwitch,
};

/// What a strategy does, tagged by `type` in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackAction {
    RegistrySwitch(RegistrySwitch),
    ImageVariant(ImageVariant),
    CachedImage(CachedImage),
    DegradedMode(DegradedMode),
    Custom(CustomAction),
}

impl FallbackAction {
    /// Kind label, as used in logs and results
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RegistrySwitch(_) => "registry_switch",
            Self::ImageVariant(_) => "image_variant",
            Self::CachedImage(_) => "cached_image",
            Self::DegradedMode(_) => "degraded_mode",
            Self::Custom(_) => "custom",
        }
    }
}

/// Equality test on the classified error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualityOperator {
    #[default]
    Eq,
    Ne,
}

/// Test on a parameter of the failed invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterOperator {
    #[default]
    Eq,
    Ne,
    Contains,
    Exists,
}

/// Numeric comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Gt,
    Gte,
    #[default]
    Eq,
    Lt,
    Lte,
}

impl ComparisonOperator {
    pub const fn compare(self, actual: u32, expected: u32) -> bool {
        match self {
            Self::Gt => actual > expected,
            Self::Gte => actual >= expected,
            Self::Eq => actual == expected,
            Self::Lt => actual < expected,
            Self::Lte => actual <= expected,
        }
    }
}

/// Precondition a strategy must satisfy before it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackCondition {
    /// Compares the category of the last error
    #[serde(alias = "error_type")]
    ErrorCategory {
        #[serde(default)]
        operator: EqualityOperator,
        value: ErrorCategory,
    },
    /// Inspects an invocation parameter
    Parameter {
        key: String,
        #[serde(default)]
        operator: ParameterOperator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },
    /// Compares the number of attempts made in this invocation
    FailureCount {
        #[serde(default)]
        operator: ComparisonOperator,
        value: u32,
    },
}

impl FallbackCondition {
    /// Condition matching one error category
    pub const fn error_category(category: ErrorCategory) -> Self {
        Self::ErrorCategory { operator: EqualityOperator::Eq, value: category }
    }

    /// Evaluate against a fallback request
    pub fn holds(&self, request: &FallbackRequest<'_>) -> bool {
        match self {
            Self::ErrorCategory { operator, value } => match operator {
                EqualityOperator::Eq => request.category == *value,
                EqualityOperator::Ne => request.category != *value,
            },
            Self::Parameter { key, operator, value } => {
                let actual = request.params.get(key);
                match operator {
                    ParameterOperator::Eq => actual == value.as_ref(),
                    ParameterOperator::Ne => actual != value.as_ref(),
                    ParameterOperator::Exists => actual.is_some(),
                    ParameterOperator::Contains => match (actual, value) {
                        (Some(serde_json::Value::String(s)), Some(serde_json::Value::String(v))) => {
                            s.contains(v.as_str())
                        }
                        (Some(serde_json::Value::Array(items)), Some(v)) => items.contains(v),
                        _ => false,
                    },
                }
            }
            Self::FailureCount { operator, value } => operator.compare(request.attempts, *value),
        }
    }
}

/// One alternative action in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackStrategy {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(flatten)]
    pub action: FallbackAction,
    /// Bound on the handler call
    #[serde(default, with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Lower runs first
    #[serde(default)]
    pub priority: i32,
    /// All must hold; an empty list always qualifies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<FallbackCondition>,
}

impl FallbackStrategy {
    pub fn new(name: impl Into<String>, action: FallbackAction) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            action,
            timeout: None,
            priority: 0,
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: FallbackCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Whether every condition holds for `request`
    pub fn qualifies(&self, request: &FallbackRequest<'_>) -> bool {
        self.conditions.iter().all(|c| c.holds(request))
    }
}

const fn enabled_by_default() -> bool {
    true
}

/// Named, ordered set of strategies tried after retries give up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackChain {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub strategies: Vec<FallbackStrategy>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Upper bound on strategies executed per invocation; 0 means no bound
    #[serde(default)]
    pub max_fallbacks: u32,
}

impl FallbackChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            strategies: Vec::new(),
            enabled: true,
            max_fallbacks: 0,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    #[must_use]
    pub const fn with_max_fallbacks(mut self, max_fallbacks: u32) -> Self {
        self.max_fallbacks = max_fallbacks;
        self
    }

    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Strategies in execution order: ascending priority, ties kept in
    /// declaration order
    pub fn ordered_strategies(&self) -> Vec<&FallbackStrategy> {
        let mut ordered: Vec<_> = self.strategies.iter().collect();
        ordered.sort_by_key(|s| s.priority);
        ordered
    }

    /// Check the chain before registration
    pub fn validate(&self) -> CommonResult<()> {
        if self.name.trim().is_empty() {
            return Err(CommonError::validation("name", "fallback chain name must not be empty"));
        }
        for strategy in &self.strategies {
            if strategy.name.trim().is_empty() {
                return Err(CommonError::validation_with_value(
                    "strategies.name",
                    "fallback strategy name must not be empty",
                    self.name.clone(),
                ));
            }
            if let FallbackAction::Custom(custom) = &strategy.action {
                if custom.handler.trim().is_empty() {
                    return Err(CommonError::validation_with_value(
                        "strategies.handler",
                        "custom fallback strategy must name a handler",
                        strategy.name.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}
