//! Fallback chain selection and execution

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use shipyard_common::error::CommonResult;
use shipyard_common::resilience::ErrorCategory;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::chain::{FallbackAction, FallbackChain};
use super::handler::{FallbackError, FallbackHandler, FallbackRequest, FallbackResult};
use crate::context::Parameters;

/// Chain consulted when an operation has no chain of its own
pub const DEFAULT_CHAIN: &str = "default";

/// Registry of fallback chains and custom handlers
#[derive(Default)]
pub struct FallbackOrchestrator {
    chains: RwLock<HashMap<String, Arc<FallbackChain>>>,
    handlers: RwLock<HashMap<String, Arc<dyn FallbackHandler>>>,
}

impl std::fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("chains", &self.chains.read().keys().collect::<Vec<_>>())
            .field("handlers", &self.handlers.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FallbackOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a chain by name
    pub fn add_chain(&self, chain: FallbackChain) -> CommonResult<()> {
        chain.validate()?;

        info!(
            chain_name = %chain.name,
            strategies = chain.strategies.len(),
            enabled = chain.enabled,
            "Added fallback chain"
        );
        self.chains.write().insert(chain.name.clone(), Arc::new(chain));
        Ok(())
    }

    pub fn chain(&self, name: &str) -> Option<Arc<FallbackChain>> {
        self.chains.read().get(name).cloned()
    }

    /// Register the handler behind `custom` strategies naming `name`
    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn FallbackHandler>) {
        let name = name.into();
        info!(handler = %name, "Registered fallback handler");
        self.handlers.write().insert(name, handler);
    }

    /// The operation's own chain, else the default chain
    pub fn select_chain(&self, operation: &str) -> Option<Arc<FallbackChain>> {
        let chains = self.chains.read();
        chains.get(operation).or_else(|| chains.get(DEFAULT_CHAIN)).cloned()
    }

    /// Try each qualifying strategy of the selected chain in priority order
    ///
    /// Returns the first successful result. Individual strategy failures are
    /// logged and the next strategy is tried.
    ///
    /// # Errors
    /// - [`FallbackError::NoChain`] / [`FallbackError::ChainDisabled`] when
    ///   there is nothing to run
    /// - [`FallbackError::Cancelled`] when `cancellation` fires mid-chain
    /// - [`FallbackError::Exhausted`] when no strategy succeeded
    pub async fn try_fallbacks(
        &self,
        operation: &str,
        params: &Parameters,
        last_error: &str,
        attempts: u32,
        cancellation: &CancellationToken,
    ) -> Result<FallbackResult, FallbackError> {
        let chain =
            self.select_chain(operation).ok_or_else(|| FallbackError::NoChain(operation.to_string()))?;
        if !chain.enabled {
            return Err(FallbackError::ChainDisabled(chain.name.clone()));
        }

        let category = ErrorCategory::categorize(last_error);
        let mut executed = 0u32;

        for strategy in chain.ordered_strategies() {
            if chain.max_fallbacks > 0 && executed >= chain.max_fallbacks {
                debug!(operation, chain = %chain.name, executed, "Fallback limit reached");
                break;
            }

            let request = FallbackRequest {
                operation,
                strategy,
                params,
                last_error,
                category,
                attempts,
            };
            if !strategy.qualifies(&request) {
                continue;
            }
            executed += 1;

            info!(
                operation,
                fallback_type = strategy.action.kind(),
                fallback_name = %strategy.name,
                "Attempting fallback strategy"
            );

            match self.run_strategy(&request, cancellation).await {
                Ok(mut result) => {
                    result.strategy.clone_from(&strategy.name);
                    info!(
                        operation,
                        fallback_type = strategy.action.kind(),
                        fallback_name = %strategy.name,
                        "Fallback strategy succeeded"
                    );
                    return Ok(result);
                }
                Err(FallbackError::Cancelled) => return Err(FallbackError::Cancelled),
                Err(e) => {
                    debug!(
                        operation,
                        fallback_type = strategy.action.kind(),
                        fallback_name = %strategy.name,
                        error = %e,
                        "Fallback strategy failed"
                    );
                }
            }
        }

        Err(FallbackError::Exhausted(operation.to_string()))
    }

    async fn run_strategy(
        &self,
        request: &FallbackRequest<'_>,
        cancellation: &CancellationToken,
    ) -> Result<FallbackResult, FallbackError> {
        let custom: Arc<dyn FallbackHandler>;
        let handler: &dyn FallbackHandler = match &request.strategy.action {
            FallbackAction::RegistrySwitch(h) => h,
            FallbackAction::ImageVariant(h) => h,
            FallbackAction::CachedImage(h) => h,
            FallbackAction::DegradedMode(h) => h,
            FallbackAction::Custom(action) => {
                custom = self
                    .handlers
                    .read()
                    .get(&action.handler)
                    .cloned()
                    .ok_or_else(|| FallbackError::UnknownHandler(action.handler.clone()))?;
                custom.as_ref()
            }
        };

        let bounded = async {
            match request.strategy.timeout {
                Some(limit) => tokio::time::timeout(limit, handler.execute(request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(FallbackError::TimedOut {
                            strategy: request.strategy.name.clone(),
                            timeout: limit,
                        })
                    }),
                None => handler.execute(request).await,
            }
        };

        tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(FallbackError::Cancelled),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for fallback orchestration.

    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::fallback::chain::{FallbackCondition, FallbackStrategy};
    use crate::fallback::handler::{CustomAction, DegradedMode, ImageVariant};

    /// Records the order in which it is called and fails unless told not to
    struct Probe {
        label: &'static str,
        succeed: bool,
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl FallbackHandler for Probe {
        async fn execute(&self, _request: &FallbackRequest<'_>) -> Result<FallbackResult, FallbackError> {
            self.log.lock().push(self.label);
            if self.succeed {
                Ok(FallbackResult::new("custom").with_detail("probe", json!(self.label)))
            } else {
                Err(FallbackError::Failed(format!("{} failed", self.label)))
            }
        }
    }

    struct Stall;

    #[async_trait]
    impl FallbackHandler for Stall {
        async fn execute(&self, _request: &FallbackRequest<'_>) -> Result<FallbackResult, FallbackError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(FallbackResult::new("custom"))
        }
    }

    fn custom(name: &str, handler: &str, priority: i32) -> FallbackStrategy {
        FallbackStrategy::new(
            name,
            FallbackAction::Custom(CustomAction {
                handler: handler.to_string(),
                parameters: Parameters::new(),
            }),
        )
        .with_priority(priority)
    }

    fn probes(
        orchestrator: &FallbackOrchestrator,
        outcomes: &[(&'static str, bool)],
    ) -> Arc<parking_lot::Mutex<Vec<&'static str>>> {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for &(label, succeed) in outcomes {
            orchestrator
                .register_handler(label, Arc::new(Probe { label, succeed, log: Arc::clone(&log) }));
        }
        log
    }

    /// Validates priority order and first-success termination.
    ///
    /// Assertions:
    /// - Confirms priorities {3, 1, 2} execute as {1, 2}.
    /// - Confirms the winning strategy name is stamped on the result.
    #[tokio::test]
    async fn test_priority_order_and_first_success() {
        let orchestrator = FallbackOrchestrator::new();
        let log = probes(&orchestrator, &[("p1", false), ("p2", true), ("p3", true)]);
        orchestrator
            .add_chain(
                FallbackChain::new("build")
                    .with_strategy(custom("third", "p3", 3))
                    .with_strategy(custom("first", "p1", 1))
                    .with_strategy(custom("second", "p2", 2)),
            )
            .unwrap();

        let result = orchestrator
            .try_fallbacks("build", &Parameters::new(), "boom", 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["p1", "p2"]);
        assert_eq!(result.strategy, "second");
        assert_eq!(result.details.get("probe"), Some(&json!("p2")));
    }

    /// Validates default-chain selection and the missing/disabled cases.
    #[tokio::test]
    async fn test_chain_selection() {
        let orchestrator = FallbackOrchestrator::new();
        let token = CancellationToken::new();
        let params = Parameters::new();

        let err = orchestrator.try_fallbacks("deploy", &params, "boom", 1, &token).await.unwrap_err();
        assert!(matches!(err, FallbackError::NoChain(_)));

        orchestrator
            .add_chain(
                FallbackChain::new(DEFAULT_CHAIN).with_strategy(FallbackStrategy::new(
                    "degraded_mode",
                    FallbackAction::DegradedMode(DegradedMode::default()),
                )),
            )
            .unwrap();
        let result = orchestrator.try_fallbacks("deploy", &params, "boom", 1, &token).await.unwrap();
        assert!(result.degraded);
        assert_eq!(result.strategy, "degraded_mode");

        orchestrator.add_chain(FallbackChain::new("deploy").disabled()).unwrap();
        let err = orchestrator.try_fallbacks("deploy", &params, "boom", 1, &token).await.unwrap_err();
        assert!(matches!(err, FallbackError::ChainDisabled(_)));
    }

    /// Validates that unmet conditions skip a strategy without counting it.
    ///
    /// Assertions:
    /// - Confirms a network-only strategy is skipped for a timeout.
    /// - Confirms `max_fallbacks` bounds executed strategies.
    #[tokio::test]
    async fn test_conditions_and_max_fallbacks() {
        let orchestrator = FallbackOrchestrator::new();
        let log = probes(&orchestrator, &[("net", true), ("a", false), ("b", false), ("c", true)]);
        orchestrator
            .add_chain(
                FallbackChain::new("pull")
                    .with_max_fallbacks(2)
                    .with_strategy(
                        custom("net-only", "net", 0)
                            .with_condition(FallbackCondition::error_category(ErrorCategory::Network)),
                    )
                    .with_strategy(custom("a", "a", 1))
                    .with_strategy(custom("b", "b", 2))
                    .with_strategy(custom("c", "c", 3)),
            )
            .unwrap();

        let err = orchestrator
            .try_fallbacks("pull", &Parameters::new(), "i/o timeout", 2, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FallbackError::Exhausted(_)));
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    /// Validates that unknown handlers and built-in failures fall through.
    #[tokio::test]
    async fn test_failures_fall_through() {
        let orchestrator = FallbackOrchestrator::new();
        let log = probes(&orchestrator, &[("last", true)]);
        orchestrator
            .add_chain(
                FallbackChain::new("pull")
                    .with_strategy(custom("ghost", "unregistered", 1))
                    .with_strategy(
                        FallbackStrategy::new(
                            "variant",
                            FallbackAction::ImageVariant(ImageVariant::new([("ubuntu", "alpine")])),
                        )
                        .with_priority(2),
                    )
                    .with_strategy(custom("last", "last", 3)),
            )
            .unwrap();

        let mut params = Parameters::new();
        params.insert("image".into(), json!("redis:7"));
        let result = orchestrator
            .try_fallbacks("pull", &params, "boom", 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.strategy, "last");
        assert_eq!(*log.lock(), vec!["last"]);
    }

    /// Validates strategy timeouts and cancellation.
    ///
    /// Assertions:
    /// - Confirms a stalled strategy times out and the next one runs.
    /// - Confirms a cancelled token aborts the chain.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_cancellation() {
        let orchestrator = FallbackOrchestrator::new();
        orchestrator.register_handler("stall", Arc::new(Stall));
        orchestrator
            .add_chain(
                FallbackChain::new("pull")
                    .with_strategy(custom("slow", "stall", 1).with_timeout(Duration::from_secs(5)))
                    .with_strategy(
                        FallbackStrategy::new("degraded", FallbackAction::DegradedMode(DegradedMode::default()))
                            .with_priority(2),
                    ),
            )
            .unwrap();

        let result = orchestrator
            .try_fallbacks("pull", &Parameters::new(), "boom", 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.strategy, "degraded");

        let token = CancellationToken::new();
        token.cancel();
        let err = orchestrator
            .try_fallbacks("pull", &Parameters::new(), "boom", 1, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, FallbackError::Cancelled));
    }
}
