//! Retry executor
//!
//! [`ResilienceEngine`] owns every registry the retry loop needs (policies,
//! breakers, fallback chains, learner, history and metrics) and is meant to
//! be built once and shared by reference. Unrelated operation names never
//! contend on a common lock.
//!
//! One invocation of [`ResilienceEngine::execute_with_retry`]:
//!
//! 1. resolve the policy (unknown names use the default policy)
//! 2. consult the policy's circuit breaker; reject without an attempt if open
//! 3. run attempts, each bounded by the policy's operation timeout and by
//!    what remains of its total timeout, recording every attempt and
//!    sleeping the backoff delay between them; a delay that would outlast
//!    the total timeout stops the loop instead
//! 4. on success, update metrics, breaker and learner and return
//! 5. otherwise consult the fallback chain once; a fallback result is
//!    returned as [`ExecutionOutcome::Fallback`]
//! 6. if nothing absorbed the failure, update metrics, breaker and learner
//!    and return an error carrying the attempt count and last cause

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use shipyard_common::error::CommonError;
use shipyard_common::resilience::{
    AdaptiveLearner, AdaptiveSettings, CircuitBreaker, CircuitBreakerStatus, CircuitState,
    ErrorCategory, SharedClock, SystemClock,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{AttemptContext, OperationContext, Parameters};
use crate::defaults;
use crate::error::{BoxedError, EngineError, EngineResult};
use crate::fallback::{FallbackChain, FallbackError, FallbackHandler, FallbackOrchestrator, FallbackResult};
use crate::history::{HistoryStore, OperationAttempt};
use crate::metrics::{MetricsStore, RetryMetrics};
use crate::policy::{RetryPolicy, DEFAULT_POLICY};

type Breaker = CircuitBreaker<SharedClock>;

/// Successful result of an invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome<T> {
    /// The operation itself succeeded
    Completed(T),
    /// The operation failed and a fallback strategy produced a substitute
    Fallback(FallbackResult),
}

impl<T> ExecutionOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Fallback(_) => None,
        }
    }

    pub const fn fallback(&self) -> Option<&FallbackResult> {
        match self {
            Self::Completed(_) => None,
            Self::Fallback(result) => Some(result),
        }
    }

    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

enum AttemptOutcome<T, E> {
    Finished(Result<T, E>),
    TimedOut(Duration),
    Cancelled,
}

/// Why the attempt loop stopped without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Exhausted,
    NonRetryable,
    TimedOut,
}

/// Breaker admission held for the length of one invocation
///
/// Recording an outcome consumes the permit. Dropping it unrecorded, including
/// when the caller abandons the `execute_with_retry` future, hands any
/// half-open slot back to the breaker.
struct BreakerPermit {
    breaker: Option<Arc<Breaker>>,
}

impl BreakerPermit {
    fn acquire(breaker: Option<Arc<Breaker>>) -> Option<Self> {
        match breaker {
            Some(breaker) if !breaker.can_execute() => None,
            breaker => Some(Self { breaker }),
        }
    }

    fn record_success(mut self) {
        if let Some(breaker) = self.breaker.take() {
            breaker.record_success();
        }
    }

    fn record_failure(mut self) -> Option<CircuitState> {
        self.breaker.take().and_then(|breaker| breaker.record_failure())
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            breaker.release();
        }
    }
}

/// Writes attempt records for one invocation
struct AttemptRecorder<'a> {
    history: &'a HistoryStore,
    operation_id: String,
    operation: &'a str,
    policy: &'a str,
    params: &'a Parameters,
    context: &'a BTreeMap<String, String>,
}

impl AttemptRecorder<'_> {
    fn record(
        &self,
        attempt: u32,
        timestamp: DateTime<Utc>,
        duration: Duration,
        failure: Option<(String, ErrorCategory)>,
    ) -> String {
        let id = format!("{}_attempt_{attempt}", self.operation_id);
        let (error, error_category) = match failure {
            Some((message, category)) => (Some(message), Some(category)),
            None => (None, None),
        };
        self.history.record(OperationAttempt {
            id: id.clone(),
            operation: self.operation.to_string(),
            attempt,
            timestamp,
            duration,
            success: error.is_none(),
            error,
            error_category,
            retry_policy: self.policy.to_string(),
            fallback_used: None,
            parameters: self.params.clone(),
            context: self.context.clone(),
        });
        id
    }
}

/// Retry executor with circuit breaking, fallbacks and adaptive backoff
pub struct ResilienceEngine {
    learning_enabled: bool,
    default_policy: Arc<RetryPolicy>,
    policies: RwLock<HashMap<String, Arc<RetryPolicy>>>,
    breakers: DashMap<String, Arc<Breaker>>,
    fallbacks: FallbackOrchestrator,
    learner: AdaptiveLearner,
    history: HistoryStore,
    metrics: MetricsStore,
    clock: SharedClock,
}

impl std::fmt::Debug for ResilienceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceEngine")
            .field("learning_enabled", &self.learning_enabled)
            .field("policies", &self.policies.read().keys().collect::<Vec<_>>())
            .field("breakers", &self.breakers.len())
            .field("fallbacks", &self.fallbacks)
            .field("max_history", &self.history.max_size())
            .finish_non_exhaustive()
    }
}

impl Default for ResilienceEngine {
    fn default() -> Self {
        let engine = Self::bare(&EngineConfig::default(), AdaptiveLearner::new(), Arc::new(SystemClock));
        engine.register_builtins(true, true);
        engine
    }
}

impl ResilienceEngine {
    /// Engine using the system clock
    ///
    /// # Errors
    /// Returns an error if the learning rate or any configured policy or
    /// chain is invalid.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine whose circuit breakers read time from `clock`
    ///
    /// # Errors
    /// Returns an error if the learning rate or any configured policy or
    /// chain is invalid.
    pub fn with_clock(config: EngineConfig, clock: SharedClock) -> EngineResult<Self> {
        let learner = AdaptiveLearner::with_learning_rate(config.learning_rate)?;
        let engine = Self::bare(&config, learner, clock);
        engine.register_builtins(config.default_policies, config.default_fallbacks);

        for policy in config.policies {
            engine.add_retry_policy(policy)?;
        }
        for chain in config.fallback_chains {
            engine.add_fallback_chain(chain)?;
        }
        Ok(engine)
    }

    fn bare(config: &EngineConfig, learner: AdaptiveLearner, clock: SharedClock) -> Self {
        Self {
            learning_enabled: config.learning_enabled,
            default_policy: Arc::new(RetryPolicy::default()),
            policies: RwLock::new(HashMap::new()),
            breakers: DashMap::new(),
            fallbacks: FallbackOrchestrator::new(),
            learner,
            history: HistoryStore::new(config.max_history_size),
            metrics: MetricsStore::new(),
            clock,
        }
    }

    fn register_builtins(&self, policies: bool, fallbacks: bool) {
        if policies {
            for policy in defaults::default_policies() {
                if let Err(e) = self.add_retry_policy(policy) {
                    warn!(error = %e, "Skipping invalid built-in retry policy");
                }
            }
        }
        if fallbacks {
            for chain in defaults::default_fallback_chains() {
                if let Err(e) = self.add_fallback_chain(chain) {
                    warn!(error = %e, "Skipping invalid built-in fallback chain");
                }
            }
        }
    }

    /// Add or replace a retry policy by name
    ///
    /// A policy enabling circuit breaking gets a breaker under its name. An
    /// existing breaker is kept, with its state, when its configuration is
    /// unchanged.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidPolicy`] if validation fails.
    pub fn add_retry_policy(&self, policy: RetryPolicy) -> EngineResult<()> {
        policy.validate()?;

        match policy.breaker_config() {
            Some(config) => {
                let unchanged =
                    self.breakers.get(&policy.name).is_some_and(|b| *b.config() == config);
                if !unchanged {
                    let breaker = CircuitBreaker::with_clock(
                        policy.name.clone(),
                        config,
                        Arc::clone(&self.clock),
                    )?;
                    self.breakers.insert(policy.name.clone(), Arc::new(breaker));
                }
            }
            None => {
                self.breakers.remove(&policy.name);
            }
        }

        info!(
            policy_name = %policy.name,
            max_attempts = policy.max_attempts,
            circuit_breaker = policy.enable_circuit_breaker,
            "Added retry policy"
        );
        self.policies.write().insert(policy.name.clone(), Arc::new(policy));
        Ok(())
    }

    /// Add or replace a fallback chain by name
    ///
    /// # Errors
    /// Returns a validation error if the chain or a strategy is unnamed.
    pub fn add_fallback_chain(&self, chain: FallbackChain) -> EngineResult<()> {
        self.fallbacks.add_chain(chain).map_err(EngineError::from)
    }

    /// Register the handler invoked by `custom` strategies naming `name`
    pub fn register_fallback_handler(&self, name: impl Into<String>, handler: Arc<dyn FallbackHandler>) {
        self.fallbacks.register_handler(name, handler);
    }

    fn resolve_policy(&self, name: &str) -> Arc<RetryPolicy> {
        let policies = self.policies.read();
        if let Some(policy) = policies.get(name) {
            return Arc::clone(policy);
        }
        if !name.is_empty() {
            debug!(policy = name, "Unknown retry policy, using default");
        }
        policies.get(DEFAULT_POLICY).map_or_else(|| Arc::clone(&self.default_policy), Arc::clone)
    }

    const fn learns(&self, policy: &RetryPolicy) -> bool {
        self.learning_enabled || policy.enable_adaptive
    }

    /// Run `op_fn` under the named policy
    ///
    /// `op_fn` is called once per attempt with a fresh [`AttemptContext`].
    /// The returned future is dropped if the attempt times out or the caller
    /// cancels `ctx`.
    ///
    /// # Errors
    /// - [`EngineError::CircuitOpen`] if the policy's breaker rejects the call
    /// - [`EngineError::NonRetryable`] if an error matched no retry rule
    /// - [`EngineError::TimedOut`] on attempt or total timeout expiry
    /// - [`EngineError::Cancelled`] if `ctx` was cancelled
    /// - [`EngineError::Exhausted`] once every attempt failed
    ///
    /// The last three apply only when no fallback strategy succeeded.
    #[instrument(skip_all, fields(operation = %operation, policy = %policy_name))]
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        ctx: &OperationContext,
        operation: &str,
        mut op_fn: F,
        params: Parameters,
        policy_name: &str,
    ) -> EngineResult<ExecutionOutcome<T>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let policy = self.resolve_policy(policy_name);
        let breaker = if policy.enable_circuit_breaker {
            self.breakers.get(&policy.name).map(|b| Arc::clone(b.value()))
        } else {
            None
        };

        let Some(permit) = BreakerPermit::acquire(breaker) else {
            warn!(operation, policy = %policy.name, "Circuit breaker is open, rejecting call");
            return Err(EngineError::CircuitOpen {
                operation: operation.to_string(),
                policy: policy.name.clone(),
            });
        };

        let recorder = AttemptRecorder {
            history: &self.history,
            operation_id: format!("op_{}", Uuid::now_v7().simple()),
            operation,
            policy: &policy.name,
            params: &params,
            context: &ctx.tags,
        };
        let backoff = policy.backoff();
        let rules = policy.rules();
        let started = Instant::now();
        let total_deadline = policy.total_timeout.map(|total| started + total);

        let mut attempts = 0;
        let mut last_error: Option<BoxedError> = None;
        let mut last_record = String::new();
        let mut stop = Stop::Exhausted;

        for attempt in 1..=policy.max_attempts {
            if ctx.cancellation.is_cancelled() {
                break;
            }
            let limit = attempt_limit(policy.operation_timeout, total_deadline);
            if limit.is_some_and(|limit| limit.is_zero()) {
                debug!(operation, attempt, elapsed_ms = millis(started.elapsed()), "Total timeout exceeded");
                stop = Stop::TimedOut;
                break;
            }
            attempts = attempt;

            let attempt_token = ctx.cancellation.child_token();
            let deadline = limit.map(|t| Instant::now() + t);
            let attempt_ctx = AttemptContext {
                operation: operation.to_string(),
                attempt,
                params: params.clone(),
                cancellation: attempt_token.clone(),
                deadline,
            };

            let timestamp = self.clock.utc_now();
            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = ctx.cancellation.cancelled() => AttemptOutcome::Cancelled,
                outcome = run_attempt(op_fn(attempt_ctx), limit) => outcome,
            };
            let duration = attempt_started.elapsed();

            match outcome {
                AttemptOutcome::Finished(Ok(value)) => {
                    recorder.record(attempt, timestamp, duration, None);
                    self.metrics.record_success(operation, attempt, started.elapsed());
                    permit.record_success();
                    if self.learns(&policy) {
                        self.learner.update(operation, duration, true);
                    }
                    if attempt > 1 {
                        info!(operation, attempts = attempt, "Operation succeeded after retries");
                    }
                    return Ok(ExecutionOutcome::Completed(value));
                }
                AttemptOutcome::Finished(Err(error)) => {
                    let message = error.to_string();
                    let category = ErrorCategory::categorize(&message);
                    last_record =
                        recorder.record(attempt, timestamp, duration, Some((message.clone(), category)));
                    last_error = Some(Box::new(error));

                    if attempt == policy.max_attempts {
                        break;
                    }
                    if !rules.is_retryable(&message) {
                        debug!(operation, attempt, error = %message, "Error is not retryable");
                        stop = Stop::NonRetryable;
                        break;
                    }

                    let delay = backoff.delay(attempt, self.learner.optimal_delay(operation));
                    if let Some(deadline) = total_deadline {
                        if Instant::now() + delay >= deadline {
                            debug!(
                                operation,
                                attempt,
                                elapsed_ms = millis(started.elapsed()),
                                delay_ms = millis(delay),
                                "Total timeout leaves no room for another attempt"
                            );
                            stop = Stop::TimedOut;
                            break;
                        }
                    }
                    warn!(
                        operation,
                        attempt,
                        delay_ms = millis(delay),
                        error = %message,
                        "Operation failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        () = ctx.cancellation.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                AttemptOutcome::TimedOut(limit) => {
                    attempt_token.cancel();
                    let error = CommonError::timeout(operation, limit);
                    last_record = recorder.record(
                        attempt,
                        timestamp,
                        duration,
                        Some((error.to_string(), ErrorCategory::Timeout)),
                    );
                    last_error = Some(Box::new(error));
                    debug!(operation, attempt, timeout_ms = millis(limit), "Attempt timed out");
                    stop = Stop::TimedOut;
                    break;
                }
                AttemptOutcome::Cancelled => {
                    recorder.record(
                        attempt,
                        timestamp,
                        duration,
                        Some(("operation cancelled".to_string(), ErrorCategory::Unknown)),
                    );
                    break;
                }
            }
        }

        if ctx.cancellation.is_cancelled() {
            return Err(cancelled(operation, attempts, last_error, permit));
        }

        let source = last_error.unwrap_or_else(|| {
            Box::new(CommonError::internal_with_context("no attempt was made", operation.to_string()))
        });
        let message = source.to_string();

        match self
            .fallbacks
            .try_fallbacks(operation, &params, &message, attempts, &ctx.cancellation)
            .await
        {
            Ok(result) => {
                self.history.mark_fallback(operation, &last_record, &result.strategy);
                self.metrics.record_fallback(operation, attempts, started.elapsed());
                drop(permit);
                return Ok(ExecutionOutcome::Fallback(result));
            }
            Err(FallbackError::Cancelled) => {
                return Err(cancelled(operation, attempts, Some(source), permit));
            }
            Err(e) => debug!(operation, error = %e, "No fallback absorbed the failure"),
        }

        let elapsed = started.elapsed();
        self.metrics.record_failure(operation, attempts, elapsed);
        if permit.record_failure() == Some(CircuitState::Open) {
            self.metrics.record_trip(operation);
        }
        if self.learns(&policy) {
            self.learner.update(operation, elapsed, false);
        }

        let operation = operation.to_string();
        Err(match stop {
            Stop::Exhausted => EngineError::Exhausted { operation, attempts, source },
            Stop::NonRetryable => EngineError::NonRetryable { operation, attempts, source },
            Stop::TimedOut => EngineError::TimedOut { operation, attempts, elapsed, source },
        })
    }

    pub fn get_retry_policy(&self, name: &str) -> Option<RetryPolicy> {
        self.policies.read().get(name).map(|p| RetryPolicy::clone(p))
    }

    pub fn get_fallback_chain(&self, name: &str) -> Option<FallbackChain> {
        self.fallbacks.chain(name).map(|c| FallbackChain::clone(&c))
    }

    pub fn get_retry_metrics(&self, operation: &str) -> Option<RetryMetrics> {
        self.metrics.get(operation)
    }

    pub fn get_all_retry_metrics(&self) -> HashMap<String, RetryMetrics> {
        self.metrics.all()
    }

    /// Most recent `limit` attempt records for `operation`; 0 returns all
    pub fn get_operation_history(&self, operation: &str, limit: usize) -> Vec<OperationAttempt> {
        self.history.recent(operation, limit)
    }

    /// Status of the breaker guarding the named policy
    pub fn get_circuit_breaker_status(&self, policy: &str) -> Option<CircuitBreakerStatus> {
        self.breakers.get(policy).map(|b| b.status())
    }

    /// Force the named policy's breaker closed
    ///
    /// # Errors
    /// Returns [`EngineError::CircuitBreakerNotFound`] if the policy has no
    /// breaker.
    pub fn reset_circuit_breaker(&self, policy: &str) -> EngineResult<()> {
        let breaker = self
            .breakers
            .get(policy)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| EngineError::CircuitBreakerNotFound(policy.to_string()))?;
        breaker.reset();
        Ok(())
    }

    pub fn get_adaptive_settings(&self, operation: &str) -> Option<AdaptiveSettings> {
        self.learner.settings(operation)
    }

    pub fn get_all_adaptive_settings(&self) -> Vec<AdaptiveSettings> {
        self.learner.all_settings()
    }
}

async fn run_attempt<T, E, Fut>(attempt: Fut, timeout: Option<Duration>) -> AttemptOutcome<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => AttemptOutcome::Finished(result),
            Err(_) => AttemptOutcome::TimedOut(limit),
        },
        None => AttemptOutcome::Finished(attempt.await),
    }
}

fn cancelled(
    operation: &str,
    attempts: u32,
    last_error: Option<BoxedError>,
    permit: BreakerPermit,
) -> EngineError {
    drop(permit);
    debug!(operation, attempts, "Operation cancelled");
    EngineError::Cancelled { operation: operation.to_string(), attempts, last_error }
}

/// Time allowed for the next attempt: the operation timeout clamped to
/// whatever remains of the total budget
fn attempt_limit(operation_timeout: Option<Duration>, total_deadline: Option<Instant>) -> Option<Duration> {
    let remaining = total_deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
    match (operation_timeout, remaining) {
        (Some(limit), Some(remaining)) => Some(limit.min(remaining)),
        (limit, remaining) => limit.or(remaining),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
