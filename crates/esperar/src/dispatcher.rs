//! Bounded polling around command dispatch.
//!
//! Every public entry point runs the same loop: attempt, classify the
//! outcome, then either return, fail, or sleep and try again until the
//! deadline passes.
//!
//! ```text
//! ATTEMPTING ──success──▶ SUCCEEDED
//!     │ ──fatal────▶ FATAL
//!     └─retryable─▶ RETRY_WAIT ──now < deadline──▶ ATTEMPTING
//!                        └────────now ≥ deadline──▶ TIMED_OUT
//! ```
//!
//! Only `FATAL` and `TIMED_OUT` reach the [`FailureReporter`], and only once
//! per invocation. Errors that were already decorated by a nested dispatch
//! pass through untouched.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, debug_span, info, warn};

use crate::collection::{self, CollectionCondition};
use crate::command::{self, CommandOutput, RetryOutcome};
use crate::condition::{self, Condition};
use crate::config::Configuration;
use crate::element::{Element, Elements};
use crate::locator::{ElementsCollection, LocatorChain};
use crate::registry::CommandRegistry;
use crate::report::{Artifact, FailureReporter, SnapshotReporter};
use crate::result::{EsperarError, EsperarResult};
use crate::session::ResolutionContext;

/// Wait budget for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total time allowed, measured from the first attempt
    pub timeout: Duration,
    /// Sleep between attempts
    pub poll_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(4000),
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    /// Create a config with the given timeout and the default poll interval
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_millis(200),
        }
    }

    /// Set the timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Single attempt, no waiting
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            timeout: Duration::ZERO,
            poll_interval: Duration::from_millis(200),
        }
    }

    /// Short timeout, fast polling
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Long timeout, slow polling
    #[must_use]
    pub const fn slow() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Retry class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Another attempt may succeed
    Retryable,
    /// Stop now
    Fatal,
}

impl Classification {
    /// Classify an error. Every variant is listed so new ones must be placed.
    #[must_use]
    pub const fn of(error: &EsperarError) -> Self {
        match error {
            EsperarError::NotFound { .. }
            | EsperarError::IndexOutOfRange { .. }
            | EsperarError::StaleElement { .. }
            | EsperarError::PredicateNotSatisfied { .. }
            | EsperarError::Session { .. } => Self::Retryable,
            EsperarError::UnknownOperation { .. }
            | EsperarError::InvalidArgument { .. }
            | EsperarError::RemoteEvaluation { .. }
            | EsperarError::Unsupported { .. }
            | EsperarError::Timeout { .. }
            | EsperarError::Fatal { .. }
            | EsperarError::Config { .. }
            | EsperarError::Io(_)
            | EsperarError::Json(_)
            | EsperarError::Yaml(_) => Self::Fatal,
        }
    }
}

/// Bookkeeping for one in-flight invocation
#[derive(Debug)]
pub struct PollState {
    started: Instant,
    deadline: Instant,
    poll_interval: Duration,
    last_failure: Option<EsperarError>,
    attempts: usize,
}

impl PollState {
    /// Start the clock
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        let started = Instant::now();
        // Durations too large to add are treated as "effectively forever".
        let deadline = started
            .checked_add(config.timeout)
            .unwrap_or_else(|| started + Duration::from_secs(60 * 60 * 24 * 365));
        Self {
            started,
            deadline,
            poll_interval: config.poll_interval,
            last_failure: None,
            attempts: 0,
        }
    }

    /// Attempts made so far
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Most recent retryable failure
    #[must_use]
    pub const fn last_failure(&self) -> Option<&EsperarError> {
        self.last_failure.as_ref()
    }

    /// Time since the first attempt
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn begin_attempt(&mut self) -> usize {
        self.attempts += 1;
        self.attempts
    }

    fn record_failure(&mut self, error: EsperarError) {
        self.last_failure = Some(error);
    }
}

/// Runs operations under a wait budget
pub struct RetryDispatcher {
    registry: Arc<CommandRegistry>,
    config: RetryConfig,
    reporter: Option<Arc<dyn FailureReporter>>,
}

impl std::fmt::Debug for RetryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryDispatcher")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl RetryDispatcher {
    /// Create a dispatcher with the default budget and no reporter
    #[must_use]
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self {
            registry,
            config: RetryConfig::default(),
            reporter: None,
        }
    }

    /// Budget and snapshot reporter taken from `config`
    #[must_use]
    pub fn from_configuration(registry: Arc<CommandRegistry>, config: &Configuration) -> Self {
        Self::new(registry)
            .with_config(config.retry_config())
            .with_reporter(SnapshotReporter::from_configuration(config))
    }

    /// Set the default budget
    #[must_use]
    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a failure reporter
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FailureReporter + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Shared command registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Default budget
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Fluent handle for `chain`
    #[must_use]
    pub fn element<'a>(
        &'a self,
        context: &'a dyn ResolutionContext,
        chain: LocatorChain,
    ) -> Element<'a> {
        Element::new(self, context, chain)
    }

    /// Fluent handle for `collection`
    #[must_use]
    pub fn elements<'a>(
        &'a self,
        context: &'a dyn ResolutionContext,
        collection: ElementsCollection,
    ) -> Elements<'a> {
        Elements::new(self, context, collection)
    }

    /// Run the command registered as `name` with the default budget
    pub fn execute(
        &self,
        context: &dyn ResolutionContext,
        name: &str,
        chain: &LocatorChain,
        args: &[Value],
    ) -> EsperarResult<CommandOutput> {
        self.execute_with(context, name, chain, args, self.config)
    }

    /// Run the command registered as `name` with an explicit budget.
    ///
    /// The binding is looked up once; re-registration while this call is
    /// waiting takes effect from the next call.
    pub fn execute_with(
        &self,
        context: &dyn ResolutionContext,
        name: &str,
        chain: &LocatorChain,
        args: &[Value],
        config: RetryConfig,
    ) -> EsperarResult<CommandOutput> {
        let command = self
            .registry
            .lookup(name)
            .ok_or_else(|| EsperarError::UnknownOperation { name: name.into() })?;
        self.poll(context, name, &chain.to_string(), config, || {
            command::invoke(command.as_ref(), chain, context, args)
        })
    }

    /// Wait until `condition` holds for `chain`
    pub fn should(
        &self,
        context: &dyn ResolutionContext,
        chain: &LocatorChain,
        condition: &dyn Condition,
    ) -> EsperarResult<CommandOutput> {
        self.should_with(context, chain, condition, self.config)
    }

    /// [`should`](Self::should) with an explicit budget
    pub fn should_with(
        &self,
        context: &dyn ResolutionContext,
        chain: &LocatorChain,
        condition: &dyn Condition,
        config: RetryConfig,
    ) -> EsperarResult<CommandOutput> {
        let operation = format!("should {}", condition.name());
        self.poll(context, &operation, &chain.to_string(), config, || {
            condition::evaluate(condition, chain, context)
        })
    }

    /// Wait until `condition` does not hold for `chain`
    pub fn should_not(
        &self,
        context: &dyn ResolutionContext,
        chain: &LocatorChain,
        condition: &dyn Condition,
    ) -> EsperarResult<CommandOutput> {
        self.should(context, chain, &condition::not(condition))
    }

    /// Wait until `condition` holds for every match of `collection`
    pub fn should_have(
        &self,
        context: &dyn ResolutionContext,
        collection: &ElementsCollection,
        condition: &dyn CollectionCondition,
    ) -> EsperarResult<CommandOutput> {
        self.should_have_with(context, collection, condition, self.config)
    }

    /// [`should_have`](Self::should_have) with an explicit budget
    pub fn should_have_with(
        &self,
        context: &dyn ResolutionContext,
        collection: &ElementsCollection,
        condition: &dyn CollectionCondition,
        config: RetryConfig,
    ) -> EsperarResult<CommandOutput> {
        let operation = format!("should {}", condition.name());
        self.poll(context, &operation, &collection.to_string(), config, || {
            collection::evaluate_collection(condition, collection, context)
        })
    }

    /// Drive an arbitrary attempt closure through the retry loop
    pub fn poll<F>(
        &self,
        context: &dyn ResolutionContext,
        operation: &str,
        subject: &str,
        config: RetryConfig,
        mut attempt: F,
    ) -> EsperarResult<CommandOutput>
    where
        F: FnMut() -> RetryOutcome,
    {
        let span = debug_span!("dispatch", operation, subject);
        let _entered = span.enter();
        let mut state = PollState::new(&config);

        loop {
            let n = state.begin_attempt();
            match attempt() {
                RetryOutcome::Success(output) => {
                    if n > 1 {
                        info!(
                            attempts = n,
                            elapsed_ms = state.elapsed().as_millis() as u64,
                            "succeeded after retrying"
                        );
                    } else {
                        debug!(attempt = n, "succeeded");
                    }
                    return Ok(output);
                }
                RetryOutcome::Fatal(error) => {
                    debug!(attempt = n, error = %error, "fatal failure");
                    return Err(self.decorate_fatal(context, operation, subject, error));
                }
                RetryOutcome::Retryable(error) => {
                    debug!(attempt = n, error = %error, "retryable failure");
                    let remaining = state.remaining();
                    if !remaining.is_zero() {
                        thread::sleep(state.poll_interval.min(remaining));
                    }
                    // No attempt may start at or after the deadline
                    if state.is_expired() {
                        warn!(
                            attempts = n,
                            timeout_ms = config.timeout.as_millis() as u64,
                            error = %error,
                            "timed out"
                        );
                        return Err(
                            self.decorate_timeout(context, operation, subject, &state, &config, error)
                        );
                    }
                    state.record_failure(error);
                }
            }
        }
    }

    fn decorate_fatal(
        &self,
        context: &dyn ResolutionContext,
        operation: &str,
        subject: &str,
        cause: EsperarError,
    ) -> EsperarError {
        if cause.is_decorated() {
            return cause;
        }
        let artifacts = self.capture(context, &cause);
        EsperarError::Fatal {
            operation: operation.into(),
            locator: subject.into(),
            cause: Box::new(cause),
            artifacts,
        }
    }

    fn decorate_timeout(
        &self,
        context: &dyn ResolutionContext,
        operation: &str,
        subject: &str,
        state: &PollState,
        config: &RetryConfig,
        cause: EsperarError,
    ) -> EsperarError {
        let artifacts = self.capture(context, &cause);
        EsperarError::Timeout {
            operation: operation.into(),
            locator: subject.into(),
            timeout_ms: config.timeout.as_millis() as u64,
            attempts: state.attempts(),
            cause: Box::new(cause),
            artifacts,
        }
    }

    fn capture(&self, context: &dyn ResolutionContext, cause: &EsperarError) -> Vec<Artifact> {
        let Some(reporter) = &self.reporter else {
            return Vec::new();
        };
        match reporter.on_terminal_failure(context, cause) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!(error = %e, cause = %cause, "failure reporter failed");
                Vec::new()
            }
        }
    }
}
