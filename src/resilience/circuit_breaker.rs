//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: a bounded number of probes test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests >= trip_min_requests && failure ratio >= trip_failure_ratio
//! Open → Half-Open: first admission check after open_timeout
//! Half-Open → Closed: max_half_open_requests probes succeed
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - One breaker per downstream target, owned explicitly (never global)
//! - Only the action's `Err` counts as a failure; callers decide what an error is
//! - Counters live in a generation; outcomes from an older generation are dropped
//! - The mutex is only held for admission and bookkeeping, never across the action
//! - Transition logs, metrics and the listener run after the lock is released, so
//!   concurrent transitions may reach the listener out of order

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BreakerConfig;
use crate::observability::metrics;

/// Circuit breaker states representing the current operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test downstream health
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during circuit breaker operation.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Circuit is open, rejecting all calls.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// Half-open probe quota is already in use.
    #[error("circuit breaker '{name}' is half-open and its probe quota is in use")]
    TooManyProbes { name: String },

    /// Operation was admitted, ran and failed.
    #[error("operation failed: {0}")]
    Failed(E),
}

impl<E> BreakerError<E> {
    /// True when the call was rejected without running.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Failed(_))
    }
}

/// Tuning for a single circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Downstream target name for logging and metrics.
    pub name: String,
    /// Probes admitted while half-open; this many successes close the circuit.
    pub max_half_open_requests: u32,
    /// Closed-state window after which counters reset. Zero disables it.
    pub interval: Duration,
    /// Time spent open before the next call is admitted as a probe.
    pub open_timeout: Duration,
    /// Minimum completed calls before a trip is considered.
    pub trip_min_requests: u32,
    /// Failure ratio at or above which the circuit trips.
    pub trip_failure_ratio: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            name: config.name.clone(),
            max_half_open_requests: config.max_half_open_requests,
            interval: Duration::from_secs(config.interval_secs),
            open_timeout: Duration::from_secs(config.open_timeout_secs),
            trip_min_requests: config.trip_min_requests,
            trip_failure_ratio: config.trip_failure_ratio,
        }
    }
}

/// Outcome counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.requests = self.requests.saturating_add(1);
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.requests = self.requests.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    /// Fraction of completed calls that failed, 0.0 when nothing completed.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.requests)
    }
}

/// Callback invoked after every state change with `(name, from, to)`.
pub type StateListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// Closed: end of the window. Open: end of the open timeout. Half-open: unused.
    expiry: Option<Instant>,
    /// Probes admitted in the current half-open generation.
    probes: u32,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

/// Three-state circuit breaker guarding one downstream target.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    listener: Option<StateListener>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed circuit breaker. A zero half-open quota is treated as one.
    pub fn new(mut config: CircuitBreakerConfig) -> Self {
        config.max_half_open_requests = config.max_half_open_requests.max(1);
        debug!(
            name = %config.name,
            trip_min_requests = config.trip_min_requests,
            trip_failure_ratio = config.trip_failure_ratio,
            open_timeout_secs = config.open_timeout.as_secs(),
            max_half_open_requests = config.max_half_open_requests,
            "Circuit breaker initialized"
        );

        let expiry = window_expiry(&config, Instant::now());
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
                probes: 0,
            }),
            listener: None,
        }
    }

    /// Register a listener notified on every state change.
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, after applying any elapsed window or open timeout.
    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.lock();
            let transition = self.refresh(&mut inner, Instant::now());
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Snapshot of the counters for the current generation.
    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// If the returned future is dropped before the operation completes, the
    /// attempt is not counted and any half-open probe slot it held is released.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut admission = self.admit().map_err(|rejected| match rejected {
            Rejected::Open => BreakerError::Open { name: self.config.name.clone() },
            Rejected::TooManyProbes => BreakerError::TooManyProbes { name: self.config.name.clone() },
        })?;

        let result = operation().await;
        admission.complete(result.is_ok());

        result.map_err(BreakerError::Failed)
    }

    fn admit(&self) -> Result<Admission<'_>, Rejected> {
        let (outcome, transition) = {
            let mut inner = self.lock();
            let transition = self.refresh(&mut inner, Instant::now());
            let outcome = match inner.state {
                CircuitState::Open => Err(Rejected::Open),
                CircuitState::HalfOpen if inner.probes >= self.config.max_half_open_requests => {
                    Err(Rejected::TooManyProbes)
                }
                CircuitState::HalfOpen => {
                    inner.probes += 1;
                    Ok(inner.generation)
                }
                CircuitState::Closed => Ok(inner.generation),
            };
            (outcome, transition)
        };
        self.notify(transition);

        outcome.map(|generation| Admission {
            breaker: self,
            generation,
            completed: false,
        })
    }

    fn record(&self, generation: u64, success: bool) {
        let transition = {
            let mut inner = self.lock();
            let now = Instant::now();
            let refreshed = self.refresh(&mut inner, now);
            if inner.generation != generation {
                refreshed
            } else if success {
                self.on_success(&mut inner, now).or(refreshed)
            } else {
                self.on_failure(&mut inner, now).or(refreshed)
            }
        };
        self.notify(transition);
    }

    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.probes = inner.probes.saturating_sub(1);
        }
    }

    fn on_success(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        inner.counts.on_success();
        match inner.state {
            CircuitState::Closed => self.trip_if_ready(inner, now),
            CircuitState::HalfOpen => {
                if inner.counts.consecutive_successes >= self.config.max_half_open_requests {
                    self.set_state(inner, CircuitState::Closed, now)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    fn on_failure(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        inner.counts.on_failure();
        match inner.state {
            CircuitState::Closed => self.trip_if_ready(inner, now),
            CircuitState::HalfOpen => self.set_state(inner, CircuitState::Open, now),
            CircuitState::Open => None,
        }
    }

    fn trip_if_ready(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        let counts = inner.counts;
        if counts.requests >= self.config.trip_min_requests
            && counts.failure_ratio() >= self.config.trip_failure_ratio
        {
            warn!(
                name = %self.config.name,
                requests = counts.requests,
                failures = counts.total_failures,
                "Circuit breaker tripped"
            );
            self.set_state(inner, CircuitState::Open, now)
        } else {
            None
        }
    }

    /// Apply elapsed timers: a new Closed window, or Open → Half-Open.
    fn refresh(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        match (inner.state, inner.expiry) {
            (CircuitState::Closed, Some(expiry)) if expiry <= now => {
                self.new_generation(inner, now);
                None
            }
            (CircuitState::Open, Some(expiry)) if expiry <= now => {
                self.set_state(inner, CircuitState::HalfOpen, now)
            }
            _ => None,
        }
    }

    fn set_state(&self, inner: &mut Inner, to: CircuitState, now: Instant) -> Option<Transition> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        self.new_generation(inner, now);
        Some(Transition { from, to })
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.probes = 0;
        inner.expiry = match inner.state {
            CircuitState::Closed => window_expiry(&self.config, now),
            CircuitState::Open => Some(now + self.config.open_timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };

        debug!(
            name = %self.config.name,
            from = %from,
            to = %to,
            "circuit breaker state change"
        );
        metrics::record_breaker_transition(&self.config.name, from, to);

        if let Some(listener) = &self.listener {
            listener(&self.config.name, from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn window_expiry(config: &CircuitBreakerConfig, now: Instant) -> Option<Instant> {
    if config.interval.is_zero() {
        None
    } else {
        Some(now + config.interval)
    }
}

#[derive(Debug, Clone, Copy)]
enum Rejected {
    Open,
    TooManyProbes,
}

/// An admitted attempt. Dropping it uncompleted gives back its probe slot.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    completed: bool,
}

impl Admission<'_> {
    fn complete(&mut self, success: bool) {
        self.completed = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.release(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Semaphore;
    use tokio::time::advance;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig::default())
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("connection refused") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.call(|| async { Ok::<_, &'static str>(()) }).await
    }

    async fn trip(cb: &CircuitBreaker) {
        for _ in 0..3 {
            let _ = fail(cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_operation() {
        let cb = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);

        let result = cb.call(|| async { Ok::<_, String>("success") }).await;
        assert_eq!(result.unwrap(), "success");

        let counts = cb.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_successes, 1);
        assert_eq!(counts.total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_minimum_requests_before_tripping() {
        let cb = breaker();

        assert!(matches!(fail(&cb).await, Err(BreakerError::Failed("connection refused"))));
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().total_failures, 2);

        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_running() {
        let cb = breaker();
        trip(&cb).await;

        let invoked = AtomicU32::new(0);
        for _ in 0..5 {
            let result = cb
                .call(|| async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Open { ref name }) if name == "HTTP"));
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(29)).await;
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratio_is_checked_after_every_call() {
        // 2 of 3 failed: 0.66 >= 0.6 even though the last call succeeded.
        let cb = breaker();
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Open);

        // 1 of 3 failed stays closed.
        let cb = breaker();
        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_counts() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            interval: Duration::from_secs(10),
            ..CircuitBreakerConfig::default()
        });

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        advance(Duration::from_secs(11)).await;

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_then_close() {
        let cb = breaker();
        trip(&cb).await;

        advance(Duration::from_secs(30)).await;

        let seen = cb
            .call(|| async { Ok::<_, String>(cb.state()) })
            .await
            .unwrap();
        assert_eq!(seen, CircuitState::HalfOpen);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timer() {
        let cb = breaker();
        trip(&cb).await;

        advance(Duration::from_secs(30)).await;
        succeed(&cb).await.unwrap();
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        advance(Duration::from_secs(29)).await;
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open { .. })));

        advance(Duration::from_secs(1)).await;
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_quota() {
        let cb = Arc::new(breaker());
        trip(&cb).await;
        advance(Duration::from_secs(30)).await;

        let gate = Arc::new(Semaphore::new(0));
        let mut probes = Vec::new();
        for _ in 0..2 {
            let cb = cb.clone();
            let gate = gate.clone();
            probes.push(tokio::spawn(async move {
                cb.call(|| async move {
                    let _permit = gate.acquire().await.map_err(|_| "closed")?;
                    Ok::<_, &'static str>(())
                })
                .await
            }));
        }
        tokio::task::yield_now().await;

        assert!(matches!(succeed(&cb).await, Err(BreakerError::TooManyProbes { .. })));

        gate.add_permits(2);
        for probe in probes {
            probe.await.unwrap().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_probe_quota_still_recovers() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_half_open_requests: 0,
            ..CircuitBreakerConfig::default()
        });
        assert_eq!(cb.config().max_half_open_requests, 1);
        trip(&cb).await;

        advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_releases_slot() {
        let cb = breaker();
        trip(&cb).await;
        advance(Duration::from_secs(30)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cb.call(|| std::future::pending::<Result<(), &'static str>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_sees_every_transition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = breaker().with_listener(move |name, from, to| {
            sink.lock().unwrap().push(format!("{name}:{from}->{to}"));
        });

        trip(&cb).await;
        advance(Duration::from_secs(30)).await;
        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["HTTP:closed->open", "HTTP:open->half-open", "HTTP:half-open->closed"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let cb = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            trip_min_requests: 1_000,
            ..CircuitBreakerConfig::default()
        }));

        let mut tasks = Vec::new();
        for i in 0..64 {
            let cb = cb.clone();
            tasks.push(tokio::spawn(async move {
                let _ = cb
                    .call(|| async move {
                        tokio::task::yield_now().await;
                        if i % 2 == 0 { Ok(()) } else { Err("boom") }
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let counts = cb.counts();
        assert_eq!(counts.requests, 64);
        assert_eq!(counts.total_failures, 32);
        assert_eq!(counts.total_successes, 32);
    }
}
