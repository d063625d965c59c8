//! Authentication orchestrator
//!
//! Bridges a [`Signer`] into the pooled, circuit-broken request path:
//!
//! ```text
//! get/post/put/delete
//!   -> Signer::sign            (authorization header)
//!   -> enhance                 (pooled agent, timeout, keep-alive, account switch)
//!   -> CircuitBreaker::execute
//!   -> ConnectionPool::execute_request
//! ```
//!
//! Call sites that sign requests themselves can be handed a [`PooledSigner`],
//! which applies the same enhancement on top of the original signer and
//! reverts to plain pass-through once the orchestrator is destroyed.

use bytes::Bytes;
use hyper::Method;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::executor::RequestExecutor;
use super::health::{HealthReport, HealthThresholds};
use super::metrics::{AuthMetrics, AuthMetricsSnapshot};
use super::signer::{RequestOptions, SignError, Signer};
use crate::error::GatewayError;
use crate::events::{EventBus, GatewayEvent, DEFAULT_EVENT_CAPACITY};
use crate::pool::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ConnectionPool, NetworkMetrics,
    PoolConfig, PooledResponse, Scheme,
};

/// Header carrying the tenant override
pub const ACCOUNT_SWITCH_HEADER: &str = "account-switch-key";

/// Settings for one orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// API host every verb helper targets
    pub hostname: String,
    pub protocol: Scheme,
    /// Per-request timeout injected by the enhancement step
    pub timeout: Duration,
    pub account_switch_key: Option<String>,
    /// Hand out a [`PooledSigner`] wrapping the supplied signer
    pub wrap_signer: bool,
    pub pool: PoolConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthThresholds,
    pub event_capacity: usize,
}

impl OrchestratorConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            protocol: Scheme::Https,
            timeout: Duration::from_secs(30),
            account_switch_key: None,
            wrap_signer: true,
            pool: PoolConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthThresholds::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.hostname.trim().is_empty() {
            return Err(GatewayError::Configuration("hostname is empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(GatewayError::Configuration("timeout must be positive".to_string()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(GatewayError::Configuration(
                "circuit breaker failure threshold must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.health.min_success_rate) {
            return Err(GatewayError::Configuration(format!(
                "min_success_rate {} is outside 0.0-1.0",
                self.health.min_success_rate
            )));
        }
        if !(0.0..=100.0).contains(&self.health.min_reuse_rate) {
            return Err(GatewayError::Configuration(format!(
                "min_reuse_rate {} is outside 0-100",
                self.health.min_reuse_rate
            )));
        }
        if self.account_switch_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(GatewayError::Configuration(
                "account switch key is blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared enhancement step, used by the orchestrator and its [`PooledSigner`]
struct Enhancer {
    pool: Arc<ConnectionPool>,
    timeout: Duration,
    account_switch_key: Option<String>,
    metrics: Arc<AuthMetrics>,
    events: EventBus,
    /// Cleared on destroy; a pooled signer then passes straight through
    active: AtomicBool,
}

impl Enhancer {
    /// Attach the pooled agent and transport headers; performs no I/O
    fn enhance(&self, mut options: RequestOptions) -> RequestOptions {
        if options.agent.is_none() {
            match self.pool.get_agent(&options.hostname, options.protocol) {
                Ok(agent) => options.agent = Some(agent),
                // The pool reports the same error again when the request runs
                Err(e) => debug!(hostname = %options.hostname, error = %e, "No pooled agent attached"),
            }
        }

        options.timeout = Some(self.timeout);
        options.set_header("connection", "keep-alive");
        if let Some(key) = &self.account_switch_key {
            options.set_header(ACCOUNT_SWITCH_HEADER, key.clone());
        }
        options
    }

    fn sign_and_enhance(
        &self,
        signer: &dyn Signer,
        options: RequestOptions,
    ) -> Result<RequestOptions, SignError> {
        let started = Instant::now();
        let signed = signer.sign(options)?;
        let enhanced = self.enhance(signed);
        let auth_time = started.elapsed();

        self.metrics.record_auth_time(auth_time);
        self.events.publish(GatewayEvent::AuthSuccess {
            hostname: enhanced.hostname.clone(),
            auth_time,
            keep_alive: true,
        });

        Ok(enhanced)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// A [`Signer`] decorated with the orchestrator's enhancement step
#[derive(Clone)]
pub struct PooledSigner {
    original: Arc<dyn Signer>,
    enhancer: Arc<Enhancer>,
}

impl PooledSigner {
    /// The signer this one wraps
    pub fn original(&self) -> &Arc<dyn Signer> {
        &self.original
    }

    pub fn is_active(&self) -> bool {
        self.enhancer.is_active()
    }
}

impl Signer for PooledSigner {
    fn sign(&self, options: RequestOptions) -> Result<RequestOptions, SignError> {
        if !self.enhancer.is_active() {
            return self.original.sign(options);
        }

        self.enhancer.metrics.begin();
        match self.enhancer.sign_and_enhance(self.original.as_ref(), options) {
            Ok(options) => {
                self.enhancer.metrics.record_success();
                Ok(options)
            }
            Err(e) => {
                self.enhancer.metrics.record_failure();
                Err(e)
            }
        }
    }
}

/// Signs, enhances and executes requests against one edge API host
pub struct AuthOrchestrator {
    config: OrchestratorConfig,
    signer: Arc<dyn Signer>,
    pooled: Option<Arc<PooledSigner>>,
    enhancer: Arc<Enhancer>,
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
    executor: RequestExecutor,
    metrics: Arc<AuthMetrics>,
    events: EventBus,
    destroyed: AtomicBool,
}

impl AuthOrchestrator {
    /// Build an orchestrator with its own pool, breaker and event bus
    pub fn new(config: OrchestratorConfig, signer: Arc<dyn Signer>) -> Result<Self, GatewayError> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let pool = Arc::new(ConnectionPool::new(config.pool.clone(), events.clone()));
        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker.clone(),
            events.clone(),
        ));

        Self::with_components(config, signer, pool, breaker, events)
    }

    /// Build an orchestrator around an existing pool and breaker
    ///
    /// Subscribe to `events` beforehand to observe the signer wrap event.
    pub fn with_components(
        config: OrchestratorConfig,
        signer: Arc<dyn Signer>,
        pool: Arc<ConnectionPool>,
        breaker: Arc<CircuitBreaker>,
        events: EventBus,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        if pool.is_destroyed() {
            return Err(GatewayError::Configuration(
                "connection pool is already destroyed".to_string(),
            ));
        }

        let metrics = Arc::new(AuthMetrics::new());
        let enhancer = Arc::new(Enhancer {
            pool: Arc::clone(&pool),
            timeout: config.timeout,
            account_switch_key: config.account_switch_key.clone(),
            metrics: Arc::clone(&metrics),
            events: events.clone(),
            active: AtomicBool::new(true),
        });

        let pooled = if config.wrap_signer {
            let pooled = Arc::new(PooledSigner {
                original: Arc::clone(&signer),
                enhancer: Arc::clone(&enhancer),
            });
            info!(hostname = %config.hostname, "Signer wrapped with pooled client");
            events.publish(GatewayEvent::SignerWrapped {
                original_auth: true,
                optimized_client: true,
            });
            Some(pooled)
        } else {
            None
        };

        let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&breaker), events.clone());

        Ok(Self {
            config,
            signer,
            pooled,
            enhancer,
            pool,
            breaker,
            executor,
            metrics,
            events,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The signer call sites should use
    ///
    /// The pooled wrapper when wrapping is enabled, otherwise the original.
    pub fn signer(&self) -> Arc<dyn Signer> {
        match &self.pooled {
            Some(pooled) => Arc::clone(pooled) as Arc<dyn Signer>,
            None => Arc::clone(&self.signer),
        }
    }

    /// The exact signer supplied at construction
    pub fn original_signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    pub fn pooled_signer(&self) -> Option<&Arc<PooledSigner>> {
        self.pooled.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Apply the enhancement step to already-signed options
    pub fn enhance(&self, options: RequestOptions) -> RequestOptions {
        self.enhancer.enhance(options)
    }

    pub async fn get(
        &self,
        path: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<PooledResponse, GatewayError> {
        self.request(Method::GET, path, None, headers).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<PooledResponse, GatewayError> {
        self.request(Method::POST, path, Some(body.into()), headers).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<PooledResponse, GatewayError> {
        self.request(Method::PUT, path, Some(body.into()), headers).await
    }

    pub async fn delete(
        &self,
        path: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<PooledResponse, GatewayError> {
        self.request(Method::DELETE, path, None, headers).await
    }

    /// Sign, enhance and execute one request
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<PooledResponse, GatewayError> {
        if self.is_destroyed() {
            return Err(GatewayError::Destroyed);
        }

        let started = Instant::now();
        self.metrics.begin();

        let mut options = RequestOptions::new(method, self.config.hostname.clone(), path)
            .with_protocol(self.config.protocol);
        for (name, value) in headers.unwrap_or_default() {
            options.set_header(&name, value);
        }
        if let Some(body) = body {
            if !options.headers.contains_key("content-type") {
                options.set_header("content-type", "application/json");
            }
            options.body = Some(body);
        }

        let options = match self.enhancer.sign_and_enhance(self.signer.as_ref(), options) {
            Ok(options) => options,
            Err(e) => {
                self.metrics.record_failure();
                warn!(path = %path, error = %e, "Signing failed");
                self.events.publish(GatewayEvent::RequestError {
                    path: path.to_string(),
                    error: e.to_string(),
                });
                return Err(GatewayError::Signing(e));
            }
        };

        match self.executor.execute(options, started).await {
            Ok(response) => {
                self.metrics.record_success();
                Ok(response)
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }

    pub fn get_metrics(&self) -> AuthMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Percentage of resolved requests that succeeded, 0-100
    pub fn get_success_rate(&self) -> f64 {
        self.metrics.snapshot().success_rate()
    }

    pub fn get_network_metrics(&self) -> NetworkMetrics {
        self.pool.get_metrics()
    }

    pub fn get_connection_reuse_rate(&self) -> f64 {
        self.pool.get_connection_reuse_rate()
    }

    pub fn get_circuit_breaker_state(&self) -> CircuitState {
        self.breaker.get_state()
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn connection_pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn health_check(&self) -> HealthReport {
        HealthReport::evaluate(
            self.metrics.snapshot(),
            self.breaker.get_state(),
            self.pool.get_metrics(),
            &self.config.health,
        )
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Restore the signer, close the pool and reset the breaker
    ///
    /// Later calls are no-ops.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            debug!("Auth orchestrator already destroyed");
            return;
        }

        self.enhancer.active.store(false, Ordering::Release);
        if self.pooled.is_some() {
            info!("Restored original signer");
        }

        self.pool.destroy();
        self.breaker.reset();
        self.events.publish(GatewayEvent::Destroyed);

        info!(hostname = %self.config.hostname, "Auth orchestrator destroyed");
    }
}
