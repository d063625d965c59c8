//! Keep-alive connection pooling per edge host
//!
//! This module provides one reusable agent per `(hostname, scheme)` pair with:
//! - HTTP/2 preferred over TLS via ALPN, HTTP/1.1 keep-alive otherwise
//! - Connection reuse detection from the id stamped on each new connection
//! - Lock-free request, reuse and latency counters
//! - Latency alerts when a request runs far above the rolling average

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Version};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::tracked::{ConnectionId, TrackedConnector};
use crate::auth::RequestOptions;
use crate::events::{EventBus, GatewayEvent};

/// Timeout applied when a request carries none of its own
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PooledClient = HyperClient<HttpsConnector<TrackedConnector>, Full<Bytes>>;

/// Error types for connection pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to build TLS connector: {0}")]
    Tls(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request failed: {0}")]
    Client(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection pool has been destroyed")]
    Destroyed,

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),
}

impl From<hyper_util::client::legacy::Error> for PoolError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        PoolError::Client(err.to_string())
    }
}

/// URL scheme of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire protocol an agent is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    #[serde(rename = "h2")]
    H2,
    #[serde(rename = "http/1.1")]
    Http1,
}

impl ProtocolFamily {
    /// Pick the family for a new agent
    ///
    /// HTTP/2 is only offered over TLS, where ALPN lets the remote decline it.
    pub fn negotiate(scheme: Scheme, prefer_http2: bool) -> Self {
        match scheme {
            Scheme::Https if prefer_http2 => ProtocolFamily::H2,
            _ => ProtocolFamily::Http1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolFamily::H2 => "h2",
            ProtocolFamily::Http1 => "http/1.1",
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for connection pool behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How long an idle keep-alive connection stays open
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle connections kept per host
    pub max_idle_per_host: usize,

    /// TCP connect timeout
    pub connect_timeout_ms: u64,

    /// Offer HTTP/2 via ALPN on TLS agents
    pub prefer_http2: bool,

    /// Alert when latency exceeds this multiple of the rolling average
    pub slow_request_factor: f64,

    /// Completed requests needed before the rolling average is trusted
    pub slow_request_min_samples: u64,

    /// Alert on any request slower than this, regardless of the average
    pub slow_request_threshold_ms: Option<u64>,

    /// Disable certificate verification (testing only)
    pub accept_invalid_certs: bool,
}

impl PoolConfig {
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether `latency` should raise a performance alert
    pub fn is_slow(&self, latency: Duration, average: Duration, samples: u64) -> bool {
        if let Some(limit) = self.slow_request_threshold_ms {
            if latency > Duration::from_millis(limit) {
                return true;
            }
        }

        samples >= self.slow_request_min_samples
            && !average.is_zero()
            && latency.as_secs_f64() > average.as_secs_f64() * self.slow_request_factor
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout_secs: 90,
            max_idle_per_host: 64,
            connect_timeout_ms: 10_000,
            prefer_http2: true,
            slow_request_factor: 2.5,
            slow_request_min_samples: 10,
            slow_request_threshold_ms: None,
            accept_invalid_certs: false,
        }
    }
}

/// Pool-wide request counters
///
/// `total_requests` is always bumped before `reuse_count`, and snapshots read
/// in the opposite order, so a snapshot never shows more reuses than requests.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    total_requests: AtomicU64,
    reuse_count: AtomicU64,
    failed_requests: AtomicU64,
    total_latency_us: AtomicU64,
}

impl RequestMetrics {
    /// Record a completed request, returning the average latency before it
    fn record(&self, latency: Duration, reused: bool) -> (Duration, u64) {
        let latency_us = latency.as_micros().min(u64::MAX as u128) as u64;
        let previous_total = self.total_requests.fetch_add(1, Ordering::SeqCst);
        if reused {
            self.reuse_count.fetch_add(1, Ordering::SeqCst);
        }
        let previous_latency = self.total_latency_us.fetch_add(latency_us, Ordering::SeqCst);

        let average = if previous_total == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(previous_latency / previous_total)
        };
        (average, previous_total)
    }

    fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::SeqCst)
    }

    pub fn reuse_count(&self) -> u64 {
        self.reuse_count.load(Ordering::SeqCst)
    }

    /// Percentage of requests served by an already-open connection
    pub fn reuse_rate(&self) -> f64 {
        let reused = self.reuse_count();
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        reused as f64 / total as f64 * 100.0
    }

    fn snapshot(&self, active_agents: usize) -> NetworkMetrics {
        let reuse_count = self.reuse_count();
        let total_latency_us = self.total_latency_us.load(Ordering::SeqCst);
        let total_requests = self.total_requests();

        let (average_latency_ms, connection_reuse_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                total_latency_us as f64 / total_requests as f64 / 1000.0,
                reuse_count as f64 / total_requests as f64 * 100.0,
            )
        };

        NetworkMetrics {
            total_requests,
            reuse_count,
            failed_requests: self.failed_requests.load(Ordering::SeqCst),
            average_latency_ms,
            connection_reuse_rate,
            active_agents,
        }
    }
}

/// Point-in-time view of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkMetrics {
    pub total_requests: u64,
    pub reuse_count: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    /// Percentage, 0-100
    pub connection_reuse_rate: f64,
    pub active_agents: usize,
}

/// A keep-alive agent bound to one host
///
/// Shared by every in-flight request to that host.
pub struct ConnectionAgent {
    hostname: String,
    scheme: Scheme,
    protocol: ProtocolFamily,
    client: PooledClient,
    created_at: Instant,
    last_used: Mutex<Instant>,
    connector: TrackedConnector,
    /// Last time each live connection carried a response
    seen_connections: Mutex<HashMap<ConnectionId, Instant>>,
    idle_timeout: Duration,
    request_count: AtomicU64,
}

impl ConnectionAgent {
    fn new(
        hostname: String,
        scheme: Scheme,
        protocol: ProtocolFamily,
        config: &PoolConfig,
    ) -> Result<Self, PoolError> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout()));
        http.set_keepalive(Some(config.pool_idle_timeout()));

        let mut tls = TlsConnector::builder();
        if config.accept_invalid_certs {
            warn!(hostname = %hostname, "TLS certificate verification disabled");
            tls.danger_accept_invalid_certs(true);
        }
        if protocol == ProtocolFamily::H2 {
            tls.request_alpns(&["h2", "http/1.1"]);
        }
        let tls = tls.build().map_err(|e| PoolError::Tls(e.to_string()))?;

        let connector = TrackedConnector::new(http);
        let https = HttpsConnector::from((connector.clone(), tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .set_host(true)
            .build(https);

        let now = Instant::now();
        Ok(Self {
            hostname,
            scheme,
            protocol,
            client,
            created_at: now,
            last_used: Mutex::new(now),
            connector,
            seen_connections: Mutex::new(HashMap::new()),
            idle_timeout: config.pool_idle_timeout(),
            request_count: AtomicU64::new(0),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn protocol(&self) -> ProtocolFamily {
        self.protocol
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connections that carried a response within the idle timeout
    pub fn open_connections(&self) -> usize {
        self.seen_connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Transport connections opened over the agent's lifetime
    pub fn connections_opened(&self) -> u64 {
        self.connector.opened()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn mark_used(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true if connection `id` already carried an earlier response
    fn observe_connection(&self, id: ConnectionId) -> bool {
        self.observe_connection_at(id, Instant::now())
    }

    fn observe_connection_at(&self, id: ConnectionId, now: Instant) -> bool {
        let mut seen = self
            .seen_connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // The client has closed anything idle for longer than this
        seen.retain(|_, last| now.saturating_duration_since(*last) <= self.idle_timeout);
        seen.insert(id, now).is_some()
    }
}

impl fmt::Debug for ConnectionAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionAgent")
            .field("hostname", &self.hostname)
            .field("scheme", &self.scheme)
            .field("protocol", &self.protocol)
            .field("open_connections", &self.open_connections())
            .field("connections_opened", &self.connections_opened())
            .field("request_count", &self.request_count())
            .finish()
    }
}

/// Status line and headers of a pooled response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status_code: u16,
    pub version: Version,
    pub headers: BTreeMap<String, String>,
}

/// Per-call measurements
#[derive(Debug, Clone, Copy)]
pub struct CallMetrics {
    pub latency: Duration,
    pub reused: bool,
}

/// Result of [`ConnectionPool::execute_request`]
#[derive(Debug, Clone)]
pub struct PooledResponse {
    pub response: ResponseHead,
    pub data: Bytes,
    pub metrics: CallMetrics,
}

impl PooledResponse {
    pub fn status_code(&self) -> u16 {
        self.response.status_code
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.response.status_code)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// A built request bound to its agent, ready for [`ConnectionPool::send`]
#[derive(Debug)]
pub struct PreparedRequest {
    agent: Arc<ConnectionAgent>,
    request: Request<Full<Bytes>>,
    hostname: String,
    path: String,
    timeout: Duration,
}

impl PreparedRequest {
    pub fn agent(&self) -> &Arc<ConnectionAgent> {
        &self.agent
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AgentKey {
    hostname: String,
    scheme: Scheme,
}

/// Connection pool manager for all edge hosts
pub struct ConnectionPool {
    /// Agents are created lazily and only dropped by `destroy`
    agents: RwLock<HashMap<AgentKey, Arc<ConnectionAgent>>>,

    /// Pool configuration
    config: PoolConfig,

    metrics: RequestMetrics,

    events: EventBus,

    destroyed: AtomicBool,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub fn new(config: PoolConfig, events: EventBus) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            config,
            metrics: RequestMetrics::default(),
            events,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Get the agent for a host, creating it on first use
    pub fn get_agent(&self, hostname: &str, scheme: Scheme) -> Result<Arc<ConnectionAgent>, PoolError> {
        if self.is_destroyed() {
            return Err(PoolError::Destroyed);
        }

        let key = AgentKey {
            hostname: hostname.to_string(),
            scheme,
        };

        {
            let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(agent) = agents.get(&key) {
                return Ok(Arc::clone(agent));
            }
        }

        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it while we waited for the write lock
        if let Some(agent) = agents.get(&key) {
            return Ok(Arc::clone(agent));
        }

        let protocol = ProtocolFamily::negotiate(scheme, self.config.prefer_http2);
        let agent = Arc::new(ConnectionAgent::new(
            hostname.to_string(),
            scheme,
            protocol,
            &self.config,
        )?);
        agents.insert(key, Arc::clone(&agent));
        drop(agents);

        info!(
            hostname = %hostname,
            scheme = %scheme,
            protocol = %protocol,
            "Created keep-alive agent"
        );
        self.events.publish(GatewayEvent::ConnectionOptimized {
            hostname: hostname.to_string(),
            protocol,
        });

        Ok(agent)
    }

    /// Perform one HTTP exchange over the pooled agent for `options.hostname`
    ///
    /// Shorthand for [`prepare_request`](Self::prepare_request) followed by
    /// [`send`](Self::send).
    pub async fn execute_request(
        &self,
        options: &RequestOptions,
        body: Option<Bytes>,
    ) -> Result<PooledResponse, PoolError> {
        let prepared = self.prepare_request(options, body)?;
        self.send(prepared).await
    }

    /// Resolve the agent and build the HTTP request without touching the network
    ///
    /// Fails with [`PoolError::InvalidRequest`] for a malformed path or header
    /// and [`PoolError::Destroyed`] after `destroy`.
    pub fn prepare_request(
        &self,
        options: &RequestOptions,
        body: Option<Bytes>,
    ) -> Result<PreparedRequest, PoolError> {
        if self.is_destroyed() {
            return Err(PoolError::Destroyed);
        }

        let agent = match &options.agent {
            Some(agent) => Arc::clone(agent),
            None => self.get_agent(&options.hostname, options.protocol)?,
        };

        let uri = format!("{}://{}{}", options.protocol, options.hostname, options.path);
        let mut builder = Request::builder().method(options.method.clone()).uri(&uri);
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| PoolError::InvalidRequest(e.to_string()))?;

        Ok(PreparedRequest {
            agent,
            request,
            hostname: options.hostname.clone(),
            path: options.path.clone(),
            timeout: options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        })
    }

    /// Send a prepared request, bounded by its timeout
    ///
    /// Only transport failures and timeouts surface here; a timeout is
    /// reported as [`PoolError::Timeout`].
    pub async fn send(&self, prepared: PreparedRequest) -> Result<PooledResponse, PoolError> {
        if self.is_destroyed() {
            return Err(PoolError::Destroyed);
        }

        let PreparedRequest {
            agent,
            request,
            hostname,
            path,
            timeout,
        } = prepared;

        let started = Instant::now();
        agent.mark_used();

        let exchange = async {
            let response = agent.client.request(request).await?;
            let reused = response
                .extensions()
                .get::<ConnectionId>()
                .map(|id| agent.observe_connection(*id))
                .unwrap_or(false);
            let (parts, incoming) = response.into_parts();
            let data = incoming.collect().await?.to_bytes();
            Ok::<_, PoolError>((parts, data, reused))
        };

        let (parts, data, reused) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.metrics.record_failure();
                debug!(hostname = %hostname, path = %path, error = %e, "Request failed");
                return Err(e);
            }
            Err(_) => {
                self.metrics.record_failure();
                warn!(
                    hostname = %hostname,
                    path = %path,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                return Err(PoolError::Timeout(timeout));
            }
        };

        let latency = started.elapsed();
        let (average, samples) = self.metrics.record(latency, reused);

        if reused {
            debug!(hostname = %hostname, "Reused open connection");
            self.events.publish(GatewayEvent::ConnectionReused {
                hostname: hostname.clone(),
            });
        }

        if self.config.is_slow(latency, average, samples) {
            warn!(
                hostname = %hostname,
                latency_ms = latency.as_millis() as u64,
                average_ms = average.as_millis() as u64,
                "Slow request"
            );
            self.events.publish(GatewayEvent::PerformanceAlert {
                hostname: hostname.clone(),
                latency,
                average,
            });
        }

        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(PooledResponse {
            response: ResponseHead {
                status_code: parts.status.as_u16(),
                version: parts.version,
                headers,
            },
            data,
            metrics: CallMetrics { latency, reused },
        })
    }

    /// Percentage of requests served by an already-open connection
    pub fn get_connection_reuse_rate(&self) -> f64 {
        self.metrics.reuse_rate()
    }

    pub fn get_metrics(&self) -> NetworkMetrics {
        self.metrics.snapshot(self.agent_count())
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Close every agent and release its sockets
    ///
    /// Only the first call does anything.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            debug!("Connection pool already destroyed");
            return;
        }

        let agents = std::mem::take(&mut *self.agents.write().unwrap_or_else(PoisonError::into_inner));
        let closed = agents.len();
        // Dropping the last handle to each client closes its idle connections
        drop(agents);

        info!(agents = closed, "Connection pool destroyed");
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("agents", &self.agent_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
