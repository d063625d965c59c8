//! Connection pooling and circuit breaker module
//!
//! This module provides:
//! - One keep-alive agent per edge host, HTTP/2 where the remote supports it
//! - Request, reuse and latency accounting shared by all in-flight requests
//! - A three-state circuit breaker wrapping outbound calls

pub mod circuit;
pub mod connection;
pub mod tracked;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState, CircuitStats};
pub use connection::{
    CallMetrics, ConnectionAgent, ConnectionPool, NetworkMetrics, PoolConfig, PoolError,
    PooledResponse, PreparedRequest, ProtocolFamily, RequestMetrics, ResponseHead, Scheme,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use tracked::{ConnectionId, TrackedConnector};
