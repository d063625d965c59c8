//! Typed lifecycle events published by the pool, circuit breaker and orchestrator
//!
//! Consumers call [`EventBus::subscribe`] and receive every [`GatewayEvent`]
//! published after that point. Publishing never blocks and never fails when
//! nobody is listening.

use hyper::Method;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::pool::{CircuitState, ProtocolFamily};

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted across the request pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// The signer was decorated with the pooled enhancement step
    SignerWrapped {
        original_auth: bool,
        optimized_client: bool,
    },

    RequestSuccess {
        path: String,
        method: Method,
        total_time: Duration,
    },

    RequestError {
        path: String,
        error: String,
    },

    AuthSuccess {
        hostname: String,
        auth_time: Duration,
        keep_alive: bool,
    },

    CircuitBreakerStateChange {
        from: CircuitState,
        to: CircuitState,
    },

    /// A request ran well above the pool's rolling average latency
    PerformanceAlert {
        hostname: String,
        latency: Duration,
        average: Duration,
    },

    ConnectionReused {
        hostname: String,
    },

    /// A keep-alive agent was created for a new host
    ConnectionOptimized {
        hostname: String,
        protocol: ProtocolFamily,
    },

    Destroyed,
}

impl GatewayEvent {
    /// Stable event name, used for logging
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::SignerWrapped { .. } => "signer_wrapped",
            GatewayEvent::RequestSuccess { .. } => "request_success",
            GatewayEvent::RequestError { .. } => "request_error",
            GatewayEvent::AuthSuccess { .. } => "auth_success",
            GatewayEvent::CircuitBreakerStateChange { .. } => "circuit_breaker_state_change",
            GatewayEvent::PerformanceAlert { .. } => "performance_alert",
            GatewayEvent::ConnectionReused { .. } => "connection_reused",
            GatewayEvent::ConnectionOptimized { .. } => "connection_optimized",
            GatewayEvent::Destroyed => "destroyed",
        }
    }
}

/// Broadcast channel shared by every component of one gateway
///
/// Clones publish onto the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive all events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: GatewayEvent) {
        debug!(event = event.name(), detail = ?event, "gateway event");
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
