//! Aggregate health verdict
//!
//! Derived on demand from the circuit state, authentication success ratio and
//! connection reuse rate. Nothing here is stored.

use serde::{Deserialize, Serialize};

use super::metrics::AuthMetricsSnapshot;
use crate::pool::{CircuitState, NetworkMetrics};

/// Overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Cut-offs for a `healthy` verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Minimum successful / total ratio, 0.0-1.0
    pub min_success_rate: f64,

    /// Minimum connection reuse percentage, 0-100
    pub min_reuse_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.90,
            min_reuse_rate: 70.0,
        }
    }
}

impl HealthThresholds {
    /// Classify from raw measurements
    ///
    /// An open circuit is unhealthy regardless of the other inputs.
    pub fn classify(&self, circuit: CircuitState, success_ratio: f64, reuse_rate: f64) -> HealthStatus {
        if circuit == CircuitState::Open {
            return HealthStatus::Unhealthy;
        }

        if success_ratio >= self.min_success_rate && reuse_rate >= self.min_reuse_rate {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }
}

/// Health snapshot returned by `AuthOrchestrator::health_check`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub metrics: AuthMetricsSnapshot,
    pub circuit_breaker_state: CircuitState,
    pub network_optimization: NetworkMetrics,
}

impl HealthReport {
    pub fn evaluate(
        metrics: AuthMetricsSnapshot,
        circuit_breaker_state: CircuitState,
        network_optimization: NetworkMetrics,
        thresholds: &HealthThresholds,
    ) -> Self {
        let status = thresholds.classify(
            circuit_breaker_state,
            metrics.success_ratio(),
            network_optimization.connection_reuse_rate,
        );

        Self {
            status,
            metrics,
            circuit_breaker_state,
            network_optimization,
        }
    }
}
