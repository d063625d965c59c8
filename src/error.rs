//! Error taxonomy surfaced by the request layer

use std::time::Duration;

use crate::auth::SignError;
use crate::pool::{CircuitError, PoolError};

/// Errors returned to callers of the orchestrator
///
/// Every variant carries the original failure; nothing is retried here.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request signing failed: {0}")]
    Signing(#[from] SignError),

    #[error("Circuit breaker is open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("Network error: {0}")]
    Network(PoolError),

    /// The request could not be built (malformed path or header)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Gateway has been destroyed")]
    Destroyed,
}

impl GatewayError {
    /// True when the failure came from the remote side rather than local setup
    pub fn is_network(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }
}

impl From<PoolError> for GatewayError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Destroyed => GatewayError::Destroyed,
            PoolError::InvalidRequest(reason) => GatewayError::InvalidRequest(reason),
            e => GatewayError::Network(e),
        }
    }
}

impl From<CircuitError<PoolError>> for GatewayError {
    fn from(err: CircuitError<PoolError>) -> Self {
        match err {
            CircuitError::Open { retry_in } => GatewayError::CircuitOpen { retry_in },
            CircuitError::Inner(e) => GatewayError::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_error_mapping() {
        let err: GatewayError = CircuitError::<PoolError>::Open {
            retry_in: Duration::from_secs(3),
        }
        .into();
        assert!(matches!(err, GatewayError::CircuitOpen { retry_in } if retry_in == Duration::from_secs(3)));

        let err: GatewayError = CircuitError::Inner(PoolError::Timeout(Duration::from_millis(5))).into();
        assert!(err.is_network());

        let err: GatewayError = CircuitError::Inner(PoolError::Destroyed).into();
        assert!(matches!(err, GatewayError::Destroyed));
    }

    #[test]
    fn test_invalid_request_is_not_a_network_error() {
        let err: GatewayError = PoolError::InvalidRequest("bad header".to_string()).into();
        assert!(matches!(err, GatewayError::InvalidRequest(ref reason) if reason == "bad header"));
        assert!(!err.is_network());
    }
}
