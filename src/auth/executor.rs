//! Circuit-broken execution of signed requests

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::signer::RequestOptions;
use crate::error::GatewayError;
use crate::events::{EventBus, GatewayEvent};
use crate::pool::{CircuitBreaker, ConnectionPool, PooledResponse};

/// Runs signed requests through the circuit breaker and the connection pool
#[derive(Clone)]
pub struct RequestExecutor {
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
    events: EventBus,
}

impl RequestExecutor {
    pub fn new(pool: Arc<ConnectionPool>, breaker: Arc<CircuitBreaker>, events: EventBus) -> Self {
        Self {
            pool,
            breaker,
            events,
        }
    }

    /// Send `options` and report the outcome
    ///
    /// `started` marks the beginning of the whole pipeline, so the reported
    /// total time covers signing and agent lookup as well as the round trip.
    /// Requests that cannot be built fail before reaching the breaker.
    pub async fn execute(
        &self,
        options: RequestOptions,
        started: Instant,
    ) -> Result<PooledResponse, GatewayError> {
        let result = match self.pool.prepare_request(&options, options.body.clone()) {
            Ok(prepared) => self
                .breaker
                .execute(|| self.pool.send(prepared))
                .await
                .map_err(GatewayError::from),
            Err(e) => Err(GatewayError::from(e)),
        };

        match result {
            Ok(response) => {
                let total_time = started.elapsed();
                debug!(
                    method = %options.method,
                    path = %options.path,
                    status = response.status_code(),
                    reused = response.metrics.reused,
                    total_ms = total_time.as_millis() as u64,
                    "Request completed"
                );
                self.events.publish(GatewayEvent::RequestSuccess {
                    path: options.path.clone(),
                    method: options.method.clone(),
                    total_time,
                });
                Ok(response)
            }
            Err(err) => {
                warn!(
                    method = %options.method,
                    path = %options.path,
                    error = %err,
                    "Request failed"
                );
                self.events.publish(GatewayEvent::RequestError {
                    path: options.path.clone(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
