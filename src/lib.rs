//! edgepool - resilient, connection-pooled request layer for the edge-platform API

pub mod auth;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod pool;

pub use auth::{
    AuthOrchestrator, EdgeGridSigner, HealthReport, HealthStatus, OrchestratorConfig,
    PooledSigner, RequestOptions, Signer,
};
pub use config::{Config, EdgeCredentials};
pub use core::Core;
pub use error::GatewayError;
pub use events::{EventBus, GatewayEvent};
