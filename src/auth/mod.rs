//! Signing, request enhancement and orchestration for edge API calls

pub mod edgegrid;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod signer;

pub use edgegrid::EdgeGridSigner;
pub use executor::RequestExecutor;
pub use health::{HealthReport, HealthStatus, HealthThresholds};
pub use metrics::{AuthMetrics, AuthMetricsSnapshot};
pub use orchestrator::{AuthOrchestrator, OrchestratorConfig, PooledSigner, ACCOUNT_SWITCH_HEADER};
pub use signer::{RequestOptions, SignError, Signer};
