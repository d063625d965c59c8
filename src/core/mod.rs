use std::sync::Arc;
use tracing::info;

use crate::auth::{AuthOrchestrator, EdgeGridSigner, Signer};
use crate::config::{Config, EdgeCredentials};
use crate::error::GatewayError;

/// Shared state behind the CLI
///
/// Owns the orchestrator built from the configured credentials. Clones share
/// the same connection pool and circuit breaker.
#[derive(Clone)]
pub struct Core {
    pub config: Arc<Config>,
    pub credentials: Arc<EdgeCredentials>,
    pub orchestrator: Arc<AuthOrchestrator>,
}

impl Core {
    /// Load credentials and build the signing and request pipeline
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        let credentials = EdgeCredentials::load(&config.edgerc_path, &config.section)
            .map_err(|e| GatewayError::Configuration(format!("{:#}", e)))?;

        Self::with_credentials(config, credentials)
    }

    /// Build from already-loaded credentials
    pub fn with_credentials(
        config: Config,
        credentials: EdgeCredentials,
    ) -> Result<Self, GatewayError> {
        let signer: Arc<dyn Signer> = Arc::new(EdgeGridSigner::new(&credentials));
        let orchestrator =
            AuthOrchestrator::new(config.orchestrator_config(credentials.host.clone()), signer)?;

        info!(
            host = %credentials.host,
            section = %config.section,
            "Initialized edge API client"
        );

        Ok(Self {
            config: Arc::new(config),
            credentials: Arc::new(credentials),
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn orchestrator(&self) -> &AuthOrchestrator {
        &self.orchestrator
    }

    /// Tear down the orchestrator, restoring the original signer
    pub fn shutdown(&self) {
        self.orchestrator.destroy();
    }
}
