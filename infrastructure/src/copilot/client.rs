//! Copilot backend client and factory.
//!
//! [`CopilotClientFactory`] locates the `copilot` binary and spawns one CLI
//! server per working directory; [`CopilotClient`] wraps the resulting
//! [`MessageRouter`] and hands out [`CopilotEventSession`]s.

use crate::copilot::protocol::CreateSessionParams;
use crate::copilot::router::MessageRouter;
use crate::copilot::session::CopilotEventSession;
use async_trait::async_trait;
use pilot_application::{
    BackendClient, BackendClientFactory, EventSession, GatewayError, SessionConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the Copilot CLI binary looked up on `PATH`.
pub const DEFAULT_CLI_PATH: &str = "copilot";

/// A Copilot CLI server bound to one working directory.
pub struct CopilotClient {
    router: Arc<MessageRouter>,
    working_directory: Option<PathBuf>,
}

impl CopilotClient {
    pub fn new(router: Arc<MessageRouter>, working_directory: Option<PathBuf>) -> Self {
        Self {
            router,
            working_directory,
        }
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }
}

#[async_trait]
impl BackendClient for CopilotClient {
    fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<dyn EventSession>, GatewayError> {
        info!(
            "Creating session (model: {})",
            config.model.as_deref().unwrap_or("default")
        );
        let params = CreateSessionParams::from_config(&config);
        let route = self
            .router
            .create_session(params, config.permission_handler.clone())
            .await?;
        Ok(Arc::new(CopilotEventSession::new(
            Arc::clone(&self.router),
            route,
        )))
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        debug!("Stopping Copilot client");
        self.router.shutdown().await?;
        Ok(())
    }
}

/// Spawns [`CopilotClient`]s from a CLI binary.
#[derive(Debug, Clone)]
pub struct CopilotClientFactory {
    cli_path: String,
}

impl Default for CopilotClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CLI_PATH)
    }
}

impl CopilotClientFactory {
    pub fn new(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    pub fn cli_path(&self) -> &str {
        &self.cli_path
    }
}

#[async_trait]
impl BackendClientFactory for CopilotClientFactory {
    fn probe(&self) -> bool {
        match which::which(&self.cli_path) {
            Ok(path) => {
                debug!("Found Copilot CLI at {}", path.display());
                true
            }
            Err(e) => {
                debug!("Copilot CLI '{}' not found: {}", self.cli_path, e);
                false
            }
        }
    }

    async fn connect(
        &self,
        working_directory: Option<&Path>,
    ) -> Result<Arc<dyn BackendClient>, GatewayError> {
        let router = MessageRouter::spawn(&self.cli_path, working_directory).await?;
        Ok(Arc::new(CopilotClient::new(
            router,
            working_directory.map(Path::to_path_buf),
        )))
    }
}
