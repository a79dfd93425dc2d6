//
// lsp/launcher.rs
//
// Starting code-intelligence servers
//

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::{CodeIntelligence, LspClient};
use crate::config::EngineConfig;
use crate::error::ClientError;

/// Starts a ready-to-use code-intelligence connection for a project root.
/// Sessions call this lazily and again whenever the previous connection broke.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(
        &self,
        root: &Path,
        config: &EngineConfig,
    ) -> Result<Arc<dyn CodeIntelligence>, ClientError>;
}

/// Spawns `config.server_command` and talks to it over stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioLauncher;

#[async_trait]
impl ServerLauncher for StdioLauncher {
    async fn launch(
        &self,
        root: &Path,
        config: &EngineConfig,
    ) -> Result<Arc<dyn CodeIntelligence>, ClientError> {
        let client = LspClient::start(root, config).await?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_executable_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            server_command: "scopetrace-no-such-server-binary".to_string(),
            server_args: Vec::new(),
            ..EngineConfig::default()
        };
        let err = match StdioLauncher.launch(dir.path(), &config).await {
            Ok(_) => panic!("launch should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, ClientError::Spawn { .. }));
    }
}
