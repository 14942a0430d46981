use std::path::{Path, PathBuf};

use tracekeep_core::config::{TenantConfig, TenantConfigProvider};
use tracekeep_core::context::RequestContext;
use tracekeep_core::error::ConfigError;
use tracing::debug;

/// Tenant table configuration kept in a JSON file, re-read on every call so
/// that edits apply without a restart.
#[derive(Debug, Clone)]
pub struct FileTenantConfig {
    path: PathBuf,
}

impl FileTenantConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes `config` to `path`, creating parent directories.
    pub fn write(path: &Path, config: &TenantConfig) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Read(e.to_string()))?;
        }
        let body =
            serde_json::to_vec_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, body).map_err(|e| ConfigError::Read(e.to_string()))
    }
}

impl TenantConfigProvider for FileTenantConfig {
    fn tenant_config(&self, _ctx: &RequestContext) -> Result<TenantConfig, ConfigError> {
        let body = std::fs::read(&self.path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", self.path.display())))?;
        let config: TenantConfig =
            serde_json::from_slice(&body).map_err(|e| ConfigError::Parse(e.to_string()))?;
        debug!(path = %self.path.display(), tenants = config.tenant_tables.len(), "tenant config loaded");
        Ok(config)
    }
}
