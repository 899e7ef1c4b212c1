use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{MethodConfig, MethodConfigError};

/// Holds the active method configuration.
///
/// Readers clone the inner `Arc` and keep a complete version for the whole
/// query; `publish` swaps in a new version without touching the old one.
#[derive(Clone)]
pub struct MethodConfigStore {
    current: Arc<RwLock<Arc<MethodConfig>>>,
    path: Option<PathBuf>,
}

impl MethodConfigStore {
    pub fn new(config: MethodConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            path: None,
        }
    }

    /// Store that writes each published version back to `path`
    pub fn with_path(config: MethodConfig, path: PathBuf) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            path: Some(path),
        }
    }

    /// Load from `path` when given, otherwise use the built-in document
    pub async fn open(path: Option<PathBuf>) -> Result<Self, MethodConfigError> {
        match path {
            Some(path) => {
                let config = MethodConfig::load(&path).await?;
                Ok(Self::with_path(config, path))
            }
            None => {
                let config = MethodConfig::builtin()?;
                info!(version = %config.version, "Using built-in method config");
                Ok(Self::new(config))
            }
        }
    }

    pub async fn current(&self) -> Arc<MethodConfig> {
        let guard = self.current.read().await;
        Arc::clone(&guard)
    }

    /// Validate and publish a new version. In-flight queries keep the version
    /// they started with.
    pub async fn publish(&self, config: MethodConfig) -> Result<Arc<MethodConfig>, MethodConfigError> {
        config.check()?;
        let config = Arc::new(config);

        if let Some(path) = &self.path {
            let document = config.to_json_pretty()?;
            if let Err(source) = tokio::fs::write(path, document).await {
                warn!(path = %path.display(), error = %source, "Failed to persist method config");
                return Err(MethodConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        }

        let mut guard = self.current.write().await;
        let previous = std::mem::replace(&mut *guard, Arc::clone(&config));
        info!(
            previous = %previous.version,
            version = %config.version,
            "Published method config"
        );
        Ok(config)
    }
}
