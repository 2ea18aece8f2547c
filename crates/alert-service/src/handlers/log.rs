//! Log handler: appends one JSON record per event to a file.

use std::path::PathBuf;

use alert_core::{Event, Handler};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::error::ServiceError;

fn default_mode() -> u32 {
    0o600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogHandlerConfig {
    /// Absolute path of the log file.
    pub path: PathBuf,
    /// File mode used when creating the file.
    #[serde(default = "default_mode")]
    pub mode: u32,
}

pub struct LogHandler {
    config: LogHandlerConfig,
}

impl LogHandler {
    pub fn new(config: LogHandlerConfig) -> Result<Self, ServiceError> {
        if !config.path.is_absolute() {
            return Err(ServiceError::InvalidConfig(format!(
                "log path must be absolute: {}",
                config.path.display()
            )));
        }
        if config.mode & 0o200 == 0 {
            return Err(ServiceError::InvalidConfig(format!(
                "log file mode {:o} is not user-writable",
                config.mode
            )));
        }
        Ok(Self { config })
    }

    async fn append(&self, event: &Event) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(&event.alert_data())?;
        line.push(b'\n');
        let mut options = tokio::fs::OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.mode(self.config.mode);
        let mut file = options.open(&self.config.path).await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[async_trait]
impl Handler for LogHandler {
    async fn handle(&self, event: &Event) {
        if let Err(err) = self.append(event).await {
            error!(
                path = %self.config.path.display(),
                event = %event.state.id,
                error = %err,
                "failed to write alert log"
            );
        }
    }
}
