//! TCP handler: writes newline-terminated event JSON to an address.

use alert_core::{Event, Handler};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::error;

use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpHandlerConfig {
    /// `host:port` to connect to, one connection per event.
    pub address: String,
}

pub struct TcpHandler {
    config: TcpHandlerConfig,
}

impl TcpHandler {
    pub fn new(config: TcpHandlerConfig) -> Result<Self, ServiceError> {
        if config.address.is_empty() {
            return Err(ServiceError::InvalidConfig(
                "tcp handler requires an address".to_string(),
            ));
        }
        Ok(Self { config })
    }

    async fn send(&self, event: &Event) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&event.alert_data())?;
        line.push(b'\n');
        let mut stream = TcpStream::connect(&self.config.address).await?;
        stream.write_all(&line).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for TcpHandler {
    async fn handle(&self, event: &Event) {
        if let Err(err) = self.send(event).await {
            error!(
                address = %self.config.address,
                event = %event.state.id,
                error = %err,
                "tcp handler failed"
            );
        }
    }
}
