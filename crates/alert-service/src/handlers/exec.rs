//! Exec handler: spawns a program with the event JSON on stdin.

use std::process::Stdio;

use alert_core::{Event, Handler};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::error;

use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecHandlerConfig {
    /// Program to run.
    pub prog: String,
    #[serde(default)]
    pub args: Vec<String>,
}

pub struct ExecHandler {
    config: ExecHandlerConfig,
}

impl ExecHandler {
    pub fn new(config: ExecHandlerConfig) -> Result<Self, ServiceError> {
        if config.prog.is_empty() {
            return Err(ServiceError::InvalidConfig(
                "exec handler requires a program".to_string(),
            ));
        }
        Ok(Self { config })
    }

    async fn run(&self, event: &Event) -> anyhow::Result<()> {
        let data = serde_json::to_vec(&event.alert_data())?;
        let mut child = Command::new(&self.config.prog)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&data).await?;
            // Drop closes the pipe so the child sees EOF.
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}{}",
                self.config.prog,
                output.status,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for ExecHandler {
    async fn handle(&self, event: &Event) {
        if let Err(err) = self.run(event).await {
            error!(
                prog = %self.config.prog,
                event = %event.state.id,
                error = %err,
                "exec handler failed"
            );
        }
    }
}
