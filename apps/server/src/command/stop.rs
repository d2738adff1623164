use super::Command;
use super::client;
use crate::config::Config;
use crate::error::{Result, error};
use rpc::{Request, Response};

pub struct StopCommand {
    config: Config,
}

impl StopCommand {
    pub fn new(cfg: Config) -> Self {
        Self { config: cfg }
    }
}

#[async_trait::async_trait]
impl Command for StopCommand {
    async fn execute(&self) -> Result<()> {
        let client = client::connect(&self.config).await?;
        match client::request(&client, Request::Shutdown).await? {
            Response::IndexerAcknowledgment { .. } => {
                println!("Shutdown requested; the daemon exits once in-flight work has drained");
                Ok(())
            }
            other => Err(error!("unexpected response to shutdown: {}", other.kind())),
        }
    }
}
