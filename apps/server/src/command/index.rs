use super::Command;
use super::client;
use crate::config::Config;
use crate::error::{Result, error};
use rpc::{ReindexRequest, Request, Response};
use std::path::PathBuf;
use tracing::info;

pub struct IndexCommand {
    config: Config,
    root_path: Option<PathBuf>,
}

impl IndexCommand {
    pub fn new(cfg: Config, root_path: Option<PathBuf>) -> Self {
        Self {
            config: cfg,
            root_path,
        }
    }

    fn request(&self) -> Result<Request> {
        let paths = match &self.root_path {
            Some(root) => vec![std::path::absolute(root)?],
            None => vec![],
        };
        Ok(Request::Reindex(ReindexRequest { paths }))
    }
}

#[async_trait::async_trait]
impl Command for IndexCommand {
    async fn execute(&self) -> Result<()> {
        let client = client::connect(&self.config).await?;
        let req = self.request()?;
        info!("Requesting reindex: {:?}", req);

        match client::request(&client, req).await? {
            Response::IndexerAcknowledgment { item_count } => {
                println!("Indexed {} entries", item_count);
                Ok(())
            }
            other => Err(error!("unexpected response to reindex: {}", other.kind())),
        }
    }
}
