//! Connection to a running daemon, shared by the control commands

use crate::config::Config;
use crate::error::{Result, WrapErr, error};
use rpc::{DaemonClient, Reply, Request, Response};
use tarpc::{client, context, tokio_serde::formats::Bincode};

pub async fn connect(cfg: &Config) -> Result<DaemonClient> {
    let socket_path = cfg.socket_path();
    let transport = tarpc::serde_transport::unix::connect(&socket_path, Bincode::default)
        .await
        .wrap_err_with(|| format!("Is the daemon running? Cannot connect to {:?}", socket_path))?;
    Ok(DaemonClient::new(client::Config::default(), transport).spawn())
}

/// Sends a request that the daemon answers in one round trip.
pub async fn request(client: &DaemonClient, req: Request) -> Result<Response> {
    let kind = req.kind();
    match client.execute(context::current(), req).await?? {
        Reply::Synchronous(response) => Ok(response),
        Reply::Asynchronous { session_id } => {
            client.close(context::current(), session_id).await?;
            Err(error!("daemon answered {} asynchronously", kind))
        }
    }
}
