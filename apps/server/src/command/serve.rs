use super::Command;
use crate::config::Config;
use crate::error::{Result, WrapErr};
use crate::session::SessionManager;
use futures::{future, prelude::*};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use rpc::{Daemon, Reply, Request, RequestKind, Response, RpcError};
use tarpc::{
    context::Context,
    server::{self, Channel},
    tokio_serde::formats::Bincode
};

use search_core::{
    CoreConfig, DaemonContext, Dispatched, Dispatcher, NameIndex, QueryDriver, RequestHandler, ResponseSink, Shutdown,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// How long one `next_responses` call waits before answering empty; stays
/// below the default tarpc request deadline
const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

#[derive(Clone)]
struct Server {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    batch_size: usize,
}

impl Server {
    fn open_session(
        &self,
        handler: Box<dyn RequestHandler>,
        responses: UnboundedReceiver<Response>,
    ) -> std::result::Result<Uuid, RpcError> {
        let session_id = self.sessions.open(handler, responses);
        // 会话可能在 close_all 之后才打开
        if self.dispatcher.context().shutdown.shutdown_requested() {
            self.sessions.close(session_id);
            info!("Closed session {}: shutdown in progress", session_id);
            return Err(RpcError::ShuttingDown);
        }
        Ok(session_id)
    }
}

impl Daemon for Server {
    async fn ping(self, _c: Context) -> String {
        "Pong".to_string()
    }

    async fn execute(self, _c: Context, req: Request) -> std::result::Result<Reply, RpcError> {
        let kind = req.kind();
        if kind == RequestKind::Query && self.dispatcher.context().shutdown.shutdown_requested() {
            info!("Rejecting query: shutdown in progress");
            return Err(RpcError::ShuttingDown);
        }

        let (sink, responses) = ResponseSink::channel();
        match self.dispatcher.dispatch(req, sink).await {
            Ok(Dispatched::Synchronous(response)) => Ok(Reply::Synchronous(response)),
            Ok(Dispatched::Asynchronous(handler)) => {
                let session_id = self.open_session(handler, responses)?;
                info!("{} request started session {}", kind, session_id);
                Ok(Reply::Asynchronous { session_id })
            }
            Err(e) => {
                warn!("{} request rejected: {}", kind, e);
                Err(RpcError::Rejected(e.to_string()))
            }
        }
    }

    async fn next_responses(
        self,
        _c: Context,
        session_id: Uuid,
        max: usize,
    ) -> std::result::Result<Vec<Response>, RpcError> {
        let max = max.clamp(1, self.batch_size.max(1));
        self.sessions.next_responses(session_id, max).await
    }

    async fn cancel(self, _c: Context, session_id: Uuid) -> bool {
        info!("取消会话: {}", session_id);
        self.sessions.cancel(session_id)
    }

    async fn close(self, _c: Context, session_id: Uuid) -> bool {
        self.sessions.close(session_id)
    }
}

pub struct ServeCommand {
    config: Config
}

impl ServeCommand {
    pub fn new(cfg: Config) -> Self {
        Self {
            config: cfg
        }
    }

    /// Walks every configured root once before the daemon starts answering.
    async fn initial_scan(&self, core: &CoreConfig, name_index: &Arc<NameIndex>) -> Result<usize> {
        let roots: Vec<_> = core
            .watch_paths
            .iter()
            .filter(|path| {
                let exists = path.exists();
                if !exists {
                    warn!("Watch path {:?} does not exist, skipping", path);
                }
                exists
            })
            .cloned()
            .collect();

        let index = name_index.clone();
        let count = tokio::task::spawn_blocking(move || {
            roots.iter().map(|root| index.scan(root)).sum::<usize>()
        })
        .await
        .wrap_err("Initial scan failed")?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl Command for ServeCommand {
    async fn execute(&self) -> Result<()> {
        let unix_socket_path = self.config.socket_path();

        if let Some(parent) = unix_socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if unix_socket_path.exists() {
            fs::remove_file(&unix_socket_path)?;
        }

        info!("正在初始化...");
        let core = self.config.core_config();
        let shutdown = Shutdown::new(&core.shutdown);

        let name_index = NameIndex::new();
        let driver = QueryDriver::builder(&core, shutdown.clone())
            .register(name_index.clone())
            .build();

        let count = self.initial_scan(&core, &name_index).await?;
        info!("Name index ready: {} entries", count);
        let _watcher = match name_index.watch() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("File watching disabled: {}", e);
                None
            }
        };

        let context = DaemonContext::new(driver, shutdown.clone(), name_index);
        let dispatcher = Arc::new(Dispatcher::with_default_handlers(context)?);
        let sessions = Arc::new(SessionManager::new(self.config.session_timeout(), POLL_TIMEOUT));

        {
            let sessions = sessions.clone();
            shutdown.on_shutdown(move || {
                sessions.close_all();
            });
        }

        let main_loop = shutdown.main_loop();

        // 会话回收
        {
            let sessions = sessions.clone();
            let stop = main_loop.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(REAPER_INTERVAL);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = interval.tick() => {
                            sessions.cleanup_expired();
                        }
                    }
                }
            });
        }

        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted");
                    tokio::task::spawn_blocking(move || shutdown.begin_shutdown());
                }
            });
        }

        info!("监听 {:?}", unix_socket_path);

        let mut listener = tarpc::serde_transport::unix::listen(&unix_socket_path, Bincode::default).await?;
        listener.config_mut().max_frame_length(usize::MAX);

        let server = Server {
            dispatcher,
            sessions,
            batch_size: self.config.response_batch_size,
        };

        let serve = listener
            .filter_map(|r| future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .map(|channel| {
                let server = server.clone();
                channel.execute(server.serve()).for_each(spawn)
            })
            .buffer_unordered(10)
            .for_each(|_| async {});

        tokio::select! {
            _ = serve => warn!("Listener closed"),
            _ = main_loop.cancelled() => info!("Main loop stopped"),
        }

        if let Err(e) = fs::remove_file(&unix_socket_path) {
            warn!("Failed to remove {:?}: {}", unix_socket_path, e);
        }
        Ok(())
    }
}
