mod collect;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use collect::HitCollector;
use rpc::{DaemonClient, QueryRequest, Reply, Request, Response};
use tarpc::{client, context, tokio_serde::formats::Bincode};

/// Responses asked for per poll
const POLL_BATCH: usize = 256;

#[derive(Parser, Debug)]
#[command(version, about = "Query a running searchd")]
struct Cli {
    /// Search clauses; every one must match. Without any, the name index is dumped.
    clauses: Vec<String>,

    /// Daemon socket (defaults to the one in the runtime directory)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Increase verbosity. Can be used multiple times (e.g., -v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

async fn connect(socket_path: PathBuf) -> anyhow::Result<DaemonClient> {
    let transport = tarpc::serde_transport::unix::connect(&socket_path, Bincode::default)
        .await
        .with_context(|| format!("Could not connect to searchd at {:?}", socket_path))?;
    Ok(DaemonClient::new(client::Config::default(), transport).spawn())
}

async fn dump_name_index(client: &DaemonClient) -> anyhow::Result<()> {
    match client.execute(context::current(), Request::DumpNameIndex).await?? {
        Reply::Synchronous(Response::NameIndex(entries)) => {
            for entry in entries {
                let kind = if entry.is_dir { "d" } else { "f" };
                println!("{} {} {}", kind, entry.name, entry.uri);
            }
            Ok(())
        }
        other => bail!("unexpected reply to DumpNameIndex: {:?}", other),
    }
}

async fn query(client: &DaemonClient, clauses: Vec<String>) -> anyhow::Result<()> {
    let request = Request::Query(QueryRequest::new(clauses));
    let session_id = match client.execute(context::current(), request).await?? {
        Reply::Asynchronous { session_id } => session_id,
        other => bail!("unexpected reply to Query: {:?}", other),
    };
    tracing::debug!("query session {}", session_id);

    let mut collector = HitCollector::new();
    let mut interrupted = false;
    while !collector.is_done() {
        let poll = client.next_responses(context::current(), session_id, POLL_BATCH);
        tokio::select! {
            responses = poll => {
                for response in responses?? {
                    if collector.apply(response) {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                client.cancel(context::current(), session_id).await?;
            }
        }
    }

    for hit in collector.ranked() {
        println!("{}", hit.short_id());
    }
    if collector.was_cancelled() {
        eprintln!("(cancelled)");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let socket_path = cli.socket.unwrap_or_else(config::default_socket_path);
    let client = connect(socket_path).await?;

    if cli.clauses.is_empty() {
        dump_name_index(&client).await
    } else {
        query(&client, cli.clauses).await
    }
}
