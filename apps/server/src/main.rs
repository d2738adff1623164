mod cli;
mod command;
mod config;
mod error;
mod session;

use error::WrapErr;

use clap::CommandFactory;
use clap::Parser;

// NOTE, if built using MUSL, it's probably necessary to change to use a different
// allocator just like what ripgrep does: https://github.com/BurntSushi/ripgrep/blob/0a88cccd5188074de96f54a4b6b44a63971ac157/crates/core/main.rs#L40

#[tokio::main]
async fn main() -> error::Result<()> {
    color_eyre::install()?;
    let command_line = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(command_line.log_level())
        .with_target(false)
        .init();

    let cfg = config::Config::load().context("Load configuration error")?;

    if let Some(command) = command_line.command {
        let cmd: Box<dyn command::Command> = match command {
            cli::Commands::Serve => Box::new(command::ServeCommand::new(cfg)),
            cli::Commands::Index { root_path } => Box::new(command::IndexCommand::new(cfg, root_path)),
            cli::Commands::Stop => Box::new(command::StopCommand::new(cfg)),
        };
        cmd.execute().await?;
    } else {
        cli::Cli::command().print_help()?;
    }

    Ok(())
}
