mod app;
mod backup;
mod cache;
mod commands;
mod config;
mod db;
mod event;
mod outbox;
mod remote;
mod sync;
#[cfg(test)]
mod testing;
mod writes;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "loyalty-sync")]
#[command(about = "Offline-resilient points ledger for the loyalty club")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/loyalty-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Skip the connectivity probe and treat the network as down
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: commands::Command,
}

/// Log to stderr and to a daily file under `<data_dir>/logs`.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(data_dir: &Path) -> WorkerGuard {
  let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "loyalty-sync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loyalty_sync=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = db::Database::data_dir(config.data_dir.as_deref())?;
  let _guard = init_logging(&data_dir);

  let mut app = app::App::new(config, args.offline).await?;
  app.run(args.command).await?;

  Ok(())
}
