//! Price alert service binary.

use std::path::PathBuf;

use alert_server::config::{Config, NotifierKind};
use alert_server::service::Service;
use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "alert-server", about = "Real-time price alert service")]
struct Cli {
    /// TOML config file; `ALERT_*` environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Notification channel, overriding the config.
    #[arg(long, value_enum)]
    notifier: Option<NotifierKind>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(kind) = cli.notifier {
        config.notifier.kind = kind;
        config.validate().context("invalid config")?;
    }

    info!(
        feed = %config.feed.addr,
        store = %config.store.path.display(),
        notifier = ?config.notifier.kind,
        "starting alert-server"
    );

    let service = Service::start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("stop signal received");

    service.stop().await;
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
