use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use occam_core::kv::{KvStore, RedisStore};
use occam_server::checks::StandardChecks;
use occam_server::config::Config;
use occam_server::runtime::Runtime;

#[derive(Debug, Parser)]
#[command(name = "occam", about = "Stream event matcher")]
struct Cli {
    /// Path to the ini configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "occam=info,occam_server=info,occam_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::load(cli.config.as_deref())?;

    let store = RedisStore::connect(
        &cfg.redis.host,
        cfg.redis.port,
        Duration::from_secs(cfg.redis.retry),
    )
    .await?;
    let store: Arc<dyn KvStore> = Arc::new(store);

    let runtime = Runtime::start(cfg.runtime(), store, Arc::new(StandardChecks)).await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping workers");
    runtime.shutdown().await;

    Ok(())
}
