mod cli;
mod commands;

use anyhow::Context;
use clap::Parser;
use docqa_core::KnowledgeBase;
use docqa_core::bootstrap::resolve_config_path;
use docqa_core::config::Config;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let kb = KnowledgeBase::open(&config).await?;
    let result = commands::run(&kb, cli.command, cli.json).await;
    kb.close().await;
    result
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
