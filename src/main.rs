use std::process::exit;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    cursor::JsonFileStore,
    format::Formatter,
    pipeline::Delivery,
    scheduler::{Exit, Relay},
    sources::{feed::PostFeed, reddit::RedditClient},
    telegram::TelegramClient,
};

mod config;
mod cursor;
mod format;
mod pipeline;
mod scheduler;
mod sources;
mod telegram;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Toml configuration. Environment variables override it.
    #[arg(short, long, default_value = "reddit2tg.toml")]
    config: String,

    /// Cursor file. Can be redefined in config.
    #[arg(short = 's', long, default_value = "last_post.json")]
    cache: String,

    /// Ignores config cache file and use by command line arguments.
    #[arg(long, default_value_t = false)]
    ignore_config_cache_file: bool,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reddit2tg=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    info!(path = %args.config, "reading config");

    let mut cfg = Config::load(&args.config).with_context(|| format!("loading {}", args.config))?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;

    let cache_filename = if args.ignore_config_cache_file {
        args.cache
    } else {
        cfg.cache.take().unwrap_or(args.cache)
    };

    let reddit = RedditClient::new(&cfg.reddit).context("building reddit client")?;
    let tg = TelegramClient::new(cfg.telegram.token.clone(), cfg.telegram.chat_id.clone());

    let relay = Relay::new(
        PostFeed::new(reddit, JsonFileStore::new(cache_filename)),
        Delivery::new(tg),
        Formatter::new(cfg.max_post_length),
        cfg.check_interval(),
    );

    match relay.run(shutdown_signal()).await {
        Ok(Exit::Shutdown) => Ok(()),
        Ok(Exit::Halted | Exit::NotStarted) => exit(2),
        Err(e) => {
            error!(error = %e, "bot crashed");
            Err(e.into())
        }
    }
}
