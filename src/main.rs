//! CLI entry point for newswatch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use newswatch_core::poller::{FeedSource, Source};
use newswatch_core::{AppContext, LedgerConfig, PollerConfig, shutdown};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Environment prefix for poller settings.
const ENV_PREFIX: &str = "NEWSWATCH";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // A missing .env is fine; a malformed one is worth knowing about.
    if let Err(error) = dotenvy::dotenv()
        && !error.not_found()
    {
        eprintln!("warning: ignoring .env: {error}");
    }

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    if args.feeds.is_empty() {
        info!("No feeds given. Pass one or more with --feed <URL>.");
        info!("Example: newswatch --feed https://example.org/news.rss --channel news");
        return Ok(());
    }

    let ledger_config = ledger_config(&args)?;
    let poller_config = poller_config(&args)?;
    let channel = args.channel;

    info!(feeds = args.feeds.len(), %channel, "Newswatch starting");

    let ctx = AppContext::build(ledger_config, poller_config)
        .await
        .context("failed to initialize")?;

    let mut router = ctx.router(ctx.clone());
    router.route(channel, None, |_ctx, message| async move {
        if let Some(item) = message.as_item() {
            info!(
                source = %message.source,
                item_id = %item.id(),
                title = %item.title(),
                url = %item.url(),
                "item"
            );
        }
        Ok(None)
    });

    for (index, url) in args.feeds.iter().enumerate() {
        let name = feed_name(index, url);
        let source: Arc<dyn Source> = Arc::new(FeedSource::new(name.clone(), url.clone()));
        router.producer(name, channel, move |node| {
            let source = Arc::clone(&source);
            async move {
                let app = node.state();
                let sink = app.bus_sink(channel);
                app.poller(source, sink)?.run(node.shutdown().clone()).await;
                Ok(None)
            }
        });
    }

    let stop = ctx.shutdown().clone();
    let signals = tokio::spawn(shutdown::listen_for_signals(stop.clone()));

    let report = router.run(stop.clone()).await;
    stop.trigger();
    if let Err(error) = signals.await {
        warn!(%error, "signal listener ended abnormally");
    }

    ctx.close().await.context("failed to close ledger")?;

    for failure in &report.failures {
        warn!(node = %failure.name, error = %failure.error, "node failed");
    }
    info!(
        nodes = report.nodes,
        failures = report.failures.len(),
        "Newswatch stopped"
    );
    Ok(())
}

/// Ledger settings: environment first, then flags.
fn ledger_config(args: &Args) -> Result<LedgerConfig> {
    let mut config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    if let Some(dir) = &args.ledger_dir {
        config = config.with_dir(dir);
    }
    if args.no_ledger {
        config = config.with_persistent(false);
    }
    if args.clear_ledger {
        config = config.with_clear_on_start(true);
    }
    Ok(config)
}

/// Poller defaults: environment first, then flags.
fn poller_config(args: &Args) -> Result<PollerConfig> {
    let mut config = PollerConfig::from_env(ENV_PREFIX, PollerConfig::default())
        .context("invalid poller configuration")?;
    if let Some(secs) = args.poll_interval {
        config = config.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(user_agent) = &args.user_agent {
        config = config.with_user_agent(user_agent.clone());
    }
    if args.skip_extraction {
        config = config.with_skip_extraction(true);
    }
    config.validate().context("invalid poller configuration")?;
    Ok(config)
}

/// Node name for a feed: its host when the URL parses, else its position.
fn feed_name(index: usize, url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| format!("feed:{host}#{index}")))
        .unwrap_or_else(|| format!("feed#{index}"))
}
