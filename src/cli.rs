//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use newswatch_core::Channel;

/// Poll news feeds, deduplicate, and fan new items out over the event bus.
///
/// Newswatch polls each Atom/RSS feed on an adaptive interval, drops items
/// it has already seen, and publishes the rest on a bus channel.
/// Configuration comes from `NEWSWATCH_*` environment variables (a `.env`
/// file is honored); flags override them.
#[derive(Parser, Debug)]
#[command(name = "newswatch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Atom/RSS feed URL to poll (repeatable)
    #[arg(short = 'f', long = "feed", value_name = "URL")]
    pub feeds: Vec<String>,

    /// Channel new items are published on
    #[arg(short = 'c', long, default_value_t = Channel::News)]
    pub channel: Channel,

    /// Base poll interval in seconds (1-3600)
    #[arg(short = 'i', long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub poll_interval: Option<u64>,

    /// User-Agent sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Directory holding the deduplication ledger
    #[arg(long, value_name = "DIR")]
    pub ledger_dir: Option<PathBuf>,

    /// Keep the deduplication ledger in memory only
    #[arg(long)]
    pub no_ledger: bool,

    /// Drop all ledger entries at startup
    #[arg(long)]
    pub clear_ledger: bool,

    /// Do not fetch article text for new items
    #[arg(long)]
    pub skip_extraction: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["newswatch"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.feeds.is_empty());
        assert_eq!(args.channel, Channel::News);
        assert_eq!(args.poll_interval, None);
        assert!(!args.no_ledger);
        assert!(!args.clear_ledger);
        assert!(!args.skip_extraction);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["newswatch", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["newswatch", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["newswatch", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["newswatch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["newswatch", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_feed_is_repeatable() {
        let args = Args::try_parse_from([
            "newswatch",
            "--feed",
            "https://a.test/rss",
            "-f",
            "https://b.test/atom",
        ])
        .unwrap();
        assert_eq!(args.feeds, ["https://a.test/rss", "https://b.test/atom"]);
    }

    #[test]
    fn test_cli_channel_parses_names() {
        let args = Args::try_parse_from(["newswatch", "--channel", "press-release"]).unwrap();
        assert_eq!(args.channel, Channel::PressRelease);

        let args = Args::try_parse_from(["newswatch", "-c", "FILING"]).unwrap();
        assert_eq!(args.channel, Channel::Filing);
    }

    #[test]
    fn test_cli_unknown_channel_rejected() {
        let err = Args::try_parse_from(["newswatch", "--channel", "sports"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_poll_interval_range() {
        let args = Args::try_parse_from(["newswatch", "-i", "15"]).unwrap();
        assert_eq!(args.poll_interval, Some(15));

        let err = Args::try_parse_from(["newswatch", "--poll-interval", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_ledger_flags() {
        let args = Args::try_parse_from([
            "newswatch",
            "--ledger-dir",
            "/tmp/nw",
            "--no-ledger",
            "--clear-ledger",
            "--skip-extraction",
            "--user-agent",
            "bot/1.0 (ops@acme.test)",
        ])
        .unwrap();
        assert_eq!(args.ledger_dir, Some(PathBuf::from("/tmp/nw")));
        assert!(args.no_ledger);
        assert!(args.clear_ledger);
        assert!(args.skip_extraction);
        assert_eq!(args.user_agent.as_deref(), Some("bot/1.0 (ops@acme.test)"));
    }
}
