use crate::types::{LogFormat, Protocol, RpsMode};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

#[derive(Parser, Debug)]
#[command(
    name = "h2surge",
    author,
    version,
    about = "An HTTP/2 load-testing client",
    long_about = "h2surge opens many concurrent connections against a target, drives a \
                  configurable number of in-flight requests per connection, optionally \
                  throttles the aggregate rate, and reports latency/throughput statistics."
)]
pub struct Cli {
    /// Target URL to load test
    #[arg(required_unless_present = "config")]
    pub url: Option<String>,

    /// Number of requests per connection (0 = unbounded)
    #[arg(short = 'n', long, default_value = "1")]
    pub requests: u64,

    /// Number of concurrent connections
    #[arg(short = 'c', long, default_value = "1")]
    pub clients: u32,

    /// Concurrent in-flight requests per connection
    #[arg(short = 's', long, default_value = "1")]
    pub streams: u32,

    /// Target requests per second per connection (0 = unlimited)
    #[arg(short = 'r', long, default_value = "0")]
    pub rps: u32,

    /// How rate-limit tokens are distributed within each second
    #[arg(long, value_enum)]
    pub rps_mode: Option<RpsMode>,

    /// Test duration (e.g. 30s, 1m) - overrides -n
    #[arg(short = 'd', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Server address override (host:port) for dialing
    #[arg(long)]
    pub server: Option<String>,

    /// Protocol override
    #[arg(long, value_enum)]
    pub protocol: Option<Protocol>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Request timeout (e.g. 5s)
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Connection timeout (e.g. 2s)
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub connect_timeout: Duration,

    /// Hide the aggregated statistics summary
    #[arg(long)]
    pub no_stats: bool,

    /// Show individual per-connection statistics
    #[arg(long)]
    pub client_stats: bool,

    /// Per-request log file path (logs to stdout when --log-format is
    /// given without a file)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<String>,

    /// Per-request log line format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Config file path (TOML)
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let cli = Cli::parse_from(["h2surge", "https://example.com"]);
        assert_eq!(cli.url.as_deref(), Some("https://example.com"));
        assert_eq!(cli.requests, 1);
        assert_eq!(cli.clients, 1);
        assert_eq!(cli.streams, 1);
        assert_eq!(cli.rps, 0);
        assert!(cli.rps_mode.is_none());
        assert!(cli.duration.is_none());
        assert!(!cli.insecure);
    }

    #[test]
    fn url_is_only_optional_with_a_config_file() {
        assert!(Cli::try_parse_from(["h2surge"]).is_err());
        assert!(Cli::try_parse_from(["h2surge", "-f", "test.toml"]).is_ok());
    }

    #[test]
    fn load_flags_parse() {
        let cli = Cli::parse_from([
            "h2surge",
            "https://example.com",
            "-n",
            "1000",
            "-c",
            "50",
            "-s",
            "20",
            "-r",
            "100",
            "--rps-mode",
            "even",
            "-d",
            "30s",
            "--log-file",
            "results.log",
            "--log-format",
            "compact",
        ]);
        assert_eq!(cli.requests, 1000);
        assert_eq!(cli.clients, 50);
        assert_eq!(cli.streams, 20);
        assert_eq!(cli.rps, 100);
        assert_eq!(cli.rps_mode, Some(RpsMode::Even));
        assert_eq!(cli.duration, Some(Duration::from_secs(30)));
        assert_eq!(cli.log_file.as_deref(), Some("results.log"));
        assert_eq!(cli.log_format, Some(LogFormat::Compact));
    }
}
