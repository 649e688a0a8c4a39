use crate::cli::Cli;
use crate::error::ConfigError;
use crate::types::{LogFormat, Protocol, RpsMode};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Immutable test configuration, shared by reference across all
/// connections once a test starts.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Target URL used for protocol-level addressing.
    pub url: String,
    /// Optional dial override (host:port), distinct from the URL host.
    pub server_address: Option<String>,
    pub protocol: Protocol,
    /// Requests per connection. 0 = unbounded, governed by stop() or a
    /// caller-side duration.
    pub requests: u64,
    /// Number of independent connections.
    pub clients: u32,
    /// Concurrent in-flight requests allowed per connection.
    pub streams: u32,
    /// Target aggregate requests/second per connection. 0 = unlimited.
    pub rps: u32,
    pub rps_mode: RpsMode,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            server_address: None,
            protocol: Protocol::default(),
            requests: 1,
            clients: 1,
            streams: 1,
            rps: 0,
            rps_mode: RpsMode::default(),
            insecure: false,
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl TestConfig {
    /// Numeric fields are unsigned, so the non-negativity invariant holds
    /// by construction; validation covers the URL and the dial override.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }

        let url = reqwest::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: "URL has no host".to_string(),
            });
        }

        if let Some(addr) = &self.server_address
            && addr.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::InvalidServerAddress(addr.clone()));
        }

        Ok(())
    }

    pub fn server_socket_addr(&self) -> Option<SocketAddr> {
        self.server_address.as_ref().and_then(|a| a.parse().ok())
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub load: LoadSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Default)]
pub struct TargetConfig {
    pub url: Option<String>,
    pub server: Option<String>,
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoadSettings {
    pub requests: Option<u64>,
    pub clients: Option<u32>,
    pub streams: Option<u32>,
    pub rps: Option<u32>,
    pub rps_mode: Option<RpsMode>,
    #[serde(default, with = "humantime_serde::option")]
    pub duration: Option<Duration>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LogSettings {
    pub file: Option<String>,
    pub format: Option<LogFormat>,
}

pub fn load_config(path: &Path) -> Result<TomlConfig, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

    let content = interpolate_env_vars(&content)?;

    toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
}

/// Expands `${VAR}` and `${VAR:-default}` references against the process
/// environment.
fn interpolate_env_vars(content: &str) -> Result<String, String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(content) {
        let full_match = cap.get(0).unwrap().as_str();
        let var_expr = cap.get(1).unwrap().as_str();

        let (var_name, default) = if let Some(pos) = var_expr.find(":-") {
            (&var_expr[..pos], Some(&var_expr[pos + 2..]))
        } else {
            (var_expr, None)
        };

        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => match default {
                Some(d) => d.to_string(),
                None => return Err(format!("Environment variable '{}' not set", var_name)),
            },
        };

        result = result.replace(full_match, &value);
    }

    Ok(result)
}

/// Merges CLI arguments over config-file values. Explicit CLI flags win;
/// file values fill anything left at its default.
pub fn merge_config(cli: &Cli, toml: Option<TomlConfig>) -> Result<(TestConfig, RunSettings), String> {
    let toml = toml.unwrap_or_default();

    let url = cli
        .url
        .clone()
        .or(toml.target.url)
        .ok_or("URL is required. Provide via argument or config file.")?;

    let config = TestConfig {
        url,
        server_address: cli.server.clone().or(toml.target.server),
        protocol: cli.protocol.or(toml.target.protocol).unwrap_or_default(),
        requests: if cli.requests != 1 {
            cli.requests
        } else {
            toml.load.requests.unwrap_or(1)
        },
        clients: if cli.clients != 1 {
            cli.clients
        } else {
            toml.load.clients.unwrap_or(1)
        },
        streams: if cli.streams != 1 {
            cli.streams
        } else {
            toml.load.streams.unwrap_or(1)
        },
        rps: if cli.rps != 0 {
            cli.rps
        } else {
            toml.load.rps.unwrap_or(0)
        },
        rps_mode: cli.rps_mode.or(toml.load.rps_mode).unwrap_or_default(),
        insecure: cli.insecure || toml.target.insecure,
        timeout: if cli.timeout != Duration::from_secs(5) {
            cli.timeout
        } else {
            toml.target.timeout.unwrap_or(Duration::from_secs(5))
        },
        connect_timeout: if cli.connect_timeout != Duration::from_secs(2) {
            cli.connect_timeout
        } else {
            toml.target.connect_timeout.unwrap_or(Duration::from_secs(2))
        },
    };

    let settings = RunSettings {
        duration: cli.duration.or(toml.load.duration),
        log_file: cli.log_file.clone().or(toml.log.file),
        log_format: cli.log_format.or(toml.log.format),
        show_stats: !cli.no_stats,
        show_client_stats: cli.client_stats,
    };

    Ok((config, settings))
}

/// CLI-level settings that never reach the engine: the duration bound is
/// applied by the caller (run-then-stop), and the display/log toggles
/// only affect wiring in main.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub duration: Option<Duration>,
    pub log_file: Option<String>,
    /// `None` when per-request logging was not requested at all.
    pub log_format: Option<LogFormat>,
    pub show_stats: bool,
    pub show_client_stats: bool,
}
