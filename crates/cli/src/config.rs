//! Runtime configuration, read from the environment once at startup.
//!
//! Every value is validated here; the process never starts with a
//! configuration it cannot use.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use store::{PromotionThresholds, StoreConfig, DEFAULT_CLAIM_TTL_MS, DEFAULT_STREAM_PREFIX};
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3838);
pub const DEFAULT_INTAKE_URL: &str = "http://localhost:8288";
/// The local event-intake dev server accepts any key.
pub const DEFAULT_INTAKE_KEY: &str = "local";

const DEFAULT_DRAIN_INTERVAL_MS: u64 = 1_000;
const DEFAULT_DRAIN_LIMIT: usize = 10;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15 * 60 * 1000;
const DEFAULT_TRIM_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// A configuration value that could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The variable is set but does not parse.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Environment variable name.
        key: &'static str,
        /// Value as found.
        value: String,
        /// What was expected.
        reason: &'static str,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Everything the binary needs to wire itself up.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub github_secret: Option<String>,
    pub vercel_secret: Option<String>,
    pub peer_secret: Option<String>,
    /// `None` when unset; startup then resolves the intake through the
    /// endpoint resolver.
    pub intake_url: Option<String>,
    pub intake_key: String,
    pub store: StoreConfig,
    pub drain_interval: Duration,
    pub drain_limit: usize,
    /// `None` disables the heartbeat ticker.
    pub heartbeat_interval: Option<Duration>,
    pub trim_max_age_ms: i64,
    /// Command line for the stage runner; `None` sends loop events to the
    /// intake instead of running them in-process.
    pub stage_command: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub log_format: LogFormat,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse_or::<SocketAddr>(&get, "BIND_ADDR", "a socket address")?
            .unwrap_or(DEFAULT_BIND_ADDR);

        let defaults = PromotionThresholds::default();
        let thresholds = PromotionThresholds {
            p1_ms: parse_or(&get, "BUS_PROMOTE_P1_MS", "milliseconds")?.unwrap_or(defaults.p1_ms),
            p2_ms: parse_or(&get, "BUS_PROMOTE_P2_MS", "milliseconds")?.unwrap_or(defaults.p2_ms),
            p3_ms: parse_or(&get, "BUS_PROMOTE_P3_MS", "milliseconds")?.unwrap_or(defaults.p3_ms),
        };

        let heartbeat_ms: u64 = parse_or(&get, "BUS_HEARTBEAT_INTERVAL_MS", "milliseconds")?
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);

        Ok(Self {
            bind_addr,
            github_secret: get("GITHUB_WEBHOOK_SECRET"),
            vercel_secret: get("VERCEL_WEBHOOK_SECRET"),
            peer_secret: get("PEER_WEBHOOK_SECRET"),
            intake_url: get("INNGEST_EVENT_URL"),
            intake_key: get("INNGEST_EVENT_KEY").unwrap_or_else(|| DEFAULT_INTAKE_KEY.to_string()),
            store: StoreConfig {
                stream_prefix: get("BUS_STREAM_PREFIX")
                    .unwrap_or_else(|| DEFAULT_STREAM_PREFIX.to_string()),
                thresholds,
                claim_ttl_ms: parse_or(&get, "BUS_CLAIM_TTL_MS", "milliseconds")?
                    .unwrap_or(DEFAULT_CLAIM_TTL_MS),
            },
            drain_interval: Duration::from_millis(
                parse_or(&get, "BUS_DRAIN_INTERVAL_MS", "milliseconds")?
                    .unwrap_or(DEFAULT_DRAIN_INTERVAL_MS)
                    .max(1),
            ),
            drain_limit: parse_or(&get, "BUS_DRAIN_LIMIT", "a count")?
                .unwrap_or(DEFAULT_DRAIN_LIMIT),
            heartbeat_interval: (heartbeat_ms > 0).then(|| Duration::from_millis(heartbeat_ms)),
            trim_max_age_ms: parse_or(&get, "BUS_TRIM_MAX_AGE_MS", "milliseconds")?
                .unwrap_or(DEFAULT_TRIM_MAX_AGE_MS),
            stage_command: get("AGENT_STAGE_COMMAND"),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            log_format: match get("LOG_FORMAT").as_deref() {
                None | Some("json") => LogFormat::Json,
                Some("pretty") => LogFormat::Pretty,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT",
                        value: other.to_string(),
                        reason: "json or pretty",
                    })
                }
            },
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    reason: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid { key, value, reason })
        })
        .transpose()
}
