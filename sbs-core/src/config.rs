//! Configuration file management for sbs-track.
//!
//! Reads/writes `~/.sbs-track/config.yaml` with feed address, timestamp
//! format, tracking intervals and dashboard address. The tracking engine
//! itself never reads this file; the CLI resolves it and passes explicit
//! parameters.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, Utc};

use crate::decode::DEFAULT_TIMESTAMP_FORMAT;
use crate::track::STALE_TIMEOUT_SECS;
use crate::types::SbsError;

/// Which wall clock SBS timestamps are written in. dump1090 and
/// BaseStation use the receiver's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    Local,
    Utc,
}

impl Clock {
    /// Current time on this clock, comparable with decoded timestamps.
    pub fn now(self) -> NaiveDateTime {
        match self {
            Clock::Local => Local::now().naive_local(),
            Clock::Utc => Utc::now().naive_utc(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Clock::Local => "local",
            Clock::Utc => "utc",
        }
    }
}

impl std::str::FromStr for Clock {
    type Err = SbsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Clock::Local),
            "utc" => Ok(Clock::Utc),
            other => Err(SbsError::Config(format!("unknown clock {other:?}"))),
        }
    }
}

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub feed: FeedConfig,
    pub tracking: TrackingConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub timestamp_format: String,
    pub clock: Clock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub stale_after_secs: u64,
    pub reap_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig {
                host: "localhost".into(),
                port: 30003,
                timestamp_format: DEFAULT_TIMESTAMP_FORMAT.into(),
                clock: Clock::Local,
            },
            tracking: TrackingConfig {
                stale_after_secs: STALE_TIMEOUT_SECS as u64,
                reap_interval_ms: 1000,
            },
            dashboard: DashboardConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
        }
    }
}

/// Get the config directory path (`~/.sbs-track/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".sbs-track")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.sbs-track/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) => {
            tracing::warn!("cannot read {}: {e}, using defaults", path.display());
            Config::default()
        }
    }
}

/// Save config to `~/.sbs-track/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, SbsError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), SbsError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SbsError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| SbsError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys and unparseable values
/// keep their defaults.
fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = strip_comment(line).trim();
        if stripped.is_empty() {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = if val.is_empty() {
                Some(key.to_string())
            } else {
                None
            };
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match (section, key) {
            ("feed", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.feed.host = v;
                }
            }
            ("feed", "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.feed.port = v;
                }
            }
            ("feed", "timestamp_format") => {
                if let Some(v) = parse_string_value(val) {
                    config.feed.timestamp_format = v;
                }
            }
            ("feed", "clock") => {
                if let Some(v) = parse_string_value(val).and_then(|v| v.parse().ok()) {
                    config.feed.clock = v;
                }
            }
            ("tracking", "stale_after_secs") => {
                if let Ok(v) = val.parse::<u64>() {
                    config.tracking.stale_after_secs = v;
                }
            }
            ("tracking", "reap_interval_ms") => {
                if let Ok(v) = val.parse::<u64>() {
                    config.tracking.reap_interval_ms = v;
                }
            }
            ("dashboard", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.dashboard.host = v;
                }
            }
            ("dashboard", "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.dashboard.port = v;
                }
            }
            _ => tracing::debug!("ignoring config key {section}.{key}"),
        }
    }

    config
}

// `#` starts a comment unless it sits inside quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            ('#', None) => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let lines = [
        "# sbs-track configuration".to_string(),
        String::new(),
        "feed:".into(),
        format!("  host: \"{}\"", config.feed.host),
        format!("  port: {}", config.feed.port),
        format!("  timestamp_format: \"{}\"", config.feed.timestamp_format),
        format!("  clock: {}", config.feed.clock.as_str()),
        String::new(),
        "tracking:".into(),
        format!("  stale_after_secs: {}", config.tracking.stale_after_secs),
        format!("  reap_interval_ms: {}", config.tracking.reap_interval_ms),
        String::new(),
        "dashboard:".into(),
        format!("  host: \"{}\"", config.dashboard.host),
        format!("  port: {}", config.dashboard.port),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
