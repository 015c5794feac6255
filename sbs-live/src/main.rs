//! sbs-live: CLI for live SBS tracking and offline capture decoding.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use sbs_core::config::{self, Clock, Config};
use sbs_core::{decode_line, merge, AircraftTrack, SbsError, TimestampFormat, TrackEvent, TrackTable};
use sbs_live::engine::{Engine, EngineConfig};
use sbs_live::feed::FeedError;
use sbs_live::stop::stop_channel;
use sbs_live::web::{self, AppState};

#[derive(Parser)]
#[command(name = "sbs-live", version, about = "Live ADS-B tracking from a BaseStation (SBS) feed")]
struct Cli {
    /// Config file (default: ~/.sbs-track/config.yaml)
    #[arg(long, global = true, env = "SBS_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to an SBS feed and track aircraft until Ctrl-C
    Live {
        #[command(flatten)]
        overrides: Overrides,

        /// Seconds between summary tables (0 disables)
        #[arg(long, default_value = "10")]
        print_interval: u64,

        /// Seconds to wait before reconnecting (0 exits after the first session)
        #[arg(long, default_value = "5")]
        reconnect_delay: u64,

        /// Serve the read-only HTTP API
        #[arg(long)]
        serve: bool,
    },

    /// Decode an SBS capture file and print the aircraft table
    Decode {
        /// Path to SBS capture (one message per line), or - for stdin
        file: PathBuf,

        /// Print each decoded message as JSON instead of the summary table
        #[arg(short, long)]
        raw: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Write the resolved configuration to the config file
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Settings that override the config file. Flags win over environment.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// SBS feed host
    #[arg(long, env = "SBS_HOST")]
    host: Option<String>,

    /// SBS feed port
    #[arg(long, env = "SBS_PORT")]
    port: Option<u16>,

    /// chrono format for "<date> <time>" timestamp pairs
    #[arg(long, env = "SBS_TIMESTAMP_FORMAT")]
    timestamp_format: Option<String>,

    /// Clock the feed's timestamps are written in: local or utc
    #[arg(long, env = "SBS_CLOCK")]
    clock: Option<Clock>,

    /// Seconds without a message before a track is dropped
    #[arg(long, env = "SBS_STALE_AFTER")]
    stale_after: Option<u64>,

    /// Milliseconds between reaper passes
    #[arg(long)]
    reap_interval_ms: Option<u64>,

    /// HTTP API bind host
    #[arg(long, env = "SBS_API_HOST")]
    api_host: Option<String>,

    /// HTTP API port
    #[arg(long, env = "SBS_API_PORT")]
    api_port: Option<u16>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.feed.host = host.clone();
        }
        if let Some(port) = self.port {
            config.feed.port = port;
        }
        if let Some(format) = &self.timestamp_format {
            config.feed.timestamp_format = format.clone();
        }
        if let Some(clock) = self.clock {
            config.feed.clock = clock;
        }
        if let Some(secs) = self.stale_after {
            config.tracking.stale_after_secs = secs;
        }
        if let Some(ms) = self.reap_interval_ms {
            config.tracking.reap_interval_ms = ms;
        }
        if let Some(host) = &self.api_host {
            config.dashboard.host = host.clone();
        }
        if let Some(port) = self.api_port {
            config.dashboard.port = port;
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Sbs(#[from] SbsError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("API server failed: {0}")]
    Serve(io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(config::config_file);

    let result = match cli.command {
        Commands::Live {
            overrides,
            print_interval,
            reconnect_delay,
            serve,
        } => {
            let config = resolve_config(&config_path, &overrides);
            cmd_live(&config, print_interval, reconnect_delay, serve).await
        }
        Commands::Decode {
            file,
            raw,
            overrides,
        } => {
            let config = resolve_config(&config_path, &overrides);
            cmd_decode(&config, &file, raw)
        }
        Commands::Config { overrides } => {
            let config = resolve_config(&config_path, &overrides);
            cmd_config(&config, &config_path)
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

/// Log to stderr so tables on stdout stay clean.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Default < config file < environment < flag.
fn resolve_config(path: &Path, overrides: &Overrides) -> Config {
    let mut config = config::load_config_from(path);
    overrides.apply(&mut config);
    config
}

// ---------------------------------------------------------------------------
// live
// ---------------------------------------------------------------------------

async fn cmd_live(
    config: &Config,
    print_interval: u64,
    reconnect_delay: u64,
    serve: bool,
) -> Result<(), CliError> {
    let mut engine_config = EngineConfig::from_config(config)?;
    engine_config.reconnect_delay = (reconnect_delay > 0).then(|| Duration::from_secs(reconnect_delay));

    let (mut engine, mut events) = Engine::start_subscribed(engine_config);
    let (shutdown, shutdown_signal) = stop_channel();

    // Change events at debug level.
    let mut event_stop = shutdown_signal.clone();
    let event_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = event_stop.stopped() => break,
                event = events.recv() => match event {
                    Some(event) => log_event(&event),
                    None => break,
                },
            }
        }
    });

    let api = if serve {
        let state = Arc::new(AppState::from_engine(&engine));
        let host = config.dashboard.host.clone();
        let port = config.dashboard.port;
        let signal = shutdown_signal.clone();
        Some(tokio::spawn(async move {
            web::serve(state, &host, port, signal).await
        }))
    } else {
        None
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(print_interval.max(1)));
    ticker.tick().await;

    let feed_end = loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!("cannot listen for Ctrl-C: {e}");
                }
                info!("shutting down");
                break None;
            }
            // Only resolves on its own in single-session mode.
            end = engine.finished() => break Some(end),
            _ = ticker.tick(), if print_interval > 0 => {
                let counters = engine.stats().counters();
                println!();
                println!(
                    "Feed {:?}: {} lines, {} merged, {} rejected, {} aircraft",
                    engine.feed_state(),
                    counters.lines,
                    counters.merged,
                    counters.rejected,
                    engine.table().len()
                );
                print_table(&engine.snapshot());
            }
        }
    };

    shutdown.stop();
    let feed_result = engine.stop().await;
    if let Err(e) = event_log.await {
        warn!("event logger failed: {e}");
    }
    if let Some(api) = api {
        match api.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CliError::Serve(e)),
            Err(e) => warn!("API task failed: {e}"),
        }
    }
    match feed_end {
        Some(Err(e)) => return Err(e.into()),
        Some(Ok(end)) => info!("feed session ended: {end:?}"),
        None => {}
    }
    feed_result?;
    Ok(())
}

fn log_event(event: &TrackEvent) {
    match event {
        TrackEvent::NewAircraft { track } => debug!("new aircraft {}", track.hex_ident),
        TrackEvent::AircraftUpdate { track } => debug!(
            "update {} ({} messages)",
            track.hex_ident, track.message_count
        ),
        TrackEvent::Removed { hex_idents } => debug!("removed {}", hex_idents.join(",")),
    }
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

fn cmd_decode(config: &Config, file: &Path, raw: bool) -> Result<(), CliError> {
    let format = TimestampFormat::new(&config.feed.timestamp_format)?;
    let clock = config.feed.clock;

    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(file).map_err(|source| CliError::Open {
            path: file.display().to_string(),
            source,
        })?;
        Box::new(io::BufReader::new(f))
    };

    let table = TrackTable::new();
    let mut total_lines = 0u64;
    let mut rejected = 0u64;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("read error: {e}");
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        total_lines += 1;

        let msg = decode_line(line, &format);
        if raw {
            match serde_json::to_string(&msg) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("cannot encode message: {e}"),
            }
        }
        if msg.is_rejected() {
            rejected += 1;
            continue;
        }
        merge(&table, &msg, clock.now());
    }

    if !raw {
        println!();
        println!(
            "Lines: {total_lines} read, {} decoded, {rejected} rejected, {} aircraft",
            total_lines - rejected,
            table.len()
        );
        print_table(&table.snapshot());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config(config: &Config, path: &Path) -> Result<(), CliError> {
    TimestampFormat::new(&config.feed.timestamp_format)?;
    config::save_config_to(config, path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_table(tracks: &[AircraftTrack]) {
    if tracks.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Hex", "Callsign", "Squawk", "Alt (ft)", "Speed (kts)", "Trk", "VRate", "Lat", "Lon",
        "Gnd", "Msgs", "Last seen",
    ]);

    for ac in tracks {
        table.add_row(vec![
            Cell::new(&ac.hex_ident),
            Cell::new(ac.callsign.as_deref().unwrap_or("-")),
            Cell::new(ac.squawk.as_deref().unwrap_or("-")),
            Cell::new(opt(ac.altitude_ft, |a| a.to_string())),
            Cell::new(opt(ac.ground_speed_kts, |s| s.to_string())),
            Cell::new(opt(ac.track_deg, |t| t.to_string())),
            Cell::new(opt(ac.vertical_rate_fpm, |v| format!("{v:+}"))),
            Cell::new(opt(ac.lat, |l| format!("{l:.4}"))),
            Cell::new(opt(ac.lon, |l| format!("{l:.4}"))),
            Cell::new(if ac.on_ground { "yes" } else { "no" }),
            Cell::new(ac.message_count),
            Cell::new(ac.last_logged_time.format("%H:%M:%S")),
        ]);
    }

    println!("{table}");
}

fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> String) -> String {
    value.map(f).unwrap_or_else(|| "-".into())
}
