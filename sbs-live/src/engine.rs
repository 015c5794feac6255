//! Engine: owns the track table, notifier, feed task and reaper task.
//!
//! The engine is configured entirely through [`EngineConfig`]; reading the
//! config file and environment is the CLI's job.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sbs_core::config::{Clock, Config};
use sbs_core::track::STALE_TIMEOUT_SECS;
use sbs_core::{AircraftTrack, TimestampFormat, TrackTable};

use crate::feed::{
    FeedError, FeedReader, FeedSettings, FeedState, FeedStats, SessionEnd,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_POLL_TIMEOUT,
};
use crate::notify::{Notifier, Subscription, DEFAULT_EVENT_CAPACITY};
use crate::reaper::{Reaper, DEFAULT_REAP_INTERVAL};
use crate::stop::{stop_channel, StopHandle};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub stale_after: Duration,
    pub reap_interval: Duration,
    pub poll_timeout: Duration,
    pub connect_timeout: Duration,
    /// Wait between connection attempts. `None` runs a single session.
    pub reconnect_delay: Option<Duration>,
    pub timestamp_format: TimestampFormat,
    pub clock: Clock,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            host: "localhost".into(),
            port: 30003,
            stale_after: Duration::from_secs(STALE_TIMEOUT_SECS as u64),
            reap_interval: DEFAULT_REAP_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: Some(Duration::from_secs(5)),
            timestamp_format: TimestampFormat::default(),
            clock: Clock::Local,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Engine parameters from a resolved config file. Fails only on an
    /// invalid timestamp format.
    pub fn from_config(config: &Config) -> sbs_core::Result<Self> {
        Ok(EngineConfig {
            host: config.feed.host.clone(),
            port: config.feed.port,
            stale_after: Duration::from_secs(config.tracking.stale_after_secs),
            reap_interval: Duration::from_millis(config.tracking.reap_interval_ms),
            timestamp_format: TimestampFormat::new(&config.feed.timestamp_format)?,
            clock: config.feed.clock,
            ..EngineConfig::default()
        })
    }

    fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            host: self.host.clone(),
            port: self.port,
            poll_timeout: self.poll_timeout,
            connect_timeout: self.connect_timeout,
            timestamp_format: self.timestamp_format.clone(),
            clock: self.clock,
        }
    }

    fn stale_threshold(&self) -> TimeDelta {
        TimeDelta::from_std(self.stale_after).unwrap_or(TimeDelta::MAX)
    }
}

pub struct Engine {
    table: Arc<TrackTable>,
    notifier: Notifier,
    stats: Arc<FeedStats>,
    state: watch::Receiver<FeedState>,
    stop: StopHandle,
    /// `None` once [`Engine::finished`] has reported the outcome.
    feed: Option<JoinHandle<Result<SessionEnd, FeedError>>>,
    reaper: JoinHandle<()>,
}

impl Engine {
    /// Spawn the feed and reaper tasks. Must be called inside a tokio
    /// runtime.
    pub fn start(config: EngineConfig) -> Engine {
        let notifier = Notifier::new(config.event_capacity);
        Engine::spawn(config, notifier)
    }

    /// Like [`Engine::start`], with a subscription taken before any task
    /// runs, so no event is missed.
    pub fn start_subscribed(config: EngineConfig) -> (Engine, Subscription) {
        let notifier = Notifier::new(config.event_capacity);
        let events = notifier.subscribe();
        (Engine::spawn(config, notifier), events)
    }

    fn spawn(config: EngineConfig, notifier: Notifier) -> Engine {
        let table = Arc::new(TrackTable::with_sink(Arc::new(notifier.clone())));
        let (stop, signal) = stop_channel();

        let mut reader = FeedReader::new(config.feed_settings(), table.clone(), signal.clone());
        let stats = reader.stats();
        let state = reader.watch_state();
        let delay = config.reconnect_delay;
        let feed = tokio::spawn(async move { reader.run_with_reconnect(delay).await });

        let reaper = Reaper::new(
            table.clone(),
            config.reap_interval,
            config.stale_threshold(),
            config.clock,
        );
        let reaper = tokio::spawn(reaper.run(signal));

        info!("engine started for {}:{}", config.host, config.port);
        Engine {
            table,
            notifier,
            stats,
            state,
            stop,
            feed: Some(feed),
            reaper,
        }
    }

    pub fn table(&self) -> Arc<TrackTable> {
        self.table.clone()
    }

    pub fn snapshot(&self) -> Vec<AircraftTrack> {
        self.table.snapshot()
    }

    /// Events published after this call, in mutation order. The tasks are
    /// already running, so subscribe first and then take a snapshot to
    /// cover tracks created earlier, or use [`Engine::start_subscribed`].
    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    pub fn feed_state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        self.stats.clone()
    }

    /// Resolves when the feed task ends: after its only session when
    /// `reconnect_delay` is `None`, on a stop, or on a failed connect in
    /// single-session mode. The reaper is stopped along with it.
    ///
    /// Cancel-safe. Once the outcome has been returned, later calls report
    /// `Ok(SessionEnd::Stopped)`.
    pub async fn finished(&mut self) -> Result<SessionEnd, FeedError> {
        let Some(feed) = self.feed.as_mut() else {
            return Ok(SessionEnd::Stopped);
        };
        let outcome = feed.await;
        self.feed = None;
        self.stop.stop();
        outcome?
    }

    /// Signal both tasks and wait for them. Returns the feed's connect error
    /// if it gave up before the stop arrived and [`Engine::finished`] has
    /// not already reported it.
    pub async fn stop(self) -> Result<(), FeedError> {
        self.stop.stop();

        let feed = match self.feed {
            Some(handle) => handle.await?.map(|_| ()),
            None => Ok(()),
        };
        if let Err(e) = self.reaper.await {
            warn!("reaper task failed: {e}");
        }
        info!("engine stopped, {} aircraft tracked", self.table.len());

        feed
    }
}
