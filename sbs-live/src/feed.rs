//! SBS feed reader: TCP connection → buffered lines → decode → merge.
//!
//! State machine:
//!
//! ```text
//! Disconnected → Connecting → Streaming → Disconnected   (close / I/O error)
//!        any state ──stop──→ Stopped
//! ```
//!
//! One call to [`FeedReader::run_session`] is one connection attempt. What to
//! do after a dropped connection is the caller's decision;
//! [`FeedReader::run_with_reconnect`] is the usual retry-after-delay policy.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use sbs_core::config::Clock;
use sbs_core::{decode_line, merge, Decoded, Merged, TimestampFormat, TrackTable};

use crate::stop::StopSignal;

/// Longest accepted line. A real SBS line is well under 200 bytes; anything
/// past this is dropped up to its newline.
pub const MAX_LINE_LEN: usize = 4096;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
    Stopped,
}

/// How a connected session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Stop was requested. Terminal.
    Stopped,
    /// Peer closed the connection. Reconnect-needed.
    PeerClosed,
    /// Socket error while streaming. Reconnect-needed.
    ReadFailed(io::Error),
}

impl SessionEnd {
    pub fn needs_reconnect(&self) -> bool {
        !matches!(self, SessionEnd::Stopped)
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("feed task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on one socket read; also the worst-case stop latency if
    /// the stop signal were not raced against the read.
    pub poll_timeout: Duration,
    pub connect_timeout: Duration,
    pub timestamp_format: TimestampFormat,
    pub clock: Clock,
}

impl FeedSettings {
    pub fn new(host: &str, port: u16) -> Self {
        FeedSettings {
            host: host.to_string(),
            port,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timestamp_format: TimestampFormat::default(),
            clock: Clock::Local,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Running counters, shared with the engine and the HTTP API.
#[derive(Debug, Default)]
pub struct FeedStats {
    lines: AtomicU64,
    merged: AtomicU64,
    rejected: AtomicU64,
    oversized: AtomicU64,
    sessions: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedCounters {
    pub lines: u64,
    pub merged: u64,
    pub rejected: u64,
    pub oversized: u64,
    pub sessions: u64,
}

impl FeedStats {
    pub fn counters(&self) -> FeedCounters {
        FeedCounters {
            lines: self.lines.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct FeedReader {
    settings: FeedSettings,
    table: Arc<TrackTable>,
    stats: Arc<FeedStats>,
    state: watch::Sender<FeedState>,
    stop: StopSignal,
}

impl FeedReader {
    pub fn new(settings: FeedSettings, table: Arc<TrackTable>, stop: StopSignal) -> Self {
        let (state, _) = watch::channel(FeedState::Disconnected);
        FeedReader {
            settings,
            table,
            stats: Arc::new(FeedStats::default()),
            state,
            stop,
        }
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        self.stats.clone()
    }

    /// Receiver that follows the state machine.
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    fn set_state(&self, state: FeedState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            debug!("feed {:?} -> {:?}", prev, state);
        }
    }

    /// Decode and merge one line. Rejected lines change nothing.
    pub fn process_line(&self, line: &str) -> Option<Merged> {
        self.stats.lines.fetch_add(1, Ordering::Relaxed);

        let msg = decode_line(line, &self.settings.timestamp_format);
        if let Decoded::Rejected(reason) = &msg {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            trace!("dropped line ({reason}): {line}");
            return None;
        }

        let merged = merge(&self.table, &msg, self.settings.clock.now());
        if let Some(m) = &merged {
            self.stats.merged.fetch_add(1, Ordering::Relaxed);
            if m.created {
                debug!("new aircraft {}", m.hex_ident);
            }
        }
        merged
    }

    /// One raw line off the socket, newline included. Invalid UTF-8 is
    /// replaced rather than rejected; blank lines are skipped.
    fn process_raw(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\r', '\n']);
        if !line.trim().is_empty() {
            self.process_line(line);
        }
    }

    /// Connect once and stream until the peer closes, the socket fails, or
    /// a stop is requested. Only a failed connect is an `Err`.
    pub async fn run_session(&mut self) -> Result<SessionEnd, FeedError> {
        if self.stop.is_stopped() {
            self.set_state(FeedState::Stopped);
            return Ok(SessionEnd::Stopped);
        }

        let addr = self.settings.addr();
        self.set_state(FeedState::Connecting);

        let connect = tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(&addr));
        let stream = tokio::select! {
            res = connect => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => {
                    self.set_state(FeedState::Disconnected);
                    return Err(FeedError::Connect { addr, source });
                }
                Err(_) => {
                    self.set_state(FeedState::Disconnected);
                    return Err(FeedError::Connect {
                        addr,
                        source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                    });
                }
            },
            _ = self.stop.stopped() => {
                self.set_state(FeedState::Stopped);
                return Ok(SessionEnd::Stopped);
            }
        };

        self.stats.sessions.fetch_add(1, Ordering::Relaxed);
        self.set_state(FeedState::Streaming);
        info!("streaming SBS from {addr}");

        let mut reader = BufReader::new(stream);
        let mut line: Vec<u8> = Vec::with_capacity(256);
        let mut discarding = false;
        let poll_timeout = self.settings.poll_timeout;

        // `read_until` is cancel-safe: bytes read before a timeout or stop
        // stay in `line` and the next call continues the same line.
        let end = loop {
            let limit = (MAX_LINE_LEN + 1 - line.len()) as u64;
            let mut bounded = (&mut reader).take(limit);
            let read = bounded.read_until(b'\n', &mut line);

            tokio::select! {
                _ = self.stop.stopped() => break SessionEnd::Stopped,
                res = tokio::time::timeout(poll_timeout, read) => match res {
                    // No data within the poll window: not an error.
                    Err(_) => continue,
                    Ok(Ok(0)) => break SessionEnd::PeerClosed,
                    Ok(Ok(_)) => {
                        if line.last() == Some(&b'\n') {
                            if discarding {
                                discarding = false;
                            } else {
                                self.process_raw(&line);
                            }
                            line.clear();
                        } else if line.len() > MAX_LINE_LEN {
                            if !discarding {
                                self.stats.oversized.fetch_add(1, Ordering::Relaxed);
                                debug!("dropping line longer than {MAX_LINE_LEN} bytes");
                            }
                            discarding = true;
                            line.clear();
                        }
                    }
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Ok(Err(e)) => break SessionEnd::ReadFailed(e),
                },
            }
        };

        drop(reader);
        if !line.is_empty() {
            debug!("discarding {} bytes of partial line", line.len());
        }

        match &end {
            SessionEnd::Stopped => {
                info!("feed from {addr} stopped");
                self.set_state(FeedState::Stopped);
            }
            SessionEnd::PeerClosed => {
                warn!("feed {addr} closed by peer");
                self.set_state(FeedState::Disconnected);
            }
            SessionEnd::ReadFailed(e) => {
                warn!("feed {addr} read failed: {e}");
                self.set_state(FeedState::Disconnected);
            }
        }
        Ok(end)
    }

    /// Run sessions back to back, waiting `delay` between attempts, until a
    /// stop is requested. With `delay = None` the first session's outcome is
    /// returned as-is.
    pub async fn run_with_reconnect(
        &mut self,
        delay: Option<Duration>,
    ) -> Result<SessionEnd, FeedError> {
        loop {
            let outcome = self.run_session().await;
            let Some(delay) = delay else {
                return outcome;
            };

            match outcome {
                Ok(SessionEnd::Stopped) => return Ok(SessionEnd::Stopped),
                Ok(_) => {}
                Err(e) => warn!("{e}"),
            }

            info!("reconnecting in {:.1}s", delay.as_secs_f64());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.stopped() => {
                    self.set_state(FeedState::Stopped);
                    return Ok(SessionEnd::Stopped);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::stop::stop_channel;
    use sbs_core::TrackEvent;
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const POSITION: &str = "MSG,3,1,1,ABC123,1,2024/12/26,14:23:45.123,2024/12/26,14:23:45.456,,38000,,,-78.901,45.123,,,0,0,0,0\r\n";
    const IDENT: &str = "MSG,1,1,1,ABC123,1,2024/12/26,14:23:46.000,2024/12/26,14:23:46.100,UAL123,,,,,,,,,,,\r\n";

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn settings(addr: SocketAddr) -> FeedSettings {
        let mut s = FeedSettings::new(&addr.ip().to_string(), addr.port());
        s.poll_timeout = Duration::from_millis(50);
        s
    }

    #[test]
    fn test_process_line_counts() {
        let table = Arc::new(TrackTable::new());
        let (_handle, signal) = stop_channel();
        let reader = FeedReader::new(FeedSettings::new("localhost", 30003), table.clone(), signal);

        assert!(reader.process_line(POSITION.trim_end()).is_some());
        assert!(reader.process_line("MSG,3,1").is_none());
        assert!(reader.process_line("garbage").is_none());

        let c = reader.stats().counters();
        assert_eq!(c.lines, 3);
        assert_eq!(c.merged, 1);
        assert_eq!(c.rejected, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_short_line_publishes_no_event() {
        let notifier = Notifier::default();
        let mut events = notifier.subscribe();
        let table = Arc::new(TrackTable::with_sink(Arc::new(notifier.clone())));
        let (_handle, signal) = stop_channel();
        let reader = FeedReader::new(FeedSettings::new("localhost", 30003), table.clone(), signal);

        assert!(reader.process_line("MSG,3,1,1,ABC123").is_none());
        assert!(events.try_recv().is_none());
        assert!(table.is_empty());

        // the same table does publish for a well-formed line
        assert!(reader.process_line(POSITION.trim_end()).is_some());
        assert!(matches!(
            events.try_recv(),
            Some(TrackEvent::NewAircraft { track }) if track.hex_ident == "ABC123"
        ));
    }

    #[tokio::test]
    async fn test_oversized_line_dropped_up_to_newline() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let junk = vec![b'x'; MAX_LINE_LEN * 3];
            sock.write_all(&junk).await.unwrap();
            sock.write_all(b"\n\r\n").await.unwrap();
            sock.write_all(POSITION.as_bytes()).await.unwrap();
        });

        let table = Arc::new(TrackTable::new());
        let (_handle, signal) = stop_channel();
        let mut reader = FeedReader::new(settings(addr), table.clone(), signal);

        let end = reader.run_session().await.unwrap();
        server.await.unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed));

        let c = reader.stats().counters();
        assert_eq!(c.oversized, 1);
        // neither the junk nor the blank line reached the decoder
        assert_eq!(c.lines, 1);
        assert_eq!(c.merged, 1);
        assert!(table.contains("ABC123"));
    }

    #[tokio::test]
    async fn test_session_reassembles_split_lines_then_peer_closes() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let (a, b) = POSITION.split_at(40);
            sock.write_all(a.as_bytes()).await.unwrap();
            sock.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
            sock.write_all(b.as_bytes()).await.unwrap();
            sock.write_all(b"MSG,3,short\n").await.unwrap();
            sock.write_all(IDENT.as_bytes()).await.unwrap();
            // dropped here: peer close
        });

        let table = Arc::new(TrackTable::new());
        let (_handle, signal) = stop_channel();
        let mut reader = FeedReader::new(settings(addr), table.clone(), signal);

        let end = reader.run_session().await.unwrap();
        server.await.unwrap();

        assert!(matches!(end, SessionEnd::PeerClosed));
        assert!(end.needs_reconnect());
        assert_eq!(reader.state(), FeedState::Disconnected);

        let t = table.get("ABC123").unwrap();
        assert_eq!(t.altitude_ft, Some(38000));
        assert_eq!(t.callsign.as_deref(), Some("UAL123"));

        let c = reader.stats().counters();
        assert_eq!(c.merged, 2);
        assert_eq!(c.rejected, 1);
        assert_eq!(c.sessions, 1);
    }

    #[tokio::test]
    async fn test_stop_while_streaming_idle() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            // hold the connection open without sending anything
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(sock);
        });

        let table = Arc::new(TrackTable::new());
        let (handle, signal) = stop_channel();
        let mut reader = FeedReader::new(settings(addr), table, signal);
        let mut state = reader.watch_state();

        let task = tokio::spawn(async move {
            let end = reader.run_session().await;
            (end, reader)
        });

        state.wait_for(|s| *s == FeedState::Streaming).await.unwrap();
        handle.stop();

        let (end, reader) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stop must be observed within one poll")
            .unwrap();
        assert!(matches!(end, Ok(SessionEnd::Stopped)));
        assert_eq!(reader.state(), FeedState::Stopped);
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        // Bind then drop to get a port nobody listens on.
        let (listener, addr) = listener().await;
        drop(listener);

        let table = Arc::new(TrackTable::new());
        let (_handle, signal) = stop_channel();
        let mut reader = FeedReader::new(settings(addr), table, signal);

        let err = reader.run_session().await.unwrap_err();
        assert!(matches!(err, FeedError::Connect { .. }));
        assert_eq!(reader.state(), FeedState::Disconnected);
    }

    #[tokio::test]
    async fn test_already_stopped_does_not_connect() {
        let (listener, addr) = listener().await;
        drop(listener);

        let (handle, signal) = stop_channel();
        handle.stop();
        let mut reader = FeedReader::new(settings(addr), Arc::new(TrackTable::new()), signal);
        assert!(matches!(reader.run_session().await, Ok(SessionEnd::Stopped)));
        assert_eq!(reader.state(), FeedState::Stopped);
    }

    #[tokio::test]
    async fn test_reconnect_after_peer_close() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            for line in [POSITION, IDENT] {
                let (mut sock, _) = listener.accept().await.unwrap();
                sock.write_all(line.as_bytes()).await.unwrap();
            }
        });

        let table = Arc::new(TrackTable::new());
        let (handle, signal) = stop_channel();
        let mut reader = FeedReader::new(settings(addr), table.clone(), signal);
        let stats = reader.stats();

        let task = tokio::spawn(async move {
            reader
                .run_with_reconnect(Some(Duration::from_millis(20)))
                .await
        });

        // wait until both sessions delivered their line
        for _ in 0..100 {
            if table
                .get("ABC123")
                .is_some_and(|t| t.callsign.is_some() && t.altitude_ft.is_some())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.stop();

        let end = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(end, Ok(SessionEnd::Stopped)));
        assert!(stats.counters().sessions >= 2);
        server.await.unwrap();
    }
}
