//! Concurrent keyed store of all live tracks.
//!
//! One coarse `RwLock` over the map: upserts and reaps take the write lock,
//! snapshots the read lock. Message rates on an SBS feed are tens per second,
//! so per-key locking isn't worth it.
//!
//! An optional [`TrackSink`] is called while the write lock is still held,
//! which makes the event order seen downstream identical to the order the
//! mutations were applied, whichever task applied them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::track::AircraftTrack;
use crate::types::HexIdent;

// ---------------------------------------------------------------------------
// Track events (output)
// ---------------------------------------------------------------------------

/// Table change notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackEvent {
    /// First message for this hex ident. Carries the post-merge track.
    NewAircraft { track: AircraftTrack },
    /// Existing track merged. Carries the post-merge track.
    AircraftUpdate { track: AircraftTrack },
    /// Tracks evicted by one reap pass.
    Removed { hex_idents: Vec<HexIdent> },
}

impl TrackEvent {
    /// Keys touched by this event.
    pub fn hex_idents(&self) -> Vec<&str> {
        match self {
            TrackEvent::NewAircraft { track } | TrackEvent::AircraftUpdate { track } => {
                vec![track.hex_ident.as_str()]
            }
            TrackEvent::Removed { hex_idents } => hex_idents.iter().map(|h| h.as_str()).collect(),
        }
    }
}

/// Receives every table mutation as it is committed.
///
/// Called with the table's write lock held: implementations must not block
/// and must not call back into the table.
pub trait TrackSink: Send + Sync {
    fn publish(&self, event: TrackEvent);
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TrackTable {
    tracks: RwLock<HashMap<HexIdent, AircraftTrack>>,
    sink: Option<Arc<dyn TrackSink>>,
}

impl TrackTable {
    pub fn new() -> Self {
        TrackTable::default()
    }

    pub fn with_sink(sink: Arc<dyn TrackSink>) -> Self {
        TrackTable {
            tracks: RwLock::new(HashMap::new()),
            sink: Some(sink),
        }
    }

    // A panic elsewhere can't leave a half-written track behind (upsert
    // swaps in a finished copy), so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<HexIdent, AircraftTrack>> {
        self.tracks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<HexIdent, AircraftTrack>> {
        self.tracks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create-if-absent and apply `mutator`, atomically with respect to
    /// every other upsert, reap and snapshot.
    ///
    /// The mutator runs on a copy that replaces the stored track only once
    /// it returns. Returns the post-merge track and whether it was created.
    pub fn upsert<F>(
        &self,
        hex_ident: &str,
        created_at: NaiveDateTime,
        mutator: F,
    ) -> (AircraftTrack, bool)
    where
        F: FnOnce(&mut AircraftTrack),
    {
        let mut tracks = self.write();

        let (mut track, created) = match tracks.get(hex_ident) {
            Some(existing) => (existing.clone(), false),
            None => (AircraftTrack::new(hex_ident, created_at), true),
        };
        mutator(&mut track);
        tracks.insert(hex_ident.to_string(), track.clone());

        if let Some(sink) = &self.sink {
            let event = if created {
                TrackEvent::NewAircraft {
                    track: track.clone(),
                }
            } else {
                TrackEvent::AircraftUpdate {
                    track: track.clone(),
                }
            };
            sink.publish(event);
        }

        (track, created)
    }

    /// Remove every track whose last logged message is more than
    /// `threshold` before `now`. Returns the removed keys, sorted.
    pub fn reap(&self, now: NaiveDateTime, threshold: TimeDelta) -> Vec<HexIdent> {
        let mut tracks = self.write();

        let mut removed: Vec<HexIdent> = tracks
            .iter()
            .filter(|(_, t)| t.is_stale(now, threshold))
            .map(|(k, _)| k.clone())
            .collect();
        if removed.is_empty() {
            return removed;
        }

        for k in &removed {
            tracks.remove(k);
        }
        removed.sort();

        if let Some(sink) = &self.sink {
            sink.publish(TrackEvent::Removed {
                hex_idents: removed.clone(),
            });
        }
        removed
    }

    /// Point-in-time copy of all tracks, most recently logged first.
    pub fn snapshot(&self) -> Vec<AircraftTrack> {
        let mut tracks: Vec<AircraftTrack> = self.read().values().cloned().collect();
        tracks.sort_by(|a, b| {
            b.last_logged_time
                .cmp(&a.last_logged_time)
                .then_with(|| a.hex_ident.cmp(&b.hex_ident))
        });
        tracks
    }

    pub fn get(&self, hex_ident: &str) -> Option<AircraftTrack> {
        self.read().get(hex_ident).cloned()
    }

    pub fn contains(&self, hex_ident: &str) -> bool {
        self.read().contains_key(hex_ident)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn ts(s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 26)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
            + TimeDelta::seconds(s as i64)
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TrackEvent>>,
    }

    impl TrackSink for Recorder {
        fn publish(&self, event: TrackEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let table = TrackTable::new();
        let (t, created) = table.upsert("ABC123", ts(0), |t| t.altitude_ft = Some(1000));
        assert!(created);
        assert_eq!(t.altitude_ft, Some(1000));

        let (t, created) = table.upsert("ABC123", ts(5), |t| t.callsign = Some("UAL1".into()));
        assert!(!created);
        assert_eq!(t.altitude_ft, Some(1000));
        assert_eq!(t.first_seen, ts(0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reap_threshold() {
        let table = TrackTable::new();
        table.upsert("OLD", ts(0), |_| {});
        table.upsert("FRESH", ts(1), |_| {});

        let now = ts(60);
        // OLD is 60s old (not more than 60), FRESH is 59s
        assert!(table.reap(now, TimeDelta::seconds(60)).is_empty());

        let removed = table.reap(ts(61), TimeDelta::seconds(60));
        assert_eq!(removed, vec!["OLD".to_string()]);
        assert!(!table.contains("OLD"));
        assert!(table.contains("FRESH"));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let table = TrackTable::new();
        table.upsert("A", ts(0), |t| t.altitude_ft = Some(1));
        let snap = table.snapshot();
        table.upsert("A", ts(1), |t| t.altitude_ft = Some(2));

        assert_eq!(snap[0].altitude_ft, Some(1));
        assert_eq!(table.get("A").unwrap().altitude_ft, Some(2));
    }

    #[test]
    fn test_snapshot_order() {
        let table = TrackTable::new();
        table.upsert("A", ts(0), |_| {});
        table.upsert("B", ts(10), |_| {});
        table.upsert("C", ts(5), |_| {});
        let order: Vec<_> = table.snapshot().into_iter().map(|t| t.hex_ident).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_sink_sees_mutations_in_order() {
        let recorder = Arc::new(Recorder::default());
        let table = TrackTable::with_sink(recorder.clone());

        table.upsert("A", ts(0), |_| {});
        table.upsert("A", ts(1), |_| {});
        table.reap(ts(100), TimeDelta::seconds(60));
        table.reap(ts(200), TimeDelta::seconds(60));

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 3, "empty reap must not publish");
        assert!(matches!(events[0], TrackEvent::NewAircraft { .. }));
        assert!(matches!(events[1], TrackEvent::AircraftUpdate { .. }));
        assert_eq!(events[2].hex_idents(), vec!["A"]);
    }

    #[test]
    fn test_concurrent_upserts_distinct_ids() {
        let table = TrackTable::new();
        let n_threads = 8;
        let per_thread = 250;

        std::thread::scope(|s| {
            for t in 0..n_threads {
                let table = &table;
                s.spawn(move || {
                    for i in 0..per_thread {
                        let id = format!("{:06X}", t * per_thread + i);
                        table.upsert(&id, ts(0), |tr| tr.message_count += 1);
                    }
                });
            }
        });

        assert_eq!(table.len(), n_threads * per_thread);
    }

    #[test]
    fn test_concurrent_upserts_same_id_not_lost() {
        let table = TrackTable::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        table.upsert("ABC123", ts(0), |tr| tr.message_count += 1);
                    }
                });
            }
        });
        assert_eq!(table.get("ABC123").unwrap().message_count, 2000);
    }
}
