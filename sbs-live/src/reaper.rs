//! Stale-track reaper: periodically evicts tracks that have gone quiet.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use sbs_core::config::Clock;
use sbs_core::{HexIdent, TrackTable};

use crate::stop::StopSignal;

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(1);

pub struct Reaper {
    table: Arc<TrackTable>,
    period: Duration,
    threshold: TimeDelta,
    clock: Clock,
}

impl Reaper {
    pub fn new(table: Arc<TrackTable>, period: Duration, threshold: TimeDelta, clock: Clock) -> Self {
        Reaper {
            table,
            period,
            threshold,
            clock,
        }
    }

    /// One pass at `now`. Returns the evicted identifiers, sorted.
    pub fn tick(&self, now: NaiveDateTime) -> Vec<HexIdent> {
        let removed = self.table.reap(now, self.threshold);
        if !removed.is_empty() {
            debug!("reaped {} stale aircraft: {}", removed.len(), removed.join(","));
        }
        removed
    }

    /// Tick every `period` until stopped. A late tick is skipped rather
    /// than bunched.
    pub async fn run(self, mut stop: StopSignal) {
        let mut interval = tokio::time::interval(self.period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "reaper running every {:.1}s, stale after {}s",
            self.period.as_secs_f64(),
            self.threshold.num_seconds()
        );

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = interval.tick() => {
                    self.tick(self.clock.now());
                }
            }
        }
        debug!("reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::stop_channel;
    use chrono::NaiveDate;

    fn ts(s: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 26)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
            + TimeDelta::seconds(s)
    }

    #[test]
    fn test_tick_uses_threshold() {
        let table = Arc::new(TrackTable::new());
        table.upsert("OLD", ts(0), |_| {});
        table.upsert("NEW", ts(50), |_| {});

        let reaper = Reaper::new(
            table.clone(),
            DEFAULT_REAP_INTERVAL,
            TimeDelta::seconds(60),
            Clock::Local,
        );
        assert!(reaper.tick(ts(60)).is_empty());
        assert_eq!(reaper.tick(ts(61)), vec!["OLD".to_string()]);
        assert!(table.contains("NEW"));
        assert_eq!(reaper.tick(ts(111)), vec!["NEW".to_string()]);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_run_evicts_and_stops() {
        let table = Arc::new(TrackTable::new());
        // Long past on any clock.
        table.upsert("GONE", ts(0), |_| {});

        let reaper = Reaper::new(
            table.clone(),
            Duration::from_millis(10),
            TimeDelta::seconds(60),
            Clock::Utc,
        );
        let (handle, signal) = stop_channel();
        let task = tokio::spawn(reaper.run(signal));

        for _ in 0..100 {
            if table.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(table.is_empty());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reaper should stop promptly")
            .unwrap();
    }
}
