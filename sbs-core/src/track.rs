//! Per-aircraft track record and the field-merge rules.
//!
//! A message only writes the fields it carries, and a field that didn't
//! parse is `None` in the update, so it never clears what an earlier
//! message set.

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::types::*;

/// Tracks are evicted after this many seconds without a logged message.
pub const STALE_TIMEOUT_SECS: i64 = 60;

/// Accumulated state for a single aircraft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftTrack {
    pub hex_ident: HexIdent,
    pub callsign: Option<String>,
    pub squawk: Option<String>,

    // Position
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,

    // Velocity
    pub ground_speed_kts: Option<i32>,
    pub track_deg: Option<i32>,
    pub vertical_rate_fpm: Option<i32>,

    // Flags
    pub alert: bool,
    pub emergency: bool,
    pub spi: bool,
    pub on_ground: bool,

    pub status: Option<String>,

    // Metadata
    pub last_message_time: Option<NaiveDateTime>,
    pub last_logged_time: NaiveDateTime,
    /// `last_logged_time` came from the feed rather than the receipt seed.
    #[serde(skip)]
    pub logged_from_feed: bool,
    pub first_seen: NaiveDateTime,
    pub message_count: u64,
}

impl AircraftTrack {
    /// New track with nothing known yet. `received_at` seeds the staleness
    /// clock until a message with a parseable logging time arrives.
    pub fn new(hex_ident: &str, received_at: NaiveDateTime) -> Self {
        AircraftTrack {
            hex_ident: hex_ident.to_string(),
            callsign: None,
            squawk: None,
            lat: None,
            lon: None,
            altitude_ft: None,
            ground_speed_kts: None,
            track_deg: None,
            vertical_rate_fpm: None,
            alert: false,
            emergency: false,
            spi: false,
            on_ground: true,
            status: None,
            last_message_time: None,
            last_logged_time: received_at,
            logged_from_feed: false,
            first_seen: received_at,
            message_count: 0,
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    pub fn age(&self, now: NaiveDateTime) -> TimeDelta {
        now - self.last_logged_time
    }

    /// Strictly older than `threshold`: a track exactly at the threshold
    /// survives one more tick.
    pub fn is_stale(&self, now: NaiveDateTime, threshold: TimeDelta) -> bool {
        self.age(now) > threshold
    }

    /// Merge a decoded update into this track. Returns `false` (and leaves
    /// the track untouched) for rejected lines or an update addressed to a
    /// different aircraft.
    pub fn apply(&mut self, msg: &Decoded) -> bool {
        let header = match msg.header() {
            Some(h) if h.hex_ident == self.hex_ident => h,
            _ => return false,
        };

        match msg {
            Decoded::Identification(m) => {
                set(&mut self.callsign, m.callsign.clone());
            }
            Decoded::Position(m) => {
                set(&mut self.altitude_ft, m.altitude_ft);
                set(&mut self.ground_speed_kts, m.ground_speed_kts);
                set(&mut self.track_deg, m.track_deg);
                set(&mut self.lat, m.lat);
                set(&mut self.lon, m.lon);
                set_flag(&mut self.alert, m.alert);
                set_flag(&mut self.emergency, m.emergency);
                set_flag(&mut self.spi, m.spi);
                set_flag(&mut self.on_ground, m.on_ground);
            }
            Decoded::Velocity(m) => {
                set(&mut self.ground_speed_kts, m.ground_speed_kts);
                set(&mut self.track_deg, m.track_deg);
                set(&mut self.vertical_rate_fpm, m.vertical_rate_fpm);
            }
            Decoded::Surveillance(m) => {
                set(&mut self.altitude_ft, m.altitude_ft);
                set(&mut self.squawk, m.squawk.clone());
                set_flag(&mut self.alert, m.alert);
                set_flag(&mut self.emergency, m.emergency);
                set_flag(&mut self.spi, m.spi);
                set_flag(&mut self.on_ground, m.on_ground);
            }
            Decoded::AirToAir(m) => {
                set(&mut self.altitude_ft, m.altitude_ft);
                set_flag(&mut self.on_ground, m.on_ground);
            }
            Decoded::AllCall(m) => {
                set_flag(&mut self.on_ground, m.on_ground);
            }
            Decoded::Status(m) => {
                set(&mut self.status, m.status.clone());
            }
            Decoded::Rejected(_) => return false,
        }

        if let Some(generated) = header.generated {
            self.last_message_time = Some(generated);
        }
        // Out-of-order logging times never move the staleness clock back;
        // the receipt seed is replaced by the first feed time either way.
        if let Some(logged) = header.logged {
            if !self.logged_from_feed || logged > self.last_logged_time {
                self.last_logged_time = logged;
            }
            self.logged_from_feed = true;
        }
        self.message_count += 1;
        true
    }
}

fn set<T>(slot: &mut Option<T>, val: Option<T>) {
    if val.is_some() {
        *slot = val;
    }
}

fn set_flag(slot: &mut bool, val: Option<bool>) {
    if let Some(v) = val {
        *slot = v;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode_line, TimestampFormat};
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 26)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn decode(line: &str) -> Decoded {
        decode_line(line, &TimestampFormat::default())
    }

    #[test]
    fn test_new_track_defaults() {
        let t = AircraftTrack::new("ABC123", ts(14, 0, 0));
        assert!(t.on_ground);
        assert!(!t.alert && !t.emergency && !t.spi);
        assert!(!t.has_position());
        assert_eq!(t.message_count, 0);
        assert_eq!(t.last_logged_time, ts(14, 0, 0));
    }

    #[test]
    fn test_apply_position_then_identification() {
        let mut t = AircraftTrack::new("ABC123", ts(14, 0, 0));
        assert!(t.apply(&decode("MSG,3,1,1,ABC123,1,2024/12/26,14:23:45.123,2024/12/26,14:23:45.456,,38000,,,-78.901,45.123,,,0,0,0,0")));
        assert_eq!(t.altitude_ft, Some(38000));
        assert_eq!(t.lat, Some(-78.901));
        assert_eq!(t.lon, Some(45.123));
        assert!(!t.on_ground);

        assert!(t.apply(&decode("MSG,1,1,1,ABC123,1,2024/12/26,14:23:46.000,2024/12/26,14:23:46.100,UAL123,,,,,,,,,,,")));
        assert_eq!(t.callsign.as_deref(), Some("UAL123"));
        assert_eq!(t.altitude_ft, Some(38000));
        assert_eq!(t.lat, Some(-78.901));
        assert_eq!(t.message_count, 2);
    }

    #[test]
    fn test_empty_numeric_keeps_previous() {
        let mut t = AircraftTrack::new("ABC123", ts(14, 0, 0));
        t.apply(&decode("MSG,7,1,1,ABC123,1,2024/12/26,14:23:45.123,2024/12/26,14:23:45.456,,24000,,,,,,,,,,0"));
        t.apply(&decode("MSG,7,1,1,ABC123,1,2024/12/26,14:23:46.123,2024/12/26,14:23:46.456,,,,,,,,,,,,0"));
        assert_eq!(t.altitude_ft, Some(24000));
    }

    #[test]
    fn test_logged_time_advances_only_when_parsed() {
        let mut t = AircraftTrack::new("ABC123", ts(14, 0, 0));
        t.apply(&decode("MSG,8,1,1,ABC123,1,2024/12/26,14:23:45.000,2024/12/26,14:23:45.000,,,,,,,,,,,,0"));
        assert_eq!(t.last_logged_time, ts(14, 23, 45));

        t.apply(&decode("MSG,8,1,1,ABC123,1,2024/12/26,14:23:50.000,bad,bad,,,,,,,,,,,,-1"));
        assert_eq!(t.last_logged_time, ts(14, 23, 45));
        assert_eq!(t.last_message_time, Some(ts(14, 23, 50)));
        assert!(t.on_ground);
    }

    #[test]
    fn test_logged_time_never_moves_back() {
        // Seeded later than the feed's clock: the first feed time still wins.
        let mut t = AircraftTrack::new("ABC123", ts(15, 0, 0));
        t.apply(&decode("MSG,8,1,1,ABC123,1,2024/12/26,14:23:45.000,2024/12/26,14:23:45.000,,,,,,,,,,,,0"));
        assert_eq!(t.last_logged_time, ts(14, 23, 45));

        // A late-arriving older message does not rewind it.
        t.apply(&decode("MSG,8,1,1,ABC123,1,2024/12/26,14:23:40.000,2024/12/26,14:23:40.000,,,,,,,,,,,,0"));
        assert_eq!(t.last_logged_time, ts(14, 23, 45));
        assert_eq!(t.message_count, 2);

        t.apply(&decode("MSG,8,1,1,ABC123,1,2024/12/26,14:23:50.000,2024/12/26,14:23:50.000,,,,,,,,,,,,0"));
        assert_eq!(t.last_logged_time, ts(14, 23, 50));
    }

    #[test]
    fn test_apply_other_aircraft_ignored() {
        let mut t = AircraftTrack::new("ABC123", ts(14, 0, 0));
        let applied = t.apply(&decode("MSG,7,1,1,DEF456,1,2024/12/26,14:23:45.123,2024/12/26,14:23:45.456,,24000,,,,,,,,,,0"));
        assert!(!applied);
        assert_eq!(t.altitude_ft, None);
    }

    #[test]
    fn test_stale_detection() {
        let t = AircraftTrack::new("ABC123", ts(14, 0, 0));
        let threshold = TimeDelta::seconds(STALE_TIMEOUT_SECS);
        assert!(!t.is_stale(ts(14, 0, 59), threshold));
        assert!(!t.is_stale(ts(14, 1, 0), threshold));
        assert!(t.is_stale(ts(14, 1, 1), threshold));
    }
}
