//! Decode BaseStation (SBS-1) text lines into typed track updates.
//!
//! Field layout (0-based), as emitted by dump1090 / readsb on port 30003:
//!
//! ```text
//!  0 record type (MSG, ID, SEL, STA)   11 altitude (ft)
//!  1 transmission type (MSG: 1-8)      12 ground speed (kt)
//!  2 session id                        13 track (deg)
//!  3 aircraft id                       14 latitude
//!  4 hex ident                         15 longitude
//!  5 flight id                         16 vertical rate (ft/min)
//!  6 date generated                    17 squawk
//!  7 time generated                    18 alert flag
//!  8 date logged                       19 emergency flag
//!  9 time logged                       20 spi flag
//! 10 callsign / status text            21 on-ground flag
//! ```
//!
//! Transmission types:
//! - MSG,1: ES identification (callsign)
//! - MSG,2: ES surface position
//! - MSG,3: ES airborne position
//! - MSG,4: ES airborne velocity
//! - MSG,5: Surveillance altitude
//! - MSG,6: Surveillance identity (squawk)
//! - MSG,7: Air-to-air
//! - MSG,8: All-call reply
//!
//! A sub-field that does not parse is reported as `None`; only structural
//! problems (record type, field count, hex ident) reject the whole line.

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDateTime;

use crate::types::*;

const F_RECORD: usize = 0;
const F_TRANSMISSION: usize = 1;
const F_HEX_IDENT: usize = 4;
const F_DATE_GENERATED: usize = 6;
const F_TIME_GENERATED: usize = 7;
const F_DATE_LOGGED: usize = 8;
const F_TIME_LOGGED: usize = 9;
const F_CALLSIGN: usize = 10;
const F_ALTITUDE: usize = 11;
const F_GROUND_SPEED: usize = 12;
const F_TRACK: usize = 13;
const F_LAT: usize = 14;
const F_LON: usize = 15;
const F_VERTICAL_RATE: usize = 16;
const F_SQUAWK: usize = 17;
const F_ALERT: usize = 18;
const F_EMERGENCY: usize = 19;
const F_SPI: usize = 20;
const F_ON_GROUND: usize = 21;

/// Default date+time layout of fields 6/7 and 8/9.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

/// Two-digit-year layout used by some BaseStation clones.
pub const SHORT_YEAR_TIMESTAMP_FORMAT: &str = "%y/%m/%d %H:%M:%S%.f";

// ---------------------------------------------------------------------------
// Timestamp format
// ---------------------------------------------------------------------------

/// `chrono` format applied to `"<date> <time>"` for both report timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
}

impl TimestampFormat {
    /// Validate and wrap a strftime pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(SbsError::Config("empty timestamp format".into()));
        }
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(SbsError::Config(format!(
                "invalid timestamp format: {pattern:?}"
            )));
        }
        Ok(TimestampFormat {
            pattern: pattern.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parse a date field and a time field. `None` if either is empty or
    /// they don't match the pattern.
    pub fn parse(&self, date: &str, time: &str) -> Option<NaiveDateTime> {
        let date = date.trim();
        let time = time.trim();
        if date.is_empty() || time.is_empty() {
            return None;
        }
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), &self.pattern).ok()
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        TimestampFormat {
            pattern: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

fn field<'a>(fields: &[&'a str], idx: usize) -> &'a str {
    fields.get(idx).map(|f| f.trim()).unwrap_or("")
}

/// Integer field. Some feeds write speeds and tracks with a decimal part,
/// those are rounded.
pub fn parse_int(val: &str) -> Option<i32> {
    let val = val.trim();
    if val.is_empty() {
        return None;
    }
    if let Ok(v) = val.parse::<i32>() {
        return Some(v);
    }
    let f = val.parse::<f64>().ok()?;
    if f.is_finite() && f.abs() <= i32::MAX as f64 {
        Some(f.round() as i32)
    } else {
        None
    }
}

pub fn parse_float(val: &str) -> Option<f64> {
    val.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// BaseStation writes `-1` for true; dump1090 writes `1`.
pub fn parse_flag(val: &str) -> Option<bool> {
    match val.trim() {
        "0" => Some(false),
        "1" | "-1" => Some(true),
        _ => None,
    }
}

pub fn parse_text(val: &str) -> Option<String> {
    let val = val.trim();
    if val.is_empty() {
        None
    } else {
        Some(val.to_string())
    }
}

/// Track over ground in whole degrees, `0..=359`. Some feeds write 360 for
/// due north.
pub fn parse_track(val: &str) -> Option<i32> {
    match parse_int(val)? {
        360 => Some(0),
        t @ 0..=359 => Some(t),
        _ => None,
    }
}

/// ICAO address: up to six hex digits. A leading `~` marks a non-ICAO
/// (TIS-B) address in dump1090 output and is kept.
fn is_hex_ident(val: &str) -> bool {
    let digits = val.strip_prefix('~').unwrap_or(val);
    !digits.is_empty() && digits.len() <= 6 && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Mode A code: up to four digits, zero-padded.
pub fn parse_squawk(val: &str) -> Option<String> {
    let val = val.trim();
    if val.is_empty() || val.len() > 4 || !val.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{val:0>4}"))
}

// ---------------------------------------------------------------------------
// Line decoder
// ---------------------------------------------------------------------------

/// Decode one SBS line. Never fails: structural problems come back as
/// [`Decoded::Rejected`].
pub fn decode_line(line: &str, format: &TimestampFormat) -> Decoded {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split(',').collect();

    let record_field = field(&fields, F_RECORD);
    let record = match RecordType::from_field(record_field) {
        Some(r) => r,
        None => return Decoded::Rejected(Reject::UnknownRecord(record_field.to_string())),
    };

    if fields.len() < record.min_fields() {
        return Decoded::Rejected(Reject::TooFewFields {
            record: Some(record),
            found: fields.len(),
        });
    }

    let hex_ident = field(&fields, F_HEX_IDENT);
    if hex_ident.is_empty() {
        return Decoded::Rejected(Reject::MissingHexIdent);
    }
    if !is_hex_ident(hex_ident) {
        return Decoded::Rejected(Reject::InvalidHexIdent(hex_ident.to_string()));
    }

    let transmission = if record == RecordType::Msg {
        let raw = field(&fields, F_TRANSMISSION);
        match raw.parse::<u8>() {
            Ok(t @ 1..=8) => Some(t),
            _ => return Decoded::Rejected(Reject::UnknownTransmission(raw.to_string())),
        }
    } else {
        None
    };

    let header = MessageHeader {
        hex_ident: hex_ident.to_ascii_uppercase(),
        record,
        transmission,
        generated: format.parse(
            field(&fields, F_DATE_GENERATED),
            field(&fields, F_TIME_GENERATED),
        ),
        logged: format.parse(field(&fields, F_DATE_LOGGED), field(&fields, F_TIME_LOGGED)),
    };

    let f = |idx| field(&fields, idx);

    match (record, transmission) {
        (RecordType::Msg, Some(1)) | (RecordType::Id, _) | (RecordType::Sel, _) => {
            Decoded::Identification(IdentificationUpdate {
                header,
                callsign: parse_text(f(F_CALLSIGN)),
            })
        }
        (RecordType::Sta, _) => Decoded::Status(StatusUpdate {
            header,
            status: parse_text(f(F_CALLSIGN)),
        }),
        (RecordType::Msg, Some(2)) => Decoded::Position(PositionUpdate {
            header,
            is_surface: true,
            altitude_ft: parse_int(f(F_ALTITUDE)),
            ground_speed_kts: parse_int(f(F_GROUND_SPEED)),
            track_deg: parse_track(f(F_TRACK)),
            lat: parse_float(f(F_LAT)),
            lon: parse_float(f(F_LON)),
            alert: None,
            emergency: None,
            spi: None,
            on_ground: parse_flag(f(F_ON_GROUND)),
        }),
        (RecordType::Msg, Some(3)) => Decoded::Position(PositionUpdate {
            header,
            is_surface: false,
            altitude_ft: parse_int(f(F_ALTITUDE)),
            ground_speed_kts: None,
            track_deg: None,
            lat: parse_float(f(F_LAT)),
            lon: parse_float(f(F_LON)),
            alert: parse_flag(f(F_ALERT)),
            emergency: parse_flag(f(F_EMERGENCY)),
            spi: parse_flag(f(F_SPI)),
            on_ground: parse_flag(f(F_ON_GROUND)),
        }),
        (RecordType::Msg, Some(4)) => Decoded::Velocity(VelocityUpdate {
            header,
            ground_speed_kts: parse_int(f(F_GROUND_SPEED)),
            track_deg: parse_track(f(F_TRACK)),
            vertical_rate_fpm: parse_int(f(F_VERTICAL_RATE)),
        }),
        (RecordType::Msg, Some(5)) => Decoded::Surveillance(SurveillanceUpdate {
            header,
            altitude_ft: parse_int(f(F_ALTITUDE)),
            squawk: None,
            alert: parse_flag(f(F_ALERT)),
            emergency: None,
            spi: parse_flag(f(F_SPI)),
            on_ground: parse_flag(f(F_ON_GROUND)),
        }),
        (RecordType::Msg, Some(6)) => Decoded::Surveillance(SurveillanceUpdate {
            header,
            altitude_ft: parse_int(f(F_ALTITUDE)),
            squawk: parse_squawk(f(F_SQUAWK)),
            alert: parse_flag(f(F_ALERT)),
            emergency: parse_flag(f(F_EMERGENCY)),
            spi: parse_flag(f(F_SPI)),
            on_ground: parse_flag(f(F_ON_GROUND)),
        }),
        (RecordType::Msg, Some(7)) => Decoded::AirToAir(AirToAirUpdate {
            header,
            altitude_ft: parse_int(f(F_ALTITUDE)),
            on_ground: parse_flag(f(F_ON_GROUND)),
        }),
        (RecordType::Msg, Some(8)) => Decoded::AllCall(AllCallUpdate {
            header,
            on_ground: parse_flag(f(F_ON_GROUND)),
        }),
        // transmission is always 1..=8 for MSG
        (RecordType::Msg, _) => Decoded::Rejected(Reject::UnknownTransmission(
            f(F_TRANSMISSION).to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
