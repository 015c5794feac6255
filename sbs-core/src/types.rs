//! Shared types, error enum, and decoded message types for sbs-core.

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

/// All errors produced by sbs-core.
///
/// Decode failures are not errors: a bad line becomes [`Decoded::Rejected`].
#[derive(Debug, Error)]
pub enum SbsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SbsError>;

/// Hex transponder address as it appears in field 4 (e.g. `4840D6`, or
/// `~1A2B3C` for non-ICAO TIS-B targets). Used as the track key.
pub type HexIdent = String;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Field 0 of an SBS line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordType {
    /// Transmission message, sub-typed 1-8 by field 1.
    Msg,
    /// New aircraft / ID change.
    Id,
    /// Selection change.
    Sel,
    /// Status change.
    Sta,
}

impl RecordType {
    pub fn from_field(field: &str) -> Option<RecordType> {
        match field.trim() {
            "MSG" => Some(RecordType::Msg),
            "ID" => Some(RecordType::Id),
            "SEL" => Some(RecordType::Sel),
            "STA" => Some(RecordType::Sta),
            _ => None,
        }
    }

    /// Minimum number of comma-separated fields a line of this type needs.
    pub fn min_fields(self) -> usize {
        match self {
            RecordType::Msg => 22,
            RecordType::Id | RecordType::Sel | RecordType::Sta => 11,
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::Msg => write!(f, "MSG"),
            RecordType::Id => write!(f, "ID"),
            RecordType::Sel => write!(f, "SEL"),
            RecordType::Sta => write!(f, "STA"),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoded message types
// ---------------------------------------------------------------------------

/// Common part of every accepted message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageHeader {
    pub hex_ident: HexIdent,
    pub record: RecordType,
    /// MSG sub-type (1-8); `None` for ID/SEL/STA.
    pub transmission: Option<u8>,
    /// Fields 6+7, when they parse.
    pub generated: Option<NaiveDateTime>,
    /// Fields 8+9, when they parse. Drives staleness.
    pub logged: Option<NaiveDateTime>,
}

/// MSG,1 and ID/SEL: callsign.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentificationUpdate {
    pub header: MessageHeader,
    pub callsign: Option<String>,
}

/// MSG,2 (surface) and MSG,3 (airborne) position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionUpdate {
    pub header: MessageHeader,
    pub is_surface: bool,
    pub altitude_ft: Option<i32>,
    pub ground_speed_kts: Option<i32>,
    pub track_deg: Option<i32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub spi: Option<bool>,
    pub on_ground: Option<bool>,
}

/// MSG,4: airborne velocity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityUpdate {
    pub header: MessageHeader,
    pub ground_speed_kts: Option<i32>,
    pub track_deg: Option<i32>,
    pub vertical_rate_fpm: Option<i32>,
}

/// MSG,5 (altitude reply) and MSG,6 (identity reply with squawk).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveillanceUpdate {
    pub header: MessageHeader,
    pub altitude_ft: Option<i32>,
    pub squawk: Option<String>,
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub spi: Option<bool>,
    pub on_ground: Option<bool>,
}

/// MSG,7: air-to-air.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirToAirUpdate {
    pub header: MessageHeader,
    pub altitude_ft: Option<i32>,
    pub on_ground: Option<bool>,
}

/// MSG,8: all-call reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllCallUpdate {
    pub header: MessageHeader,
    pub on_ground: Option<bool>,
}

/// STA: status change text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub header: MessageHeader,
    pub status: Option<String>,
}

/// Why a line was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Reject {
    TooFewFields { record: Option<RecordType>, found: usize },
    UnknownRecord(String),
    UnknownTransmission(String),
    MissingHexIdent,
    InvalidHexIdent(String),
}

impl std::fmt::Display for Reject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reject::TooFewFields {
                record: Some(rt),
                found,
            } => write!(f, "{rt} line has {found} fields, need {}", rt.min_fields()),
            Reject::TooFewFields { record: None, found } => {
                write!(f, "line has {found} fields")
            }
            Reject::UnknownRecord(r) => write!(f, "unknown record type {r:?}"),
            Reject::UnknownTransmission(t) => write!(f, "unknown MSG transmission type {t:?}"),
            Reject::MissingHexIdent => write!(f, "empty hex ident"),
            Reject::InvalidHexIdent(h) => write!(f, "hex ident {h:?} is not an ICAO address"),
        }
    }
}

/// Union type for all decode results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Decoded {
    Position(PositionUpdate),
    Velocity(VelocityUpdate),
    Identification(IdentificationUpdate),
    Surveillance(SurveillanceUpdate),
    AirToAir(AirToAirUpdate),
    AllCall(AllCallUpdate),
    Status(StatusUpdate),
    Rejected(Reject),
}

impl Decoded {
    /// Header of any accepted message; `None` for rejected lines.
    pub fn header(&self) -> Option<&MessageHeader> {
        match self {
            Decoded::Position(m) => Some(&m.header),
            Decoded::Velocity(m) => Some(&m.header),
            Decoded::Identification(m) => Some(&m.header),
            Decoded::Surveillance(m) => Some(&m.header),
            Decoded::AirToAir(m) => Some(&m.header),
            Decoded::AllCall(m) => Some(&m.header),
            Decoded::Status(m) => Some(&m.header),
            Decoded::Rejected(_) => None,
        }
    }

    pub fn hex_ident(&self) -> Option<&str> {
        self.header().map(|h| h.hex_ident.as_str())
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Decoded::Rejected(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
