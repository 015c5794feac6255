//! Apply decoded SBS messages to the track table.

use chrono::NaiveDateTime;

use crate::table::TrackTable;
use crate::track::AircraftTrack;
use crate::types::{Decoded, HexIdent};

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub hex_ident: HexIdent,
    pub created: bool,
    /// Track as it looks right after this message.
    pub track: AircraftTrack,
}

/// Merge one decoded message into `table`.
///
/// `received_at` is only used as the staleness clock of a track that is
/// created by a message whose logging timestamp did not parse. Rejected
/// lines return `None` and leave the table (and its sink) untouched.
pub fn merge(table: &TrackTable, msg: &Decoded, received_at: NaiveDateTime) -> Option<Merged> {
    let hex_ident = msg.hex_ident()?;

    let (track, created) = table.upsert(hex_ident, received_at, |track| {
        track.apply(msg);
    });

    Some(Merged {
        hex_ident: track.hex_ident.clone(),
        created,
        track,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
