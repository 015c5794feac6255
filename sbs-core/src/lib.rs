//! sbs-core: Pure decode + tracking library for BaseStation (SBS) feeds.
//!
//! No async, no sockets: message decoding, per-aircraft
//! merge rules and the shared track table. This crate is the core used by
//! `sbs-live` (feed reader, reaper, CLI).

pub mod config;
pub mod decode;
pub mod merge;
pub mod table;
pub mod track;
pub mod types;

// Re-export commonly used types at crate root
pub use decode::{decode_line, TimestampFormat};
pub use merge::{merge, Merged};
pub use table::{TrackEvent, TrackSink, TrackTable};
pub use track::AircraftTrack;
pub use types::*;
