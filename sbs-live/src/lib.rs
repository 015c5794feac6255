//! sbs-live: the async shell around `sbs-core`.
//!
//! A tokio feed reader and stale-track reaper mutate one shared
//! [`sbs_core::TrackTable`]; every mutation is fanned out to subscribers by
//! the [`notify::Notifier`]. [`engine::Engine`] owns all of it.

pub mod engine;
pub mod feed;
pub mod notify;
pub mod reaper;
pub mod stop;
pub mod web;

pub use engine::{Engine, EngineConfig};
pub use feed::{FeedError, FeedState};
pub use notify::{Notifier, Subscription};
