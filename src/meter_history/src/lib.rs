//! Incremental meter-history acquisition and resampling.
//!
//! Given a meter name and a desired window, the engine keeps an in-memory
//! buffer of cumulative readings up to date by fetching only what is missing,
//! and derives an hourly-rate series from it:
//!
//! - [`gap`] compares the query window against the [`buffer`];
//! - [`retriever`] pages through each gap and merges it in;
//! - [`series`] turns readings into per-span rates;
//! - [`export`] downsamples the buffer into CSV rows;
//! - [`engine`] ties it together behind a single-writer actor, scheduled by
//!   [`scheduler`] and [`debounce`].

#![warn(missing_docs)]

pub mod buffer;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod export;
pub mod gap;
pub mod retriever;
pub mod scheduler;
pub mod series;
pub mod snapshot;
pub mod window;

pub use engine::{EngineClosed, MeterHistory};
pub use scheduler::HistoryInputs;
pub use snapshot::HistorySnapshot;
pub use window::DesiredWindow;
