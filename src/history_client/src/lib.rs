//! Client-side boundary of the building-management history API.
//!
//! The generated RPC bindings are out of scope here; this crate models the
//! one call the meter-history engine consumes, `ListHistory`, as a typed,
//! paginated request/response pair behind the [`providers::HistoryProvider`]
//! trait.

pub mod models;
pub mod providers;

pub use models::{
    reading::ReadingRecord,
    request::{HistoryPage, ListHistoryRequest, Period},
};
pub use providers::{HistoryProvider, ProviderError, ProviderInitError};
