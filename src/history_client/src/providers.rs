//! Provider abstraction for meter history sources.
//!
//! This module defines the [`HistoryProvider`] trait, the single seam between
//! the meter-history engine and whatever transport actually serves
//! `ListHistory` (an HTTP gateway in front of the RPC services, or an
//! in-memory fixture in tests).
//!
//! The trait is object safe so the engine can hold an
//! `Arc<dyn HistoryProvider>` chosen at runtime.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use history_client::{HistoryPage, HistoryProvider, ListHistoryRequest, ProviderError};
//!
//! struct EmptyProvider;
//!
//! #[async_trait]
//! impl HistoryProvider for EmptyProvider {
//!     async fn list_history(
//!         &self,
//!         _req: ListHistoryRequest,
//!     ) -> Result<HistoryPage, ProviderError> {
//!         Ok(HistoryPage::default())
//!     }
//! }
//! ```

pub mod gateway;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use shared_utils::env::EnvError;
use snafu::{Backtrace, Snafu};

use crate::models::request::{HistoryPage, ListHistoryRequest};

/// Serves one page of `ListHistory` at a time.
///
/// Implementations must return records ordered ascending by `record_time` and
/// a continuation token while more pages remain. Pagination itself is driven
/// by the caller.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetch the page described by `req`.
    async fn list_history(&self, req: ListHistoryRequest) -> Result<HistoryPage, ProviderError>;
}

#[async_trait]
impl<P: HistoryProvider + ?Sized> HistoryProvider for Arc<P> {
    async fn list_history(&self, req: ListHistoryRequest) -> Result<HistoryPage, ProviderError> {
        (**self).list_history(req).await
    }
}

/// Errors that can occur during the creation of a provider instance
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// missed environment variable.
    #[snafu(display("Missing gateway configuration: {source}"))]
    MissingEnvVar {
        source: EnvError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// Endpoint is not an absolute http(s) URL.
    #[snafu(display("Invalid gateway endpoint {endpoint:?}: {message}"))]
    InvalidEndpoint {
        endpoint: String,
        message: String,
        backtrace: Backtrace,
    },
}

/// Errors that can occur within a `HistoryProvider` implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The API answered with a non-success status.
    #[snafu(display("API error ({status}): {message}"))]
    Api {
        status: u16,
        message: String,
        backtrace: Backtrace,
    },

    /// The response body was not the expected shape.
    #[snafu(display("Malformed response: {source}"))]
    Decode {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// The request parameters were invalid for this provider.
    #[snafu(display("Invalid request: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// An internal error occurred while processing data within the provider.
    #[snafu(display("Internal provider error: {message}"))]
    Internal {
        message: String,
        backtrace: Backtrace,
    },
}

/// Shared request checks every provider applies before doing any I/O.
pub(crate) fn validate_request(req: &ListHistoryRequest) -> Result<(), ProviderError> {
    if req.name.trim().is_empty() {
        return ValidationSnafu {
            message: "resource name is empty",
        }
        .fail();
    }
    if req.page_size == 0 {
        return ValidationSnafu {
            message: "page size must be > 0",
        }
        .fail();
    }
    if req.period.end_time < req.period.start_time {
        return ValidationSnafu {
            message: format!(
                "period end {} is before start {}",
                req.period.end_time, req.period.start_time
            ),
        }
        .fail();
    }
    Ok(())
}
