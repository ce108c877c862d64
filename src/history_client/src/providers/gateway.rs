//! JSON/HTTP gateway in front of the history RPC service.

pub mod provider;
pub mod response;

pub use provider::{ENDPOINT_ENV, GatewayProvider};
