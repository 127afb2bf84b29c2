//! REST API transport for the libris backend.
//!
//! This module provides the `ApiClient`, through which every backend call
//! passes. It attaches bearer tokens to protected endpoints, retries transient
//! failures, and shares one token renewal between all requests that hit a 401.

mod account;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod renewal;
pub mod retry;

pub use client::ApiClient;
pub use endpoints::EndpointKind;
pub use error::ApiError;
pub use renewal::{RenewalError, RenewedSession};
pub use retry::RetryPolicy;
