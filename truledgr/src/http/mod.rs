//! HTTP access to the TruLedgr API.

pub mod client;
pub mod endpoints;

pub use client::{ApiClient, ApiRequest, AuthEvent, RequestBody, server_error};
pub use endpoints::{Endpoint, EndpointList};
