//! nimbus-transport - REST adapter for the cloud transport port
//!
//! Implements [`ICloudTransport`](nimbus_core::ports::ICloudTransport)
//! against the Nimbus file service API:
//!
//! - [`RestClient`] - authenticated HTTP client with taxonomy-preserving
//!   status mapping and `Retry-After` parsing
//! - [`HttpCloudTransport`] - the port implementation, streaming downloads
//!   and reporting transfer progress
//!
//! Errors surface as [`SyncError`](nimbus_core::domain::SyncError) kinds
//! wherever the service response allows it, so the engine's retry logic
//! can tell a 503 from a 403 without string matching.

pub mod client;
pub mod provider;

pub use client::RestClient;
pub use provider::HttpCloudTransport;
