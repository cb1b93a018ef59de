//! HTTP surface over the `rangeid` service.
//!
//! ## Structure
//!
//! - [`config`] - CLI/environment configuration and validation.
//! - [`error`] - Mapping of service errors onto HTTP responses.
//! - [`extract`] - Body and query extractors that reject with [`error::ApiError`].
//! - [`routes`] - Router, shared state, and request handlers.
//! - [`telemetry`] - `tracing` subscriber setup.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod telemetry;
