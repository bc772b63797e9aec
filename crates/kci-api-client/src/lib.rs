//! Client for the central pipeline API: node CRUD, pub/sub events,
//! telemetry and blob storage uploads.
//!
//! `ApiClient` is a trait rather than a concrete `reqwest`-backed struct
//! so the scheduler, reconciler and ingester crates can substitute an
//! in-memory fake in their own tests (see the `fake` module, gated
//! behind the `test-support` feature).

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod helper;
pub mod query;

pub use client::{ApiClient, ReqwestApiClient};
pub use error::ApiError;
pub use query::NodeFilter;
