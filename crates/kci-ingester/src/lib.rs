//! Callback receiver and admin HTTP surface for the pipeline: LAVA-style
//! job callbacks, plus the job-retry/checkout/patchset admin endpoints.

pub mod auth;
pub mod metrics;
pub mod sanitize;
pub mod server;
pub mod upload;

pub use server::{create_router, AppState};
