//! Runtime/backend abstraction: turns a job description into a job
//! submitted to a lab or CI backend.
//!
//! `Runtime` is a trait, with LAVA and shell implementations, so the
//! scheduler can hold a registry of heterogeneous backends keyed by name.

pub mod lava;
pub mod shell;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("job generation failed: {0}")]
    Generation(String),
    #[error("job submission failed: {0}")]
    Submission(String),
    #[error("queue probe failed: {0}")]
    QueueProbe(String),
}

/// A job description ready to hand to a backend: either rendered
/// in-process text (for push-style submission) or a path to a rendered
/// file (for pull-style submission where the backend fetches it itself).
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub rendered: String,
    pub params: Value,
}

/// What `submit` returns: either an immediate job id (push-style, e.g.
/// a Kubernetes Job) or a URL the backend will fetch the job definition
/// from (pull-style, e.g. LAVA).
#[derive(Debug, Clone)]
pub enum SubmitResult {
    JobId(String),
    JobDefinitionUrl(String),
}

/// Capability exposed only by backends that maintain an observable
/// queue (LAVA labs) — used by the scheduler's queue-depth throttle.
#[async_trait]
pub trait QueueProbe: Send + Sync {
    async fn queued_jobs(&self, device_type: &str) -> Result<u64, RuntimeError>;
    async fn online_devices(&self, device_type: &str) -> Result<u64, RuntimeError>;
}

/// A configured backend a job can be dispatched to.
#[async_trait]
pub trait Runtime: Send + Sync {
    fn name(&self) -> &str;
    fn lab_type(&self) -> &str;

    /// Render the job description from a template and params.
    fn generate(&self, template: &str, params: &Value) -> Result<JobDescription, RuntimeError>;

    /// Submit a rendered job description.
    async fn submit(&self, job: &JobDescription) -> Result<SubmitResult, RuntimeError>;

    /// Runtime-specific context to stamp onto the node after submission
    /// (e.g. a Kubernetes namespace/job name). `None` for backends with
    /// nothing extra to record.
    fn get_context(&self) -> Option<Value> {
        None
    }

    /// Backends that expose queue depth/device availability return
    /// themselves here; others return `None` and are exempt from the
    /// scheduler's queue-depth gate.
    fn as_queue_probe(&self) -> Option<&dyn QueueProbe> {
        None
    }
}
