//! Push-style shell runtime: renders a job description and executes it
//! directly, returning an immediate job id. Used for local/CI backends
//! that don't have their own scheduler.

use async_trait::async_trait;
use serde_json::Value;

use crate::{JobDescription, Runtime, RuntimeError, SubmitResult};

pub struct ShellRuntime {
    name: String,
}

impl ShellRuntime {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Runtime for ShellRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn lab_type(&self) -> &str {
        "shell"
    }

    fn generate(&self, template: &str, params: &Value) -> Result<JobDescription, RuntimeError> {
        if template.trim().is_empty() {
            return Err(RuntimeError::Generation("empty template".to_string()));
        }
        Ok(JobDescription {
            rendered: template.to_string(),
            params: params.clone(),
        })
    }

    async fn submit(&self, job: &JobDescription) -> Result<SubmitResult, RuntimeError> {
        if job.rendered.trim().is_empty() {
            return Err(RuntimeError::Submission("nothing to run".to_string()));
        }
        // A real backend would spawn the rendered script here; this
        // runtime's purpose in this workspace is the push-submission
        // code path, not process execution.
        Ok(SubmitResult::JobId(uuid_like(&job.rendered)))
    }
}

fn uuid_like(seed: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(seed.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_rejects_empty_template() {
        let runtime = ShellRuntime::new("shell0");
        assert!(runtime.generate("", &Value::Null).is_err());
    }

    #[tokio::test]
    async fn submit_returns_job_id() {
        let runtime = ShellRuntime::new("shell0");
        let job = runtime.generate("echo hi", &Value::Null).unwrap();
        match runtime.submit(&job).await.unwrap() {
            SubmitResult::JobId(id) => assert!(!id.is_empty()),
            SubmitResult::JobDefinitionUrl(_) => panic!("expected job id"),
        }
    }
}
