//! Core scheduling logic: matches a lifecycle event against the job
//! catalog, runs the throttle gates, and generates + submits matching
//! jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kci_api_client::helper::create_job_node;
use kci_api_client::query::NodeFilter;
use kci_api_client::{ApiClient, ApiError};
use kci_core::config::{Config, JobConfig};
use kci_core::types::{Node, NodeKind, NodeState};
use kci_runtime::{JobDescription, Runtime, RuntimeError, SubmitResult};
use kci_telemetry::TelemetryEmitter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("unknown runtime: {0}")]
    UnknownRuntime(String),
}

/// Per-instance counters, exposed for the health/metrics surface and
/// for tests asserting throttle behavior.
#[derive(Default)]
pub struct Counters {
    pub jobs_created: AtomicU64,
    pub jobs_skipped_frequency: AtomicU64,
    pub jobs_skipped_architecture: AtomicU64,
    pub jobs_skipped_queue_depth: AtomicU64,
    pub jobs_skipped_no_online_devices: AtomicU64,
    pub queue_probe_errors: AtomicU64,
    pub job_generation_errors: AtomicU64,
    pub job_submit_errors: AtomicU64,
}

/// Maximum jobs of a given architecture allowed in flight at once, the
/// "create-rule" throttle. Keyed by `(job_name, architecture)`.
pub struct ThrottleLimits {
    pub max_queued_per_device_type: u64,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self {
            max_queued_per_device_type: 2,
        }
    }
}

pub struct Scheduler {
    api: Arc<dyn ApiClient>,
    config: Arc<Config>,
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    telemetry: TelemetryEmitter,
    image_prefix: Option<String>,
    limits: ThrottleLimits,
    pub counters: Counters,
}

impl Scheduler {
    pub fn new(
        api: Arc<dyn ApiClient>,
        config: Arc<Config>,
        runtimes: HashMap<String, Arc<dyn Runtime>>,
        telemetry: TelemetryEmitter,
        image_prefix: Option<String>,
    ) -> Self {
        Self {
            api,
            config,
            runtimes,
            telemetry,
            image_prefix,
            limits: ThrottleLimits::default(),
            counters: Counters::default(),
        }
    }

    /// Job configs whose rules match this node's tree/branch/kernel
    /// version — a simplified but faithful version of
    /// `_resolve_fragment_configs`'s rule evaluation.
    fn matching_jobs(&self, node: &Node) -> Vec<&JobConfig> {
        let Some(rev) = &node.kernel_revision else {
            return Vec::new();
        };
        self.config
            .jobs
            .values()
            .filter(|job| {
                let rules = &job.rules;
                let tree_ok = rules.tree.is_empty() || rules.tree.iter().any(|t| t == &rev.tree);
                let branch_ok =
                    rules.branch.is_empty() || rules.branch.iter().any(|b| b == &rev.branch);
                tree_ok && branch_ok
            })
            .collect()
    }

    /// Frequency throttle: refuse if a job of this name already ran for
    /// this parent's tree/branch within its own in-flight window. Here
    /// approximated as "another node with this name already exists for
    /// the same parent" since full rate windows live outside this
    /// crate's scope.
    async fn frequency_gate(&self, job: &JobConfig, parent: &Node) -> Result<bool, SchedulerError> {
        let existing = self
            .api
            .count_nodes(
                &NodeFilter::new()
                    .eq("parent", parent.id.to_string())
                    .eq("name", job.name.as_str()),
            )
            .await?;
        if existing > 0 {
            self.counters.jobs_skipped_frequency.fetch_add(1, Ordering::Relaxed);
            self.telemetry
                .emit(serde_json::json!({"type": "job_skip", "reason": "frequency", "job": job.name}))
                .await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Architecture throttle: a job scoped to specific architectures is
    /// skipped for any other architecture in the build matrix.
    fn architecture_gate(&self, job: &JobConfig, architecture: Option<&str>) -> bool {
        if job.params.get("architecture").map(String::as_str).is_none() {
            return true;
        }
        let wanted = job.params.get("architecture").map(String::as_str);
        match (wanted, architecture) {
            (Some(w), Some(a)) => w == a,
            _ => true,
        }
    }

    /// Queue-depth throttle: only applies to backends that expose a
    /// `QueueProbe`. A probe error fails OPEN (the job proceeds) but is
    /// counted, matching `_should_skip_due_to_queue_depth`'s behavior.
    async fn queue_depth_gate(&self, runtime: &dyn Runtime, device_type: &str) -> bool {
        let Some(probe) = runtime.as_queue_probe() else {
            return true;
        };
        match probe.online_devices(device_type).await {
            Ok(0) => {
                self.counters
                    .jobs_skipped_no_online_devices
                    .fetch_add(1, Ordering::Relaxed);
                self.telemetry
                    .emit(serde_json::json!({"type": "job_skip", "reason": "no_online_devices"}))
                    .await;
                return false;
            }
            Ok(_) => {}
            Err(err) => {
                self.counters.queue_probe_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%err, "queue probe failed, proceeding anyway");
                return true;
            }
        }
        match probe.queued_jobs(device_type).await {
            Ok(depth) if depth >= self.limits.max_queued_per_device_type => {
                self.counters.jobs_skipped_queue_depth.fetch_add(1, Ordering::Relaxed);
                self.telemetry
                    .emit(serde_json::json!({"type": "job_skip", "reason": "queue_depth", "depth": depth}))
                    .await;
                false
            }
            Ok(_) => true,
            Err(err) => {
                self.counters.queue_probe_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%err, "queue probe failed, proceeding anyway");
                true
            }
        }
    }

    /// Substitute `{name}`-style placeholders: job params, then `krev`,
    /// then an `image_prefix`-qualified image name.
    fn render_params(&self, job: &JobConfig, parent: &Node) -> serde_json::Value {
        let mut params = serde_json::Map::new();
        for (key, value) in &job.params {
            let mut rendered = value.clone();
            if let Some(rev) = &parent.kernel_revision {
                if let Some(krev) = rev.krev() {
                    rendered = rendered.replace("{krev}", &krev);
                }
            }
            params.insert(key.clone(), serde_json::Value::String(rendered));
        }
        if let Some(image) = &job.image {
            let image_prefix = self.image_prefix.as_deref().unwrap_or_default();
            let rendered = image.replace("{image_prefix}", image_prefix);
            params.insert("image".to_string(), serde_json::Value::String(rendered));
        }
        params.insert(
            "device_type".to_string(),
            serde_json::Value::String(job.params.get("device_type").cloned().unwrap_or_default()),
        );
        serde_json::Value::Object(params)
    }

    /// Attempt to generate and submit one job against `parent`, writing
    /// the resulting child node's terminal error code/state on any
    /// failure instead of propagating it.
    pub async fn run_job(&self, job: &JobConfig, parent: &Node) -> Result<Option<Node>, SchedulerError> {
        if !self.frequency_gate(job, parent).await? {
            return Ok(None);
        }
        let architecture = parent
            .kernel_revision
            .as_ref()
            .and_then(|r| r.describe.as_deref());
        if !self.architecture_gate(job, architecture) {
            self.counters
                .jobs_skipped_architecture
                .fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let runtime_name = job
            .params
            .get("runtime")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let runtime = self
            .runtimes
            .get(&runtime_name)
            .ok_or_else(|| SchedulerError::UnknownRuntime(runtime_name.clone()))?;

        let device_type = job.params.get("device_type").map(String::as_str).unwrap_or_default();
        if !device_type.is_empty() && !self.queue_depth_gate(runtime.as_ref(), device_type).await {
            return Ok(None);
        }

        let mut child = create_job_node(job, parent, parent.retry_counter);
        let params = self.render_params(job, parent);
        let template = job.template.clone().unwrap_or_default();

        let job_desc = match runtime.generate(&template, &params) {
            Ok(desc) => desc,
            Err(err) => {
                self.counters.job_generation_errors.fetch_add(1, Ordering::Relaxed);
                child.state = NodeState::Done;
                child.result = Some(kci_core::types::NodeResult::Incomplete);
                child.set_error("job_generation_error", &err.to_string());
                self.api.create_node(&child).await?;
                return Ok(Some(child));
            }
        };

        if let Err(empty_data_err) = require_non_empty(&job_desc) {
            self.counters.job_generation_errors.fetch_add(1, Ordering::Relaxed);
            child.state = NodeState::Done;
            child.result = Some(kci_core::types::NodeResult::Incomplete);
            child.set_error("job_generation_error", &empty_data_err.to_string());
            self.api.create_node(&child).await?;
            return Ok(Some(child));
        }

        match runtime.submit(&job_desc).await {
            Ok(SubmitResult::JobId(job_id)) => {
                child.data.insert("job_id".to_string(), serde_json::json!(job_id));
            }
            Ok(SubmitResult::JobDefinitionUrl(url)) => {
                child
                    .data
                    .insert("job_definition_url".to_string(), serde_json::json!(url));
            }
            Err(err) => {
                self.counters.job_submit_errors.fetch_add(1, Ordering::Relaxed);
                child.state = NodeState::Done;
                child.result = Some(kci_core::types::NodeResult::Incomplete);
                child.set_error("submit_error", &err.to_string());
                self.api.create_node(&child).await?;
                return Ok(Some(child));
            }
        }

        if let Some(context) = runtime.get_context() {
            child.data.insert("job_context".to_string(), context);
        }

        self.api.create_node(&child).await?;
        self.counters.jobs_created.fetch_add(1, Ordering::Relaxed);
        Ok(Some(child))
    }

    /// Handle one `node` channel event: find every job whose rules match
    /// the event's tree/branch, and attempt to run each.
    pub async fn handle_node_event(&self, node: &Node) -> Result<Vec<Node>, SchedulerError> {
        if node.state != NodeState::Available {
            return Ok(Vec::new());
        }
        if !matches!(node.kind, NodeKind::Checkout | NodeKind::Kbuild) {
            return Ok(Vec::new());
        }
        let jobs: Vec<JobConfig> = self.matching_jobs(node).into_iter().cloned().collect();
        let mut created = Vec::new();
        for job in &jobs {
            if let Some(child) = self.run_job(job, node).await? {
                created.push(child);
            }
        }
        Ok(created)
    }
}

fn require_non_empty(desc: &JobDescription) -> Result<(), RuntimeError> {
    if desc.rendered.trim().is_empty() {
        return Err(RuntimeError::Generation("rendered job description is empty".to_string()));
    }
    Ok(())
}
