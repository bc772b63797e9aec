//! Tree-walking helpers shared by the scheduler's job-retry channel and
//! the ingester's `/api/jobretry` handler.

use kci_core::config::JobConfig;
use kci_core::types::{Id, KernelRevision, Node, NodeKind, NodeResult, NodeState};

use crate::client::ApiClient;
use crate::error::ApiError;

/// Walk up `node`'s ancestry until a node of `kind` is found.
pub async fn find_parent_kind(
    api: &dyn ApiClient,
    node: &Node,
    kind: NodeKind,
) -> Result<Option<Node>, ApiError> {
    let Some(parent_id) = &node.parent else {
        return Ok(None);
    };
    let parent = match api.get_node(parent_id).await {
        Ok(n) => n,
        Err(ApiError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    if parent.kind.as_str() == kind.as_str() {
        return Ok(Some(parent));
    }
    Box::pin(find_parent_kind(api, &parent, kind)).await
}

/// `[kbuild_name, job_name]`-style jobfilter derived from a job node,
/// used to scope a retry/checkout to a specific job.
pub fn get_jobfilter(node: &Node) -> Vec<String> {
    vec![node.name.clone()]
}

/// Build a child node for `job_config`, inheriting the parent's kernel
/// revision and merging its artifacts.
pub fn create_job_node(
    job_config: &JobConfig,
    parent: &Node,
    retry_counter: u32,
) -> Node {
    let now = parent.updated;
    let mut path = parent.path.clone();
    path.push(job_config.name.clone());

    Node {
        id: Id::new(),
        kind: match job_config.kind.as_str() {
            "kbuild" => NodeKind::Kbuild,
            "test" => NodeKind::Test,
            _ => NodeKind::Job,
        },
        name: job_config.name.clone(),
        path,
        group: Some(job_config.name.clone()),
        parent: Some(parent.id.clone()),
        state: NodeState::Running,
        result: None,
        owner: parent.owner.clone(),
        kernel_revision: parent.kernel_revision.clone(),
        artifacts: parent.artifacts.clone(),
        data: Default::default(),
        holdoff: None,
        timeout: None,
        retry_counter,
        created: now,
        updated: now,
    }
}

/// Submit the parent node plus a freshly-built test hierarchy in one
/// update.
pub async fn submit_results(
    api: &dyn ApiClient,
    hierarchy: Vec<Node>,
    parent: &Node,
) -> Result<(), ApiError> {
    for node in &hierarchy {
        api.create_node(node).await?;
    }
    api.update_node(parent).await?;
    Ok(())
}

/// Compose a `retry` republish payload for the parent node: strips
/// server-managed fields the API would reject on create-as-update, sets
/// `jobfilter`/`state=available`/`retry_counter`/`debug.retry_by`.
///
/// This republishes the **parent** node's data, not the failing child's
/// — the scheduler's event matcher keys off the parent's `kind`/`data`
/// to decide which jobs to (re)create.
pub fn build_retry_event_data(
    parent: &Node,
    retrying_child: &Node,
    jobfilter: Vec<String>,
    platform_filter: Option<Vec<String>>,
    retry_counter: u32,
) -> serde_json::Value {
    let mut value = serde_json::to_value(parent).expect("Node always serializes");
    let obj = value.as_object_mut().expect("Node serializes to an object");
    obj.insert("jobfilter".to_string(), serde_json::json!(jobfilter));
    obj.insert("state".to_string(), serde_json::json!(NodeState::Available.as_str()));
    obj.insert("retry_counter".to_string(), serde_json::json!(retry_counter));
    obj.insert(
        "debug".to_string(),
        serde_json::json!({ "retry_by": retrying_child.id.to_string() }),
    );
    if let Some(platforms) = platform_filter {
        obj.insert("platform_filter".to_string(), serde_json::json!(platforms));
    }
    value
}

pub fn result_is_incomplete(node: &Node) -> bool {
    matches!(node.result, Some(NodeResult::Incomplete))
}

pub fn krev_of(node: &Node) -> Option<String> {
    node.kernel_revision.as_ref().and_then(KernelRevision::krev)
}
