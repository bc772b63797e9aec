//! Job-retry channel: republishes a failed job/kbuild's parent as an
//! `available` retry, up to a ceiling of 3 attempts.
//!
//! Folded into the scheduler binary as an additional subscription rather
//! than kept as a separate service, since it shares the same
//! subscribe/consume/watchdog machinery.

use kci_api_client::helper::{build_retry_event_data, find_parent_kind};
use kci_api_client::{ApiClient, ApiError};
use kci_core::event::Channel;
use kci_core::types::{Node, NodeKind, NodeResult, NodeState};

pub const MAX_RETRIES: u32 = 3;

/// Decide whether `node` (a `done`/`incomplete` `kbuild` or `job`)
/// should be retried, and if so, publish the retry event against its
/// parent. Returns `true` if a retry was submitted.
pub async fn maybe_retry(api: &dyn ApiClient, node: &Node) -> Result<bool, ApiError> {
    if node.state != NodeState::Done || node.result != Some(NodeResult::Incomplete) {
        return Ok(false);
    }
    if node.retry_counter >= MAX_RETRIES {
        tracing::info!(node_id = %node.id, "already retried the maximum number of times");
        return Ok(false);
    }

    let parent_kind = match node.kind {
        NodeKind::Job => Some(NodeKind::Kbuild),
        NodeKind::Kbuild => Some(NodeKind::Checkout),
        _ => None,
    };
    let Some(parent_kind) = parent_kind else {
        tracing::error!(node_id = %node.id, "cannot retry: parent kind is unknown for this node kind");
        return Ok(false);
    };

    let Some(parent) = find_parent_kind(api, node, parent_kind).await? else {
        tracing::error!(node_id = %node.id, "cannot retry: parent node not found");
        return Ok(false);
    };

    let jobfilter = if node.kind == NodeKind::Kbuild {
        vec![format!("{}+", node.name)]
    } else {
        vec![node.name.clone()]
    };
    let platform_filter = if node.kind == NodeKind::Job {
        Some(vec![node.platform().unwrap_or_default().to_string()])
    } else {
        None
    };

    let retry_counter = node.retry_counter + 1;
    let event_data = build_retry_event_data(&parent, node, jobfilter, platform_filter, retry_counter);
    api.send_event(Channel::Retry, event_data).await?;
    tracing::info!(node_id = %node.id, parent_id = %parent.id, retry_counter, "job retry submitted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kci_api_client::fake::FakeApiClient;
    use kci_core::types::{Id, KernelRevision};
    use std::sync::Arc;

    fn base_node(id: &str, kind: NodeKind, parent: Option<&str>) -> Node {
        Node {
            id: Id::from_string(id),
            kind,
            name: id.to_string(),
            path: vec![],
            group: None,
            parent: parent.map(Id::from_string),
            state: NodeState::Done,
            result: Some(NodeResult::Incomplete),
            owner: "kernelci".to_string(),
            kernel_revision: Some(KernelRevision::default()),
            artifacts: Default::default(),
            data: Default::default(),
            holdoff: None,
            timeout: None,
            retry_counter: 0,
            created: chrono::Utc::now(),
            updated: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn retry_is_submitted_for_incomplete_job() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        let kbuild = base_node("kbuild1", NodeKind::Kbuild, None);
        api.insert(kbuild.clone());
        let job = base_node("job1", NodeKind::Job, Some("kbuild1"));

        let retried = maybe_retry(api.as_ref(), &job).await.unwrap();
        assert!(retried);
    }

    #[tokio::test]
    async fn retry_ceiling_blocks_after_three_attempts() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        let kbuild = base_node("kbuild1", NodeKind::Kbuild, None);
        api.insert(kbuild);
        let mut job = base_node("job1", NodeKind::Job, Some("kbuild1"));
        job.retry_counter = 3;

        let retried = maybe_retry(api.as_ref(), &job).await.unwrap();
        assert!(!retried);
    }

    #[tokio::test]
    async fn passing_node_is_never_retried() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        let mut job = base_node("job1", NodeKind::Job, None);
        job.result = Some(NodeResult::Pass);
        let retried = maybe_retry(api.as_ref(), &job).await.unwrap();
        assert!(!retried);
    }
}
