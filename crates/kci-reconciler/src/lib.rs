//! Timeout, holdoff and closing reconcilers: three sweepers that share a
//! tree-walking helper and a uniform owner filter. All three apply the
//! owner filter uniformly (see DESIGN.md).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use kci_api_client::query::NodeFilter;
use kci_api_client::{ApiClient, ApiError};
use kci_core::types::{Id, Node, NodeKind, NodeResult, NodeState};

/// Which sweeper to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Timeout,
    Holdoff,
    Closing,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Holdoff => "holdoff",
            Self::Closing => "closing",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "holdoff" => Ok(Self::Holdoff),
            "closing" => Ok(Self::Closing),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Shared state for all three sweepers: the authenticated identity they
/// filter nodes by, and the API client they operate through.
pub struct Reconciler {
    api: Arc<dyn ApiClient>,
    username: String,
}

impl Reconciler {
    pub async fn new(api: Arc<dyn ApiClient>) -> Result<Self, ApiError> {
        let whoami = api.whoami().await?;
        Ok(Self {
            api,
            username: whoami.username,
        })
    }

    /// Nodes in any non-`done` state matching `filter`, restricted to
    /// this reconciler's own identity — applied uniformly across every
    /// sweeper mode (see module docs).
    async fn pending_nodes(&self, extra: NodeFilter) -> Result<BTreeMap<Id, Node>, ApiError> {
        let mut nodes = BTreeMap::new();
        for state in NodeState::pending_states() {
            let filter = extra.clone().eq("state", state.as_str());
            for node in self.api.find_nodes(&filter).await? {
                if node.owner == self.username {
                    nodes.insert(node.id.clone(), node);
                }
            }
        }
        Ok(nodes)
    }

    async fn count_running_child_nodes(&self, parent_id: &Id) -> Result<u64, ApiError> {
        let mut total = 0;
        for state in NodeState::pending_states() {
            let filter = NodeFilter::new()
                .eq("parent", parent_id.to_string())
                .eq("state", state.as_str());
            total += self.api.count_nodes(&filter).await?;
        }
        Ok(total)
    }

    /// A checkout's direct children are typically just its kbuilds; a
    /// checkout with no running direct children can still have running
    /// grandchildren (test jobs under a kbuild) that must hold it open.
    async fn count_running_build_child_nodes(&self, checkout_id: &Id) -> Result<u64, ApiError> {
        let kbuilds = self
            .api
            .find_nodes(
                &NodeFilter::new()
                    .eq("parent", checkout_id.to_string())
                    .eq("kind", NodeKind::Kbuild.as_str()),
            )
            .await?;
        let mut total = 0;
        for kbuild in kbuilds {
            total += self.count_running_child_nodes(&kbuild.id).await?;
        }
        Ok(total)
    }

    /// Recursively collect descendants of `node`, optionally restricted
    /// to a single child state at each level.
    async fn child_nodes_recursive(
        &self,
        node: &Node,
        state_filter: Option<NodeState>,
        out: &mut BTreeMap<Id, Node>,
    ) -> Result<(), ApiError> {
        let children = self
            .pending_nodes(NodeFilter::new().eq("parent", node.id.to_string()))
            .await?;
        for (child_id, child) in children {
            let keep = match state_filter {
                Some(wanted) => child.state.as_str() == wanted.as_str(),
                None => true,
            };
            if keep {
                out.insert(child_id, child.clone());
                Box::pin(self.child_nodes_recursive(&child, state_filter, out)).await?;
            }
        }
        Ok(())
    }

    /// Write back every node in `nodes` with its new state (and, for
    /// `TIMEOUT`/`DONE` modes, a terminal result).
    async fn submit_lapsed_nodes(
        &self,
        nodes: &BTreeMap<Id, Node>,
        new_state: NodeState,
        mode: &str,
    ) {
        for (node_id, node) in nodes {
            let mut update = node.clone();
            update.state = new_state;

            if mode == "TIMEOUT" {
                if node.kind == NodeKind::Checkout && node.state != NodeState::Running {
                    update.result = Some(NodeResult::Pass);
                } else {
                    update.result = Some(NodeResult::Incomplete);
                    update.set_error("node_timeout", "Node timed-out");
                }
            }
            if node.kind == NodeKind::Checkout && mode == "DONE" {
                update.result = Some(NodeResult::Pass);
            }

            if let Err(err) = self.api.update_node(&update).await {
                tracing::error!(node_id = %node_id, %err, "failed to update lapsed node");
            }
        }
    }

    /// `timeout` mode: nodes whose `timeout` deadline has passed, plus
    /// their entire pending subtree, all moved straight to `done`.
    pub async fn run_timeout_once(&self) -> Result<(), ApiError> {
        let now = Utc::now().to_rfc3339();
        let lapsed = self.pending_nodes(NodeFilter::new().lt("timeout", now)).await?;

        let mut to_close = BTreeMap::new();
        for (id, node) in lapsed {
            to_close.insert(id, node.clone());
            self.child_nodes_recursive(&node, None, &mut to_close).await?;
        }
        self.submit_lapsed_nodes(&to_close, NodeState::Done, "TIMEOUT").await;
        Ok(())
    }

    /// `holdoff` mode: `available` nodes whose holdoff window has
    /// passed. A node with running children moves to `closing` (along
    /// with its running subtree); otherwise — after checking for
    /// running kbuild grandchildren on checkouts — it goes straight to
    /// `done`.
    pub async fn run_holdoff_once(&self) -> Result<(), ApiError> {
        let now = Utc::now().to_rfc3339();
        let available = self
            .pending_nodes(NodeFilter::new().eq("state", NodeState::Available.as_str()).lt("holdoff", now))
            .await?;

        let mut closing = BTreeMap::new();
        let mut done = BTreeMap::new();

        for (id, node) in available {
            let running = self.count_running_child_nodes(&id).await?;
            if running > 0 {
                closing.insert(id.clone(), node.clone());
                self.child_nodes_recursive(&node, Some(NodeState::Available), &mut closing)
                    .await?;
                continue;
            }
            if node.kind == NodeKind::Checkout {
                let running_builds = self.count_running_build_child_nodes(&id).await?;
                if running_builds > 0 {
                    continue;
                }
            }
            done.insert(id.clone(), node.clone());
            self.child_nodes_recursive(&node, None, &mut done).await?;
        }

        self.submit_lapsed_nodes(&closing, NodeState::Closing, "HOLDOFF").await;
        self.submit_lapsed_nodes(&done, NodeState::Done, "DONE").await;
        Ok(())
    }

    /// `closing` mode: `closing` nodes with no running children (and, on
    /// checkouts, no running kbuild grandchildren) move to `done`.
    pub async fn run_closing_once(&self) -> Result<(), ApiError> {
        let closing_nodes = self
            .pending_nodes(NodeFilter::new().eq("state", NodeState::Closing.as_str()))
            .await?;

        let mut done = BTreeMap::new();
        for (id, node) in closing_nodes {
            let running = self.count_running_child_nodes(&id).await?;
            if running > 0 {
                continue;
            }
            if node.kind == NodeKind::Checkout {
                let running_builds = self.count_running_build_child_nodes(&id).await?;
                if running_builds > 0 {
                    continue;
                }
            }
            done.insert(id, node);
        }
        self.submit_lapsed_nodes(&done, NodeState::Done, "DONE").await;
        Ok(())
    }

    pub async fn run_once(&self, mode: Mode) -> Result<(), ApiError> {
        match mode {
            Mode::Timeout => self.run_timeout_once().await,
            Mode::Holdoff => self.run_holdoff_once().await,
            Mode::Closing => self.run_closing_once().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kci_api_client::fake::FakeApiClient;
    use kci_core::types::{KernelRevision, NodeKind, NodeState};

    fn node(id: &str, kind: NodeKind, state: NodeState, parent: Option<&str>, owner: &str) -> Node {
        Node {
            id: Id::from_string(id),
            kind,
            name: id.to_string(),
            path: vec![],
            group: None,
            parent: parent.map(Id::from_string),
            state,
            result: None,
            owner: owner.to_string(),
            kernel_revision: Some(KernelRevision::default()),
            artifacts: Default::default(),
            data: Default::default(),
            holdoff: None,
            timeout: Some(Utc::now() - chrono::Duration::seconds(10)),
            retry_counter: 0,
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn timeout_closes_lapsed_node_as_incomplete() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        api.insert(node("n1", NodeKind::Job, NodeState::Running, None, "kernelci"));
        let reconciler = Reconciler::new(api.clone()).await.unwrap();
        reconciler.run_timeout_once().await.unwrap();

        let updated = api.snapshot(&Id::from_string("n1")).unwrap();
        assert_eq!(updated.state, NodeState::Done);
        assert_eq!(updated.result, Some(NodeResult::Incomplete));
        assert_eq!(updated.error_code(), Some("node_timeout"));
    }

    #[tokio::test]
    async fn timeout_ignores_nodes_owned_by_someone_else() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        api.insert(node("n1", NodeKind::Job, NodeState::Running, None, "someone-else"));
        let reconciler = Reconciler::new(api.clone()).await.unwrap();
        reconciler.run_timeout_once().await.unwrap();

        let untouched = api.snapshot(&Id::from_string("n1")).unwrap();
        assert_eq!(untouched.state, NodeState::Running);
    }

    #[tokio::test]
    async fn timeout_on_non_running_checkout_passes() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        api.insert(node(
            "checkout1",
            NodeKind::Checkout,
            NodeState::Available,
            None,
            "kernelci",
        ));
        let reconciler = Reconciler::new(api.clone()).await.unwrap();
        reconciler.run_timeout_once().await.unwrap();

        let updated = api.snapshot(&Id::from_string("checkout1")).unwrap();
        assert_eq!(updated.result, Some(NodeResult::Pass));
    }
}
