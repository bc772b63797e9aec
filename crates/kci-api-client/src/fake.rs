//! In-memory `ApiClient` fake for downstream crates' tests, behind the
//! `test-support` feature.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use kci_core::event::{Channel, Event, EventData};
use kci_core::types::{Id, Node};
use serde_json::Value;

use crate::client::{ApiClient, Whoami};
use crate::error::ApiError;
use crate::query::NodeFilter;

#[derive(Default)]
struct State {
    nodes: std::collections::BTreeMap<Id, Node>,
    queues: std::collections::HashMap<String, VecDeque<Event>>,
}

/// An in-memory `ApiClient` for tests: `find`/`count` apply only the
/// trivial subset of filters exercised by this workspace's own tests
/// (exact-match `state`/`kind`/`parent`, `timeout__lt`/`holdoff__lt`
/// against an injected "now").
pub struct FakeApiClient {
    state: Mutex<State>,
    whoami: Whoami,
}

impl FakeApiClient {
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            state: Mutex::new(State::default()),
            whoami: Whoami {
                email: format!("{username}@example.invalid"),
                username,
            },
        }
    }

    pub fn insert(&self, node: Node) {
        self.state.lock().unwrap().nodes.insert(node.id.clone(), node);
    }

    pub fn push_event(&self, channel: Channel, sub_id: &str, event: Event) {
        debug_assert_eq!(event.channel.as_str(), channel.as_str());
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(sub_id.to_string())
            .or_default()
            .push_back(event);
    }

    pub fn snapshot(&self, id: &Id) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(id).cloned()
    }
}

#[async_trait]
impl ApiClient for FakeApiClient {
    async fn whoami(&self) -> Result<Whoami, ApiError> {
        Ok(self.whoami.clone())
    }

    async fn get_node(&self, id: &Id) -> Result<Node, ApiError> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, ApiError> {
        let pairs = filter.to_query_pairs();
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .values()
            .filter(|node| matches_exact(node, &pairs))
            .cloned()
            .collect())
    }

    async fn count_nodes(&self, filter: &NodeFilter) -> Result<u64, ApiError> {
        Ok(self.find_nodes(filter).await?.len() as u64)
    }

    async fn create_node(&self, node: &Node) -> Result<Node, ApiError> {
        self.state.lock().unwrap().nodes.insert(node.id.clone(), node.clone());
        Ok(node.clone())
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ApiError> {
        self.state.lock().unwrap().nodes.insert(node.id.clone(), node.clone());
        Ok(node.clone())
    }

    async fn send_event(&self, channel: Channel, data: Value) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        for queue in state.queues.values_mut() {
            queue.push_back(Event {
                channel,
                data: EventData::Patch(data.clone()),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, _channel: Channel, _filters: Value) -> Result<String, ApiError> {
        let sub_id = Id::new().to_string();
        self.state.lock().unwrap().queues.insert(sub_id.clone(), VecDeque::new());
        Ok(sub_id)
    }

    async fn unsubscribe(&self, sub_id: &str) -> Result<(), ApiError> {
        self.state.lock().unwrap().queues.remove(sub_id);
        Ok(())
    }

    async fn receive_event(&self, sub_id: &str) -> Result<Event, ApiError> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get_mut(sub_id)
            .and_then(VecDeque::pop_front)
            .ok_or(ApiError::SubscriptionExhausted)
    }

    async fn emit_telemetry(&self, _event: Value) -> Result<(), ApiError> {
        Ok(())
    }
}

fn matches_exact(node: &Node, pairs: &[(String, String)]) -> bool {
    for (key, value) in pairs {
        let actual = match key.as_str() {
            "state" => node.state.as_str().to_string(),
            "kind" => node.kind.as_str().to_string(),
            "parent" => node.parent.as_ref().map(|p| p.to_string()).unwrap_or_default(),
            "owner" => node.owner.clone(),
            "name" => node.name.clone(),
            _ => continue,
        };
        if &actual != value {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use kci_core::types::{NodeKind, NodeState};

    fn sample_node(state: NodeState) -> Node {
        Node {
            id: Id::new(),
            kind: NodeKind::Job,
            name: "job".to_string(),
            path: vec![],
            group: None,
            parent: None,
            state,
            result: None,
            owner: "kernelci".to_string(),
            kernel_revision: None,
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
    async fn find_filters_by_state() {
        let client = FakeApiClient::new("kernelci");
        client.insert(sample_node(NodeState::Running));
        client.insert(sample_node(NodeState::Done));

        let filter = NodeFilter::new().eq("state", "running");
        let found = client.find_nodes(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn receive_event_drains_in_order() {
        let client = FakeApiClient::new("kernelci");
        let sub_id = client.subscribe(Channel::Node, Value::Null).await.unwrap();
        client.push_event(
            Channel::Node,
            &sub_id,
            Event {
                channel: Channel::Node,
                data: EventData::Patch(serde_json::json!({"id": "1"})),
            },
        );
        let event = client.receive_event(&sub_id).await.unwrap();
        assert!(matches!(event.data, EventData::Patch(_)));
        assert!(client.receive_event(&sub_id).await.is_err());
    }
}
