//! Node and related types: a `Node` is the single unit the scheduler,
//! reconciler and ingester all read and write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque identifier for nodes, subscriptions and telemetry events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Node kind — what sort of work item a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Checkout,
    Kbuild,
    Job,
    Test,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Kbuild => "kbuild",
            Self::Job => "job",
            Self::Test => "test",
        }
    }
}

impl std::str::FromStr for NodeKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkout" => Ok(Self::Checkout),
            "kbuild" => Ok(Self::Kbuild),
            "job" => Ok(Self::Job),
            "test" => Ok(Self::Test),
            other => Err(TypeError::UnknownKind(other.to_string())),
        }
    }
}

/// Node lifecycle state. Monotone: `running -> available -> closing -> done`.
/// `done` is terminal; nothing may move a node out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Running,
    Available,
    Closing,
    Done,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Available => "available",
            Self::Closing => "closing",
            Self::Done => "done",
        }
    }

    /// All states other than the terminal `done` state.
    pub fn pending_states() -> [Self; 3] {
        [Self::Running, Self::Available, Self::Closing]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::str::FromStr for NodeState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "available" => Ok(Self::Available),
            "closing" => Ok(Self::Closing),
            "done" => Ok(Self::Done),
            other => Err(TypeError::UnknownState(other.to_string())),
        }
    }
}

/// Terminal result recorded once a node reaches `done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResult {
    Pass,
    Fail,
    Incomplete,
}

impl NodeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("unknown node kind: {0}")]
    UnknownKind(String),
    #[error("unknown node state: {0}")]
    UnknownState(String),
    #[error("invalid commit string: {0}")]
    InvalidCommit(String),
}

/// The kernel tree/branch/commit a checkout node was built from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelRevision {
    pub tree: String,
    pub url: String,
    pub branch: String,
    pub commit: String,
    pub describe: Option<String>,
    pub version: Option<String>,
    pub patchlevel: Option<String>,
}

impl KernelRevision {
    /// `{version}.{patchlevel}` used by fragment/param f-string templating.
    pub fn krev(&self) -> Option<String> {
        match (&self.version, &self.patchlevel) {
            (Some(v), Some(p)) => Some(format!("{v}.{p}")),
            _ => None,
        }
    }
}

/// A single node in the pipeline tree: a checkout, a build, a test job or
/// an individual test result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub kind: NodeKind,
    pub name: String,
    pub path: Vec<String>,
    pub group: Option<String>,
    pub parent: Option<Id>,
    pub state: NodeState,
    pub result: Option<NodeResult>,
    pub owner: String,
    pub kernel_revision: Option<KernelRevision>,
    pub artifacts: BTreeMap<String, String>,
    pub data: BTreeMap<String, Value>,
    pub holdoff: Option<DateTime<Utc>>,
    pub timeout: Option<DateTime<Utc>>,
    pub retry_counter: u32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Node {
    /// Convenience accessor for the `error_code` field nested under `data`.
    pub fn error_code(&self) -> Option<&str> {
        self.data.get("error_code").and_then(Value::as_str)
    }

    pub fn set_error(&mut self, code: &str, msg: &str) {
        self.data
            .insert("error_code".to_string(), Value::String(code.to_string()));
        self.data
            .insert("error_msg".to_string(), Value::String(msg.to_string()));
    }

    pub fn clear_error(&mut self) {
        self.data.remove("error_code");
        self.data.remove("error_msg");
    }

    pub fn platform(&self) -> Option<&str> {
        self.data.get("platform").and_then(Value::as_str)
    }
}

/// 7-40 char hex commit string, as accepted by `/api/checkout` and
/// `/api/patchset`.
pub fn is_valid_commit_string(s: &str) -> bool {
    (7..=40).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}
