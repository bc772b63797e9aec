//! HTTP control plane: the LAVA-style callback receiver plus the
//! `/api/jobretry`, `/api/checkout` and `/api/patchset` admin endpoints.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use kci_api_client::helper::{find_parent_kind, submit_results};
use kci_api_client::{ApiClient, ApiError};
use kci_core::config::Config;
use kci_core::types::{is_valid_commit_string, Id, Node, NodeKind, NodeResult, NodeState};
use kci_core::event::Channel;
use kci_logspec::baseline::find_baseline_error;
use kci_logspec::kbuild::find_kbuild_error;
use kci_logspec::linux_kernel::find_kernel_error;
use kci_logspec::error::LogspecError;
use kci_telemetry::TelemetryEmitter;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::{extract_bearer, JwtAuth, LabTokenRole, LabTokens};
use crate::metrics::Metrics;
use crate::sanitize::LogSanitizer;
use crate::upload::{
    artifact_dir, gzip_bytes, redact_callback_data, Storage, CALLBACK_JSON_ARTIFACT_NAME,
    LAVA_YAML_ARTIFACT_NAME, LOG_ARTIFACT_NAME,
};

const MAX_FILTER_ENTRIES: usize = 8;
const CHECKOUT_TIMEOUT_MINUTES: i64 = 5;

pub struct AppState {
    pub api: Arc<dyn ApiClient>,
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub telemetry: TelemetryEmitter,
    pub metrics: Arc<Metrics>,
    pub lab_tokens: Arc<LabTokens>,
    pub jwt: Arc<JwtAuth>,
    pub sanitizer: LogSanitizer,
    pub worker_permits: Arc<Semaphore>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/api/metrics", get(metrics_endpoint))
        .route("/node/{id}", post(lava_callback))
        .route("/api/jobretry", post(job_retry_endpoint))
        .route("/api/checkout", post(checkout_endpoint))
        .route("/api/patchset", post(patchset_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .fallback(not_found)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorBody { message: "not found".to_string() }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

fn err(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody { message: message.into() }))
}

async fn landing_page(State(state): State<Arc<AppState>>) -> Html<&'static str> {
    state.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    Html("<html><body><h1>KernelCI pipeline</h1></body></html>")
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> String {
    state.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.render()
}

// --- POST /node/{id} — LAVA-style callback receiver ---

#[derive(Debug, Deserialize)]
struct LavaCallbackPayload {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    job_status: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    log: Option<String>,
    #[serde(default)]
    structured_log: Option<serde_json::Value>,
    #[serde(default)]
    tests: Vec<TestResultPayload>,
}

#[derive(Debug, Clone, Deserialize)]
struct TestResultPayload {
    name: String,
    result: String,
}

async fn lava_callback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    state.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.lava_callback_requests_total.fetch_add(1, Ordering::Relaxed);

    let auth_header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = match extract_bearer(auth_header) {
        Ok(token) => token,
        Err(_) => {
            state.metrics.lava_callback_requests_authfail_total.fetch_add(1, Ordering::Relaxed);
            return err(StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
        }
    };
    if state.lab_tokens.lab_for_token(token, LabTokenRole::Callback).is_none() {
        state.metrics.lava_callback_requests_authfail_total.fetch_add(1, Ordering::Relaxed);
        return err(StatusCode::UNAUTHORIZED, "unknown callback token").into_response();
    }

    let parsed: LavaCallbackPayload = match serde_json::from_value(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => return err(StatusCode::BAD_REQUEST, format!("invalid callback body: {e}")).into_response(),
    };

    let node_id = Id::from_string(id);
    let state = state.clone();
    let permits = state.worker_permits.clone();
    tokio::spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };
        if let Err(e) = process_callback(&state, node_id, parsed, payload).await {
            error!(%e, "callback processing failed");
        }
    });

    StatusCode::ACCEPTED.into_response()
}

async fn process_callback(
    state: &AppState,
    node_id: Id,
    payload: LavaCallbackPayload,
    raw: serde_json::Value,
) -> Result<(), ApiError> {
    let mut node = match state.api.get_node(&node_id).await {
        Ok(node) => node,
        Err(ApiError::NotFound(_)) => {
            state.metrics.lava_callback_late_fail_total.fetch_add(1, Ordering::Relaxed);
            warn!(node_id = %node_id, "callback for unknown node, counting as late_fail");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let dir = artifact_dir(&node.name, &node_id.to_string());

    if let Some(log) = &payload.log {
        let sanitized = state.sanitizer.sanitize(log.as_bytes());
        let gz = gzip_bytes(&sanitized).unwrap_or_default();
        let path = format!("{dir}/{LOG_ARTIFACT_NAME}");
        match state.storage.upload(&path, gz).await {
            Ok(url) => {
                node.artifacts.insert("log".to_string(), url);
            }
            Err(e) => warn!(%e, "log upload failed"),
        }
    }

    if let Some(structured) = &payload.structured_log {
        if let Ok(yaml) = serde_yaml::to_string(structured) {
            let gz = gzip_bytes(yaml.as_bytes()).unwrap_or_default();
            let path = format!("{dir}/{LAVA_YAML_ARTIFACT_NAME}");
            match state.storage.upload(&path, gz).await {
                Ok(url) => {
                    node.artifacts.insert("lava_log".to_string(), url);
                }
                Err(e) => warn!(%e, "structured log upload failed"),
            }
        }
    }

    let redacted = redact_callback_data(raw);
    if let Ok(json_text) = serde_json::to_string(&redacted) {
        let gz = gzip_bytes(json_text.as_bytes()).unwrap_or_default();
        let path = format!("{dir}/{CALLBACK_JSON_ARTIFACT_NAME}");
        match state.storage.upload(&path, gz).await {
            Ok(url) => {
                node.artifacts.insert("callback_data".to_string(), url);
            }
            Err(e) => warn!(%e, "callback data upload failed"),
        }
    }

    let result = match payload.job_status.as_deref() {
        Some("complete") | Some("pass") => NodeResult::Pass,
        Some("fail") | Some("canceled") => NodeResult::Fail,
        _ => NodeResult::Incomplete,
    };

    if let Some(error) = extract_structured_error(&node, payload.log.as_deref().unwrap_or_default()) {
        node.set_error(error.error_type(), error.error_summary());
    } else if node.error_code() == Some("node_timeout") {
        node.clear_error();
    }

    if let Some(device) = &payload.device_id {
        node.data.insert("device".to_string(), serde_json::Value::String(device.clone()));
    }

    node.state = NodeState::Done;
    node.result = Some(result);

    let hierarchy = build_test_hierarchy(&node, &payload.tests);
    submit_results(state.api.as_ref(), hierarchy.clone(), &node).await?;

    state
        .telemetry
        .emit(serde_json::json!({"type": "job_result", "node_id": node.id.to_string(), "result": result.as_str()}))
        .await;
    for test in &hierarchy {
        state
            .telemetry
            .emit(serde_json::json!({"type": "test_result", "node_id": test.id.to_string(), "name": test.name}))
            .await;
    }

    Ok(())
}

fn extract_structured_error(node: &Node, log: &str) -> Option<Box<dyn LogspecError + Send + Sync>> {
    if log.is_empty() {
        return None;
    }
    match node.kind {
        NodeKind::Kbuild => find_kbuild_error(log),
        _ => find_kernel_error(log).or_else(|| find_baseline_error(log)),
    }
}

fn build_test_hierarchy(parent: &Node, tests: &[TestResultPayload]) -> Vec<Node> {
    let now = parent.updated;
    tests
        .iter()
        .map(|test| {
            let mut path = parent.path.clone();
            path.push(test.name.clone());
            Node {
                id: Id::new(),
                kind: NodeKind::Test,
                name: test.name.clone(),
                path,
                group: Some(parent.name.clone()),
                parent: Some(parent.id.clone()),
                state: NodeState::Done,
                result: Some(if test.result == "pass" { NodeResult::Pass } else { NodeResult::Fail }),
                owner: parent.owner.clone(),
                kernel_revision: parent.kernel_revision.clone(),
                artifacts: BTreeMap::new(),
                data: BTreeMap::new(),
                holdoff: None,
                timeout: None,
                retry_counter: 0,
                created: now,
                updated: now,
            }
        })
        .collect()
}

// --- POST /api/jobretry ---

#[derive(Debug, Deserialize)]
struct JobRetryRequest {
    nodeid: String,
    #[serde(default)]
    jobfilter: Vec<String>,
}

async fn job_retry_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<JobRetryRequest>,
) -> impl IntoResponse {
    state.metrics.pipeline_api_requests_total.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = authorize(&state, &headers, "testretry") {
        return e.into_response();
    }

    let node = match state.api.get_node(&Id::from_string(req.nodeid.clone())).await {
        Ok(node) => node,
        Err(_) => return err(StatusCode::NOT_FOUND, "node not found").into_response(),
    };

    let kbuild = match find_parent_kind(state.api.as_ref(), &node, NodeKind::Kbuild).await {
        Ok(Some(kbuild)) => kbuild,
        Ok(None) => return err(StatusCode::BAD_REQUEST, "no kbuild ancestor found").into_response(),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    if kbuild.state != NodeState::Done || kbuild.result != Some(NodeResult::Pass) {
        return err(StatusCode::BAD_REQUEST, "kbuild ancestor is not done+pass").into_response();
    }

    let mut jobfilter = vec![kbuild.name.clone(), node.name.clone()];
    jobfilter.extend(req.jobfilter);
    jobfilter.truncate(MAX_FILTER_ENTRIES);

    let mut event_data = serde_json::to_value(&kbuild).expect("Node always serializes");
    if let Some(obj) = event_data.as_object_mut() {
        obj.insert("jobfilter".to_string(), serde_json::json!(jobfilter));
        obj.insert("state".to_string(), serde_json::json!(NodeState::Available.as_str()));
    }

    match state.api.send_event(Channel::Node, event_data).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// --- POST /api/checkout ---

#[derive(Debug, Deserialize)]
struct CheckoutRequest {
    commit: String,
    #[serde(default)]
    nodeid: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    jobfilter: Vec<String>,
    #[serde(default)]
    platformfilter: Vec<String>,
}

async fn checkout_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> impl IntoResponse {
    state.metrics.pipeline_api_requests_total.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = authorize(&state, &headers, "checkout") {
        return e.into_response();
    }
    if !is_valid_commit_string(&req.commit) {
        return err(StatusCode::BAD_REQUEST, "invalid commit string").into_response();
    }
    for job in &req.jobfilter {
        if !state.config.is_job_defined(job) {
            return err(StatusCode::BAD_REQUEST, format!("unknown job: {job}")).into_response();
        }
    }
    for platform in &req.platformfilter {
        if !state.config.is_platform_defined(platform) {
            return err(StatusCode::BAD_REQUEST, format!("unknown platform: {platform}")).into_response();
        }
    }

    let mut kernel_revision = if let Some(nodeid) = &req.nodeid {
        match state.api.get_node(&Id::from_string(nodeid.clone())).await {
            Ok(existing) => existing.kernel_revision,
            Err(_) => return err(StatusCode::NOT_FOUND, "nodeid not found").into_response(),
        }
    } else {
        None
    };
    if kernel_revision.is_none() {
        let Some(url) = &req.url else {
            return err(StatusCode::BAD_REQUEST, "url or nodeid required").into_response();
        };
        let Some(branch) = &req.branch else {
            return err(StatusCode::BAD_REQUEST, "branch required with url").into_response();
        };
        let tree_name = state
            .config
            .trees
            .values()
            .find(|tree| &tree.url == url && tree.branches.iter().any(|b| b == branch))
            .map(|tree| tree.name.clone());
        let Some(tree_name) = tree_name else {
            return err(StatusCode::BAD_REQUEST, "tree not found for url/branch").into_response();
        };
        kernel_revision = Some(kci_core::types::KernelRevision {
            tree: tree_name,
            url: url.clone(),
            branch: branch.clone(),
            commit: req.commit.clone(),
            describe: None,
            version: None,
            patchlevel: None,
        });
    }

    let now = Utc::now();
    let treeid = tree_id(
        req.url.as_deref().unwrap_or_default(),
        req.branch.as_deref().unwrap_or_default(),
        now,
    );

    let mut jobfilter = req.jobfilter;
    jobfilter.truncate(MAX_FILTER_ENTRIES);
    let mut platformfilter = req.platformfilter;
    platformfilter.truncate(MAX_FILTER_ENTRIES);

    let mut data = BTreeMap::new();
    data.insert("treeid".to_string(), serde_json::Value::String(treeid));
    if !jobfilter.is_empty() {
        data.insert("jobfilter".to_string(), serde_json::json!(jobfilter));
    }
    if !platformfilter.is_empty() {
        data.insert("platform_filter".to_string(), serde_json::json!(platformfilter));
    }

    let node = Node {
        id: Id::new(),
        kind: NodeKind::Checkout,
        name: "checkout".to_string(),
        path: vec!["checkout".to_string()],
        group: None,
        parent: None,
        state: NodeState::Running,
        result: None,
        owner: "kernelci".to_string(),
        kernel_revision,
        artifacts: BTreeMap::new(),
        data,
        holdoff: None,
        timeout: Some(now + ChronoDuration::minutes(CHECKOUT_TIMEOUT_MINUTES)),
        retry_counter: 0,
        created: now,
        updated: now,
    };

    match state.api.create_node(&node).await {
        Ok(node) => (StatusCode::CREATED, Json(node)).into_response(),
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn tree_id(url: &str, branch: &str, now: chrono::DateTime<Utc>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(branch.as_bytes());
    hasher.update(now.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

// --- POST /api/patchset ---

#[derive(Debug, Deserialize)]
struct PatchsetRequest {
    nodeid: String,
    #[serde(default)]
    patchurl: Vec<String>,
}

async fn patchset_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PatchsetRequest>,
) -> impl IntoResponse {
    state.metrics.pipeline_api_requests_total.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = authorize(&state, &headers, "patchset") {
        return e.into_response();
    }

    let parent = match state.api.get_node(&Id::from_string(req.nodeid.clone())).await {
        Ok(parent) => parent,
        Err(_) => return err(StatusCode::NOT_FOUND, "node not found").into_response(),
    };
    if parent.kind != NodeKind::Checkout {
        return err(StatusCode::BAD_REQUEST, "parent must be a checkout").into_response();
    }
    for patch_url in &req.patchurl {
        if !(patch_url.starts_with("http://") || patch_url.starts_with("https://")) {
            return err(StatusCode::BAD_REQUEST, format!("invalid patch url: {patch_url}")).into_response();
        }
    }

    let now = parent.updated;
    let mut artifacts = parent.artifacts.clone();
    for (idx, patch_url) in req.patchurl.iter().enumerate() {
        artifacts.insert(format!("patch{idx}"), patch_url.clone());
    }

    let mut path = parent.path.clone();
    path.push("patchset".to_string());
    let node = Node {
        id: Id::new(),
        kind: NodeKind::Checkout,
        name: "patchset".to_string(),
        path,
        group: Some("patchset".to_string()),
        parent: Some(parent.id.clone()),
        state: NodeState::Running,
        result: None,
        owner: parent.owner.clone(),
        kernel_revision: parent.kernel_revision.clone(),
        artifacts,
        data: parent.data.clone(),
        holdoff: None,
        timeout: parent.timeout,
        retry_counter: 0,
        created: now,
        updated: now,
    };

    match state.api.create_node(&node).await {
        Ok(node) => (StatusCode::CREATED, Json(node)).into_response(),
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap, permission: &str) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    let header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = extract_bearer(header).map_err(|_| {
        state.metrics.pipeline_api_auth_fail_total.fetch_add(1, Ordering::Relaxed);
        err(StatusCode::UNAUTHORIZED, "missing bearer token")
    })?;
    state.jwt.authorize(token, permission).map_err(|e| {
        state.metrics.pipeline_api_auth_fail_total.fetch_add(1, Ordering::Relaxed);
        err(StatusCode::FORBIDDEN, e.to_string())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use kci_api_client::fake::FakeApiClient;
    use kci_telemetry::TelemetryEmitter;
    use std::collections::BTreeMap as Map;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::auth::{Claims, LabTokenPair};

    fn test_state(dir: &std::path::Path) -> (Arc<AppState>, Arc<FakeApiClient>) {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        let mut labs = Map::new();
        labs.insert(
            "lab-baylibre".to_string(),
            LabTokenPair {
                runtime_token: "run-token".to_string(),
                callback_token: "cb-token".to_string(),
            },
        );
        let telemetry = TelemetryEmitter::with_config(
            api.clone(),
            50,
            std::time::Duration::from_secs(3600),
            dir.join("fallback.jsonl"),
        );
        let state = Arc::new(AppState {
            api: api.clone(),
            config: Arc::new(Config::default()),
            storage: Arc::new(crate::upload::LocalFsStorage::new(dir, "http://storage.example")),
            telemetry,
            metrics: Arc::new(Metrics::default()),
            lab_tokens: Arc::new(LabTokens::new(labs)),
            jwt: Arc::new(JwtAuth::new("test-secret")),
            sanitizer: LogSanitizer::default(),
            worker_permits: Arc::new(Semaphore::new(4)),
        });
        (state, api)
    }

    fn jwt_with(permission: &str) -> String {
        let claims = Claims {
            email: "bot@kernelci.org".to_string(),
            permissions: vec![permission.to_string()],
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
    }

    #[tokio::test]
    async fn landing_page_returns_html() {
        let dir = tempdir().unwrap();
        let (state, _api) = test_state(dir.path());
        let app = create_router(state);
        let response = app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_counters() {
        let dir = tempdir().unwrap();
        let (state, _api) = test_state(dir.path());
        let app = create_router(state);
        let response = app.oneshot(Request::builder().uri("/api/metrics").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn lava_callback_rejects_missing_token() {
        let dir = tempdir().unwrap();
        let (state, _api) = test_state(dir.path());
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/node/node1")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lava_callback_accepts_valid_token_immediately() {
        let dir = tempdir().unwrap();
        let (state, api) = test_state(dir.path());
        let node = sample_node("node1", NodeKind::Job, NodeState::Running);
        api.insert(node);
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/node/node1")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer cb-token")
                    .body(Body::from(serde_json::to_string(&serde_json::json!({"job_status": "pass"})).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn job_retry_requires_jwt_permission() {
        let dir = tempdir().unwrap();
        let (state, _api) = test_state(dir.path());
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/jobretry")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&serde_json::json!({"nodeid": "node1"})).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn checkout_rejects_invalid_commit() {
        let dir = tempdir().unwrap();
        let (state, _api) = test_state(dir.path());
        let app = create_router(state);
        let token = jwt_with("checkout");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/checkout")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(
                        serde_json::to_string(&serde_json::json!({"commit": "xyz"})).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patchset_rejects_non_checkout_parent() {
        let dir = tempdir().unwrap();
        let (state, api) = test_state(dir.path());
        let node = sample_node("node1", NodeKind::Job, NodeState::Running);
        api.insert(node);
        let app = create_router(state);
        let token = jwt_with("patchset");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/patchset")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(
                        serde_json::to_string(&serde_json::json!({"nodeid": "node1", "patchurl": []})).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn sample_node(id: &str, kind: NodeKind, state: NodeState) -> Node {
        Node {
            id: Id::from_string(id),
            kind,
            name: id.to_string(),
            path: vec![id.to_string()],
            group: None,
            parent: None,
            state,
            result: None,
            owner: "kernelci".to_string(),
            kernel_revision: None,
            artifacts: BTreeMap::new(),
            data: BTreeMap::new(),
            holdoff: None,
            timeout: None,
            retry_counter: 0,
            created: Utc::now(),
            updated: Utc::now(),
        }
    }
}
