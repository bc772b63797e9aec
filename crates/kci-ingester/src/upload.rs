//! Artifact upload: gzip three blobs per callback and land them under a
//! `<node-name>-<node-id>/` prefix using fixed destination names.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blob storage backend. A real deployment points this at whatever the
/// configured `storage_type` names (S3, Azure blob, etc); this crate
/// only needs the narrow upload contract.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, UploadError>;
}

/// Local-filesystem storage backend, used for the default deployment and
/// for tests. Returns a `file://` URL.
pub struct LocalFsStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl LocalFsStorage {
    pub fn new(base_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Storage for LocalFsStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, UploadError> {
        let dest = self.base_dir.join(path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, bytes).await?;
        Ok(format!("{}/{path}", self.base_url.trim_end_matches('/')))
    }
}

pub fn gzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// `<name>-<id>` artifact directory prefix shared by all three uploads
/// for a single callback.
pub fn artifact_dir(node_name: &str, node_id: &str) -> String {
    format!("{node_name}-{node_id}")
}

pub const LOG_ARTIFACT_NAME: &str = "log.txt.gz";
pub const LAVA_YAML_ARTIFACT_NAME: &str = "lava-logs.yaml";
pub const CALLBACK_JSON_ARTIFACT_NAME: &str = "lava_callback.json.gz";

/// Strip the `token` field from a raw callback payload before it is
/// uploaded as a redacted artifact.
pub fn redact_callback_data(mut payload: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = payload.as_object_mut() {
        obj.remove("token");
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn gzip_round_trips() {
        let compressed = gzip_bytes(b"hello world").unwrap();
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn redact_strips_token_field() {
        let payload = serde_json::json!({"token": "secret", "status": "pass"});
        let redacted = redact_callback_data(payload);
        assert!(redacted.get("token").is_none());
        assert_eq!(redacted["status"], "pass");
    }

    #[tokio::test]
    async fn local_fs_storage_writes_under_base_dir() {
        let dir = tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path(), "http://storage.example");
        let dest = format!("{}/{}", artifact_dir("baseline-arm64", "node1"), LOG_ARTIFACT_NAME);
        let url = storage.upload(&dest, b"log data".to_vec()).await.unwrap();
        assert_eq!(url, format!("http://storage.example/{dest}"));
        assert!(dir.path().join(&dest).exists());
    }
}
