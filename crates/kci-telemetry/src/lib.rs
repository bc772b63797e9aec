//! Buffered, fire-and-forget telemetry emitter: events accumulate in a
//! mutex-guarded buffer and are flushed either when the buffer fills or
//! on a timer, whichever comes first. A flush that fails to reach the
//! central API falls back to appending the batch to a local JSONL file
//! so nothing is silently dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kci_api_client::ApiClient;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const DEFAULT_BUFFER_SIZE: usize = 50;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_FALLBACK_PATH: &str = "/tmp/kci-telemetry-fallback.jsonl";

struct Inner {
    api: Arc<dyn ApiClient>,
    buffer: Mutex<Vec<Value>>,
    buffer_size: usize,
    fallback_path: PathBuf,
}

/// A buffered telemetry emitter with a background flush task.
///
/// Cloning is cheap: all clones share the same buffer and background
/// task via `Arc`.
#[derive(Clone)]
pub struct TelemetryEmitter {
    inner: Arc<Inner>,
    flush_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TelemetryEmitter {
    pub fn new(api: Arc<dyn ApiClient>) -> Self {
        Self::with_config(api, DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_FALLBACK_PATH.into())
    }

    pub fn with_config(
        api: Arc<dyn ApiClient>,
        buffer_size: usize,
        flush_interval: Duration,
        fallback_path: PathBuf,
    ) -> Self {
        let inner = Arc::new(Inner {
            api,
            buffer: Mutex::new(Vec::with_capacity(buffer_size)),
            buffer_size,
            fallback_path,
        });

        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                flush(&task_inner).await;
            }
        });

        Self {
            inner,
            flush_task: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Stamp `event` with an RFC3339 UTC timestamp and queue it, flushing
    /// immediately if the buffer has reached `buffer_size`.
    pub async fn emit(&self, mut event: Value) {
        if let Some(obj) = event.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        let should_flush = {
            let mut buffer = self.inner.buffer.lock().await;
            buffer.push(event);
            buffer.len() >= self.inner.buffer_size
        };
        if should_flush {
            flush(&self.inner).await;
        }
    }

    /// Final synchronous flush, then stop the background task. Call
    /// this during graceful shutdown so the last partial buffer isn't
    /// lost.
    pub async fn close(&self) {
        if let Some(handle) = self.flush_task.lock().await.take() {
            handle.abort();
        }
        flush(&self.inner).await;
    }
}

async fn flush(inner: &Inner) {
    let batch = {
        let mut buffer = inner.buffer.lock().await;
        if buffer.is_empty() {
            return;
        }
        std::mem::take(&mut *buffer)
    };

    for event in &batch {
        if let Err(err) = inner.api.emit_telemetry(event.clone()).await {
            tracing::warn!(%err, "telemetry flush failed, writing fallback JSONL");
            write_fallback(&inner.fallback_path, &batch);
            return;
        }
    }
}

fn write_fallback(path: &std::path::Path, batch: &[Value]) {
    use std::io::Write;
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path);
    match file {
        Ok(mut file) => {
            for event in batch {
                if writeln!(file, "{event}").is_err() {
                    tracing::error!(path = %path.display(), "failed to write telemetry fallback file");
                    break;
                }
            }
        }
        Err(err) => {
            tracing::error!(%err, path = %path.display(), "failed to open telemetry fallback file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kci_api_client::fake::FakeApiClient;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn emit_flushes_at_buffer_size() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        let dir = tempdir().unwrap();
        let emitter = TelemetryEmitter::with_config(
            api.clone(),
            2,
            Duration::from_secs(3600),
            dir.path().join("fallback.jsonl"),
        );
        emitter.emit(serde_json::json!({"type": "a"})).await;
        emitter.emit(serde_json::json!({"type": "b"})).await;
        // Buffer should have been drained by the second emit.
        let remaining = emitter.inner.buffer.lock().await.len();
        assert_eq!(remaining, 0);
        emitter.close().await;
    }

    #[tokio::test]
    async fn emit_stamps_timestamp() {
        let api = Arc::new(FakeApiClient::new("kernelci"));
        let dir = tempdir().unwrap();
        let emitter = TelemetryEmitter::with_config(
            api,
            50,
            Duration::from_secs(3600),
            dir.path().join("fallback.jsonl"),
        );
        emitter.emit(serde_json::json!({"type": "a"})).await;
        let buffer = emitter.inner.buffer.lock().await;
        assert!(buffer[0].get("timestamp").is_some());
    }
}
