//! Streaming HTTP host function (`http/stream`).
//!
//! `request` validates exactly like `http/fetch`, then starts a background
//! producer task that pulls response chunks into a buffer. The guest polls
//! with `read` and tears down with `close`; the engine force-closes every
//! stream of an execution when the execution finalizes.
//!
//! Each stream enforces the cumulative response-size cap and a global
//! per-stream deadline independent of request timeouts. Plain-text reads
//! decode drained bytes with U+FFFD substitution per read call; guests
//! streaming binary data should ask for `response_encoding: "base64"`.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use base64::Engine as _;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::host::http::HttpHost;
use crate::host::protocol::{
    self, FetchRequest, StreamCloseRequest, StreamOpenResponse, StreamReadRequest,
    StreamReadResponse, ENCODING_BASE64,
};

/// Why a producer stopped early.
#[derive(Debug, Clone)]
enum StreamFailure {
    TooLarge { max: usize },
    Transport(String),
}

#[derive(Debug, Default)]
struct StreamState {
    chunks: VecDeque<Bytes>,
    done: bool,
    failure: Option<StreamFailure>,
    total_bytes: usize,
}

struct StreamEntry {
    state: Arc<Mutex<StreamState>>,
    task: tokio::task::JoinHandle<()>,
    response_encoding: Option<String>,
    opened_at: Instant,
}

/// Engine-wide stream registry, keyed by `(execution_id, handle)`.
///
/// Cleared per execution on finalize so no producer outlives its
/// execution.
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<(String, u64), StreamEntry>,
    next_handle: AtomicU64,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live streams for one execution.
    pub fn open_count(&self, exec_id: &str) -> usize {
        self.streams.iter().filter(|e| e.key().0 == exec_id).count()
    }

    /// Force-close every stream belonging to `exec_id`.
    pub fn finalize_execution(&self, exec_id: &str) {
        let keys: Vec<(String, u64)> = self
            .streams
            .iter()
            .filter(|e| e.key().0 == exec_id)
            .map(|e| e.key().clone())
            .collect();
        for key in keys {
            if let Some((_, entry)) = self.streams.remove(&key) {
                entry.task.abort();
            }
        }
    }

    fn insert(&self, exec_id: &str, entry: StreamEntry) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.streams.insert((exec_id.to_string(), handle), entry);
        handle
    }

    fn remove(&self, exec_id: &str, handle: u64) -> Option<StreamEntry> {
        self.streams
            .remove(&(exec_id.to_string(), handle))
            .map(|(_, entry)| entry)
    }
}

/// Per-execution streaming host.
pub struct StreamHost {
    exec_id: String,
    http: Arc<HttpHost>,
    registry: Arc<StreamRegistry>,
    max_concurrent: usize,
    deadline: Duration,
}

impl StreamHost {
    /// Build the host for one execution, sharing the fetch host's
    /// validation pipeline.
    pub fn new(
        exec_id: impl Into<String>,
        http: Arc<HttpHost>,
        registry: Arc<StreamRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            exec_id: exec_id.into(),
            http,
            registry,
            max_concurrent: config.max_concurrent_streams,
            deadline: Duration::from_millis(config.stream_deadline_ms),
        }
    }

    /// Handle one `http/stream.request` payload. Never raises.
    pub async fn open(&self, payload: &str) -> String {
        match self.open_inner(payload).await {
            Ok(handle) => protocol::encode_ok(&StreamOpenResponse { handle }),
            Err(err) => protocol::encode_error(&err),
        }
    }

    async fn open_inner(&self, payload: &str) -> EngineResult<u64> {
        let request: FetchRequest = protocol::parse_payload(payload)?;

        if self.registry.open_count(&self.exec_id) >= self.max_concurrent {
            return Err(EngineError::stream_limit(self.max_concurrent));
        }

        let prepared = self.http.prepare(&request).await?;
        let state = Arc::new(Mutex::new(StreamState::default()));
        let max_response_size = self.http.max_response_size();

        let task = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                produce(prepared.builder, state, max_response_size).await;
            }
        });

        let handle = self.registry.insert(
            &self.exec_id,
            StreamEntry {
                state,
                task,
                response_encoding: prepared.response_encoding,
                opened_at: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// Handle one `http/stream.read` payload. Never raises.
    pub async fn read(&self, payload: &str) -> String {
        match self.read_inner(payload) {
            Ok(response) => protocol::encode_ok(&response),
            Err(err) => protocol::encode_error(&err),
        }
    }

    fn read_inner(&self, payload: &str) -> EngineResult<StreamReadResponse> {
        let request: StreamReadRequest = protocol::parse_payload(payload)?;
        let key = (self.exec_id.clone(), request.handle);
        let entry = self
            .registry
            .streams
            .get(&key)
            .ok_or_else(|| EngineError::not_found(format!("stream handle {}", request.handle)))?;

        if entry.opened_at.elapsed() > self.deadline {
            return Err(EngineError::timeout(self.deadline.as_millis() as u64));
        }

        let (drained, done, failure) = {
            let mut state = entry.state.lock();
            if let Some(failure) = state.failure.clone() {
                (Vec::new(), false, Some(failure))
            } else {
                let mut buffer = Vec::new();
                while let Some(chunk) = state.chunks.pop_front() {
                    buffer.extend_from_slice(&chunk);
                }
                let done = state.done && state.chunks.is_empty();
                (buffer, done, None)
            }
        };

        if let Some(failure) = failure {
            return Err(match failure {
                StreamFailure::TooLarge { max } => EngineError::response_too_large(max),
                StreamFailure::Transport(message) => EngineError::http_error(message),
            });
        }

        let data = if entry.response_encoding.as_deref() == Some(ENCODING_BASE64) {
            base64::engine::general_purpose::STANDARD.encode(&drained)
        } else {
            String::from_utf8_lossy(&drained).into_owned()
        };

        Ok(StreamReadResponse { data, done })
    }

    /// Handle one `http/stream.close` payload. Idempotent; never raises.
    pub async fn close(&self, payload: &str) -> String {
        let request: StreamCloseRequest = match protocol::parse_payload(payload) {
            Ok(request) => request,
            Err(err) => return protocol::encode_error(&err),
        };
        if let Some(entry) = self.registry.remove(&self.exec_id, request.handle) {
            entry.task.abort();
        }
        protocol::encode_ok(&serde_json::json!({"closed": true}))
    }
}

/// Producer: send the request, pull chunks into the shared buffer.
async fn produce(
    builder: reqwest::RequestBuilder,
    state: Arc<Mutex<StreamState>>,
    max_response_size: usize,
) {
    let mut response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            state.lock().failure = Some(StreamFailure::Transport(err.to_string()));
            return;
        }
    };

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let mut state = state.lock();
                state.total_bytes += chunk.len();
                if state.total_bytes > max_response_size {
                    state.failure = Some(StreamFailure::TooLarge {
                        max: max_response_size,
                    });
                    return;
                }
                state.chunks.push_back(chunk);
            }
            Ok(None) => {
                state.lock().done = true;
                return;
            }
            Err(err) => {
                state.lock().failure = Some(StreamFailure::Transport(err.to_string()));
                return;
            }
        }
    }
}
