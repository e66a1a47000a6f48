//! Consumer-side wrapper around a streamed model response that reopens the
//! underlying reader after transient failures.
//!
//! Each stream moves through `Initial -> Active -> (Paused <-> Active) ->
//! Completed | Error`. A failed read pauses the stream, waits a fixed backoff
//! and reopens the source, at most `max_retries` times. After that a single
//! [`StreamMessage::Error`] is sent and nothing else follows it.

use crate::core::config::StreamSettings;
use crate::mcp::error::{McpError, McpResult};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Initial,
    Active,
    Paused,
    Completed,
    Error,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Start,
    ReadFailed,
    Resume,
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    pub state: StreamState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_active: Instant,
}

impl StreamMetadata {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: StreamState::Initial,
            retry_count: 0,
            max_retries,
            last_active: Instant::now(),
        }
    }

    /// Applies `event` and returns the new state. A read failure pauses the
    /// stream while retries remain and fails it otherwise.
    pub fn apply(&mut self, event: StreamEvent) -> McpResult<StreamState> {
        let next = match (self.state, event) {
            (StreamState::Initial, StreamEvent::Start) => StreamState::Active,
            (StreamState::Active, StreamEvent::ReadFailed) => {
                if self.retry_count < self.max_retries {
                    self.retry_count += 1;
                    StreamState::Paused
                } else {
                    StreamState::Error
                }
            }
            (StreamState::Paused, StreamEvent::Resume) => StreamState::Active,
            (StreamState::Active, StreamEvent::Finish) => StreamState::Completed,
            (state, event) => {
                return Err(McpError::Stream(format!(
                    "cannot apply {event:?} to a stream in state {state:?}"
                )))
            }
        };
        self.state = next;
        if next == StreamState::Active {
            self.last_active = Instant::now();
        }
        Ok(next)
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() > timeout
    }
}

/// Something that can hand out a fresh reader for the same response.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self) -> McpResult<BoxStream<'static, McpResult<String>>>;
}

struct RegistryEntry {
    metadata: StreamMetadata,
    wake: Arc<Notify>,
}

/// Live stream metadata by stream id.
pub struct StreamRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    inactivity_timeout: Duration,
}

impl StreamRegistry {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inactivity_timeout,
        }
    }

    fn lock(&self) -> McpResult<std::sync::MutexGuard<'_, HashMap<String, RegistryEntry>>> {
        self.entries
            .lock()
            .map_err(|_| McpError::Stream("stream registry lock poisoned".to_string()))
    }

    fn register(&self, id: &str, max_retries: u32) -> McpResult<Arc<Notify>> {
        let mut entries = self.lock()?;
        if entries.contains_key(id) {
            return Err(McpError::Stream(format!("stream '{id}' is already running")));
        }
        let wake = Arc::new(Notify::new());
        entries.insert(
            id.to_string(),
            RegistryEntry {
                metadata: StreamMetadata::new(max_retries),
                wake: Arc::clone(&wake),
            },
        );
        Ok(wake)
    }

    fn update<T>(&self, id: &str, change: impl FnOnce(&mut StreamMetadata) -> T) -> McpResult<T> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| McpError::Stream(format!("unknown stream '{id}'")))?;
        Ok(change(&mut entry.metadata))
    }

    fn remove(&self, id: &str) -> Option<StreamMetadata> {
        self.lock().ok()?.remove(id).map(|entry| entry.metadata)
    }

    pub fn metadata(&self, id: &str) -> Option<StreamMetadata> {
        self.lock()
            .ok()?
            .get(id)
            .map(|entry| entry.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resumes a stream from outside the pull loop. Paused streams, and
    /// active streams idle for longer than the inactivity timeout, get their
    /// retry counter reset, and the reader skips its current or next
    /// backoff. Returns whether the counter was reset.
    pub fn resume(&self, id: &str) -> McpResult<bool> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| McpError::Stream(format!("unknown stream '{id}'")))?;
        let metadata = &mut entry.metadata;
        let reset = match metadata.state {
            StreamState::Paused => true,
            StreamState::Active => metadata.is_idle(self.inactivity_timeout),
            _ => false,
        };
        if reset {
            debug!(stream_id = %id, retries = metadata.retry_count, "Resetting stream retries");
            metadata.retry_count = 0;
            // Leaves a permit when the reader is not waiting yet.
            entry.wake.notify_one();
        }
        Ok(reset)
    }
}

/// Caller side of a spawned stream.
pub struct StreamHandle {
    id: String,
    registry: Arc<StreamRegistry>,
    cancel: CancellationToken,
    task: JoinHandle<StreamMetadata>,
}

impl StreamHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.registry.metadata(&self.id)
    }

    pub fn resume(&self) -> McpResult<bool> {
        self.registry.resume(&self.id)
    }

    /// Stops the pull loop and drops the underlying reader.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the stream to stop and returns its final metadata.
    pub async fn finished(self) -> McpResult<StreamMetadata> {
        self.task
            .await
            .map_err(|err| McpError::Stream(format!("stream task failed: {err}")))
    }
}

enum ReadOutcome {
    Finished,
    Failed(McpError),
    ReceiverGone,
}

pub struct ResumableStream {
    id: String,
    source: Arc<dyn StreamSource>,
    registry: Arc<StreamRegistry>,
    backoff: Duration,
    max_retries: u32,
    cancel: CancellationToken,
}

impl ResumableStream {
    pub fn new(
        id: impl Into<String>,
        source: Arc<dyn StreamSource>,
        registry: Arc<StreamRegistry>,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            registry,
            backoff: settings.backoff(),
            max_retries: settings.max_retries,
            cancel: CancellationToken::new(),
        }
    }

    /// Starts pulling on a background task.
    pub fn spawn(self) -> (StreamHandle, mpsc::UnboundedReceiver<StreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle_id = self.id.clone();
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run(tx));
        (
            StreamHandle {
                id: handle_id,
                registry,
                cancel,
                task,
            },
            rx,
        )
    }

    /// Pulls until completion, exhaustion or cancellation and returns the
    /// final metadata. The stream is removed from the registry afterwards.
    pub async fn run(self, tx: mpsc::UnboundedSender<StreamMessage>) -> StreamMetadata {
        let wake = match self.registry.register(&self.id, self.max_retries) {
            Ok(wake) => wake,
            Err(err) => {
                let _ = tx.send(StreamMessage::Error(err.to_string()));
                let mut metadata = StreamMetadata::new(self.max_retries);
                metadata.state = StreamState::Error;
                return metadata;
            }
        };

        if let Err(err) = self.pull(&tx, &wake).await {
            let _ = self.registry.update(&self.id, |metadata| {
                metadata.state = StreamState::Error;
            });
            let _ = tx.send(StreamMessage::Error(err.to_string()));
        }

        self.registry
            .remove(&self.id)
            .unwrap_or_else(|| StreamMetadata::new(self.max_retries))
    }

    async fn pull(
        &self,
        tx: &mpsc::UnboundedSender<StreamMessage>,
        wake: &Notify,
    ) -> McpResult<()> {
        self.registry
            .update(&self.id, |metadata| metadata.apply(StreamEvent::Start))??;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(stream_id = %self.id, "Stream cancelled");
                    return Ok(());
                }
                outcome = self.read_once(tx) => outcome,
            };

            let failure = match outcome {
                ReadOutcome::Finished => {
                    self.registry
                        .update(&self.id, |metadata| metadata.apply(StreamEvent::Finish))??;
                    let _ = tx.send(StreamMessage::End);
                    return Ok(());
                }
                ReadOutcome::ReceiverGone => return Ok(()),
                ReadOutcome::Failed(err) => err,
            };

            let (state, retry_count) = self.registry.update(&self.id, |metadata| {
                metadata
                    .apply(StreamEvent::ReadFailed)
                    .map(|state| (state, metadata.retry_count))
            })??;

            if state == StreamState::Error {
                warn!(stream_id = %self.id, error = %failure, "Stream retries exhausted");
                let err = McpError::Stream(format!(
                    "gave up after {} retries: {failure}",
                    self.max_retries
                ));
                let _ = tx.send(StreamMessage::Error(err.to_string()));
                return Ok(());
            }

            info!(
                stream_id = %self.id,
                attempt = retry_count,
                backoff_ms = self.backoff.as_millis() as u64,
                error = %failure,
                "Stream read failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.backoff) => {}
                _ = wake.notified() => {}
            }
            self.registry
                .update(&self.id, |metadata| metadata.apply(StreamEvent::Resume))??;
        }
    }

    async fn read_once(&self, tx: &mpsc::UnboundedSender<StreamMessage>) -> ReadOutcome {
        let mut reader = match self.source.open().await {
            Ok(reader) => reader,
            Err(err) => return ReadOutcome::Failed(err),
        };

        while let Some(item) = reader.next().await {
            match item {
                Ok(chunk) => {
                    let _ = self.registry.update(&self.id, StreamMetadata::touch);
                    if tx.send(StreamMessage::Chunk(chunk)).is_err() {
                        return ReadOutcome::ReceiverGone;
                    }
                }
                Err(err) => return ReadOutcome::Failed(err),
            }
        }
        ReadOutcome::Finished
    }
}
