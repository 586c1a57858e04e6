//! In-process [`TransferService`] that streams staged files over HTTP.
//!
//! Tasks live only as long as this process, so [`alive_tasks`] never
//! reports work from an earlier run.
//!
//! [`alive_tasks`]: TransferService::alive_tasks

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::service::{BoxFuture, TransferService};
use crate::types::{AliveTask, TaskHandle, TransferEvent, TransferOutcome, TransferRequest};

const EVENT_CAPACITY: usize = 256;

struct TaskEntry {
    request: TransferRequest,
    source: PathBuf,
    cancel: CancellationToken,
    started: bool,
}

type TaskMap = Arc<Mutex<HashMap<TaskHandle, TaskEntry>>>;

/// Uploads staged packages with `reqwest`, reporting progress per chunk read.
pub struct HttpTransferService {
    http: reqwest::Client,
    next_handle: AtomicU64,
    tasks: TaskMap,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

impl HttpTransferService {
    /// Creates a service using `http`. Per-request timeouts come from each
    /// [`TransferRequest`].
    pub fn new(http: reqwest::Client) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            http,
            next_handle: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<TaskHandle, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TransferService for HttpTransferService {
    fn create_task(
        &self,
        request: TransferRequest,
        source: PathBuf,
    ) -> BoxFuture<'_, Result<TaskHandle, ServiceError>> {
        Box::pin(async move {
            let handle = TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
            self.lock_tasks().insert(
                handle,
                TaskEntry {
                    request,
                    source,
                    cancel: CancellationToken::new(),
                    started: false,
                },
            );
            debug!(%handle, "transfer task created");
            Ok(handle)
        })
    }

    fn resume(&self, handle: TaskHandle) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            let (request, source, cancel) = {
                let mut tasks = self.lock_tasks();
                let entry = tasks
                    .get_mut(&handle)
                    .ok_or(ServiceError::UnknownTask(handle))?;
                if entry.started {
                    return Ok(());
                }
                entry.started = true;
                (
                    entry.request.clone(),
                    entry.source.clone(),
                    entry.cancel.clone(),
                )
            };

            let http = self.http.clone();
            let tasks = Arc::clone(&self.tasks);
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => TransferOutcome::cancelled(),
                    outcome = run_transfer(&http, request, &source, handle, &events_tx) => outcome,
                };
                finish(&tasks, &events_tx, handle, outcome).await;
            });
            debug!(%handle, "transfer task started");
            Ok(())
        })
    }

    fn cancel(&self, handle: TaskHandle) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            let not_started = {
                let tasks = self.lock_tasks();
                let entry = tasks.get(&handle).ok_or(ServiceError::UnknownTask(handle))?;
                entry.cancel.cancel();
                !entry.started
            };

            // A started task reports its own cancellation.
            if not_started {
                finish(&self.tasks, &self.events_tx, handle, TransferOutcome::cancelled()).await;
            }
            debug!(%handle, "transfer cancellation requested");
            Ok(())
        })
    }

    fn alive_tasks(&self) -> BoxFuture<'_, Vec<AliveTask>> {
        Box::pin(async move {
            let mut alive: Vec<AliveTask> = self
                .lock_tasks()
                .iter()
                .map(|(handle, entry)| AliveTask {
                    handle: *handle,
                    source: Some(entry.source.clone()),
                })
                .collect();
            alive.sort_by_key(|t| t.handle);
            alive
        })
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Removes the task and emits its terminal event, then `EventsDrained`
/// when nothing else is outstanding.
async fn finish(
    tasks: &TaskMap,
    events_tx: &mpsc::Sender<TransferEvent>,
    handle: TaskHandle,
    outcome: TransferOutcome,
) {
    let drained = {
        let mut tasks = tasks.lock().unwrap_or_else(|e| e.into_inner());
        if tasks.remove(&handle).is_none() {
            return;
        }
        tasks.is_empty()
    };

    if events_tx
        .send(TransferEvent::Completed { handle, outcome })
        .await
        .is_err()
    {
        warn!(%handle, "transfer completed with no event listener");
        return;
    }
    if drained {
        let _ = events_tx.send(TransferEvent::EventsDrained).await;
    }
}

async fn run_transfer(
    http: &reqwest::Client,
    request: TransferRequest,
    source: &Path,
    handle: TaskHandle,
    events_tx: &mpsc::Sender<TransferEvent>,
) -> TransferOutcome {
    let file = match tokio::fs::File::open(source).await {
        Ok(file) => file,
        Err(e) => return TransferOutcome::failed(format!("cannot open {}: {e}", source.display())),
    };
    let bytes_total = file.metadata().await.ok().map(|m| m.len());

    let progress_tx = events_tx.clone();
    let mut bytes_sent = 0u64;
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            bytes_sent += bytes.len() as u64;
            // Progress is advisory; drop it rather than stall the upload.
            let _ = progress_tx.try_send(TransferEvent::Progress {
                handle,
                bytes_sent,
                bytes_total,
            });
        }
        chunk
    });

    let mut builder = http
        .request(request.method, &request.url)
        .timeout(request.timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let resp = match builder
        .body(reqwest::Body::wrap_stream(stream))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => return TransferOutcome::failed(e.to_string()),
    };

    let status = resp.status().as_u16();
    match resp.bytes().await {
        Ok(body) => TransferOutcome::response(status, body.to_vec()),
        Err(e) => TransferOutcome::failed(e.to_string()),
    }
}
