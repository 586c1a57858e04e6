//! Scriptable [`TransferService`] for orchestrator tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::ServiceError;
use crate::service::{BoxFuture, TransferService};
use crate::types::{AliveTask, TaskHandle, TransferEvent, TransferOutcome, TransferRequest};

/// Records every call; events are injected with [`emit`](Self::emit).
pub(crate) struct MockTransferService {
    next: AtomicU64,
    pub created: Mutex<Vec<(TaskHandle, TransferRequest, PathBuf)>>,
    pub resumed: Mutex<Vec<TaskHandle>>,
    pub cancelled: Mutex<Vec<TaskHandle>>,
    alive: Mutex<Vec<AliveTask>>,
    fail_resume: AtomicBool,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

impl MockTransferService {
    pub fn new() -> Arc<Self> {
        Self::with_alive(Vec::new())
    }

    /// Simulates tasks left over from a previous process.
    pub fn with_alive(alive: Vec<AliveTask>) -> Arc<Self> {
        let first = alive.iter().map(|t| t.handle.0 + 1).max().unwrap_or(1);
        let (events_tx, events_rx) = mpsc::channel(64);
        Arc::new(Self {
            next: AtomicU64::new(first),
            created: Mutex::new(Vec::new()),
            resumed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            alive: Mutex::new(alive),
            fail_resume: AtomicBool::new(false),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    pub fn fail_resume(&self) {
        self.fail_resume.store(true, Ordering::SeqCst);
    }

    pub async fn emit(&self, event: TransferEvent) {
        self.events_tx.send(event).await.unwrap();
    }

    pub async fn progress(&self, handle: TaskHandle, bytes_sent: u64, bytes_total: Option<u64>) {
        self.emit(TransferEvent::Progress {
            handle,
            bytes_sent,
            bytes_total,
        })
        .await;
    }

    pub async fn complete(&self, handle: TaskHandle, outcome: TransferOutcome) {
        self.emit(TransferEvent::Completed { handle, outcome }).await;
    }

    pub fn created_request(&self, index: usize) -> (TaskHandle, TransferRequest, PathBuf) {
        self.created.lock().unwrap()[index].clone()
    }
}

impl TransferService for MockTransferService {
    fn create_task(
        &self,
        request: TransferRequest,
        source: PathBuf,
    ) -> BoxFuture<'_, Result<TaskHandle, ServiceError>> {
        Box::pin(async move {
            let handle = TaskHandle(self.next.fetch_add(1, Ordering::SeqCst));
            self.created.lock().unwrap().push((handle, request, source));
            Ok(handle)
        })
    }

    fn resume(&self, handle: TaskHandle) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            if self.fail_resume.load(Ordering::SeqCst) {
                return Err(ServiceError::Unavailable("resume refused".into()));
            }
            self.resumed.lock().unwrap().push(handle);
            Ok(())
        })
    }

    fn cancel(&self, handle: TaskHandle) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            self.cancelled.lock().unwrap().push(handle);
            self.complete(handle, TransferOutcome::cancelled()).await;
            Ok(())
        })
    }

    fn alive_tasks(&self) -> BoxFuture<'_, Vec<AliveTask>> {
        Box::pin(async move { self.alive.lock().unwrap().clone() })
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.lock().unwrap().take()
    }
}
