//! Ticket-to-task routing for scan uploads.
//!
//! The registry maps each ticket to at most one active task and each task
//! handle back to its staged file and callbacks. Every mutation goes
//! through the registry mutex; per-task progress and callbacks have their
//! own locks so event delivery never blocks lookups for other tickets.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use scanrelay_protocol::{ErrorBody, UploadScanResponse};
use scanrelay_session::AuthSession;
use scanrelay_transfer::{StagingArea, UploadProgress, staged_ticket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{UploadError, UploadFailure};
use crate::service::TransferService;
use crate::types::{
    ScanFiles, TaskHandle, TransferEvent, TransferOutcome, TransferRequest, TransportError,
};

/// Receives progress for one upload.
pub type ProgressSink = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Receives the terminal result of one upload, exactly once.
pub type CompletionSink = Box<dyn FnOnce(Result<UploadScanResponse, UploadFailure>) + Send>;

/// Runs once when the transfer service reports all work drained.
pub type BackgroundCompletionHandler = Box<dyn FnOnce() + Send>;

/// Terminal result of a task reattached after relaunch.
#[derive(Debug)]
pub struct RecoveredCompletion {
    pub handle: TaskHandle,
    /// Recovered from the staged file name when available.
    pub ticket_id: Option<String>,
    pub result: Result<UploadScanResponse, UploadFailure>,
}

/// Outcome of [`UploadOrchestrator::recover_in_flight`].
#[derive(Debug)]
pub struct Recovered {
    pub handles: Vec<TaskHandle>,
    pub completions: mpsc::UnboundedReceiver<RecoveredCompletion>,
}

struct Sinks {
    on_progress: ProgressSink,
    on_completion: CompletionSink,
}

enum Delivery {
    Live(Sinks),
    /// Reattached after relaunch; the completion goes to the recovery channel.
    Recovered,
    Done,
}

struct ActiveUpload {
    ticket_id: Option<String>,
    temp_path: Option<PathBuf>,
    progress: Mutex<UploadProgress>,
    delivery: Mutex<Delivery>,
    cancel_requested: AtomicBool,
}

impl ActiveUpload {
    fn new(ticket_id: Option<String>, temp_path: Option<PathBuf>, delivery: Delivery) -> Self {
        Self {
            ticket_id,
            temp_path,
            progress: Mutex::new(UploadProgress::default()),
            delivery: Mutex::new(delivery),
            cancel_requested: AtomicBool::new(false),
        }
    }
}

enum Slot {
    /// `submit` is building and staging; no task handle yet.
    Preparing,
    Active(TaskHandle),
}

#[derive(Default)]
struct Registry {
    tickets: HashMap<String, Slot>,
    tasks: HashMap<TaskHandle, Arc<ActiveUpload>>,
}

struct Staged {
    path: PathBuf,
    content_type: String,
    len: usize,
}

/// Holds a ticket's `Preparing` slot until the task is recorded.
struct Reservation<'a> {
    registry: &'a Mutex<Registry>,
    ticket_id: String,
    committed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut registry = lock(self.registry);
        if matches!(registry.tickets.get(&self.ticket_id), Some(Slot::Preparing)) {
            registry.tickets.remove(&self.ticket_id);
        }
    }
}

/// Drives scan uploads through a [`TransferService`].
pub struct UploadOrchestrator {
    auth: Arc<AuthSession>,
    service: Arc<dyn TransferService>,
    staging: StagingArea,
    registry: Mutex<Registry>,
    recovered_tx: Mutex<Option<mpsc::UnboundedSender<RecoveredCompletion>>>,
    background_handler: Mutex<Option<BackgroundCompletionHandler>>,
}

impl UploadOrchestrator {
    pub fn new(
        auth: Arc<AuthSession>,
        service: Arc<dyn TransferService>,
        staging: StagingArea,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth,
            service,
            staging,
            registry: Mutex::new(Registry::default()),
            recovered_tx: Mutex::new(None),
            background_handler: Mutex::new(None),
        })
    }

    /// Starts routing transfer-service events. Call once, before
    /// [`recover_in_flight`](Self::recover_in_flight) and any `submit`.
    ///
    /// The pump ends when the service's event stream closes or the
    /// orchestrator is dropped.
    pub fn attach_events(self: &Arc<Self>) -> Result<JoinHandle<()>, UploadError> {
        let mut events = self
            .service
            .take_events()
            .ok_or(UploadError::EventsAlreadyAttached)?;
        let orchestrator = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                orchestrator.handle_event(event);
            }
            debug!("transfer event pump stopped");
        }))
    }

    /// Packages `files`, stages them and starts a transfer for `ticket_id`.
    ///
    /// Returns once the transfer is handed off; the result arrives through
    /// `on_completion`. Fails without starting anything when a mandatory
    /// part is absent, staging fails, or the ticket already has an upload.
    pub async fn submit(
        &self,
        ticket_id: &str,
        files: &ScanFiles,
        on_progress: ProgressSink,
        on_completion: CompletionSink,
    ) -> Result<TaskHandle, UploadError> {
        let url = self.auth.config().upload_url(ticket_id)?;
        let parts = files.parts()?;
        let mut reservation = self.reserve(ticket_id)?;

        let staging = self.staging.clone();
        let ticket = ticket_id.to_string();
        let staged = tokio::task::spawn_blocking(move || -> Result<Staged, UploadError> {
            let package = scanrelay_transfer::build(&parts)?;
            let path = staging.stage(&ticket, package.body())?;
            Ok(Staged {
                path,
                content_type: package.content_type(),
                len: package.len(),
            })
        })
        .await
        .map_err(|e| UploadError::FileWriteFailed(std::io::Error::other(e)))??;

        let handle = match self.create_task(&url, &staged).await {
            Ok(handle) => handle,
            Err(e) => {
                self.release(&staged.path);
                return Err(e);
            }
        };

        // Recorded before resume so no event can arrive unrouted.
        {
            let upload = ActiveUpload::new(
                Some(ticket_id.to_string()),
                Some(staged.path.clone()),
                Delivery::Live(Sinks {
                    on_progress,
                    on_completion,
                }),
            );
            let mut registry = lock(&self.registry);
            registry
                .tickets
                .insert(ticket_id.to_string(), Slot::Active(handle));
            registry.tasks.insert(handle, Arc::new(upload));
            reservation.committed = true;
        }

        if let Err(e) = self.service.resume(handle).await {
            warn!(ticket = ticket_id, %handle, error = %e, "failed to start transfer");
            self.detach(handle);
            self.release(&staged.path);
            return Err(e.into());
        }

        info!(ticket = ticket_id, %handle, bytes = staged.len, "upload started");
        Ok(handle)
    }

    async fn create_task(&self, url: &str, staged: &Staged) -> Result<TaskHandle, UploadError> {
        let token = self.auth.require_access_token()?;
        let request = TransferRequest {
            method: reqwest::Method::POST,
            url: url.to_string(),
            headers: vec![
                (CONTENT_TYPE.to_string(), staged.content_type.clone()),
                (CONTENT_LENGTH.to_string(), staged.len.to_string()),
                (ACCEPT.to_string(), "application/json".into()),
                (AUTHORIZATION.to_string(), format!("Bearer {token}")),
            ],
            timeout: self.auth.config().upload_timeout,
        };
        Ok(self
            .service
            .create_task(request, staged.path.clone())
            .await?)
    }

    fn reserve(&self, ticket_id: &str) -> Result<Reservation<'_>, UploadError> {
        let mut registry = lock(&self.registry);
        if registry.tickets.contains_key(ticket_id) {
            return Err(UploadError::AlreadyUploading(ticket_id.to_string()));
        }
        registry
            .tickets
            .insert(ticket_id.to_string(), Slot::Preparing);
        Ok(Reservation {
            registry: &self.registry,
            ticket_id: ticket_id.to_string(),
            committed: false,
        })
    }

    /// `true` while `ticket_id` has an upload being prepared or in flight.
    pub fn is_uploading(&self, ticket_id: &str) -> bool {
        lock(&self.registry).tickets.contains_key(ticket_id)
    }

    /// Latest progress reported for `ticket_id`'s active transfer.
    pub fn progress_of(&self, ticket_id: &str) -> Option<UploadProgress> {
        let registry = lock(&self.registry);
        let Some(Slot::Active(handle)) = registry.tickets.get(ticket_id) else {
            return None;
        };
        let upload = registry.tasks.get(handle)?;
        Some(*lock(&upload.progress))
    }

    /// Handle of `ticket_id`'s active transfer.
    pub fn active_handle(&self, ticket_id: &str) -> Option<TaskHandle> {
        match lock(&self.registry).tickets.get(ticket_id) {
            Some(Slot::Active(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// Requests cancellation. Cleanup and the `Cancelled` completion
    /// happen when the service acknowledges.
    pub async fn cancel(&self, handle: TaskHandle) -> Result<(), UploadError> {
        let upload = lock(&self.registry)
            .tasks
            .get(&handle)
            .cloned()
            .ok_or(UploadError::UnknownTask(handle))?;
        upload.cancel_requested.store(true, Ordering::SeqCst);
        self.service.cancel(handle).await?;
        debug!(%handle, "upload cancellation requested");
        Ok(())
    }

    /// Cancels the active transfer of `ticket_id`.
    pub async fn cancel_ticket(&self, ticket_id: &str) -> Result<(), UploadError> {
        let handle = self
            .active_handle(ticket_id)
            .ok_or_else(|| UploadError::NotUploading(ticket_id.to_string()))?;
        self.cancel(handle).await
    }

    /// Sets the handler run when the service reports every task drained.
    pub fn set_background_completion_handler(&self, handler: BackgroundCompletionHandler) {
        *lock(&self.background_handler) = Some(handler);
    }

    /// Reattaches to transfers left running by a previous process and
    /// deletes staged files no live transfer refers to.
    ///
    /// Must run before the first `submit`. Progress callbacks from the
    /// previous process are gone; only terminal results are reported,
    /// through the returned channel.
    pub async fn recover_in_flight(&self) -> Result<Recovered, UploadError> {
        let (tx, completions) = mpsc::unbounded_channel();
        *lock(&self.recovered_tx) = Some(tx);

        let alive = self.service.alive_tasks().await;
        let mut handles = Vec::new();
        let referenced: HashSet<OsString> = {
            let mut registry = lock(&self.registry);
            for task in alive {
                if registry.tasks.contains_key(&task.handle) {
                    continue;
                }
                let ticket_id = task.source.as_deref().and_then(staged_ticket);
                if let Some(ticket) = &ticket_id {
                    registry
                        .tickets
                        .entry(ticket.clone())
                        .or_insert(Slot::Active(task.handle));
                }
                info!(handle = %task.handle, ticket = ?ticket_id, "reattached transfer");
                registry.tasks.insert(
                    task.handle,
                    Arc::new(ActiveUpload::new(ticket_id, task.source, Delivery::Recovered)),
                );
                handles.push(task.handle);
            }
            registry
                .tasks
                .values()
                .filter_map(|u| u.temp_path.as_deref().and_then(Path::file_name))
                .map(|n| n.to_os_string())
                .collect()
        };

        for path in self.staging.staged_files()? {
            let in_use = path.file_name().is_some_and(|n| referenced.contains(n));
            if !in_use {
                info!(path = %path.display(), "removing orphaned staged package");
                self.release(&path);
            }
        }

        Ok(Recovered {
            handles,
            completions,
        })
    }

    fn handle_event(&self, event: TransferEvent) {
        match event {
            TransferEvent::Progress {
                handle,
                bytes_sent,
                bytes_total,
            } => self.on_progress(handle, UploadProgress::new(bytes_sent, bytes_total)),
            TransferEvent::Completed { handle, outcome } => self.on_complete(handle, outcome),
            TransferEvent::EventsDrained => self.on_events_drained(),
        }
    }

    fn on_progress(&self, handle: TaskHandle, progress: UploadProgress) {
        let Some(upload) = lock(&self.registry).tasks.get(&handle).cloned() else {
            debug!(%handle, "progress for unknown task ignored");
            return;
        };

        // Holding the delivery lock orders this against completion.
        let delivery = lock(&upload.delivery);
        if matches!(*delivery, Delivery::Done) {
            return;
        }
        *lock(&upload.progress) = progress;
        if let Delivery::Live(sinks) = &*delivery {
            (sinks.on_progress)(progress);
        }
    }

    fn on_complete(&self, handle: TaskHandle, outcome: TransferOutcome) {
        let Some(upload) = self.detach(handle) else {
            debug!(%handle, "completion for unknown task ignored");
            return;
        };
        let delivery = std::mem::replace(&mut *lock(&upload.delivery), Delivery::Done);
        if let Some(path) = &upload.temp_path {
            self.release(path);
        }

        let result = interpret(outcome, upload.cancel_requested.load(Ordering::SeqCst));
        match &result {
            Ok(resp) => info!(
                %handle,
                ticket = ?upload.ticket_id,
                scan = %resp.scan_id,
                "upload completed"
            ),
            Err(e) => warn!(%handle, ticket = ?upload.ticket_id, error = %e, "upload failed"),
        }

        match delivery {
            Delivery::Live(sinks) => (sinks.on_completion)(result),
            Delivery::Recovered => {
                if let Some(tx) = lock(&self.recovered_tx).as_ref() {
                    let _ = tx.send(RecoveredCompletion {
                        handle,
                        ticket_id: upload.ticket_id.clone(),
                        result,
                    });
                }
            }
            Delivery::Done => {}
        }
    }

    fn on_events_drained(&self) {
        let handler = lock(&self.background_handler).take();
        if let Some(handler) = handler {
            debug!("background transfers drained");
            handler();
        }
    }

    /// Removes `handle` and its ticket mapping. Returns `None` if already gone.
    fn detach(&self, handle: TaskHandle) -> Option<Arc<ActiveUpload>> {
        let mut registry = lock(&self.registry);
        let upload = registry.tasks.remove(&handle)?;
        if let Some(ticket) = &upload.ticket_id
            && matches!(registry.tickets.get(ticket), Some(Slot::Active(h)) if *h == handle)
        {
            registry.tickets.remove(ticket);
        }
        Some(upload)
    }

    fn release(&self, path: &Path) {
        if let Err(e) = self.staging.release(path) {
            warn!(path = %path.display(), error = %e, "failed to delete staged package");
        }
    }
}

fn interpret(
    outcome: TransferOutcome,
    cancel_requested: bool,
) -> Result<UploadScanResponse, UploadFailure> {
    match outcome.error {
        Some(TransportError::Cancelled) => return Err(UploadFailure::Cancelled),
        Some(TransportError::Failed(_)) if cancel_requested => return Err(UploadFailure::Cancelled),
        Some(TransportError::Failed(reason)) => return Err(UploadFailure::Network(reason)),
        None => {}
    }
    let Some(status) = outcome.status else {
        return Err(UploadFailure::Network(
            "transfer ended without a response".into(),
        ));
    };
    if !(200..300).contains(&status) {
        return Err(UploadFailure::ServerRejected {
            status,
            message: ErrorBody::message_from(&outcome.body),
        });
    }
    serde_json::from_slice(&outcome.body)
        .map_err(|e| UploadFailure::MalformedResponse(e.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
