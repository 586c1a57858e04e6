//! Cooperative ticket status polling.
//!
//! One [`TicketStatusPoller`] watches at most one ticket at a time. Each
//! iteration fetches, publishes the outcome, stops on a terminal status
//! and otherwise sleeps the full interval. Fetch errors are published and
//! the loop carries on.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use scanrelay_protocol::Ticket;
use scanrelay_session::ApiError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::TicketClient;

/// Interval used when the caller has no preference.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const UPDATE_CAPACITY: usize = 16;

/// Where ticket status comes from.
///
/// Implemented by [`TicketClient`]; tests substitute scripted sources.
pub trait StatusSource: Send + Sync {
    fn fetch_status<'a>(
        &'a self,
        ticket_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Ticket, ApiError>> + Send + 'a>>;
}

impl StatusSource for TicketClient {
    fn fetch_status<'a>(
        &'a self,
        ticket_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Ticket, ApiError>> + Send + 'a>> {
        Box::pin(self.ticket_status(ticket_id))
    }
}

/// One published poll outcome.
#[derive(Debug)]
pub enum PollUpdate {
    Status(Ticket),
    /// The fetch failed; polling continues after the interval.
    Error(ApiError),
}

struct PollSession {
    ticket_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Polls ticket status on an interval until stopped or terminal.
pub struct TicketStatusPoller {
    source: Arc<dyn StatusSource>,
    active: Mutex<Option<PollSession>>,
    last_status: Arc<Mutex<Option<Ticket>>>,
}

impl TicketStatusPoller {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            active: Mutex::new(None),
            last_status: Arc::new(Mutex::new(None)),
        }
    }

    /// Fetches status once, outside any polling session.
    pub async fn fetch_once(&self, ticket_id: &str) -> Result<Ticket, ApiError> {
        let ticket = self.source.fetch_status(ticket_id).await?;
        *lock(&self.last_status) = Some(ticket.clone());
        Ok(ticket)
    }

    /// Starts watching `ticket_id`, replacing any current session.
    ///
    /// The returned channel closes when polling ends: on a terminal
    /// status, on [`stop_polling`](Self::stop_polling), or when the
    /// poller is dropped.
    pub fn start_polling(&self, ticket_id: &str, interval: Duration) -> mpsc::Receiver<PollUpdate> {
        self.stop_polling();

        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            ticket_id.to_string(),
            interval,
            cancel.clone(),
            updates_tx,
            Arc::clone(&self.last_status),
        ));

        info!(ticket = ticket_id, interval_secs = interval.as_secs_f64(), "polling started");
        *lock(&self.active) = Some(PollSession {
            ticket_id: ticket_id.to_string(),
            cancel,
            task,
        });
        updates_rx
    }

    /// Stops the current session, if any.
    ///
    /// The loop observes the request before issuing another fetch; an
    /// in-flight fetch is abandoned and not published.
    pub fn stop_polling(&self) {
        if let Some(session) = lock(&self.active).take() {
            // Cancelled under the status lock: the loop checks the token
            // under the same lock before caching a result.
            let _status = lock(&self.last_status);
            session.cancel.cancel();
            debug!(ticket = %session.ticket_id, "polling stop requested");
        }
    }

    /// `true` while a session's loop is still running.
    pub fn is_polling(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Ticket being watched by the current session.
    pub fn watched_ticket(&self) -> Option<String> {
        lock(&self.active).as_ref().map(|s| s.ticket_id.clone())
    }

    /// Most recent successfully fetched ticket.
    pub fn last_status(&self) -> Option<Ticket> {
        lock(&self.last_status).clone()
    }
}

impl Drop for TicketStatusPoller {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    ticket_id: String,
    interval: Duration,
    cancel: CancellationToken,
    updates: mpsc::Sender<PollUpdate>,
    last_status: Arc<Mutex<Option<Ticket>>>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.fetch_status(&ticket_id) => result,
        };

        let mut terminal = false;
        let update = match result {
            Ok(ticket) => {
                debug!(ticket = %ticket_id, status = %ticket.status, "status fetched");
                terminal = ticket.status.is_terminal();
                let mut last = lock(&last_status);
                if cancel.is_cancelled() {
                    break;
                }
                *last = Some(ticket.clone());
                PollUpdate::Status(ticket)
            }
            Err(e) => {
                warn!(ticket = %ticket_id, error = %e, "status fetch failed");
                PollUpdate::Error(e)
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = updates.send(update) => {
                if sent.is_err() {
                    debug!(ticket = %ticket_id, "poll receiver dropped");
                    break;
                }
            }
        }

        if terminal {
            info!(ticket = %ticket_id, "ticket reached terminal status, polling stopped");
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(ticket = %ticket_id, "poll loop exited");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
