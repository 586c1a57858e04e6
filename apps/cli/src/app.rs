//! Wires the session, ticket and upload components together and runs
//! one command against them.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use scanrelay_protocol::{Ticket, TicketStatus};
use scanrelay_session::{ApiError, AuthSession, CredentialStore, FileCredentialStore};
use scanrelay_tickets::{PollUpdate, TicketClient, TicketStatusPoller};
use scanrelay_transfer::StagingArea;
use scanrelay_upload::{
    HttpTransferService, RecoveredCompletion, ScanFiles, UploadError, UploadOrchestrator,
    UploadProgress,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;

pub struct App {
    config: Config,
    auth: Arc<AuthSession>,
    tickets: TicketClient,
    uploads: Arc<UploadOrchestrator>,
    _events: JoinHandle<()>,
}

impl App {
    /// Builds every component from `config`. Must run inside the runtime.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn CredentialStore> =
            Arc::new(FileCredentialStore::new(config.credential_path()));
        let auth = Arc::new(
            AuthSession::new(config.api_config(), store).context("failed to set up HTTP client")?,
        );
        let tickets = TicketClient::new(auth.clone());

        // Per-request timeouts on the transfer override the client default.
        let service = Arc::new(HttpTransferService::new(auth.http().clone()));
        let uploads = UploadOrchestrator::new(
            auth.clone(),
            service,
            StagingArea::new(config.staging_dir()),
        );
        let events = uploads.attach_events()?;
        uploads.set_background_completion_handler(Box::new(|| {
            info!("all background transfers finished");
        }));

        Ok(Self {
            config,
            auth,
            tickets,
            uploads,
            _events: events,
        })
    }

    pub async fn login(&self, email: &str, password: Option<String>) -> Result<()> {
        let password = match password {
            Some(password) => password,
            None => read_password()?,
        };
        let credential = self
            .auth
            .login(email, &password)
            .await
            .map_err(|e| api_error(e, "login failed"))?;
        println!(
            "Logged in as {} ({})",
            credential.identity.email, credential.identity.role
        );
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.auth
            .logout()
            .map_err(|e| api_error(e, "failed to clear stored session"))?;
        println!("Logged out");
        Ok(())
    }

    pub fn whoami(&self) -> Result<()> {
        match self.auth.current_identity() {
            Some(identity) => println!(
                "{} ({}, user {})",
                identity.email, identity.role, identity.user_id
            ),
            None => println!("Not logged in"),
        }
        Ok(())
    }

    pub async fn list_tickets(&self) -> Result<()> {
        let tickets = self
            .tickets
            .list_tickets()
            .await
            .map_err(|e| api_error(e, "failed to list tickets"))?;
        if tickets.is_empty() {
            println!("No tickets");
        }
        for ticket in &tickets {
            println!("{}", ticket_line(ticket));
        }
        Ok(())
    }

    pub async fn create_ticket(&self, note: Option<&str>) -> Result<()> {
        let ticket = self
            .tickets
            .create_ticket(note)
            .await
            .map_err(|e| api_error(e, "failed to create ticket"))?;
        println!("{}", ticket_line(&ticket));
        Ok(())
    }

    pub async fn status(&self, ticket_id: &str) -> Result<()> {
        let ticket = self
            .tickets
            .ticket_status(ticket_id)
            .await
            .map_err(|e| api_error(e, "failed to fetch ticket status"))?;
        println!("{}", ticket_line(&ticket));
        Ok(())
    }

    /// Prints each status change until the ticket is terminal or Ctrl-C.
    pub async fn watch(&self, ticket_id: &str, interval_secs: Option<u64>) -> Result<()> {
        let interval = interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.config.poll_interval);
        let poller = TicketStatusPoller::new(Arc::new(self.tickets.clone()));
        let mut updates = poller.start_polling(ticket_id, interval);
        let mut last = None;

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(PollUpdate::Status(ticket)) => {
                        if last != Some(ticket.status) {
                            println!("{}", ticket_line(&ticket));
                            last = Some(ticket.status);
                        }
                    }
                    Some(PollUpdate::Error(e)) if e.requires_login() => {
                        poller.stop_polling();
                        return Err(api_error(e, "polling stopped"));
                    }
                    Some(PollUpdate::Error(e)) => {
                        eprintln!("Poll failed: {e}; retrying in {}s", interval.as_secs());
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    poller.stop_polling();
                    break;
                }
            }
        }
        Ok(())
    }

    /// Reattaches leftover transfers, then uploads `files` and waits for
    /// the server's answer. Ctrl-C cancels the transfer.
    pub async fn upload(&self, ticket_id: &str, files: ScanFiles) -> Result<()> {
        let recovered = self
            .uploads
            .recover_in_flight()
            .await
            .map_err(|e| upload_error(e, "failed to reattach previous transfers"))?;
        if !recovered.handles.is_empty() {
            info!(count = recovered.handles.len(), "reattached transfers from a previous run");
        }
        let mut completions = recovered.completions;
        tokio::spawn(async move {
            while let Some(done) = completions.recv().await {
                report_recovered(&done);
            }
        });

        let (tx, mut rx) = oneshot::channel();
        let handle = self
            .uploads
            .submit(
                ticket_id,
                &files,
                Box::new(|progress: UploadProgress| {
                    eprint!("\rUploading {:5.1}%", progress.percentage());
                    let _ = std::io::stderr().flush();
                }),
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .await
            .map_err(|e| upload_error(e, "upload was not started"))?;

        let mut cancelling = false;
        let result = loop {
            tokio::select! {
                result = &mut rx => break result,
                _ = tokio::signal::ctrl_c(), if !cancelling => {
                    cancelling = true;
                    warn!(ticket = %ticket_id, %handle, "cancelling upload");
                    self.uploads
                        .cancel(handle)
                        .await
                        .map_err(|e| upload_error(e, "failed to cancel upload"))?;
                }
            }
        };
        eprintln!();

        match result.context("upload ended without a result")? {
            Ok(response) => {
                println!("Scan {} uploaded: {}", response.scan_id, response.message);
                println!("Ticket status: {}", response.ticket_status);
                Ok(())
            }
            Err(failure) => {
                let hint = failure.recovery_suggestion();
                let err = anyhow::Error::new(failure).context("upload failed");
                Err(match hint {
                    Some(hint) => err.context(hint),
                    None => err,
                })
            }
        }
    }

    pub async fn download_result(&self, ticket_id: &str, out: &Path) -> Result<()> {
        let bytes = self
            .tickets
            .download_result(ticket_id)
            .await
            .map_err(|e| api_error(e, "failed to download result"))?;
        tokio::fs::write(out, &bytes)
            .await
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("Wrote {} bytes to {}", bytes.len(), out.display());
        Ok(())
    }
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    Ok(password)
}

fn api_error(err: ApiError, action: &'static str) -> anyhow::Error {
    let hint = err.recovery_suggestion();
    let err = anyhow::Error::new(err).context(action);
    match hint {
        Some(hint) => err.context(hint),
        None => err,
    }
}

fn upload_error(err: UploadError, action: &'static str) -> anyhow::Error {
    match err {
        UploadError::Auth(e) => api_error(e, action),
        other => anyhow::Error::new(other).context(action),
    }
}

fn report_recovered(done: &RecoveredCompletion) {
    let ticket = done.ticket_id.as_deref().unwrap_or("unknown ticket");
    match &done.result {
        Ok(response) => info!(
            handle = %done.handle,
            ticket,
            scan_id = %response.scan_id,
            "reattached upload finished"
        ),
        Err(failure) => warn!(
            handle = %done.handle,
            ticket,
            error = %failure,
            "reattached upload failed"
        ),
    }
}

fn ticket_line(ticket: &Ticket) -> String {
    let stage = match ticket.status.stage() {
        Some(stage) => format!("{}/{}", stage + 1, TicketStatus::PROGRESSION.len()),
        None => "-".to_string(),
    };
    let mut line = format!("{}  {:<18}  {}", ticket.id, ticket.status.as_str(), stage);
    if let Some(engineer) = &ticket.assigned_engineer_id {
        line.push_str(&format!("  engineer={engineer}"));
    }
    if let Some(note) = &ticket.note {
        line.push_str(&format!("  note={note:?}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket {
            id: "t-1".into(),
            user_id: "u-1".into(),
            assigned_engineer_id: None,
            device_id: "d-1".into(),
            status,
            note: None,
            result_file_id: None,
            result_url: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn ticket_line_shows_stage() {
        let line = ticket_line(&ticket(TicketStatus::Processing));
        assert!(line.starts_with("t-1  processing"));
        assert!(line.ends_with("5/7"));
    }

    #[test]
    fn ticket_line_for_failed_has_no_stage() {
        let mut t = ticket(TicketStatus::Failed);
        t.assigned_engineer_id = Some("eng-2".into());
        let line = ticket_line(&t);
        assert!(line.contains("  -  engineer=eng-2"));
    }

    #[test]
    fn api_error_carries_recovery_hint() {
        let err = api_error(ApiError::NotFound, "failed to fetch ticket status");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("failed to fetch ticket status"));
        assert!(rendered.contains("deleted"));
    }
}
