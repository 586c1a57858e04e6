//! Ticket endpoints and status polling.

pub mod client;
pub mod poller;

pub use client::TicketClient;
pub use poller::{DEFAULT_POLL_INTERVAL, PollUpdate, StatusSource, TicketStatusPoller};
