//! Wire types for the scan-relay backend API.
//!
//! Every struct here mirrors a JSON body sent to or received from the
//! backend. Field names are camelCase on the wire.

pub mod auth;
pub mod ticket;

// Re-export primary types for convenience.
pub use auth::{
    AuthResponse, DEFAULT_TOKEN_LIFETIME_SECS, ErrorBody, LoginRequest, RefreshTokenRequest,
    UserInfo,
};
pub use ticket::{CreateTicketRequest, Ticket, TicketStatus, UploadScanResponse};
