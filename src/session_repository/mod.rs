//! SessionRepository - session/photo persistence
//!
//! ## Responsibilities
//!
//! - Session CRUD with the single-active-session takeover on create
//! - Photo records with cascade delete under their session
//! - Status updates driven by the capture orchestrator

mod repository;
mod types;

pub use repository::SessionRepository;
pub use types::{PhotoRow, SessionRow, SessionStatus};
