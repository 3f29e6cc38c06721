//! Bravebird: acquires one publicly shared PDF through a real browser flow
//! (no hosting-service API), writes an integrity-checked handoff record,
//! and answers questions about the document downstream.

pub mod agent;
pub mod analyst;
pub mod brain;
pub mod dom;
pub mod error;
pub mod executor;
pub mod guard;
pub mod handoff;
pub mod hands;
pub mod retry;
pub mod sandbox;
pub mod types;

pub use agent::DownloadAgent;
pub use analyst::QueryAgent;
pub use error::{AcquireError, HandoffError};
pub use handoff::HandoffRecord;
pub use sandbox::Sandbox;
pub use types::{ActionPlan, AgentAction, PageObservation};
