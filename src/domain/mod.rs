//! Domain types and rules
//!
//! Everything here is free of I/O: handlers resolve the caller, load state,
//! call into these modules and persist whatever comes back.

pub mod attachments;
pub mod availability;
pub mod conversations;
pub mod errors;
pub mod principal;
pub mod receipts;
pub mod reviews;
pub mod service_requests;
pub mod technicians;

pub use errors::{WorkflowError, WorkflowResult};
pub use principal::{Principal, Role};
