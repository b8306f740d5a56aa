//! Security module
//!
//! Gates between a generated plan and the outside world:
//! - Policy gate (detections to decisions, risk threshold)
//! - Approval gate (human-in-the-loop review with audit log)
//! - OS keyring integration for credentials

pub mod approval;
pub mod keyring;
pub mod policy;

pub use approval::{ApprovalGate, ApprovalOutcome, ApprovalRecord, MANUAL_REVIEW_REASON};
pub use keyring::{delete_credential, get_credential, set_credential, Credential};
pub use policy::{requires_approval, PolicyGate, DEFAULT_HITL_THRESHOLD};
