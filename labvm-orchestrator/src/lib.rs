//! Fleet orchestration business logic
//!
//! This crate contains the core workflow for classroom sandbox fleets: an
//! approved request fans out one provisioning pipeline per roster member,
//! the resulting VMs are persisted, and a periodic reaper tears each one
//! down once its TTL elapses. It is consumed by the labvmd service but can
//! also be driven by CLI commands or other entry points.

pub mod db;
pub mod error;
pub mod fleet;
pub mod reaper;
pub mod store;
pub mod test_utils;

pub use error::{OrchestratorError, Result};
pub use fleet::{FleetConfig, FleetOrchestrator, FleetOutcome, MemberFailure};
pub use reaper::{start_reaper_task, sweep_expired, MAX_REAP_ATTEMPTS};
pub use store::{FleetStore, ProvisionedVm, SubmitRequest, VmRequest};
