//! Orchestration agents
//!
//! Higher-level agents that treat other agents as composable units,
//! addressing them through the runtime like any caller would:
//! - `Sequential` - chained pipeline
//! - `Parallel` - fan-out/fan-in with an aggregator
//! - `Triage` - dynamic routing with session handoff

pub mod parallel;
pub mod sequential;
pub mod triage;

pub use parallel::{BranchReply, Parallel, RESULTS_TYPE};
pub use sequential::Sequential;
pub use triage::{Handoff, RouteDecision, Triage, TriageModel, HANDOFF_TYPE};
