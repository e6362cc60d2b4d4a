//! Agent runtime
//!
//! This module provides the process-level machinery for hosting agents:
//! - `Runtime` - owns the transport, registry and live instances
//! - `AgentSpec` - registration record with an instance constructor
//! - `Peer` - convenience handle for addressing one collaborator
//! - the built-in discovery agent
//!
//! Instances run as tokio tasks, one driver task per live instance,
//! activated lazily and reaped when idle.

pub mod discovery;
mod instance;
pub mod runtime;
pub mod spec;

pub use discovery::{AgentInfo, DiscoveryQuery, DiscoveryReply, DISCOVERY_NAME};
pub use runtime::{Peer, Runtime};
pub use spec::{AgentConstructor, AgentSpec};
