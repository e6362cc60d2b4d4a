//! Core value types of the fabric
//!
//! This module provides the fundamental types used throughout the crate:
//! - `Address` - routing identity of an agent
//! - `Envelope` / `Header` - the transport unit and its wire codec
//! - `InstanceState` - lifecycle of a live agent instance
//! - `FabricError` - error types

pub mod address;
pub mod envelope;
pub mod error;
pub mod state;

pub use address::{Address, INBOX_PREFIX};
pub use envelope::{keys, Envelope, ErrorBody, Header, ERROR_TYPE};
pub use error::{FabricError, FabricResult};
pub use state::InstanceState;
