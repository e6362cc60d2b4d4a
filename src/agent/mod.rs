//! Agent contract
//!
//! An agent is a stateful, addressable message receiver defined by three
//! hooks: `started` (once after activation), `receive` (once per inbound
//! envelope) and `stopped` (once before deactivation). The runtime
//! guarantees serial invocation per instance, so agents need no internal
//! locking.
//!
//! `receive` may produce nothing (fire-and-forget), a single reply
//! envelope, or a stream of reply envelopes; the instance driver takes
//! care of delivering whichever it gets to the caller's reply channel.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::{Address, Envelope, FabricResult};
use crate::runtime::Runtime;

/// What a `receive` invocation produced for the caller
pub enum Reply {
    /// Nothing goes back
    None,

    /// One reply envelope, published to the caller's reply channel
    Single(Envelope),

    /// A sequence of reply envelopes; the driver appends the
    /// terminating frame after the stream ends
    Stream(BoxStream<'static, FabricResult<Envelope>>),
}

impl Reply {
    /// Single reply whose payload is the JSON encoding of `body`
    pub fn json<T: serde::Serialize>(msg_type: impl Into<String>, body: &T) -> FabricResult<Self> {
        Ok(Reply::Single(Envelope::json(msg_type, body)?))
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::None => write!(f, "Reply::None"),
            Reply::Single(env) => f.debug_tuple("Reply::Single").field(env).finish(),
            Reply::Stream(_) => write!(f, "Reply::Stream(..)"),
        }
    }
}

/// Capabilities handed to an agent instance.
///
/// The context carries the instance's own address and the runtime handle
/// it uses to address peers. The runtime owns the instance; the instance
/// holds only this lookup handle back.
#[derive(Clone)]
pub struct AgentContext {
    address: Address,
    runtime: Runtime,
}

impl AgentContext {
    pub(crate) fn new(address: Address, runtime: Runtime) -> Self {
        Self { address, runtime }
    }

    /// The address envelopes reached this instance under
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Runtime handle for addressing other agents
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("address", &self.address)
            .finish()
    }
}

/// A stateful, addressable message receiver with a lifecycle
#[async_trait]
pub trait Agent: Send {
    /// Called once after activation, before the first envelope
    async fn started(&mut self, _ctx: &AgentContext) -> FabricResult<()> {
        Ok(())
    }

    /// Handle one inbound envelope.
    ///
    /// Errors are converted to an error reply when the sender expected
    /// one, and logged; the instance stays alive either way.
    async fn receive(&mut self, env: Envelope, ctx: &AgentContext) -> FabricResult<Reply>;

    /// Called once before deactivation
    async fn stopped(&mut self, _ctx: &AgentContext) -> FabricResult<()> {
        Ok(())
    }
}
