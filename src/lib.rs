//! Actor-style runtime for named agents
//!
//! Many named agents send typed envelopes to one another across an
//! in-process bus, an HTTP gateway or a NATS broker, with uniform
//! semantics: agents are discoverable by name, activated on demand,
//! deactivated when idle, and can answer with a single reply or a
//! stream without blocking peers.
//!
//! ```ignore
//! let runtime = Runtime::new(Arc::new(LocalTransport::new()), RuntimeConfig::new()).await?;
//! runtime.register(AgentSpec::new("echo", || Box::new(Echo))).await?;
//! let reply = runtime
//!     .request(&Address::named("echo"), Envelope::new("text", b"hi".to_vec()))
//!     .await?;
//! ```

pub mod agent;
pub mod channel;
pub mod config;
pub mod core;
pub mod logging;
pub mod orchestration;
pub mod runtime;
pub mod sidecar;
pub mod transport;

pub use agent::{Agent, AgentContext, Reply};
pub use config::RuntimeConfig;
pub use core::{Address, Envelope, FabricError, FabricResult, Header, InstanceState};
pub use runtime::{AgentInfo, AgentSpec, Peer, Runtime, DISCOVERY_NAME};
pub use transport::{
    BrokerTransport, Gateway, HttpTransport, LocalTransport, ReplyStream, Subscription,
    SubscriptionMode, Transport,
};
