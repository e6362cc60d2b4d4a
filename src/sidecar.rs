//! Sidecar control protocol
//!
//! Agents hosted in another process speak the broker binding in both
//! directions: they subscribe to their own names for inbound envelopes
//! and announce those names by sending registration envelopes to a
//! reserved control address. Framing is the ordinary wire envelope; no
//! handshake beyond registration.
//!
//! This module is the runtime-side half: a control agent that records
//! hosted names so discovery can answer for them. Register it with
//! `runtime.register(sidecar::control_spec())` on runtimes that accept
//! sidecars.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentContext, Reply};
use crate::core::{Envelope, FabricError, FabricResult};
use crate::runtime::AgentSpec;

/// Reserved control address; hidden from discovery
pub const CONTROL_NAME: &str = "_control";

/// Payload discriminator of registration envelopes
pub const REGISTER_TYPE: &str = "control.register";

/// Payload discriminator of deregistration envelopes
pub const DEREGISTER_TYPE: &str = "control.deregister";

/// Payload discriminator of control acknowledgements
pub const ACK_TYPE: &str = "control.ack";

/// Announcement of a name hosted by a sidecar process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterHostedAgent {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

/// Withdrawal of a hosted name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterHostedAgent {
    pub name: String,
}

/// Spec for the control agent; register it under [`CONTROL_NAME`]
pub fn control_spec() -> AgentSpec {
    AgentSpec::new(CONTROL_NAME, || Box::new(ControlAgent))
}

struct ControlAgent;

#[async_trait]
impl Agent for ControlAgent {
    async fn receive(&mut self, env: Envelope, ctx: &AgentContext) -> FabricResult<Reply> {
        match env.header.msg_type() {
            Some(REGISTER_TYPE) => {
                let registration: RegisterHostedAgent = env.decode_payload()?;
                ctx.runtime()
                    .register_remote(registration.name, registration.description)
                    .await;
                Ok(Reply::Single(Envelope::empty(ACK_TYPE)))
            }
            Some(DEREGISTER_TYPE) => {
                let withdrawal: DeregisterHostedAgent = env.decode_payload()?;
                ctx.runtime().deregister_remote(&withdrawal.name).await;
                Ok(Reply::Single(Envelope::empty(ACK_TYPE)))
            }
            other => Err(FabricError::bad_envelope(format!(
                "unsupported control envelope type {other:?}"
            ))),
        }
    }
}
