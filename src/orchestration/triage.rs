//! Dynamic triage and handoff
//!
//! A chat-like agent configured with a namespace prefix. At start it
//! queries discovery for the prefix; each candidate is offered to the
//! wrapped model as a handoff target. Once the model hands a session
//! off, user messages are forwarded to the delegate directly until it
//! hands back. Session identity is preserved across handoffs through
//! the `session_id` header; loop prevention is the model's
//! responsibility.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Agent, AgentContext, Reply};
use crate::core::{Address, Envelope, FabricError, FabricResult};
use crate::runtime::{AgentInfo, AgentSpec};

/// Payload discriminator of handoff control envelopes
pub const HANDOFF_TYPE: &str = "triage.handoff";

/// Handoff control payload. An empty target hands the session back to
/// the triage agent itself.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Handoff {
    #[serde(default)]
    pub target: String,
}

/// What the model decided to do with a message
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// Answer directly with this payload
    Respond(Vec<u8>),

    /// Hand the session off to the named candidate
    Handoff(String),
}

/// Seam to the external model client that powers triage.
///
/// The model sees every discovered candidate as a callable tool;
/// invoking one is expressed here as `RouteDecision::Handoff`.
#[async_trait]
pub trait TriageModel: Send + Sync {
    async fn route(
        &self,
        candidates: &[AgentInfo],
        message: &Envelope,
    ) -> FabricResult<RouteDecision>;
}

/// Session-scoped agent that routes conversations to specialists
pub struct Triage {
    namespace: String,
    model: Arc<dyn TriageModel>,
    candidates: Vec<AgentInfo>,
    delegate: Option<String>,
}

impl Triage {
    /// Create a triage agent over candidates under `namespace`
    pub fn new(namespace: impl Into<String>, model: Arc<dyn TriageModel>) -> Self {
        Self {
            namespace: namespace.into(),
            model,
            candidates: Vec::new(),
            delegate: None,
        }
    }

    /// Registration spec; triage instances are keyed by session
    pub fn spec(
        name: impl Into<String>,
        namespace: impl Into<String>,
        model: Arc<dyn TriageModel>,
    ) -> AgentSpec {
        let namespace = namespace.into();
        AgentSpec::new(name, move || {
            Box::new(Triage::new(namespace.clone(), model.clone()))
        })
        .session_scoped()
    }

    async fn forward(
        &self,
        delegate: &str,
        mut env: Envelope,
        ctx: &AgentContext,
    ) -> FabricResult<Reply> {
        let to = Address::named(delegate);
        env.header.clear_reply_to();
        if env.header.is_stream() {
            let stream = ctx.runtime().request_stream(&to, env).await?;
            return Ok(Reply::Stream(stream.into_stream()));
        }
        let mut reply = ctx.runtime().request(&to, env).await?;
        reply.header.clear_reply_to();
        reply.header.clear_terminate();
        Ok(Reply::Single(reply))
    }
}

#[async_trait]
impl Agent for Triage {
    async fn started(&mut self, ctx: &AgentContext) -> FabricResult<()> {
        self.candidates = ctx.runtime().discover(&self.namespace, true).await?;
        tracing::debug!(
            namespace = %self.namespace,
            candidates = self.candidates.len(),
            "triage candidates resolved"
        );
        Ok(())
    }

    async fn receive(&mut self, env: Envelope, ctx: &AgentContext) -> FabricResult<Reply> {
        if env.header.msg_type() == Some(HANDOFF_TYPE) {
            let handoff: Handoff = env.decode_payload()?;
            tracing::info!(
                triage = %ctx.address(),
                target = %handoff.target,
                "session handoff"
            );
            self.delegate = (!handoff.target.is_empty()).then_some(handoff.target);
            return Ok(Reply::None);
        }

        if let Some(delegate) = self.delegate.clone() {
            return self.forward(&delegate, env, ctx).await;
        }

        match self.model.route(&self.candidates, &env).await? {
            RouteDecision::Respond(payload) => {
                let msg_type = env.header.msg_type().unwrap_or("message").to_string();
                let mut reply = Envelope::new(msg_type, payload);
                if let Some(session) = env.header.session_id() {
                    reply.header.set_session_id(session);
                }
                Ok(Reply::Single(reply))
            }
            RouteDecision::Handoff(target) => {
                if !self.candidates.iter().any(|c| c.name == target) {
                    return Err(FabricError::agent(format!(
                        "handoff to unknown agent '{target}'"
                    )));
                }
                tracing::info!(triage = %ctx.address(), target = %target, "handing session off");
                self.delegate = Some(target.clone());
                self.forward(&target, env, ctx).await
            }
        }
    }
}
