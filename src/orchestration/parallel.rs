//! Parallel scatter with an aggregator
//!
//! Fans an inbound envelope out to every branch concurrently, collects
//! the replies (each tagged with the producing name), and forwards the
//! collected set to the aggregator, whose single reply goes back to the
//! caller. A failing branch becomes a tagged error entry; the
//! aggregator decides how to treat it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentContext, Reply};
use crate::core::{keys, Address, Envelope, FabricError, FabricResult};
use crate::runtime::AgentSpec;

/// Payload discriminator of the collected set sent to the aggregator
pub const RESULTS_TYPE: &str = "parallel.results";

/// One branch outcome, as the aggregator sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchReply {
    /// Name of the producing agent
    pub agent: String,

    /// False when the branch failed
    pub ok: bool,

    /// Reply payload; empty on failure
    #[serde(default, with = "crate::core::envelope::base64_bytes")]
    pub payload: Vec<u8>,

    /// Failure description when `ok` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Composite agent that runs its branches concurrently
pub struct Parallel {
    branches: Vec<String>,
    aggregator: String,
    deadline: Option<Duration>,
}

impl Parallel {
    /// Create a scatter over `branches` whose results go to `aggregator`
    pub fn new<I, S>(branches: I, aggregator: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branches: branches.into_iter().map(Into::into).collect(),
            aggregator: aggregator.into(),
            deadline: None,
        }
    }

    /// Bound the total scatter latency; defaults to the runtime's
    /// request timeout
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Registration spec for a scatter under `name`
    pub fn spec<I, S>(
        name: impl Into<String>,
        branches: I,
        aggregator: impl Into<String>,
    ) -> AgentSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let branches: Vec<String> = branches.into_iter().map(Into::into).collect();
        let aggregator = aggregator.into();
        AgentSpec::new(name, move || {
            Box::new(Parallel::new(branches.clone(), aggregator.clone()))
        })
    }
}

#[async_trait]
impl Agent for Parallel {
    async fn receive(&mut self, env: Envelope, ctx: &AgentContext) -> FabricResult<Reply> {
        let deadline = self
            .deadline
            .unwrap_or(ctx.runtime().config().request_timeout);

        let mut base = env;
        base.header.clear_reply_to();
        base.header.remove(keys::STREAM);

        let fan_out = self.branches.iter().map(|branch| {
            let runtime = ctx.runtime().clone();
            let env = base.clone();
            let agent = branch.clone();
            async move {
                match runtime.request(&Address::named(&agent), env).await {
                    Ok(reply) => BranchReply {
                        agent,
                        ok: true,
                        payload: reply.payload,
                        error: None,
                    },
                    Err(err) => BranchReply {
                        agent,
                        ok: false,
                        payload: Vec::new(),
                        error: Some(err.to_string()),
                    },
                }
            }
        });
        let results = tokio::time::timeout(deadline, futures::future::join_all(fan_out))
            .await
            .map_err(|_| FabricError::Timeout)?;

        let mut collected = Envelope::json(RESULTS_TYPE, &results)?;
        if let Some(session) = base.header.session_id() {
            collected.header.set_session_id(session);
        }
        let mut reply = ctx
            .runtime()
            .request(&Address::named(&self.aggregator), collected)
            .await?;
        reply.header.clear_reply_to();
        reply.header.clear_terminate();
        Ok(Reply::Single(reply))
    }
}
