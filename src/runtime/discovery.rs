//! Built-in discovery agent
//!
//! Every runtime registers an agent under `discovery` that answers
//! queries about which names are registered, filtered by namespace
//! prefix. The answer reflects the registry at the moment the query is
//! handled; there are no staleness guarantees across transports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentContext, Reply};
use crate::core::{Envelope, FabricResult};

/// Well-known name of the discovery agent
pub const DISCOVERY_NAME: &str = "discovery";

/// Payload discriminator of discovery queries
pub const QUERY_TYPE: &str = "discovery.query";

/// Payload discriminator of discovery replies
pub const REPLY_TYPE: &str = "discovery.reply";

/// Query payload: which names fall under `namespace`?
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// Namespace prefix; empty matches every name
    #[serde(default)]
    pub namespace: String,

    /// Include agent descriptions in the answer
    #[serde(default)]
    pub detailed: bool,
}

/// Reply payload: the matching registrations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub agents: Vec<AgentInfo>,
}

/// One registered name, with its description when asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// True when `name` falls under `namespace`.
///
/// A name matches its own namespace exactly or anything below it;
/// `team` matches `team` and `team.billing` but not `teammate`.
pub(crate) fn namespace_matches(namespace: &str, name: &str) -> bool {
    if namespace.is_empty() {
        return true;
    }
    name == namespace
        || (name.len() > namespace.len()
            && name.starts_with(namespace)
            && name.as_bytes()[namespace.len()] == b'.')
}

#[derive(Debug, Default)]
pub(crate) struct DiscoveryAgent;

#[async_trait]
impl Agent for DiscoveryAgent {
    async fn receive(&mut self, env: Envelope, ctx: &AgentContext) -> FabricResult<Reply> {
        let query: DiscoveryQuery = env.decode_payload()?;
        let agents = ctx
            .runtime()
            .list_registered(&query.namespace, query.detailed)
            .await;
        tracing::debug!(
            namespace = %query.namespace,
            count = agents.len(),
            "answered discovery query"
        );
        Reply::json(REPLY_TYPE, &DiscoveryReply { agents })
    }
}
