//! Agent registration records

use std::sync::Arc;

use crate::agent::Agent;
use crate::channel::DEFAULT_MAILBOX_CAPACITY;

/// Constructor closure producing a fresh agent instance
pub type AgentConstructor = Arc<dyn Fn() -> Box<dyn Agent> + Send + Sync>;

/// Registration record for an agent name.
///
/// Specs are registered with a runtime before first use; instances are
/// constructed lazily when an envelope arrives for the name.
///
/// ```ignore
/// let spec = AgentSpec::new("team.billing", || Box::new(Billing::default()))
///     .with_description("Billing questions and invoices")
///     .session_scoped();
/// runtime.register(spec).await?;
/// ```
#[derive(Clone)]
pub struct AgentSpec {
    /// Unique registered name; dots form a namespace
    pub name: String,

    /// Human-readable description, surfaced by detailed discovery
    pub description: String,

    /// Instance constructor
    pub(crate) constructor: AgentConstructor,

    /// Key instances by `session_id` instead of sharing one instance
    pub session_scoped: bool,

    /// Inbox capacity per instance
    pub mailbox_capacity: usize,
}

impl AgentSpec {
    /// Create a spec for `name` with an instance constructor
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            constructor: Arc::new(constructor),
            session_scoped: false,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }

    /// Attach a description for discovery
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Opt into one instance per `session_id` (conversational agents)
    pub fn session_scoped(mut self) -> Self {
        self.session_scoped = true;
        self
    }

    /// Override the per-instance inbox capacity
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub(crate) fn construct(&self) -> Box<dyn Agent> {
        (self.constructor)()
    }
}

impl std::fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSpec")
            .field("name", &self.name)
            .field("session_scoped", &self.session_scoped)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .finish()
    }
}
