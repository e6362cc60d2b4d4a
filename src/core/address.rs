//! Agent addressing
//!
//! An `Address` is the routing identity of an agent: a registered name,
//! an optional instance id and an optional type component. Two addresses
//! are equal iff all three fields match.

use serde::{Deserialize, Serialize};

/// Prefix of reply-inbox names generated by `open_reply_channel`.
///
/// Inbox names are ordinary address names, so replies flow through the
/// same publish path as any other envelope.
pub const INBOX_PREFIX: &str = "_inbox.";

/// Routing identity of an agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Registered agent name. Dots form a hierarchical namespace,
    /// e.g. `team.billing`.
    pub name: String,

    /// Instance discriminator. Empty targets any instance of the name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Optional type component used by topic-based transports for fan-out
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl Address {
    /// Address targeting any instance of a registered name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
            kind: String::new(),
        }
    }

    /// Address targeting one session instance of a name
    pub fn session(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind: String::new(),
        }
    }

    /// True when `id` is empty, i.e. the address targets a name
    pub fn targets_name(&self) -> bool {
        self.id.is_empty()
    }

    /// True when `id` is set, i.e. the address targets a session
    pub fn targets_session(&self) -> bool {
        !self.id.is_empty()
    }

    /// True for reply-inbox addresses generated by a transport
    pub fn is_reply_inbox(&self) -> bool {
        self.name.starts_with(INBOX_PREFIX)
    }

    /// Topic form `name[.id][.type]` with empty components elided
    pub fn topic(&self) -> String {
        let mut topic = self.name.clone();
        if !self.id.is_empty() {
            topic.push('.');
            topic.push_str(&self.id);
        }
        if !self.kind.is_empty() {
            topic.push('.');
            topic.push_str(&self.kind);
        }
        topic
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_elides_empty_components() {
        assert_eq!(Address::named("echo").topic(), "echo");
        assert_eq!(Address::session("echo", "s1").topic(), "echo.s1");

        let full = Address {
            name: "team.billing".into(),
            id: "s1".into(),
            kind: "invoice".into(),
        };
        assert_eq!(full.topic(), "team.billing.s1.invoice");
    }

    #[test]
    fn test_equality_requires_all_fields() {
        let a = Address::session("echo", "s1");
        let b = Address::session("echo", "s2");
        assert_ne!(a, b);
        assert_eq!(a, Address::session("echo", "s1"));
    }

    #[test]
    fn test_targeting() {
        assert!(Address::named("echo").targets_name());
        assert!(Address::session("echo", "s1").targets_session());
    }

    #[test]
    fn test_reply_inbox_detection() {
        assert!(Address::named("_inbox.abc123").is_reply_inbox());
        assert!(!Address::named("echo").is_reply_inbox());
    }
}
