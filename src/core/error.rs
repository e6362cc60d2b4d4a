//! Fabric error types

use thiserror::Error;

/// Errors that can occur while routing, delivering or handling envelopes
#[derive(Error, Debug)]
pub enum FabricError {
    /// Destination name is not registered in any reachable runtime
    #[error("no agent registered under '{0}'")]
    NoAgent(String),

    /// Deadline expired before a reply or the first stream chunk arrived
    #[error("request timed out")]
    Timeout,

    /// Channel closed by the caller, the transport or the reaper
    #[error("channel closed")]
    ChannelClosed,

    /// Connectivity or protocol failure of the underlying binding
    #[error("transport failure: {0}")]
    Transport(String),

    /// Missing or malformed reserved headers, or an undecodable payload
    #[error("bad envelope: {0}")]
    BadEnvelope(String),

    /// Raised by an agent's hooks; reported as an error reply, the
    /// instance stays alive
    #[error("agent error: {0}")]
    Agent(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FabricError {
    /// Create a transport failure from a message
    pub fn transport(msg: impl Into<String>) -> Self {
        FabricError::Transport(msg.into())
    }

    /// Create a bad-envelope error from a message
    pub fn bad_envelope(msg: impl Into<String>) -> Self {
        FabricError::BadEnvelope(msg.into())
    }

    /// Create an agent error from a message
    pub fn agent(msg: impl Into<String>) -> Self {
        FabricError::Agent(msg.into())
    }

    /// Stable wire tag and message used when encoding this error into a
    /// reply envelope
    pub fn wire_parts(&self) -> (&'static str, String) {
        match self {
            FabricError::NoAgent(name) => ("no_agent", name.clone()),
            FabricError::Timeout => ("timeout", String::new()),
            FabricError::ChannelClosed => ("channel_closed", String::new()),
            FabricError::Transport(msg) => ("transport", msg.clone()),
            FabricError::BadEnvelope(msg) => ("bad_envelope", msg.clone()),
            FabricError::Agent(msg) => ("agent", msg.clone()),
            FabricError::Io(err) => ("transport", err.to_string()),
            FabricError::Serialization(err) => ("bad_envelope", err.to_string()),
        }
    }

    /// Rebuild an error from its wire tag and message
    pub fn from_wire(kind: &str, message: String) -> Self {
        match kind {
            "no_agent" => FabricError::NoAgent(message),
            "timeout" => FabricError::Timeout,
            "channel_closed" => FabricError::ChannelClosed,
            "transport" => FabricError::Transport(message),
            "bad_envelope" => FabricError::BadEnvelope(message),
            _ => FabricError::Agent(message),
        }
    }
}

/// Result type alias for fabric operations
pub type FabricResult<T> = Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FabricError::NoAgent("billing".into());
        assert_eq!(err.to_string(), "no agent registered under 'billing'");

        let err = FabricError::ChannelClosed;
        assert_eq!(err.to_string(), "channel closed");
    }

    #[test]
    fn test_wire_round_trip() {
        let err = FabricError::NoAgent("billing".into());
        let (kind, message) = err.wire_parts();
        let back = FabricError::from_wire(kind, message);
        assert!(matches!(back, FabricError::NoAgent(name) if name == "billing"));

        let (kind, message) = FabricError::Timeout.wire_parts();
        assert!(matches!(
            FabricError::from_wire(kind, message),
            FabricError::Timeout
        ));
    }

    #[test]
    fn test_unknown_wire_kind_is_agent_error() {
        let err = FabricError::from_wire("something_new", "boom".into());
        assert!(matches!(err, FabricError::Agent(msg) if msg == "boom"));
    }
}
