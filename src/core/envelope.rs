//! Message envelope and wire codec
//!
//! An `Envelope` is the only thing transports move: a string-to-string
//! header block plus an opaque payload byte string. The payload's
//! logical type is identified by the reserved `type` header; structured
//! decoding belongs to the agent, not the runtime.
//!
//! The wire form (HTTP and broker bindings) is JSON with the payload
//! encoded as base64.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::address::Address;
use super::error::{FabricError, FabricResult};

/// Reserved header keys
pub mod keys {
    /// Payload discriminator
    pub const MSG_TYPE: &str = "type";
    /// Address string for replies
    pub const REPLY_TO: &str = "reply_to";
    /// Stable correlation id across a multi-message exchange
    pub const SESSION_ID: &str = "session_id";
    /// `"1"` when the reply is a sequence
    pub const STREAM: &str = "stream";
    /// `"1"` on the final chunk of a stream, or when an agent is being
    /// asked to stop
    pub const TERMINATE: &str = "terminate";
}

/// Payload discriminator carried by error replies
pub const ERROR_TYPE: &str = "error";

/// String-to-string mapping attached to every envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(BTreeMap<String, String>);

impl Header {
    /// Create an empty header block
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set a header value, replacing any previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a header value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Iterate over all key/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // =========================================================================
    // Reserved keys
    // =========================================================================

    /// Payload discriminator
    pub fn msg_type(&self) -> Option<&str> {
        self.get(keys::MSG_TYPE)
    }

    /// Set the payload discriminator
    pub fn set_msg_type(&mut self, msg_type: impl Into<String>) {
        self.set(keys::MSG_TYPE, msg_type);
    }

    /// Reply address string, if the sender expects a reply
    pub fn reply_to(&self) -> Option<&str> {
        self.get(keys::REPLY_TO)
    }

    /// Set the reply address string
    pub fn set_reply_to(&mut self, reply_to: impl Into<String>) {
        self.set(keys::REPLY_TO, reply_to);
    }

    /// Remove the reply address
    pub fn clear_reply_to(&mut self) {
        self.remove(keys::REPLY_TO);
    }

    /// Session correlation id
    pub fn session_id(&self) -> Option<&str> {
        self.get(keys::SESSION_ID)
    }

    /// Set the session correlation id
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.set(keys::SESSION_ID, session_id);
    }

    /// True when the sender asked for a streaming reply
    pub fn is_stream(&self) -> bool {
        self.get(keys::STREAM) == Some("1")
    }

    /// Mark the envelope as requesting a streaming reply
    pub fn set_stream(&mut self) {
        self.set(keys::STREAM, "1");
    }

    /// True on the final chunk of a stream or on a stop request
    pub fn is_terminate(&self) -> bool {
        self.get(keys::TERMINATE) == Some("1")
    }

    /// Mark the envelope as terminating
    pub fn set_terminate(&mut self) {
        self.set(keys::TERMINATE, "1");
    }

    /// Remove the terminate mark
    pub fn clear_terminate(&mut self) {
        self.remove(keys::TERMINATE);
    }
}

/// JSON body of an error reply envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error tag, see `FabricError::wire_parts`
    pub kind: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// The transport unit: headers plus opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Header block
    pub header: Header,

    /// Opaque payload bytes; base64 in the JSON wire form
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope with a payload discriminator and payload bytes
    pub fn new(msg_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        let mut header = Header::new();
        header.set_msg_type(msg_type);
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Create an envelope with no payload
    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self::new(msg_type, Vec::new())
    }

    /// Create an envelope whose payload is the JSON encoding of `body`
    pub fn json<T: Serialize>(msg_type: impl Into<String>, body: &T) -> FabricResult<Self> {
        Ok(Self::new(msg_type, serde_json::to_vec(body)?))
    }

    /// A bare terminating control frame
    pub fn terminal() -> Self {
        let mut header = Header::new();
        header.set_terminate();
        Self {
            header,
            payload: Vec::new(),
        }
    }

    /// An error reply frame; carries `terminate=1` so streaming callers
    /// see it as a terminating chunk
    pub fn error_reply(err: &FabricError) -> Self {
        let (kind, message) = err.wire_parts();
        let body = ErrorBody {
            kind: kind.to_string(),
            message,
        };
        let payload = serde_json::to_vec(&body).unwrap_or_default();
        let mut env = Envelope::new(ERROR_TYPE, payload);
        env.header.set_terminate();
        env
    }

    /// If this envelope is an error reply, decode it back into an error
    pub fn as_error(&self) -> Option<FabricError> {
        if self.header.msg_type() != Some(ERROR_TYPE) {
            return None;
        }
        match serde_json::from_slice::<ErrorBody>(&self.payload) {
            Ok(body) => Some(FabricError::from_wire(&body.kind, body.message)),
            Err(_) => Some(FabricError::agent("undecodable error reply")),
        }
    }

    /// The reply address derived from the `reply_to` header.
    ///
    /// Reply addresses always target a name; the string in the header is
    /// the inbox name itself.
    pub fn reply_address(&self) -> Option<Address> {
        self.header.reply_to().map(Address::named)
    }

    /// Decode the payload as JSON into `T`
    pub fn decode_payload<T: DeserializeOwned>(&self) -> FabricResult<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|err| FabricError::bad_envelope(format!("payload: {err}")))
    }

    /// Encode into the JSON wire form
    pub fn to_bytes(&self) -> FabricResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire form
    pub fn from_bytes(bytes: &[u8]) -> FabricResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| FabricError::bad_envelope(format!("wire form: {err}")))
    }
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_headers() {
        let mut env = Envelope::new("chat.message", b"hi".to_vec());
        assert_eq!(env.header.msg_type(), Some("chat.message"));
        assert!(!env.header.is_stream());
        assert!(!env.header.is_terminate());

        env.header.set_reply_to("_inbox.abc");
        env.header.set_session_id("s1");
        env.header.set_stream();
        assert_eq!(env.header.reply_to(), Some("_inbox.abc"));
        assert_eq!(env.header.session_id(), Some("s1"));
        assert!(env.header.is_stream());

        let reply = env.reply_address().unwrap();
        assert_eq!(reply.name, "_inbox.abc");
        assert!(reply.is_reply_inbox());
    }

    #[test]
    fn test_wire_round_trip() {
        let mut env = Envelope::new("chat.message", vec![0u8, 159, 146, 150]);
        env.header.set_session_id("s1");

        let bytes = env.to_bytes().unwrap();
        let back = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_wire_form_is_base64_json() {
        let env = Envelope::new("t", b"hi".to_vec());
        let text = String::from_utf8(env.to_bytes().unwrap()).unwrap();
        assert!(text.contains("\"aGk=\""), "payload not base64: {text}");
    }

    #[test]
    fn test_error_reply_round_trip() {
        let env = Envelope::error_reply(&FabricError::Timeout);
        assert!(env.header.is_terminate());
        assert!(matches!(env.as_error(), Some(FabricError::Timeout)));

        let plain = Envelope::empty("chat.message");
        assert!(plain.as_error().is_none());
    }

    #[test]
    fn test_decode_payload() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Body {
            value: u32,
        }

        let env = Envelope::json("t", &Body { value: 7 }).unwrap();
        let body: Body = env.decode_payload().unwrap();
        assert_eq!(body.value, 7);

        let bad = Envelope::new("t", b"not json".to_vec());
        assert!(matches!(
            bad.decode_payload::<Body>(),
            Err(FabricError::BadEnvelope(_))
        ));
    }
}
