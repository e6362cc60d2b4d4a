//! Transport abstraction
//!
//! A transport moves envelopes between addresses. The contract is the
//! same for every binding:
//! - `publish` an envelope to an address, optionally probing for a
//!   subscriber
//! - `subscribe` a handler to an address pattern
//! - `open_reply_channel` for the caller side of a request
//!
//! `request` and `request_stream` are the request/reply primitive built
//! from those three operations; they behave identically on every
//! binding. Swapping bindings requires no agent changes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::channel::MailboxReader;
use crate::core::{Address, Envelope, FabricError, FabricResult};

pub mod broker;
pub mod http;
pub mod local;

pub use broker::BrokerTransport;
pub use http::{Gateway, HttpTransport};
pub use local::LocalTransport;

/// Boxed future returned by subscription handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler invoked serially for every envelope delivered to a
/// subscription. Serial invocation per subscription is what preserves
/// FIFO order per (sender, receiver) pair.
pub type Handler = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Delivery mode for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Load-balanced: runtimes hosting the same name share the traffic
    Queued,

    /// Broadcast: every subscriber sees every envelope
    Broadcast,
}

/// A live subscription; dropping it stops delivery
pub struct Subscription {
    cancel: std::sync::Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Wrap a cancellation action
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: std::sync::Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Explicitly stop delivery
    pub fn cancel(self) {
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish()
    }
}

/// Caller side of a request: a private inbox address and its reader.
///
/// The transport subscription backing the inbox is cancelled when the
/// channel is dropped; publishes to the inbox then fail with
/// `ChannelClosed`.
pub struct ReplyChannel {
    address: Address,
    reader: MailboxReader,
    _subscription: Subscription,
}

impl ReplyChannel {
    /// Assemble a reply channel from its parts
    pub fn new(address: Address, reader: MailboxReader, subscription: Subscription) -> Self {
        Self {
            address,
            reader,
            _subscription: subscription,
        }
    }

    /// The inbox address callers stamp into `reply_to`
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Receive the next reply envelope
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.reader.recv().await
    }
}

/// Lazy reader over a streaming reply.
///
/// Yields envelopes until one carries `terminate=1` or the channel
/// closes. A bare terminating frame is consumed silently; a terminating
/// frame with a payload is yielded first. Error frames surface as
/// `Err` and end the stream.
pub struct ReplyStream {
    channel: ReplyChannel,
    pending: Option<Envelope>,
    done: bool,
}

impl ReplyStream {
    pub(crate) fn new(channel: ReplyChannel, first: Option<Envelope>) -> Self {
        Self {
            channel,
            pending: first,
            done: false,
        }
    }

    /// Next chunk of the reply, or `None` once the stream has ended
    pub async fn next(&mut self) -> Option<FabricResult<Envelope>> {
        if self.done {
            return None;
        }
        let env = match self.pending.take() {
            Some(env) => env,
            None => match self.channel.recv().await {
                Some(env) => env,
                None => {
                    self.done = true;
                    return Some(Err(FabricError::ChannelClosed));
                }
            },
        };
        if let Some(err) = env.as_error() {
            self.done = true;
            return Some(Err(err));
        }
        if env.header.is_terminate() {
            self.done = true;
            if env.payload.is_empty() {
                return None;
            }
            return Some(Ok(env));
        }
        Some(Ok(env))
    }

    /// Drain the stream, collecting every chunk
    pub async fn collect(mut self) -> FabricResult<Vec<Envelope>> {
        let mut chunks = Vec::new();
        while let Some(item) = self.next().await {
            chunks.push(item?);
        }
        Ok(chunks)
    }

    /// Adapt into a `futures` stream, e.g. to forward as an agent reply
    pub fn into_stream(self) -> BoxStream<'static, FabricResult<Envelope>> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
        .boxed()
    }
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("done", &self.done)
            .finish()
    }
}

/// Pluggable delivery layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish an envelope to an address.
    ///
    /// With `probe` set the call fails fast with `NoAgent` when no
    /// subscriber exists; without it, an unmatched publish is dropped.
    /// Publishes to a closed reply inbox fail with `ChannelClosed`
    /// either way.
    async fn publish(&self, to: &Address, env: Envelope, probe: bool) -> FabricResult<()>;

    /// Install a handler for envelopes addressed to `pattern`
    async fn subscribe(
        &self,
        pattern: &Address,
        handler: Handler,
        mode: SubscriptionMode,
    ) -> FabricResult<Subscription>;

    /// Open a private reply inbox for a request
    async fn open_reply_channel(&self) -> FabricResult<ReplyChannel>;

    /// Whether publishes can reach subscribers in other runtimes.
    ///
    /// Drives broadcast discovery aggregation; only the broker binding
    /// reports true.
    fn is_broadcast_capable(&self) -> bool {
        false
    }

    /// Unary request: open a reply channel, stamp `reply_to`, publish,
    /// and wait for the first reply
    async fn request(
        &self,
        to: &Address,
        env: Envelope,
        timeout: Duration,
        probe: bool,
    ) -> FabricResult<Envelope> {
        let mut env = env;
        let mut reply = self.open_reply_channel().await?;
        env.header.set_reply_to(reply.address().name.clone());
        self.publish(to, env, probe).await?;

        let reply = tokio::time::timeout(timeout, reply.recv())
            .await
            .map_err(|_| FabricError::Timeout)?
            .ok_or(FabricError::ChannelClosed)?;
        if let Some(err) = reply.as_error() {
            return Err(err);
        }
        Ok(reply)
    }

    /// Streaming request: like `request`, but returns a lazy reader over
    /// the reply sequence. The timeout bounds the first chunk only.
    async fn request_stream(
        &self,
        to: &Address,
        env: Envelope,
        first_chunk_timeout: Duration,
        probe: bool,
    ) -> FabricResult<ReplyStream> {
        let mut env = env;
        env.header.set_stream();
        let mut reply = self.open_reply_channel().await?;
        env.header.set_reply_to(reply.address().name.clone());
        self.publish(to, env, probe).await?;

        let first = tokio::time::timeout(first_chunk_timeout, reply.recv())
            .await
            .map_err(|_| FabricError::Timeout)?
            .ok_or(FabricError::ChannelClosed)?;
        Ok(ReplyStream::new(reply, Some(first)))
    }
}

/// Map delivery failures for replies: a vanished inbox is the caller
/// hanging up, not a missing agent.
pub(crate) fn reply_delivery_error(to: &Address, err: FabricError) -> FabricError {
    match err {
        FabricError::NoAgent(_) if to.is_reply_inbox() => FabricError::ChannelClosed,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mailbox;

    fn reply_channel() -> (crate::channel::MailboxSender, ReplyChannel) {
        let (tx, rx) = mailbox(16);
        let channel = ReplyChannel::new(
            Address::named("_inbox.test"),
            rx,
            Subscription::new(|| {}),
        );
        (tx, channel)
    }

    #[tokio::test]
    async fn test_stream_ends_on_bare_terminate() {
        let (tx, channel) = reply_channel();
        tx.send(Envelope::new("chunk", b"a".to_vec())).await.unwrap();
        tx.send(Envelope::new("chunk", b"b".to_vec())).await.unwrap();
        tx.send(Envelope::terminal()).await.unwrap();

        let mut stream = ReplyStream::new(channel, None);
        assert_eq!(stream.next().await.unwrap().unwrap().payload, b"a");
        assert_eq!(stream.next().await.unwrap().unwrap().payload, b"b");
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_yields_final_chunk_with_payload() {
        let (tx, channel) = reply_channel();
        let mut last = Envelope::new("chunk", b"tail".to_vec());
        last.header.set_terminate();
        tx.send(last).await.unwrap();

        let mut stream = ReplyStream::new(channel, None);
        assert_eq!(stream.next().await.unwrap().unwrap().payload, b"tail");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_surfaces_closed_channel() {
        let (tx, channel) = reply_channel();
        drop(tx);

        let mut stream = ReplyStream::new(channel, None);
        assert!(matches!(
            stream.next().await,
            Some(Err(FabricError::ChannelClosed))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_surfaces_error_frame() {
        let (tx, channel) = reply_channel();
        tx.send(Envelope::error_reply(&FabricError::Timeout))
            .await
            .unwrap();

        let mut stream = ReplyStream::new(channel, None);
        assert!(matches!(stream.next().await, Some(Err(FabricError::Timeout))));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_reply_delivery_error_mapping() {
        let inbox = Address::named("_inbox.gone");
        let err = reply_delivery_error(&inbox, FabricError::NoAgent("_inbox.gone".into()));
        assert!(matches!(err, FabricError::ChannelClosed));

        let agent = Address::named("echo");
        let err = reply_delivery_error(&agent, FabricError::NoAgent("echo".into()));
        assert!(matches!(err, FabricError::NoAgent(_)));
    }
}
