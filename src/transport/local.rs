//! In-process transport binding
//!
//! A single shared map from address names to delivery queues. Each
//! subscription owns a worker task that invokes its handler serially,
//! which keeps FIFO order per (sender, receiver) pair while publishes
//! stay asynchronous. Reply channels are in-memory mailboxes registered
//! in the same map under their inbox name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::{MailboxReader, DELIVERY_QUEUE_CAPACITY};
use crate::core::{Address, Envelope, FabricError, FabricResult, INBOX_PREFIX};

use super::{Handler, ReplyChannel, Subscription, SubscriptionMode, Transport};

struct Entry {
    id: u64,
    tx: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

/// In-process delivery over shared memory
#[derive(Clone, Default)]
pub struct LocalTransport {
    inner: Arc<Inner>,
}

impl LocalTransport {
    /// Create an empty in-process bus
    pub fn new() -> Self {
        Self::default()
    }

    fn install(&self, name: &str, tx: mpsc::Sender<Envelope>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .entries
            .write()
            .expect("subscription map poisoned")
            .insert(name.to_string(), Entry { id, tx });

        let inner = self.inner.clone();
        let name = name.to_string();
        Subscription::new(move || {
            let mut entries = inner.entries.write().expect("subscription map poisoned");
            // A newer subscription may have replaced this one; only
            // remove the entry we installed.
            if entries.get(&name).map(|entry| entry.id) == Some(id) {
                entries.remove(&name);
            }
        })
    }

    fn sender_for(&self, name: &str) -> Option<mpsc::Sender<Envelope>> {
        self.inner
            .entries
            .read()
            .expect("subscription map poisoned")
            .get(name)
            .map(|entry| entry.tx.clone())
    }

    fn missing(&self, to: &Address, probe: bool) -> FabricResult<()> {
        if to.is_reply_inbox() {
            return Err(FabricError::ChannelClosed);
        }
        if probe {
            return Err(FabricError::NoAgent(to.name.clone()));
        }
        tracing::trace!(to = %to, "dropping envelope with no subscriber");
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(&self, to: &Address, env: Envelope, probe: bool) -> FabricResult<()> {
        let Some(tx) = self.sender_for(&to.name) else {
            return self.missing(to, probe);
        };
        match tx.send(env).await {
            Ok(()) => Ok(()),
            // Subscription vanished between lookup and delivery.
            Err(_) => self.missing(to, probe),
        }
    }

    async fn subscribe(
        &self,
        pattern: &Address,
        handler: Handler,
        _mode: SubscriptionMode,
    ) -> FabricResult<Subscription> {
        let (tx, mut rx) = mpsc::channel::<Envelope>(DELIVERY_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(env) = rx.recv().await {
                handler(env).await;
            }
        });
        Ok(self.install(&pattern.name, tx))
    }

    async fn open_reply_channel(&self) -> FabricResult<ReplyChannel> {
        let name = format!("{INBOX_PREFIX}{}", Uuid::new_v4().simple());
        let (tx, rx) = mpsc::channel::<Envelope>(DELIVERY_QUEUE_CAPACITY);
        let subscription = self.install(&name, tx);
        Ok(ReplyChannel::new(
            Address::named(name),
            MailboxReader::from_receiver(rx),
            subscription,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector() -> (Handler, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(32);
        let handler: Handler = Arc::new(move |env| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(env).await;
            })
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_publish_subscribe_round_trip() {
        let transport = LocalTransport::new();
        let (handler, mut seen) = collector();
        let _sub = transport
            .subscribe(&Address::named("echo"), handler, SubscriptionMode::Queued)
            .await
            .unwrap();

        transport
            .publish(&Address::named("echo"), Envelope::new("t", b"hi".to_vec()), true)
            .await
            .unwrap();

        let env = seen.recv().await.unwrap();
        assert_eq!(env.payload, b"hi");
    }

    #[tokio::test]
    async fn test_fifo_per_subscription() {
        let transport = LocalTransport::new();
        let (handler, mut seen) = collector();
        let _sub = transport
            .subscribe(&Address::named("echo"), handler, SubscriptionMode::Queued)
            .await
            .unwrap();

        for i in 0..10u8 {
            transport
                .publish(&Address::named("echo"), Envelope::new("t", vec![i]), true)
                .await
                .unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(seen.recv().await.unwrap().payload, vec![i]);
        }
    }

    #[tokio::test]
    async fn test_probe_fails_without_subscriber() {
        let transport = LocalTransport::new();
        let result = transport
            .publish(&Address::named("ghost"), Envelope::empty("t"), true)
            .await;
        assert!(matches!(result, Err(FabricError::NoAgent(name)) if name == "ghost"));

        // Without probe the envelope is dropped silently.
        transport
            .publish(&Address::named("ghost"), Envelope::empty("t"), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_delivery() {
        let transport = LocalTransport::new();
        let (handler, _seen) = collector();
        let sub = transport
            .subscribe(&Address::named("echo"), handler, SubscriptionMode::Queued)
            .await
            .unwrap();

        sub.cancel();
        let result = transport
            .publish(&Address::named("echo"), Envelope::empty("t"), true)
            .await;
        assert!(matches!(result, Err(FabricError::NoAgent(_))));
    }

    #[tokio::test]
    async fn test_reply_channel_delivery_and_close() {
        let transport = LocalTransport::new();
        let mut reply = transport.open_reply_channel().await.unwrap();
        let inbox = reply.address().clone();
        assert!(inbox.is_reply_inbox());

        transport
            .publish(&inbox, Envelope::new("t", b"pong".to_vec()), true)
            .await
            .unwrap();
        assert_eq!(reply.recv().await.unwrap().payload, b"pong");

        drop(reply);
        let result = transport.publish(&inbox, Envelope::empty("t"), true).await;
        assert!(matches!(result, Err(FabricError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_request_against_echo_handler() {
        let transport = Arc::new(LocalTransport::new());
        let for_handler = transport.clone();
        let handler: Handler = Arc::new(move |env: Envelope| {
            let transport = for_handler.clone();
            Box::pin(async move {
                if let Some(reply_to) = env.reply_address() {
                    let mut reply = Envelope::new("echo.reply", env.payload.clone());
                    reply.header.set_terminate();
                    let _ = transport.publish(&reply_to, reply, true).await;
                }
            })
        });
        let _sub = transport
            .subscribe(&Address::named("echo"), handler, SubscriptionMode::Queued)
            .await
            .unwrap();

        let reply = transport
            .request(
                &Address::named("echo"),
                Envelope::new("t", b"hi".to_vec()),
                Duration::from_secs(1),
                true,
            )
            .await
            .unwrap();
        assert_eq!(reply.payload, b"hi");
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let transport = LocalTransport::new();
        let (handler, _seen) = collector();
        let _sub = transport
            .subscribe(&Address::named("mute"), handler, SubscriptionMode::Queued)
            .await
            .unwrap();

        let result = transport
            .request(
                &Address::named("mute"),
                Envelope::empty("t"),
                Duration::from_millis(50),
                true,
            )
            .await;
        assert!(matches!(result, Err(FabricError::Timeout)));
    }
}
