//! Broker transport binding over NATS
//!
//! Publishes produce to a subject derived from the address topic
//! (`name.id.type`, empty components elided) under a configurable
//! prefix. Queued subscriptions join a queue group keyed by the agent
//! name so that runtimes hosting the same name load-balance; broadcast
//! subscriptions (discovery) omit the group. Reply channels use a
//! private inbox subject.
//!
//! Probing rides on the broker's request machinery: the subscriber side
//! acks every message that carries a broker-level reply subject, so a
//! probe publish fails fast with no-responders when nobody is listening.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::{MailboxReader, DELIVERY_QUEUE_CAPACITY};
use crate::core::{Address, Envelope, FabricError, FabricResult, INBOX_PREFIX};

use super::{Handler, ReplyChannel, Subscription, SubscriptionMode, Transport};

const DEFAULT_SUBJECT_PREFIX: &str = "fabric";

/// NATS-backed delivery
pub struct BrokerTransport {
    client: async_nats::Client,
    prefix: String,
}

impl BrokerTransport {
    /// Connect to a NATS server, e.g. `nats://127.0.0.1:4222`
    pub async fn connect(url: &str) -> FabricResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|err| FabricError::transport(err.to_string()))?;
        tracing::info!(%url, "connected to broker");
        Ok(Self {
            client,
            prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        })
    }

    /// Wrap an existing client, e.g. one with custom reconnect options
    pub fn with_client(client: async_nats::Client) -> Self {
        Self {
            client,
            prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }

    /// Override the subject prefix, isolating fabrics sharing a broker
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn subject(&self, to: &Address) -> String {
        format!("{}.{}", self.prefix, to.topic())
    }

    fn spawn_pump(&self, mut subscriber: async_nats::Subscriber, handler: Handler) -> JoinHandle<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(mut msg) = subscriber.next().await {
                // Receipt for probe publishes.
                if let Some(reply) = msg.reply.take() {
                    let _ = client.publish(reply, Bytes::new()).await;
                }
                match Envelope::from_bytes(&msg.payload) {
                    Ok(env) => handler(env).await,
                    Err(err) => {
                        tracing::warn!(subject = %msg.subject, error = %err, "dropping undecodable envelope");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn publish(&self, to: &Address, env: Envelope, probe: bool) -> FabricResult<()> {
        let subject = self.subject(to);
        let payload: Bytes = env.to_bytes()?.into();

        if probe {
            return match self.client.request(subject, payload).await {
                Ok(_) => Ok(()),
                Err(err) => match err.kind() {
                    async_nats::RequestErrorKind::NoResponders => {
                        if to.is_reply_inbox() {
                            Err(FabricError::ChannelClosed)
                        } else {
                            Err(FabricError::NoAgent(to.name.clone()))
                        }
                    }
                    async_nats::RequestErrorKind::TimedOut => {
                        Err(FabricError::transport("probe receipt timed out"))
                    }
                    async_nats::RequestErrorKind::Other => {
                        Err(FabricError::transport(err.to_string()))
                    }
                },
            };
        }

        self.client
            .publish(subject, payload)
            .await
            .map_err(|err| FabricError::transport(err.to_string()))
    }

    async fn subscribe(
        &self,
        pattern: &Address,
        handler: Handler,
        mode: SubscriptionMode,
    ) -> FabricResult<Subscription> {
        let exact = self.subject(pattern);
        // `subject.>` catches addresses that carry an id or type
        // component on top of the bare name.
        let wild = format!("{exact}.>");

        let mut pumps = Vec::with_capacity(2);
        for subject in [exact, wild] {
            let subscriber = match mode {
                SubscriptionMode::Queued => self
                    .client
                    .queue_subscribe(subject, pattern.name.clone())
                    .await,
                SubscriptionMode::Broadcast => self.client.subscribe(subject).await,
            }
            .map_err(|err| FabricError::transport(err.to_string()))?;
            pumps.push(self.spawn_pump(subscriber, handler.clone()));
        }

        Ok(Subscription::new(move || {
            for pump in pumps {
                pump.abort();
            }
        }))
    }

    async fn open_reply_channel(&self) -> FabricResult<ReplyChannel> {
        let inbox = format!("{INBOX_PREFIX}{}", Uuid::new_v4().simple());
        let address = Address::named(&inbox);
        let subscriber = self
            .client
            .subscribe(self.subject(&address))
            .await
            .map_err(|err| FabricError::transport(err.to_string()))?;

        let (tx, rx) = mpsc::channel::<Envelope>(DELIVERY_QUEUE_CAPACITY);
        let forward: Handler = std::sync::Arc::new(move |env| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(env).await;
            })
        });
        let pump = self.spawn_pump(subscriber, forward);

        Ok(ReplyChannel::new(
            address,
            MailboxReader::from_receiver(rx),
            Subscription::new(move || pump.abort()),
        ))
    }

    fn is_broadcast_capable(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for BrokerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerTransport")
            .field("prefix", &self.prefix)
            .finish()
    }
}
