//! HTTP gateway transport binding
//!
//! The client side of the gateway protocol. Publishing is an HTTP POST
//! whose body carries the wire envelope and whose path encodes the
//! destination name. Subscriptions are long-lived server-sent-event
//! streams, reconnected on drop with exponential backoff capped at the
//! configured ceiling. Reply channels are a second SSE stream keyed by
//! the generated inbox name.
//!
//! The server side lives in [`gateway`].

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::{MailboxReader, DELIVERY_QUEUE_CAPACITY};
use crate::core::{Address, Envelope, FabricError, FabricResult, INBOX_PREFIX};

use super::{Handler, ReplyChannel, Subscription, SubscriptionMode, Transport};

pub mod gateway;

pub use gateway::Gateway;

const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Client binding that speaks to a [`Gateway`]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    backoff_initial: Duration,
    backoff_cap: Duration,
}

impl HttpTransport {
    /// Create a transport against a gateway base URL,
    /// e.g. `http://127.0.0.1:8700`
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }

    /// Override the reconnect backoff ceiling
    pub fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    fn agent_url(&self, name: &str) -> String {
        format!("{}/agents/{name}", self.base_url)
    }
}

/// Open an SSE stream at `url` and decode each event as a wire envelope
async fn connect_envelope_stream(
    client: &reqwest::Client,
    url: &str,
) -> FabricResult<impl Stream<Item = FabricResult<Envelope>> + Send + Unpin> {
    let response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|err| FabricError::transport(err.to_string()))?;
    if !response.status().is_success() {
        return Err(FabricError::transport(format!(
            "gateway returned {} for {url}",
            response.status()
        )));
    }
    Ok(response.bytes_stream().eventsource().map(|event| {
        let event = event.map_err(|err| FabricError::transport(format!("event stream: {err}")))?;
        Envelope::from_bytes(event.data.as_bytes())
    }))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn publish(&self, to: &Address, env: Envelope, probe: bool) -> FabricResult<()> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if !to.id.is_empty() {
            query.push(("id", to.id.clone()));
        }
        if !to.kind.is_empty() {
            query.push(("type", to.kind.clone()));
        }
        if probe {
            query.push(("probe", "1".to_string()));
        }

        let response = self
            .client
            .post(self.agent_url(&to.name))
            .query(&query)
            .header(CONTENT_TYPE, "application/json")
            .body(env.to_bytes()?)
            .send()
            .await
            .map_err(|err| FabricError::transport(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FabricError::NoAgent(to.name.clone())),
            StatusCode::GONE => Err(FabricError::ChannelClosed),
            status if status.is_success() => Ok(()),
            status => Err(FabricError::transport(format!("gateway returned {status}"))),
        }
    }

    async fn subscribe(
        &self,
        pattern: &Address,
        handler: Handler,
        _mode: SubscriptionMode,
    ) -> FabricResult<Subscription> {
        let client = self.client.clone();
        let url = format!("{}/subscribe/{}", self.base_url, pattern.name);
        let initial = self.backoff_initial;
        let cap = self.backoff_cap;

        let task = tokio::spawn(async move {
            let mut backoff = initial;
            loop {
                match connect_envelope_stream(&client, &url).await {
                    Ok(mut events) => {
                        backoff = initial;
                        while let Some(item) = events.next().await {
                            match item {
                                Ok(env) => handler(env).await,
                                Err(err) => {
                                    tracing::debug!(url = %url, error = %err, "event stream broke");
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::debug!(url = %url, error = %err, "gateway connect failed");
                    }
                }
                tracing::debug!(
                    url = %url,
                    backoff_ms = backoff.as_millis() as u64,
                    "reconnecting event stream"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(cap);
            }
        });
        Ok(Subscription::new(move || task.abort()))
    }

    async fn open_reply_channel(&self) -> FabricResult<ReplyChannel> {
        let inbox = format!("{INBOX_PREFIX}{}", Uuid::new_v4().simple());
        let url = format!("{}/inbox/{inbox}", self.base_url);

        // The gateway installs its inbox subscription before responding
        // with headers, so replies published after this call land safely.
        let mut events = connect_envelope_stream(&self.client, &url).await?;

        let (tx, rx) = mpsc::channel::<Envelope>(DELIVERY_QUEUE_CAPACITY);
        let task = tokio::spawn(async move {
            while let Some(item) = events.next().await {
                match item {
                    Ok(env) => {
                        if tx.send(env).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "reply stream broke");
                        break;
                    }
                }
            }
        });

        Ok(ReplyChannel::new(
            Address::named(inbox),
            MailboxReader::from_receiver(rx),
            Subscription::new(move || task.abort()),
        ))
    }
}
