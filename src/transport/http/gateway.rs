//! HTTP gateway server
//!
//! Bridges HTTP clients onto a transport, usually the in-process one of
//! the runtime hosting the gateway. Routes:
//! - `POST /agents/{name}` - publish a wire envelope to the name
//! - `GET /subscribe/{name}` - SSE stream of envelopes for the name
//! - `GET /inbox/{name}` - SSE reply channel keyed by the inbox name
//!
//! Publish failures map onto status codes: 404 for a missing agent,
//! 410 for a closed reply channel, 502 for transport trouble.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::channel::DELIVERY_QUEUE_CAPACITY;
use crate::core::{Address, Envelope, FabricError, FabricResult};
use crate::transport::{Handler, SubscriptionMode, Transport};

/// HTTP front door for a transport
pub struct Gateway {
    transport: Arc<dyn Transport>,
}

#[derive(Clone)]
struct GatewayState {
    transport: Arc<dyn Transport>,
}

impl Gateway {
    /// Expose `transport` over HTTP
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The axum router implementing the gateway protocol
    pub fn router(&self) -> Router {
        let state = GatewayState {
            transport: self.transport.clone(),
        };
        Router::new()
            .route("/agents/:name", post(publish_envelope))
            .route("/subscribe/:name", get(subscribe_stream))
            .route("/inbox/:name", get(inbox_stream))
            .with_state(state)
    }

    /// Serve the gateway until the listener fails
    pub async fn serve(self, listener: tokio::net::TcpListener) -> FabricResult<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "gateway listening");
        }
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish()
    }
}

#[derive(Debug, Deserialize)]
struct PublishParams {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    probe: Option<String>,
}

async fn publish_envelope(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Query(params): Query<PublishParams>,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    let env = Envelope::from_bytes(&body)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    let to = Address {
        name,
        id: params.id.unwrap_or_default(),
        kind: params.kind.unwrap_or_default(),
    };
    let probe = params.probe.as_deref() == Some("1");

    match state.transport.publish(&to, env, probe).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(FabricError::NoAgent(name)) => Err((StatusCode::NOT_FOUND, name)),
        Err(FabricError::ChannelClosed) => {
            Err((StatusCode::GONE, "reply channel closed".to_string()))
        }
        Err(err) => Err((StatusCode::BAD_GATEWAY, err.to_string())),
    }
}

async fn subscribe_stream(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    attach(state, name).await
}

async fn inbox_stream(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    attach(state, name).await
}

/// Subscribe on the bridged transport and forward envelopes as SSE
/// events. The transport subscription lives exactly as long as the
/// response stream; a client disconnect tears it down.
async fn attach(
    state: GatewayState,
    name: String,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let (tx, rx) = mpsc::channel::<Envelope>(DELIVERY_QUEUE_CAPACITY);
    let handler: Handler = Arc::new(move |env| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(env).await;
        })
    });
    let subscription = state
        .transport
        .subscribe(&Address::named(&name), handler, SubscriptionMode::Queued)
        .await
        .map_err(|err| {
            tracing::warn!(agent = %name, error = %err, "gateway subscribe failed");
            StatusCode::BAD_GATEWAY
        })?;
    tracing::debug!(agent = %name, "event stream attached");

    let stream = ReceiverStream::new(rx).map(move |env| {
        let _keep_alive_until_disconnect = &subscription;
        let data = serde_json::to_string(&env).unwrap_or_default();
        Ok(Event::default().data(data))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;

    #[tokio::test]
    async fn test_router_rejects_garbage_body() {
        let gateway = Gateway::new(Arc::new(LocalTransport::new()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = gateway.serve(listener).await;
        });

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/agents/echo"))
            .body("not an envelope")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
