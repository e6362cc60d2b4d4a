//! Instance driver task
//!
//! Each live instance owns exactly one driver task that reads its inbox
//! and invokes the agent's hooks. Hooks run to completion before the
//! next envelope is dequeued, which provides per-instance serialisation
//! without locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::watch;

use crate::agent::{Agent, AgentContext, Reply};
use crate::channel::{MailboxReader, MailboxSender};
use crate::core::{Address, Envelope, FabricResult, InstanceState};
use crate::transport::reply_delivery_error;

use super::Runtime;

/// Key of a live instance in the runtime's live table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct InstanceKey {
    pub name: String,
    pub id: String,
}

impl InstanceKey {
    pub fn address(&self) -> Address {
        Address::session(&self.name, &self.id)
    }
}

/// Runtime-side view of a live instance
pub(crate) struct InstanceHandle {
    pub sender: MailboxSender,
    pub state: watch::Receiver<InstanceState>,
    pub last_active: Arc<RwLock<Instant>>,
    pub busy: Arc<AtomicBool>,
    pub epoch: u64,
}

impl InstanceHandle {
    /// Idle time since the last dequeued or completed envelope
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active
            .read()
            .expect("activity clock poisoned")
            .elapsed()
    }
}

/// Spawn the driver task for a freshly constructed instance.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_driver(
    runtime: Runtime,
    key: InstanceKey,
    epoch: u64,
    mut agent: Box<dyn Agent>,
    mut reader: MailboxReader,
    state_tx: watch::Sender<InstanceState>,
    last_active: Arc<RwLock<Instant>>,
    busy: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let ctx = AgentContext::new(key.address(), runtime.clone());

        if let Err(err) = agent.started(&ctx).await {
            tracing::error!(agent = %key.name, id = %key.id, error = %err, "started hook failed");
            runtime.remove_instance(&key, epoch).await;
            let _ = state_tx.send(InstanceState::Stopped);
            return;
        }
        let _ = state_tx.send(InstanceState::Running);
        tracing::debug!(agent = %key.name, id = %key.id, "instance running");

        while let Some(env) = reader.recv().await {
            touch(&last_active);
            if env.header.is_terminate() {
                break;
            }
            busy.store(true, Ordering::SeqCst);
            handle_envelope(agent.as_mut(), env, &ctx, &runtime).await;
            busy.store(false, Ordering::SeqCst);
            touch(&last_active);
        }

        let _ = state_tx.send(InstanceState::Stopping);
        runtime.remove_instance(&key, epoch).await;

        // Envelopes that raced in behind the terminate go back through
        // the transport and activate a fresh instance. Duplicate
        // terminate frames are dropped here.
        let reroute = Address::named(&key.name);
        while let Some(env) = reader.try_recv() {
            if env.header.is_terminate() {
                continue;
            }
            if let Err(err) = runtime.transport().publish(&reroute, env, false).await {
                tracing::warn!(agent = %key.name, error = %err, "failed to reroute envelope");
            }
        }

        if let Err(err) = agent.stopped(&ctx).await {
            tracing::error!(agent = %key.name, id = %key.id, error = %err, "stopped hook failed");
        }
        let _ = state_tx.send(InstanceState::Stopped);
        tracing::debug!(agent = %key.name, id = %key.id, "instance stopped");
    });
}

fn touch(last_active: &Arc<RwLock<Instant>>) {
    *last_active.write().expect("activity clock poisoned") = Instant::now();
}

async fn handle_envelope(
    agent: &mut dyn Agent,
    env: Envelope,
    ctx: &AgentContext,
    runtime: &Runtime,
) {
    let reply_to = env.reply_address();

    match agent.receive(env, ctx).await {
        Ok(Reply::None) => {}

        Ok(Reply::Single(mut reply)) => {
            let Some(to) = reply_to else { return };
            // Unary replies terminate the exchange, so callers that
            // asked for a stream also see the end.
            reply.header.set_terminate();
            if let Err(err) = deliver(runtime, &to, reply).await {
                tracing::debug!(to = %to, error = %err, "reply not delivered");
            }
        }

        Ok(Reply::Stream(mut stream)) => {
            let Some(to) = reply_to else {
                // Nobody is listening; still run the producer dry.
                while stream.next().await.is_some() {}
                return;
            };
            let mut clean = true;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        if let Err(err) = deliver(runtime, &to, chunk).await {
                            tracing::debug!(to = %to, error = %err, "abandoning reply stream");
                            clean = false;
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = deliver(runtime, &to, Envelope::error_reply(&err)).await;
                        clean = false;
                        break;
                    }
                }
            }
            if clean {
                let _ = deliver(runtime, &to, Envelope::terminal()).await;
            }
        }

        Err(err) => {
            tracing::error!(agent = %ctx.address(), error = %err, "receive hook failed");
            if let Some(to) = reply_to {
                let _ = deliver(runtime, &to, Envelope::error_reply(&err)).await;
            }
        }
    }
}

async fn deliver(runtime: &Runtime, to: &Address, env: Envelope) -> FabricResult<()> {
    runtime
        .transport()
        .publish(to, env, true)
        .await
        .map_err(|err| reply_delivery_error(to, err))
}
