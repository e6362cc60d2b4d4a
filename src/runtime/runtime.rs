//! Runtime - owns the transport, registry and live instances
//!
//! The runtime routes incoming envelopes to agent instances, activates
//! them lazily, and reaps idle ones. It is cheap to clone; clones share
//! the same registry and live table.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::channel::{mailbox, MailboxSender};
use crate::config::RuntimeConfig;
use crate::core::{Address, Envelope, FabricError, FabricResult, InstanceState};
use crate::transport::{
    Handler, ReplyStream, Subscription, SubscriptionMode, Transport,
};

use super::discovery::{
    namespace_matches, AgentInfo, DiscoveryAgent, DiscoveryQuery, DiscoveryReply, DISCOVERY_NAME,
    QUERY_TYPE,
};
use super::instance::{spawn_driver, InstanceHandle, InstanceKey};
use super::spec::AgentSpec;

/// Instance id used when a spec is not session scoped
const SINGLETON_ID: &str = "main";

/// Grace period when awaiting an instance's `stopped` hook
const STOP_GRACE: Duration = Duration::from_secs(5);

struct RegisteredAgent {
    spec: AgentSpec,
    /// Held for its Drop: cancelling stops the transport feeding us
    subscription: Subscription,
}

struct RuntimeInner {
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    registry: RwLock<HashMap<String, RegisteredAgent>>,
    /// Names registered by out-of-process sidecars, for discovery only
    remote: RwLock<HashMap<String, String>>,
    live: RwLock<HashMap<InstanceKey, InstanceHandle>>,
    next_epoch: AtomicU64,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Process-level owner of registry, transport and live instances
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime over a transport and start its reaper.
    ///
    /// The built-in discovery agent is registered before this returns.
    pub async fn new(transport: Arc<dyn Transport>, config: RuntimeConfig) -> FabricResult<Self> {
        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                transport,
                config,
                registry: RwLock::new(HashMap::new()),
                remote: RwLock::new(HashMap::new()),
                live: RwLock::new(HashMap::new()),
                next_epoch: AtomicU64::new(0),
                reaper: Mutex::new(None),
            }),
        };

        // Discovery answers are broadcast on broker transports, so the
        // subscription must not join a queue group.
        runtime
            .register_with_mode(
                AgentSpec::new(DISCOVERY_NAME, || Box::<DiscoveryAgent>::default()),
                SubscriptionMode::Broadcast,
            )
            .await?;

        let handle = spawn_reaper(Arc::downgrade(&runtime.inner));
        *runtime.inner.reaper.lock().expect("reaper slot poisoned") = Some(handle);

        Ok(runtime)
    }

    /// The transport this runtime is bound to
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// This runtime's configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an agent spec.
    ///
    /// Re-registering a name replaces the prior spec and terminates any
    /// live instances under it.
    pub async fn register(&self, spec: AgentSpec) -> FabricResult<()> {
        self.register_with_mode(spec, SubscriptionMode::Queued).await
    }

    async fn register_with_mode(
        &self,
        spec: AgentSpec,
        mode: SubscriptionMode,
    ) -> FabricResult<()> {
        let name = spec.name.clone();

        // Stop the old subscription from feeding envelopes, then shut
        // its instances down before the replacement goes live.
        let prior = self.inner.registry.write().await.remove(&name);
        drop(prior);
        self.terminate_instances_of(&name).await;

        // Insert the spec first so envelopes arriving the instant the
        // subscription goes live already resolve.
        self.inner.registry.write().await.insert(
            name.clone(),
            RegisteredAgent {
                spec,
                subscription: Subscription::new(|| {}),
            },
        );

        let runtime = self.clone();
        let dispatch_name = name.clone();
        let handler: Handler = Arc::new(move |env| {
            let runtime = runtime.clone();
            let name = dispatch_name.clone();
            Box::pin(async move { runtime.dispatch(&name, env).await })
        });
        let subscription = match self
            .inner
            .transport
            .subscribe(&Address::named(&name), handler, mode)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                self.inner.registry.write().await.remove(&name);
                return Err(err);
            }
        };
        if let Some(entry) = self.inner.registry.write().await.get_mut(&name) {
            entry.subscription = subscription;
        }
        tracing::info!(agent = %name, "registered agent");
        Ok(())
    }

    /// Remove a registration and terminate its live instances.
    ///
    /// Deregistering an unknown name is a no-op.
    pub async fn deregister(&self, name: &str) {
        let prior = self.inner.registry.write().await.remove(name);
        if prior.is_none() {
            return;
        }
        drop(prior);
        self.terminate_instances_of(name).await;
        tracing::info!(agent = %name, "deregistered agent");
    }

    /// Record a name hosted by an out-of-process sidecar.
    ///
    /// The sidecar subscribes to its own name over the broker; the
    /// runtime only tracks the name so discovery can answer for it.
    pub async fn register_remote(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) {
        let name = name.into();
        tracing::info!(agent = %name, "registered remote agent");
        self.inner.remote.write().await.insert(name, description.into());
    }

    /// Forget a sidecar-hosted name
    pub async fn deregister_remote(&self, name: &str) {
        if self.inner.remote.write().await.remove(name).is_some() {
            tracing::info!(agent = %name, "deregistered remote agent");
        }
    }

    // =========================================================================
    // Addressing peers
    // =========================================================================

    /// Publish an envelope without waiting for a reply
    pub async fn publish(&self, to: &Address, env: Envelope, probe: bool) -> FabricResult<()> {
        self.inner.transport.publish(to, env, probe).await
    }

    /// Unary request with the configured default deadline
    pub async fn request(&self, to: &Address, env: Envelope) -> FabricResult<Envelope> {
        self.request_with_timeout(to, env, self.inner.config.request_timeout)
            .await
    }

    /// Unary request with an explicit deadline
    pub async fn request_with_timeout(
        &self,
        to: &Address,
        env: Envelope,
        timeout: Duration,
    ) -> FabricResult<Envelope> {
        self.inner.transport.request(to, env, timeout, true).await
    }

    /// Streaming request; the configured deadline bounds the first chunk
    pub async fn request_stream(&self, to: &Address, env: Envelope) -> FabricResult<ReplyStream> {
        self.inner
            .transport
            .request_stream(to, env, self.inner.config.request_timeout, true)
            .await
    }

    /// Handle for repeatedly addressing one collaborator
    pub fn peer(&self, name: impl Into<String>) -> Peer {
        Peer {
            runtime: self.clone(),
            address: Address::named(name),
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Query which names are registered under a namespace prefix.
    ///
    /// On broadcast-capable transports the query fans out to every
    /// runtime and replies are aggregated until the configured window
    /// elapses or the reply cap is reached, de-duplicated by name.
    pub async fn discover(&self, namespace: &str, detailed: bool) -> FabricResult<Vec<AgentInfo>> {
        let query = Envelope::json(
            QUERY_TYPE,
            &DiscoveryQuery {
                namespace: namespace.to_string(),
                detailed,
            },
        )?;
        let to = Address::named(DISCOVERY_NAME);

        if !self.inner.transport.is_broadcast_capable() {
            let reply = self.request(&to, query).await?;
            let body: DiscoveryReply = reply.decode_payload()?;
            return Ok(body.agents);
        }

        let mut reply_channel = self.inner.transport.open_reply_channel().await?;
        let mut query = query;
        query
            .header
            .set_reply_to(reply_channel.address().name.clone());
        self.inner.transport.publish(&to, query, false).await?;

        let mut seen: BTreeMap<String, AgentInfo> = BTreeMap::new();
        let deadline = Instant::now() + self.inner.config.discovery_aggregate_timeout;
        let mut replies = 0usize;
        while replies < self.inner.config.discovery_max_replies {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, reply_channel.recv()).await {
                Ok(Some(env)) => {
                    if let Some(err) = env.as_error() {
                        tracing::warn!(error = %err, "discarding discovery error reply");
                        continue;
                    }
                    let body: DiscoveryReply = env.decode_payload()?;
                    replies += 1;
                    for agent in body.agents {
                        seen.entry(agent.name.clone()).or_insert(agent);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        Ok(seen.into_values().collect())
    }

    pub(crate) async fn list_registered(&self, namespace: &str, detailed: bool) -> Vec<AgentInfo> {
        fn hidden(name: &str) -> bool {
            name == DISCOVERY_NAME || name.starts_with('_')
        }
        fn info(name: &str, description: &str, detailed: bool) -> AgentInfo {
            AgentInfo {
                name: name.to_string(),
                description: (detailed && !description.is_empty())
                    .then(|| description.to_string()),
            }
        }

        let mut agents = Vec::new();
        {
            let registry = self.inner.registry.read().await;
            for (name, registered) in registry.iter() {
                if !hidden(name) && namespace_matches(namespace, name) {
                    agents.push(info(name, &registered.spec.description, detailed));
                }
            }
        }
        {
            let remote = self.inner.remote.read().await;
            for (name, description) in remote.iter() {
                if !hidden(name) && namespace_matches(namespace, name) {
                    agents.push(info(name, description, detailed));
                }
            }
        }
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents.dedup_by(|a, b| a.name == b.name);
        agents
    }

    // =========================================================================
    // Activation and dispatch
    // =========================================================================

    /// Route an inbound envelope for a registered name to its instance,
    /// activating one if none is live.
    pub(crate) async fn dispatch(&self, name: &str, env: Envelope) {
        let reply_to = env.reply_address();
        if let Err(err) = self.dispatch_inner(name, env).await {
            tracing::error!(agent = %name, error = %err, "envelope dispatch failed");
            if let Some(to) = reply_to {
                let _ = self
                    .inner
                    .transport
                    .publish(&to, Envelope::error_reply(&err), false)
                    .await;
            }
        }
    }

    async fn dispatch_inner(&self, name: &str, env: Envelope) -> FabricResult<()> {
        let spec = self
            .inner
            .registry
            .read()
            .await
            .get(name)
            .map(|registered| registered.spec.clone())
            .ok_or_else(|| FabricError::NoAgent(name.to_string()))?;

        let id = if spec.session_scoped {
            env.header.session_id().unwrap_or(SINGLETON_ID).to_string()
        } else {
            SINGLETON_ID.to_string()
        };
        let key = InstanceKey {
            name: name.to_string(),
            id,
        };

        // One retry covers the race with an instance that stopped
        // between lookup and delivery.
        for _ in 0..2 {
            let sender = self.ensure_instance(&spec, &key).await;
            if sender.send(env.clone()).await.is_ok() {
                return Ok(());
            }
        }
        Err(FabricError::ChannelClosed)
    }

    async fn ensure_instance(&self, spec: &AgentSpec, key: &InstanceKey) -> MailboxSender {
        {
            let live = self.inner.live.read().await;
            if let Some(handle) = live.get(key) {
                if !handle.sender.is_closed() {
                    return handle.sender.clone();
                }
            }
        }

        let mut live = self.inner.live.write().await;
        if let Some(handle) = live.get(key) {
            if !handle.sender.is_closed() {
                return handle.sender.clone();
            }
            live.remove(key);
        }

        let agent = spec.construct();
        let (sender, reader) = mailbox(spec.mailbox_capacity);
        let (state_tx, state_rx) = watch::channel(InstanceState::Starting);
        let last_active = Arc::new(std::sync::RwLock::new(Instant::now()));
        let busy = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);

        live.insert(
            key.clone(),
            InstanceHandle {
                sender: sender.clone(),
                state: state_rx,
                last_active: last_active.clone(),
                busy: busy.clone(),
                epoch,
            },
        );
        drop(live);

        tracing::debug!(agent = %key.name, id = %key.id, "activating instance");
        spawn_driver(
            self.clone(),
            key.clone(),
            epoch,
            agent,
            reader,
            state_tx,
            last_active,
            busy,
        );
        sender
    }

    /// Remove a live-table entry, but only the epoch that asked.
    pub(crate) async fn remove_instance(&self, key: &InstanceKey, epoch: u64) {
        let mut live = self.inner.live.write().await;
        if live.get(key).map(|handle| handle.epoch) == Some(epoch) {
            live.remove(key);
        }
    }

    /// Number of live instances, across all names
    pub async fn live_instances(&self) -> usize {
        self.inner.live.read().await.len()
    }

    // =========================================================================
    // Deactivation
    // =========================================================================

    async fn terminate_instances_of(&self, name: &str) {
        let targets: Vec<(MailboxSender, watch::Receiver<InstanceState>)> = {
            let live = self.inner.live.read().await;
            live.iter()
                .filter(|(key, _)| key.name == name)
                .map(|(_, handle)| (handle.sender.clone(), handle.state.clone()))
                .collect()
        };
        for (sender, _) in &targets {
            let _ = sender.send(Envelope::terminal()).await;
        }
        for (_, mut state) in targets {
            let stopped = state.wait_for(|s| s.is_stopped());
            if tokio::time::timeout(STOP_GRACE, stopped).await.is_err() {
                tracing::warn!(agent = %name, "instance did not stop within grace period");
            }
        }
    }

    pub(crate) async fn reap_idle(&self) {
        let interval = self.inner.config.deactivation_interval;
        let idle: Vec<(InstanceKey, MailboxSender)> = {
            let live = self.inner.live.read().await;
            live.iter()
                .filter(|(_, handle)| {
                    !handle.busy.load(Ordering::SeqCst) && handle.idle_for() >= interval
                })
                .map(|(key, handle)| (key.clone(), handle.sender.clone()))
                .collect()
        };
        for (key, sender) in idle {
            tracing::info!(agent = %key.name, id = %key.id, "reaping idle instance");
            let _ = sender.send(Envelope::terminal()).await;
        }
    }

    /// Terminate every live instance, drop all registrations and stop
    /// the reaper. The runtime cannot be used afterwards.
    pub async fn shutdown(&self) {
        let names: Vec<String> = {
            let mut registry = self.inner.registry.write().await;
            let names = registry.keys().cloned().collect();
            registry.clear();
            names
        };
        self.inner.remote.write().await.clear();
        for name in names {
            self.terminate_instances_of(&name).await;
        }
        if let Some(handle) = self.inner.reaper.lock().expect("reaper slot poisoned").take() {
            handle.abort();
        }
        tracing::info!("runtime shut down");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish()
    }
}

fn spawn_reaper(inner: Weak<RuntimeInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let tick = match inner.upgrade() {
                Some(strong) => strong.config.reaper_tick(),
                None => return,
            };
            tokio::time::sleep(tick).await;
            match inner.upgrade() {
                Some(strong) => Runtime { inner: strong }.reap_idle().await,
                None => return,
            }
        }
    })
}

/// Convenience handle for addressing one collaborator by name
#[derive(Clone)]
pub struct Peer {
    runtime: Runtime,
    address: Address,
}

impl Peer {
    /// The peer's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Fire-and-forget publish, probing for a subscriber
    pub async fn send(&self, env: Envelope) -> FabricResult<()> {
        self.runtime.publish(&self.address, env, true).await
    }

    /// Unary request with the runtime's default deadline
    pub async fn request(&self, env: Envelope) -> FabricResult<Envelope> {
        self.runtime.request(&self.address, env).await
    }

    /// Streaming request
    pub async fn request_stream(&self, env: Envelope) -> FabricResult<ReplyStream> {
        self.runtime.request_stream(&self.address, env).await
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("address", &self.address).finish()
    }
}
