use actor_framework::cacher::Cacher;
use actor_framework::config::RunnerConfig;
use actor_framework::error::{ConfigError, StoreError};
use actor_framework::{
    Address, Coroutine, CoroutineRegistry, Gateway, MemoryStore, Message, Payload, RootSpawn,
    Runner, Store,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Errors raised while assembling an [`ActorSystem`].
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Store owns prefix {store:?} but the system was built for {system:?}")]
    StorePrefix { store: String, system: String },
    #[error("Two gateways claim prefix {0:?}")]
    DuplicatePrefix(String),
}

/// Collects everything an [`ActorSystem`] needs before anything is started.
///
/// # Example
///
/// ```ignore
/// let system = ActorSystem::builder("runner")
///     .workers(4)
///     .gateway(Arc::new(TimerGateway::start()))
///     .actor(Address::parse("runner:echo")?, Echo, vec![])
///     .build()
///     .await?;
/// ```
pub struct ActorSystemBuilder {
    prefix: String,
    config: RunnerConfig,
    store: Option<Arc<dyn Store>>,
    cacher: Option<Arc<dyn Cacher>>,
    registry: CoroutineRegistry,
    gateways: Vec<Arc<dyn Gateway>>,
    actors: Vec<RootSpawn>,
}

impl ActorSystemBuilder {
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for setting [`RunnerConfig::workers`].
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Uses `store` instead of a fresh [`MemoryStore`]. Its prefix must match the
    /// system's.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cacher(mut self, cacher: Arc<dyn Cacher>) -> Self {
        self.cacher = Some(cacher);
        self
    }

    pub fn registry(mut self, registry: CoroutineRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers a gateway. Every gateway and the runner can reach each other.
    pub fn gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateways.push(gateway);
        self
    }

    /// Registers a root actor. It is stored at build time, followed by one message per
    /// priming payload, sent from the empty address.
    pub fn actor(mut self, address: Address, coroutine: impl Coroutine, priming: Vec<Payload>) -> Self {
        self.actors.push(RootSpawn::new(address, coroutine, priming));
        self
    }

    /// Starts the runner, wires all shuttles and stores the registered actors.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<ActorSystem, SystemError> {
        let store = match self.store {
            Some(store) if store.prefix() != self.prefix => {
                return Err(SystemError::StorePrefix {
                    store: store.prefix().to_string(),
                    system: self.prefix,
                });
            }
            Some(store) => store,
            None => Arc::new(MemoryStore::new(self.prefix.clone())),
        };

        let mut prefixes = HashSet::from([self.prefix.clone()]);
        for gateway in &self.gateways {
            if !prefixes.insert(gateway.prefix().to_string()) {
                return Err(SystemError::DuplicatePrefix(gateway.prefix().to_string()));
            }
        }

        let mut runner = Runner::builder(store)
            .config(self.config)
            .registry(self.registry);
        if let Some(cacher) = self.cacher {
            runner = runner.cacher(cacher);
        }
        let runner = runner.start()?;

        // 1. Full mesh: runner <-> every gateway, gateway <-> gateway
        for (i, gateway) in self.gateways.iter().enumerate() {
            runner.add_outgoing_shuttle(gateway.incoming_shuttle());
            gateway.add_outgoing_shuttle(runner.incoming_shuttle());
            for other in &self.gateways[i + 1..] {
                gateway.add_outgoing_shuttle(other.incoming_shuttle());
                other.add_outgoing_shuttle(gateway.incoming_shuttle());
            }
            debug!(prefix = %gateway.prefix(), "Gateway wired");
        }

        let system = ActorSystem {
            prefix: self.prefix,
            runner,
            gateways: self.gateways,
        };

        // 2. Seed actors once everything can receive their output
        let count = self.actors.len();
        for spawn in self.actors {
            if let Err(e) = system.runner.spawn(spawn).await {
                system.shutdown().await;
                return Err(e.into());
            }
        }

        info!(prefix = %system.prefix, actors = count, gateways = system.gateways.len(), "Actor system started");
        Ok(system)
    }
}

/// A running runner plus the gateways wired to it.
///
/// `ActorSystem` is responsible for:
/// - **Wiring**: every gateway can reach the runner and every other gateway
/// - **Seeding**: initial actors and their priming messages
/// - **Shutdown**: stopping the runner first so in-flight turns can still deliver to
///   the gateways, then the gateways
pub struct ActorSystem {
    prefix: String,
    runner: Runner,
    gateways: Vec<Arc<dyn Gateway>>,
}

impl ActorSystem {
    pub fn builder(prefix: impl Into<String>) -> ActorSystemBuilder {
        ActorSystemBuilder {
            prefix: prefix.into(),
            config: RunnerConfig::default(),
            store: None,
            cacher: None,
            registry: CoroutineRegistry::new(),
            gateways: Vec::new(),
            actors: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.runner.store()
    }

    /// Injects a message as if an actor had sent it.
    pub async fn send(&self, source: Address, destination: Address, payload: Payload) {
        self.runner
            .dispatch(vec![Message::new(source, destination, payload)])
            .await;
    }

    /// Adds a root actor to the running system.
    pub async fn spawn(
        &self,
        address: Address,
        coroutine: impl Coroutine,
        priming: Vec<Payload>,
    ) -> Result<(), StoreError> {
        self.runner
            .spawn(RootSpawn::new(address, coroutine, priming))
            .await
    }

    /// Gracefully shuts down the entire system.
    ///
    /// # Shutdown Process
    ///
    /// 1. Stop the runner's workers between turns and wait for them, so every turn
    ///    that already started routes its output
    /// 2. Close the gateways and wait for their tasks
    pub async fn shutdown(self) {
        info!(prefix = %self.prefix, "Shutting down actor system...");

        self.runner.close();
        self.runner.join().await;

        for gateway in &self.gateways {
            gateway.close();
        }
        for gateway in &self.gateways {
            gateway.join().await;
        }

        info!(prefix = %self.prefix, "Actor system shutdown complete.");
    }
}
