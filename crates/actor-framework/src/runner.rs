//! # Runner
//!
//! The runner owns a fixed pool of worker tasks that pull work from a [`Store`],
//! resume the claimed actor with one message and route whatever the turn produced.
//!
//! ## One scheduling turn
//!
//! ```text
//!  take() ──► resolve actor ──► deliver (panic-safe) ──► spawn roots + priming
//!                                                              │
//!     store_actor / discard ◄── route outgoing (store | shuttle | drop)
//! ```
//!
//! 1. **Resolve.** Serialized data from the store is decoded through the
//!    [`CoroutineRegistry`]. Otherwise the live instance is taken from the resident
//!    map, or restored from the [`Cacher`] (and the cache entry deleted).
//! 2. **Deliver.** [`Actor::deliver`] runs under `catch_unwind`. An error or panic
//!    discards the actor and drops everything the turn produced.
//! 3. **Spawn.** Root actors requested during the turn are inserted (refused if the
//!    address already holds an actor), then their priming messages are queued, so
//!    outgoing messages of the same turn can already reach them.
//! 4. **Route.** Messages for this runner's prefix go back into the store; everything
//!    else goes to the outgoing shuttle registered for the destination's prefix, or is
//!    dropped with a warning.
//! 5. **Return.** A finished actor is discarded. Otherwise it goes back to the store,
//!    either serialized (`persist_actors`) or as a resident live instance. When the
//!    resident set is full the actor is offered to the cacher first.
//!
//! ## Errors
//!
//! Transient store errors are retried every `retry_backoff` until they succeed or
//! the runner shuts down. Everything else is logged and affects only the actor whose
//! turn raised it.
//!
//! ## Shutdown
//!
//! [`Gateway::close`] stops workers between turns: a turn that is already running
//! finishes routing its output first. [`Gateway::join`] waits for the workers and the
//! incoming pump, then closes the store.

use crate::actor::{Actor, CoroutineRegistry, TurnReport};
use crate::address::Address;
use crate::cacher::Cacher;
use crate::config::RunnerConfig;
use crate::context::RootSpawn;
use crate::error::{ActorError, ConfigError, StoreError};
use crate::message::Message;
use crate::shuttle::{ChannelShuttle, Gateway, Shuttle, ShuttleMap};
use crate::store::{check_prefix, Store, StoreOutcome, StoredActor, StoredWork};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Assembles a [`Runner`] around a store.
pub struct RunnerBuilder {
    store: Arc<dyn Store>,
    config: RunnerConfig,
    cacher: Option<Arc<dyn Cacher>>,
    registry: CoroutineRegistry,
}

impl RunnerBuilder {
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
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

    /// Validates the configuration and spawns the workers. Must be called inside a
    /// tokio runtime.
    pub fn start(self) -> Result<Runner, ConfigError> {
        self.config.validate()?;
        if self.config.max_resident.is_some() && self.cacher.is_none() {
            warn!("max_resident is set but no cacher is configured; nothing will be evicted");
        }

        let prefix = self.store.prefix().to_string();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (incoming, receiver) = ChannelShuttle::new(prefix.clone());
        let inner = Arc::new(RunnerInner {
            prefix: prefix.clone(),
            store: self.store,
            cacher: self.cacher,
            registry: self.registry,
            config: self.config,
            shuttles: ShuttleMap::new(),
            resident: Mutex::new(HashMap::new()),
            shutdown: shutdown_rx.clone(),
        });

        let mut tasks = Vec::with_capacity(inner.config.workers + 1);
        for id in 0..inner.config.workers {
            tasks.push(tokio::spawn(worker(id, inner.clone(), shutdown_rx.clone())));
        }
        tasks.push(tokio::spawn(pump(inner.clone(), receiver, shutdown_rx)));
        info!(%prefix, workers = inner.config.workers, "Runner started");

        Ok(Runner {
            inner,
            incoming: Arc::new(incoming),
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }
}

/// A worker pool executing the actors of one store.
pub struct Runner {
    inner: Arc<RunnerInner>,
    incoming: Arc<ChannelShuttle>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Runner {
    pub fn builder(store: Arc<dyn Store>) -> RunnerBuilder {
        RunnerBuilder {
            store,
            config: RunnerConfig::default(),
            cacher: None,
            registry: CoroutineRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Stores a new root actor and queues its priming messages.
    pub async fn spawn(&self, spawn: RootSpawn) -> Result<(), StoreError> {
        self.inner.spawn_root(spawn).await
    }

    /// Routes messages exactly as an actor's outgoing batch would be routed.
    pub async fn dispatch(&self, messages: Vec<Message>) {
        self.inner.route(messages).await;
    }

    /// Number of live actor instances held in memory between turns.
    pub fn resident_count(&self) -> usize {
        self.inner.resident.lock().len()
    }
}

#[async_trait]
impl Gateway for Runner {
    fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        self.incoming.clone()
    }

    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>) {
        debug!(runner = %self.inner.prefix, prefix = %shuttle.prefix(), "Added outgoing shuttle");
        self.inner.shuttles.insert(shuttle);
    }

    fn remove_outgoing_shuttle(&self, prefix: &str) {
        self.inner.shuttles.remove(prefix);
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(runner = %self.inner.prefix, error = %e, "Runner task failed");
            }
        }
        self.inner.store.close().await;
        info!(runner = %self.inner.prefix, resident = self.resident_count(), "Runner stopped");
    }
}

struct RunnerInner {
    prefix: String,
    store: Arc<dyn Store>,
    cacher: Option<Arc<dyn Cacher>>,
    registry: CoroutineRegistry,
    config: RunnerConfig,
    shuttles: ShuttleMap,
    resident: Mutex<HashMap<Address, Actor>>,
    shutdown: watch::Receiver<bool>,
}

impl RunnerInner {
    async fn run_turn(&self, work: StoredWork) {
        let address = work.address.clone();
        let mut actor = match self.resolve(&work).await {
            Ok(actor) => actor,
            Err(e) => {
                error!(%address, error = %e, "Could not load actor, discarding");
                self.discard(&address).await;
                return;
            }
        };
        actor.set_checkpoint_instance(work.instance);
        debug!(
            %address,
            destination = %work.message.destination(),
            checkpoint = work.checkpoint,
            "Resuming actor"
        );

        let report = match deliver(&mut actor, work.message, work.checkpoint) {
            Ok(report) => report,
            Err(e) => {
                error!(%address, error = %e, "Actor failed, discarding");
                self.discard(&address).await;
                return;
            }
        };

        let TurnReport {
            outgoing,
            spawned,
            finished,
        } = report;
        for spawn in spawned {
            let spawned_address = spawn.address.clone();
            if let Err(e) = self.spawn_root(spawn).await {
                error!(%address, spawned = %spawned_address, error = %e, "Could not spawn root actor");
            }
        }
        self.route(outgoing).await;

        if finished {
            debug!(%address, "Actor finished");
            self.discard(&address).await;
        } else if let Err(e) = self.store_back(actor).await {
            error!(%address, error = %e, "Could not return actor to store, actor lost");
        }
    }

    async fn resolve(&self, work: &StoredWork) -> Result<Actor, ActorError> {
        if let Some(data) = &work.actor_data {
            return Ok(self.registry.decode_actor(data)?);
        }
        let resident = self.resident.lock().remove(&work.address);
        if let Some(actor) = resident {
            return current(work, actor);
        }
        if let Some(cacher) = &self.cacher {
            if let Some(image) = cacher.restore(&work.address).await {
                let actor = self.registry.decode_actor(&image);
                cacher.delete(&work.address).await;
                trace!(address = %work.address, "Restored actor from cacher");
                return current(work, actor?);
            }
        }
        Err(ActorError::Missing(work.address.clone()))
    }

    async fn spawn_root(&self, spawn: RootSpawn) -> Result<(), StoreError> {
        let RootSpawn {
            address,
            coroutine,
            priming,
            source,
        } = spawn;
        check_prefix(&self.prefix, &address)?;
        self.retry("insert_actor", || {
            self.store.insert_actor(StoredActor::new(address.clone()))
        })
        .await?;
        debug!(%address, tag = coroutine.tag(), priming = priming.len(), "Spawning root actor");
        if let Err(e) = self
            .store_back(Actor::from_boxed(address.clone(), coroutine))
            .await
        {
            self.discard(&address).await;
            return Err(e);
        }
        let messages = priming
            .into_iter()
            .map(|payload| Message::new(source.clone(), address.clone(), payload))
            .collect();
        self.route(messages).await;
        Ok(())
    }

    async fn route(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let (local, remote): (Vec<_>, Vec<_>) = messages
            .into_iter()
            .partition(|message| message.destination().first() == self.prefix);
        if !local.is_empty() {
            let count = local.len();
            let stored = self
                .retry("store_messages", || self.store.store_messages(local.clone()))
                .await;
            if let Err(e) = stored {
                error!(count, error = %e, "Could not store messages, dropping");
            }
        }
        self.shuttles.dispatch(remote);
    }

    /// Returns a claimed actor to the store, resident, cached or serialized.
    ///
    /// The live instance is placed before the claim is released, so the next `take()`
    /// always finds it. If the store answers `Stale` the local copy is dropped again.
    async fn store_back(&self, actor: Actor) -> Result<StoreOutcome, StoreError> {
        let address = actor.address().clone();
        let instance = actor.checkpoint_instance();
        let mut stored = StoredActor::new(address.clone()).with_instance(instance);
        if let Some((payload, timeout)) = actor.checkpoint() {
            stored = stored.with_checkpoint(payload, timeout);
        }

        let mut resident = false;
        let mut evicted = false;
        if self.config.persist_actors {
            stored = stored.with_data(actor.encode()?);
        } else {
            let image = self.eviction_image(&actor);
            evicted = self.evict(&address, image).await;
            if !evicted {
                self.resident.lock().insert(address.clone(), actor);
                resident = true;
            }
        }

        match self
            .retry("store_actor", || self.store.store_actor(stored.clone()))
            .await
        {
            Ok(StoreOutcome::Stored) => {
                trace!(%address, resident, "Actor stored");
                Ok(StoreOutcome::Stored)
            }
            Ok(StoreOutcome::Stale) => {
                warn!(%address, instance, "Store kept a newer snapshot, dropping local copy");
                self.drop_local_copy(&address, instance, evicted).await;
                Ok(StoreOutcome::Stale)
            }
            Err(e) => {
                self.drop_local_copy(&address, instance, evicted).await;
                Err(e)
            }
        }
    }

    /// Removes the copy `store_back` placed, unless another turn already replaced it
    /// with a newer one.
    async fn drop_local_copy(&self, address: &Address, instance: u64, evicted: bool) {
        {
            let mut resident = self.resident.lock();
            if resident
                .get(address)
                .is_some_and(|actor| actor.checkpoint_instance() <= instance)
            {
                resident.remove(address);
            }
        }
        if let (true, Some(cacher)) = (evicted, &self.cacher) {
            cacher.delete(address).await;
        }
    }

    /// The image to offer the cacher, if the resident set is full and the actor can
    /// be rebuilt later.
    fn eviction_image(&self, actor: &Actor) -> Option<Bytes> {
        let max = self.config.max_resident?;
        self.cacher.as_ref()?;
        if self.resident.lock().len() < max {
            return None;
        }
        if let Some(tag) = actor.tags().find(|tag| !self.registry.contains(tag)) {
            debug!(address = %actor.address(), tag, "Unregistered coroutine, keeping actor resident");
            return None;
        }
        match actor.encode() {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(address = %actor.address(), error = %e, "Could not encode actor for cacher");
                None
            }
        }
    }

    async fn evict(&self, address: &Address, image: Option<Bytes>) -> bool {
        let (Some(cacher), Some(image)) = (&self.cacher, image) else {
            return false;
        };
        let saved = cacher.save(address, image).await;
        if saved {
            debug!(%address, "Evicted actor to cacher");
        }
        saved
    }

    async fn discard(&self, address: &Address) {
        self.resident.lock().remove(address);
        if let Err(e) = self.retry("discard", || self.store.discard(address)).await {
            error!(%address, error = %e, "Could not discard actor");
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or the runner shuts down.
    async fn retry<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        loop {
            let e = match op().await {
                Err(e) if e.is_transient() => e,
                result => return result,
            };
            if self.shutting_down() {
                return Err(e);
            }
            warn!(op = op_name, error = %e, "Transient store failure, retrying");
            tokio::time::sleep(self.config.retry_backoff).await;
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Accepts a resident or cached copy only if it is as new as the store's record.
/// A checkpoint take has already bumped the instance by one.
fn current(work: &StoredWork, actor: Actor) -> Result<Actor, ActorError> {
    let stored = work.instance.saturating_sub(u64::from(work.checkpoint));
    let local = actor.checkpoint_instance();
    if local < stored {
        return Err(ActorError::StaleCopy {
            address: work.address.clone(),
            local,
            stored,
        });
    }
    Ok(actor)
}

fn deliver(actor: &mut Actor, message: Message, checkpoint: bool) -> Result<TurnReport, ActorError> {
    match catch_unwind(AssertUnwindSafe(|| actor.deliver(message, checkpoint))) {
        Ok(result) => result,
        Err(panic) => Err(ActorError::Panicked(panic_message(panic))),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

async fn worker(id: usize, inner: Arc<RunnerInner>, mut shutdown: watch::Receiver<bool>) {
    debug!(runner = %inner.prefix, worker = id, "Worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let work = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            work = inner.store.take() => work,
        };
        match work {
            Ok(work) => inner.run_turn(work).await,
            Err(StoreError::Closed) => break,
            Err(e) if e.is_transient() => {
                warn!(worker = id, error = %e, "Transient store failure while taking work");
                tokio::time::sleep(inner.config.retry_backoff).await;
            }
            Err(e) => {
                error!(worker = id, error = %e, "Store failed, stopping worker");
                break;
            }
        }
    }
    debug!(runner = %inner.prefix, worker = id, "Worker stopped");
}

/// Moves messages from the incoming shuttle into the store.
async fn pump(
    inner: Arc<RunnerInner>,
    mut receiver: mpsc::UnboundedReceiver<Vec<Message>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            batch = receiver.recv() => match batch {
                Some(batch) => inner.route(batch).await,
                None => return,
            },
        }
    }
    while let Ok(batch) = receiver.try_recv() {
        inner.route(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Coroutine, Step};
    use crate::cacher::MemoryCacher;
    use crate::context::Context;
    use crate::error::CodecError;
    use crate::message::Payload;
    use crate::mock::{CaptureGateway, FlakyStore};
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn text(message: &Message) -> String {
        String::from_utf8(message.payload().as_bytes().to_vec()).unwrap()
    }

    /// Replies to every message with "<count>:<payload>".
    #[derive(Default, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    impl Coroutine for Counter {
        fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
            self.count += 1;
            let body = format!("{}:{}", self.count, String::from_utf8_lossy(cx.incoming().payload().as_bytes()));
            cx.reply(Payload::from(body.into_bytes()));
            Ok(Step::Suspend)
        }

        fn tag(&self) -> &'static str {
            "counter"
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            crate::codec::encode(self)
        }
    }

    /// Fails on "fail", panics on "panic", otherwise echoes.
    struct Fragile;

    impl Coroutine for Fragile {
        fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
            match cx.incoming().payload().as_bytes().as_ref() {
                b"fail" => Err(ActorError::Failed("asked to".into())),
                b"panic" => panic!("asked to"),
                _ => {
                    cx.reply(cx.incoming().payload().clone());
                    Ok(Step::Suspend)
                }
            }
        }

        fn tag(&self) -> &'static str {
            "fragile"
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }
    }

    /// Spawns a counter at `runner:<payload>` and primes it with "hello".
    struct Spawner;

    impl Coroutine for Spawner {
        fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
            let id = String::from_utf8_lossy(cx.incoming().payload().as_bytes()).to_string();
            let address = Address::of("runner").child(id);
            cx.spawn_root(address.clone(), Counter::default(), vec![Payload::from_static(b"hello")]);
            cx.send(address, Payload::from_static(b"again"));
            Ok(Step::Finish)
        }

        fn tag(&self) -> &'static str {
            "spawner"
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }
    }

    /// Reports every checkpoint to `client:beat`.
    struct Heart;

    impl Coroutine for Heart {
        fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
            if cx.is_checkpoint() {
                let beat = cx.checkpoint_instance().to_string();
                cx.send(addr("client:beat"), Payload::from(beat.into_bytes()));
            }
            cx.set_checkpoint(Payload::from_static(b"tick"), Duration::from_millis(100));
            Ok(Step::Suspend)
        }

        fn tag(&self) -> &'static str {
            "heart"
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }
    }

    /// Tries to spawn a counter over itself on every turn, then reports the turn.
    #[derive(Default)]
    struct Usurper {
        turns: u32,
    }

    impl Coroutine for Usurper {
        fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
            self.turns += 1;
            let own = cx.address().clone();
            cx.spawn_root(own, Counter::default(), vec![Payload::from_static(b"impostor")]);
            cx.reply(Payload::from(format!("turn {}", self.turns).into_bytes()));
            Ok(Step::Suspend)
        }

        fn tag(&self) -> &'static str {
            "usurper"
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }
    }

    /// Holds its worker for a while, then sends a burst to the client and spawns
    /// `runner:late` with a priming message.
    struct Slow {
        started: Arc<AtomicBool>,
    }

    impl Coroutine for Slow {
        fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            for i in 0..50 {
                cx.send(addr("client:out"), Payload::from(i.to_string().into_bytes()));
            }
            cx.spawn_root(addr("runner:late"), Counter::default(), vec![Payload::from_static(b"primed")]);
            Ok(Step::Suspend)
        }

        fn tag(&self) -> &'static str {
            "slow"
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        runner: Runner,
        store: Arc<MemoryStore>,
        client: CaptureGateway,
    }

    fn harness(config: RunnerConfig, cacher: Option<Arc<dyn Cacher>>) -> Harness {
        let store = Arc::new(MemoryStore::new("runner"));
        let mut builder = Runner::builder(store.clone())
            .config(config)
            .registry(CoroutineRegistry::new().register::<Counter>("counter"));
        if let Some(cacher) = cacher {
            builder = builder.cacher(cacher);
        }
        let runner = builder.start().unwrap();
        let client = CaptureGateway::new("client");
        runner.add_outgoing_shuttle(client.incoming_shuttle());
        Harness {
            runner,
            store,
            client,
        }
    }

    fn small() -> RunnerConfig {
        RunnerConfig {
            workers: 2,
            ..RunnerConfig::default()
        }
    }

    fn from_client(to: &str, body: &'static [u8]) -> Message {
        Message::new(addr("client:me"), addr(to), Payload::from_static(body))
    }

    async fn shutdown(runner: Runner) {
        runner.close();
        runner.join().await;
    }

    #[tokio::test]
    async fn test_resident_actor_keeps_state_between_turns() {
        let h = harness(small(), None);
        h.runner
            .spawn(RootSpawn::new(addr("runner:c"), Counter::default(), vec![]))
            .await
            .unwrap();

        h.runner.incoming_shuttle().send(vec![from_client("runner:c", b"a")]);
        assert_eq!(text(&h.client.recv().await), "1:a");
        h.runner.incoming_shuttle().send(vec![from_client("runner:c", b"b")]);
        let reply = h.client.recv().await;
        assert_eq!(text(&reply), "2:b");
        assert_eq!(reply.source(), &addr("runner:c"));
        assert_eq!(reply.destination(), &addr("client:me"));
        assert_eq!(h.runner.resident_count(), 1);

        shutdown(h.runner).await;
    }

    #[tokio::test]
    async fn test_persisted_actor_round_trips_through_store() {
        let config = RunnerConfig {
            persist_actors: true,
            ..small()
        };
        let h = harness(config, None);
        h.runner
            .spawn(RootSpawn::new(addr("runner:c"), Counter::default(), vec![]))
            .await
            .unwrap();

        for body in [b"x", b"y", b"z"] {
            h.runner.dispatch(vec![from_client("runner:c", body)]).await;
        }
        let mut replies: Vec<String> = Vec::new();
        for _ in 0..3 {
            replies.push(text(&h.client.recv().await));
        }
        assert_eq!(replies, vec!["1:x", "2:y", "3:z"]);
        assert_eq!(h.runner.resident_count(), 0);

        shutdown(h.runner).await;
    }

    #[tokio::test]
    async fn test_failing_and_panicking_actors_are_discarded() {
        let h = harness(small(), None);
        for name in ["runner:fails", "runner:panics", "runner:fine"] {
            h.runner
                .spawn(RootSpawn::new(addr(name), Fragile, vec![]))
                .await
                .unwrap();
        }
        h.runner
            .dispatch(vec![
                from_client("runner:fails", b"fail"),
                from_client("runner:panics", b"panic"),
                from_client("runner:fine", b"still here"),
            ])
            .await;

        assert_eq!(text(&h.client.recv().await), "still here");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!h.store.contains(&addr("runner:fails")));
        assert!(!h.store.contains(&addr("runner:panics")));
        assert!(h.store.contains(&addr("runner:fine")));

        shutdown(h.runner).await;
    }

    #[tokio::test]
    async fn test_spawned_root_gets_priming_before_turn_output() {
        let h = harness(small(), None);
        h.runner
            .spawn(RootSpawn::new(addr("runner:spawner"), Spawner, vec![Payload::from_static(b"kid")]))
            .await
            .unwrap();

        let first = h.client.recv_timeout(Duration::from_millis(200)).await;
        assert!(first.is_none(), "counter replies to its source, not to the client");
        assert!(!h.store.contains(&addr("runner:spawner")));
        assert!(h.store.contains(&addr("runner:kid")));

        h.runner.dispatch(vec![from_client("runner:kid", b"ping")]).await;
        assert_eq!(text(&h.client.recv().await), "3:ping");

        shutdown(h.runner).await;
    }

    #[tokio::test]
    async fn test_full_resident_set_evicts_to_cacher() {
        let cacher = Arc::new(MemoryCacher::new());
        let config = RunnerConfig {
            workers: 1,
            max_resident: Some(1),
            ..RunnerConfig::default()
        };
        let h = harness(config, Some(cacher.clone()));
        for name in ["runner:a", "runner:b"] {
            h.runner
                .spawn(RootSpawn::new(addr(name), Counter::default(), vec![]))
                .await
                .unwrap();
        }
        assert_eq!(h.runner.resident_count(), 1);
        assert_eq!(cacher.len(), 1);
        assert!(cacher.is_loadable(&addr("runner:b")));

        h.runner.dispatch(vec![from_client("runner:b", b"wake")]).await;
        assert_eq!(text(&h.client.recv().await), "1:wake");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.runner.resident_count(), 1);
        assert!(cacher.is_loadable(&addr("runner:b")));

        h.runner.dispatch(vec![from_client("runner:a", b"hi")]).await;
        assert_eq!(text(&h.client.recv().await), "1:hi");

        shutdown(h.runner).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoints_fire_while_idle() {
        let h = harness(small(), None);
        h.runner
            .spawn(RootSpawn::new(addr("runner:heart"), Heart, vec![Payload::from_static(b"start")]))
            .await
            .unwrap();

        let beats: Vec<String> = vec![
            text(&h.client.recv().await),
            text(&h.client.recv().await),
            text(&h.client.recv().await),
        ];
        assert_eq!(beats, vec!["1", "2", "3"]);

        shutdown(h.runner).await;
    }

    #[tokio::test]
    async fn test_transient_store_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new("runner"), 3));
        let runner = Runner::builder(store.clone())
            .config(RunnerConfig {
                workers: 1,
                retry_backoff: Duration::from_millis(5),
                ..RunnerConfig::default()
            })
            .start()
            .unwrap();
        let client = CaptureGateway::new("client");
        runner.add_outgoing_shuttle(client.incoming_shuttle());

        runner
            .spawn(RootSpawn::new(addr("runner:c"), Counter::default(), vec![]))
            .await
            .unwrap();
        runner.dispatch(vec![from_client("runner:c", b"eventually")]).await;
        assert_eq!(text(&client.recv().await), "1:eventually");
        assert_eq!(store.failures_left(), 0);

        shutdown(runner).await;
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_dropped_and_wrong_spawn_rejected() {
        let h = harness(small(), None);
        h.runner.dispatch(vec![from_client("nowhere:x", b"lost")]).await;
        let result = h
            .runner
            .spawn(RootSpawn::new(addr("elsewhere:a"), Counter::default(), vec![]))
            .await;
        assert!(matches!(result, Err(StoreError::WrongPrefix { .. })));
        assert!(h.client.recv_timeout(Duration::from_millis(50)).await.is_none());

        shutdown(h.runner).await;
    }

    #[tokio::test]
    async fn test_spawn_over_existing_actor_is_refused() {
        let h = harness(small(), None);
        h.runner
            .spawn(RootSpawn::new(addr("runner:c"), Counter::default(), vec![]))
            .await
            .unwrap();
        h.runner.dispatch(vec![from_client("runner:c", b"a")]).await;
        assert_eq!(text(&h.client.recv().await), "1:a");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = h
            .runner
            .spawn(RootSpawn::new(
                addr("runner:c"),
                Fragile,
                vec![Payload::from_static(b"impostor")],
            ))
            .await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(a)) if a == addr("runner:c")));

        h.runner.dispatch(vec![from_client("runner:c", b"b")]).await;
        assert_eq!(text(&h.client.recv().await), "2:b");
        assert!(h.client.recv_timeout(Duration::from_millis(50)).await.is_none());
        assert_eq!(h.store.instance(&addr("runner:c")), Some(0));

        shutdown(h.runner).await;
    }

    #[tokio::test]
    async fn test_spawn_over_claimed_actor_is_refused() {
        let h = harness(small(), None);
        h.runner
            .spawn(RootSpawn::new(addr("runner:u"), Usurper::default(), vec![]))
            .await
            .unwrap();

        h.runner.dispatch(vec![from_client("runner:u", b"a")]).await;
        assert_eq!(text(&h.client.recv().await), "turn 1");
        h.runner.dispatch(vec![from_client("runner:u", b"b")]).await;
        assert_eq!(text(&h.client.recv().await), "turn 2");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = h.store.stats();
        assert_eq!(stats.actors, 1);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.messages, 0);
        assert_eq!(h.runner.resident_count(), 1);

        shutdown(h.runner).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_lets_running_turn_route_its_output() {
        let h = harness(
            RunnerConfig {
                workers: 1,
                ..RunnerConfig::default()
            },
            None,
        );
        let started = Arc::new(AtomicBool::new(false));
        h.runner
            .spawn(RootSpawn::new(
                addr("runner:slow"),
                Slow {
                    started: started.clone(),
                },
                vec![Payload::from_static(b"go")],
            ))
            .await
            .unwrap();
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        h.runner.close();
        h.runner.join().await;

        let delivered = h.client.drain().await;
        assert_eq!(delivered.len(), 50);
        assert_eq!(text(&delivered[0]), "0");
        assert_eq!(text(&delivered[49]), "49");
        assert!(h.store.contains(&addr("runner:late")));
        let stats = h.store.stats();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_to_start() {
        let store = Arc::new(MemoryStore::new("runner"));
        let result = Runner::builder(store)
            .config(RunnerConfig {
                workers: 0,
                ..RunnerConfig::default()
            })
            .start();
        assert!(result.is_err());
    }
}
