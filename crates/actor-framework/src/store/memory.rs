//! In-memory reference [`Store`].

use super::{check_prefix, CheckpointSpec, Store, StoreOutcome, StoreStats, StoredActor, StoredWork};
use crate::address::Address;
use crate::error::StoreError;
use crate::message::Message;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

struct Record {
    data: Option<Bytes>,
    checkpoint: Option<CheckpointSpec>,
    deadline: Option<Instant>,
    instance: u64,
    processing: bool,
    in_ready: bool,
    queue: VecDeque<Message>,
}

impl Record {
    fn new() -> Self {
        Self {
            data: None,
            checkpoint: None,
            deadline: None,
            instance: 0,
            processing: false,
            in_ready: false,
            queue: VecDeque::new(),
        }
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<Address, Record>,
    /// Idle actors with queued messages, in the order they became ready. May hold
    /// tombstones for actors whose record no longer has `in_ready` set.
    ready: VecDeque<Address>,
    /// Armed checkpoints of idle actors.
    deadlines: BTreeSet<(Instant, Address)>,
    closed: bool,
}

impl Inner {
    /// The actor owning `destination`: the one with the longest matching address.
    fn owner_of(&self, destination: &Address) -> Option<Address> {
        destination
            .prefixes()
            .find(|candidate| self.records.contains_key(candidate))
    }

    fn enqueue(&mut self, message: Message) -> bool {
        let Some(owner) = self.owner_of(message.destination()) else {
            debug!(destination = %message.destination(), "No such actor, dropping message");
            return false;
        };
        let Some(record) = self.records.get_mut(&owner) else {
            return false;
        };
        record.queue.push_back(message);
        if !record.processing && !record.in_ready {
            record.in_ready = true;
            self.ready.push_back(owner);
        }
        true
    }

    fn disarm(&mut self, address: &Address) {
        if let Some(record) = self.records.get_mut(address) {
            if let Some(deadline) = record.deadline.take() {
                self.deadlines.remove(&(deadline, address.clone()));
            }
        }
    }

    /// Ends a processing claim: re-queues the actor if it has messages and re-arms its
    /// checkpoint relative to `now`.
    fn release(&mut self, address: &Address, now: Instant) {
        self.disarm(address);
        let Some(record) = self.records.get_mut(address) else {
            return;
        };
        record.processing = false;
        if !record.queue.is_empty() && !record.in_ready {
            record.in_ready = true;
            self.ready.push_back(address.clone());
        }
        if let Some(checkpoint) = &record.checkpoint {
            let deadline = now + checkpoint.timeout;
            record.deadline = Some(deadline);
            self.deadlines.insert((deadline, address.clone()));
        }
    }

    /// Takes an actor out of the ready queue. Its queue entry stays behind as a
    /// tombstone that `claim_ready` skips.
    fn unready(&mut self, address: &Address) {
        if let Some(record) = self.records.get_mut(address) {
            record.in_ready = false;
        }
    }

    fn claim_expired(&mut self, now: Instant) -> Option<StoredWork> {
        let (deadline, address) = self.deadlines.first().cloned()?;
        if deadline > now {
            return None;
        }
        self.deadlines.remove(&(deadline, address.clone()));
        self.unready(&address);
        let record = self.records.get_mut(&address)?;
        let checkpoint = record.checkpoint.clone()?;
        record.deadline = None;
        record.processing = true;
        record.instance += 1;
        trace!(%address, instance = record.instance, "Checkpoint fired");
        Some(StoredWork {
            message: Message::new(address.clone(), address.clone(), checkpoint.payload),
            address,
            actor_data: record.data.clone(),
            instance: record.instance,
            checkpoint: true,
        })
    }

    fn claim_ready(&mut self) -> Option<StoredWork> {
        while let Some(address) = self.ready.pop_front() {
            let Some(record) = self.records.get_mut(&address) else {
                continue;
            };
            if !record.in_ready {
                continue;
            }
            record.in_ready = false;
            if record.processing {
                continue;
            }
            let Some(message) = record.queue.pop_front() else {
                continue;
            };
            record.processing = true;
            let work = StoredWork {
                address: address.clone(),
                message,
                actor_data: record.data.clone(),
                instance: record.instance,
                checkpoint: false,
            };
            self.disarm(&address);
            return Some(work);
        }
        None
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }
}

/// A [`Store`] that keeps everything in process memory.
///
/// Messages from one sender to one actor are delivered in the order they were stored;
/// ready actors are served in the order they became ready.
pub struct MemoryStore {
    prefix: String,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            actors: inner.records.len(),
            processing: inner.records.values().filter(|r| r.processing).count(),
            ready: inner.records.values().filter(|r| r.in_ready).count(),
            messages: inner.records.values().map(|r| r.queue.len()).sum(),
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.inner.lock().records.contains_key(address)
    }

    /// The stored checkpoint instance for `address`.
    pub fn instance(&self, address: &Address) -> Option<u64> {
        self.inner.lock().records.get(address).map(|r| r.instance)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn store_messages(&self, messages: Vec<Message>) -> Result<(), StoreError> {
        for message in &messages {
            check_prefix(&self.prefix, message.destination())?;
        }
        let mut enqueued = false;
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(StoreError::Closed);
            }
            for message in messages {
                enqueued |= inner.enqueue(message);
            }
        }
        if enqueued {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn insert_actor(&self, actor: StoredActor) -> Result<(), StoreError> {
        check_prefix(&self.prefix, &actor.address)?;
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        match inner.records.entry(actor.address) {
            Entry::Occupied(occupied) => Err(StoreError::AlreadyExists(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                trace!(address = %vacant.key(), "Inserted claimed actor");
                let record = vacant.insert(Record::new());
                record.data = actor.data;
                record.checkpoint = actor.checkpoint;
                record.instance = actor.instance;
                record.processing = true;
                Ok(())
            }
        }
    }

    async fn store_actor(&self, actor: StoredActor) -> Result<StoreOutcome, StoreError> {
        check_prefix(&self.prefix, &actor.address)?;
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(StoreError::Closed);
            }
            let now = Instant::now();
            let address = actor.address.clone();
            let record = inner.records.entry(address.clone()).or_insert_with(|| {
                let mut record = Record::new();
                record.processing = true;
                record
            });
            if !record.processing {
                return Err(StoreError::NotClaimed(address));
            }
            let outcome = if actor.instance < record.instance {
                warn!(
                    %address,
                    stale = actor.instance,
                    current = record.instance,
                    "Rejecting stale actor snapshot"
                );
                StoreOutcome::Stale
            } else {
                record.data = actor.data;
                record.checkpoint = actor.checkpoint;
                record.instance = actor.instance;
                StoreOutcome::Stored
            };
            inner.release(&address, now);
            outcome
        };
        self.notify.notify_waiters();
        Ok(outcome)
    }

    async fn take(&self) -> Result<StoredWork, StoreError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(StoreError::Closed);
                }
                let now = Instant::now();
                if let Some(work) = inner.claim_expired(now) {
                    return Ok(work);
                }
                if let Some(work) = inner.claim_ready() {
                    return Ok(work);
                }
                inner.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn discard(&self, address: &Address) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner.disarm(address);
        inner.unready(address);
        if inner.records.remove(address).is_some() {
            debug!(%address, "Discarded actor");
        }
        Ok(())
    }

    async fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use std::sync::Arc;
    use std::time::Duration;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn msg(to: &str, body: &'static [u8]) -> Message {
        Message::new(addr("client"), addr(to), Payload::from_static(body))
    }

    #[tokio::test]
    async fn test_take_claims_one_message_and_blocks_until_store() {
        let store = Arc::new(MemoryStore::new("runner"));
        store.store_actor(StoredActor::new(addr("runner:b"))).await.unwrap();
        store
            .store_messages(vec![
                msg("runner:b", b"1"),
                msg("runner:b", b"2"),
                msg("runner:b", b"3"),
                msg("runner:b", b"4"),
            ])
            .await
            .unwrap();

        let work = store.take().await.unwrap();
        assert_eq!(work.message.payload().as_bytes().as_ref(), b"1");
        assert_eq!(
            store.stats(),
            StoreStats {
                actors: 1,
                processing: 1,
                ready: 0,
                messages: 3
            }
        );

        let waiter = tokio::spawn({
            let store = store.clone();
            async move { store.take().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        store.store_actor(StoredActor::new(addr("runner:b"))).await.unwrap();
        let work = waiter.await.unwrap().unwrap();
        assert_eq!(work.message.payload().as_bytes().as_ref(), b"2");
    }

    #[tokio::test]
    async fn test_concurrent_takes_never_share_an_actor() {
        let store = Arc::new(MemoryStore::new("runner"));
        store.store_actor(StoredActor::new(addr("runner:b"))).await.unwrap();
        let messages = (0..4).map(|_| msg("runner:b", b"x")).collect();
        store.store_messages(messages).await.unwrap();

        let mut takers = Vec::new();
        for _ in 0..3 {
            let store = store.clone();
            takers.push(tokio::spawn(async move {
                tokio::time::timeout(Duration::from_millis(100), store.take()).await
            }));
        }
        let mut claimed = 0;
        for taker in takers {
            if let Ok(Ok(_)) = taker.await.unwrap() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
        assert_eq!(store.stats().messages, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_instance_is_monotonic() {
        let store = MemoryStore::new("runner");
        let original = StoredActor::new(addr("runner:a"))
            .with_checkpoint(Payload::from_static(b"tick"), Duration::from_millis(300));
        store.store_actor(original.clone()).await.unwrap();

        let work = store.take().await.unwrap();
        assert!(work.checkpoint);
        assert_eq!(work.instance, 1);
        assert_eq!(work.message.source(), &addr("runner:a"));
        assert_eq!(work.message.destination(), &addr("runner:a"));
        assert_eq!(work.message.payload().as_bytes().as_ref(), b"tick");

        let outcome = store.store_actor(original).await.unwrap();
        assert_eq!(outcome, StoreOutcome::Stale);
        assert_eq!(store.instance(&addr("runner:a")), Some(1));

        let work = store.take().await.unwrap();
        assert_eq!(work.instance, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_checkpoint_wins_over_queued_message() {
        let store = MemoryStore::new("runner");
        let actor = StoredActor::new(addr("runner:a"))
            .with_checkpoint(Payload::from_static(b"tick"), Duration::from_millis(10));
        store.store_actor(actor).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.store_messages(vec![msg("runner:a", b"hello")]).await.unwrap();

        let work = store.take().await.unwrap();
        assert!(work.checkpoint);

        store
            .store_actor(StoredActor::new(addr("runner:a")).with_instance(work.instance))
            .await
            .unwrap();
        let work = store.take().await.unwrap();
        assert!(!work.checkpoint);
        assert_eq!(work.message.payload().as_bytes().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_message_to_missing_actor_is_dropped() {
        let store = MemoryStore::new("runner");
        store.store_messages(vec![msg("runner:ghost", b"boo")]).await.unwrap();
        assert_eq!(store.stats(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_wrong_prefix_is_fatal() {
        let store = MemoryStore::new("runner");
        let result = store.store_messages(vec![msg("timer:5", b"x")]).await;
        assert!(matches!(result, Err(StoreError::WrongPrefix { .. })));
        let result = store.store_actor(StoredActor::new(addr("other:a"))).await;
        assert!(matches!(result, Err(StoreError::WrongPrefix { .. })));
    }

    #[tokio::test]
    async fn test_messages_below_an_actor_go_to_the_actor() {
        let store = MemoryStore::new("runner");
        store.store_actor(StoredActor::new(addr("runner:p"))).await.unwrap();
        store.store_messages(vec![msg("runner:p:c0:x", b"x")]).await.unwrap();
        let work = store.take().await.unwrap();
        assert_eq!(work.address, addr("runner:p"));
        assert_eq!(work.message.destination(), &addr("runner:p:c0:x"));
    }

    #[tokio::test]
    async fn test_discard_is_idempotent_and_drops_queue() {
        let store = MemoryStore::new("runner");
        store.store_actor(StoredActor::new(addr("runner:a"))).await.unwrap();
        store.store_messages(vec![msg("runner:a", b"x")]).await.unwrap();
        store.discard(&addr("runner:a")).await.unwrap();
        store.discard(&addr("runner:a")).await.unwrap();
        store.discard(&addr("runner:never")).await.unwrap();
        assert_eq!(store.stats(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_ready_actors_are_served_in_turn() {
        let store = MemoryStore::new("runner");
        for name in ["runner:a", "runner:b"] {
            store.store_actor(StoredActor::new(addr(name))).await.unwrap();
        }
        store
            .store_messages(vec![msg("runner:a", b"1"), msg("runner:b", b"1"), msg("runner:a", b"2")])
            .await
            .unwrap();

        let first = store.take().await.unwrap();
        let second = store.take().await.unwrap();
        assert_eq!(first.address, addr("runner:a"));
        assert_eq!(second.address, addr("runner:b"));
    }

    #[tokio::test]
    async fn test_insert_refuses_existing_actor() {
        let store = MemoryStore::new("runner");
        store
            .store_actor(StoredActor::new(addr("runner:a")).with_instance(3))
            .await
            .unwrap();

        let result = store.insert_actor(StoredActor::new(addr("runner:a"))).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(a)) if a == addr("runner:a")));
        assert_eq!(store.instance(&addr("runner:a")), Some(3));
        assert_eq!(store.stats().processing, 0);
    }

    #[tokio::test]
    async fn test_insert_claims_until_stored_back() {
        let store = MemoryStore::new("runner");
        store.insert_actor(StoredActor::new(addr("runner:a"))).await.unwrap();
        store.store_messages(vec![msg("runner:a", b"early")]).await.unwrap();

        let result = store.insert_actor(StoredActor::new(addr("runner:a"))).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
        assert!(tokio::time::timeout(Duration::from_millis(50), store.take())
            .await
            .is_err());

        store.store_actor(StoredActor::new(addr("runner:a"))).await.unwrap();
        let work = store.take().await.unwrap();
        assert_eq!(work.message.payload().as_bytes().as_ref(), b"early");
    }

    #[tokio::test]
    async fn test_storing_an_unclaimed_actor_fails() {
        let store = MemoryStore::new("runner");
        store.store_actor(StoredActor::new(addr("runner:a"))).await.unwrap();
        store.store_messages(vec![msg("runner:a", b"x")]).await.unwrap();

        let result = store.store_actor(StoredActor::new(addr("runner:a"))).await;
        assert!(matches!(result, Err(StoreError::NotClaimed(_))));
        assert_eq!(store.stats().ready, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_claim_leaves_no_ready_duplicate() {
        let store = MemoryStore::new("runner");
        let actor = StoredActor::new(addr("runner:a"))
            .with_checkpoint(Payload::from_static(b"tick"), Duration::from_millis(10));
        store.store_actor(actor).await.unwrap();
        store.store_messages(vec![msg("runner:a", b"hello")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let work = store.take().await.unwrap();
        assert!(work.checkpoint);
        assert_eq!(store.stats().ready, 0);
        store
            .store_actor(StoredActor::new(addr("runner:a")).with_instance(work.instance))
            .await
            .unwrap();

        let work = store.take().await.unwrap();
        assert!(!work.checkpoint);
        assert_eq!(store.stats().ready, 0);
        assert!(tokio::time::timeout(Duration::from_millis(5), store.take())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_take() {
        let store = Arc::new(MemoryStore::new("runner"));
        let waiter = tokio::spawn({
            let store = store.clone();
            async move { store.take().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.close().await;
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(StoreError::Closed)));
    }
}
