//! Live queries: every registered subscriber is re-sent its full result set
//! after each mutation that goes through a `StudentStore`.

use crate::{Query, Result, StoreError, Student, StudentEngine};
use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use dashmap::DashMap;
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Subscriber {
    query: Query,
    tx: Sender<Vec<Student>>,
}

/// Subscribers keyed by id.
#[derive(Default)]
pub struct Registry {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Reserve an id and the channel for a subscriber that is not yet active.
    pub(crate) fn reserve(self: &Arc<Self>, query: Query) -> (Sender<Vec<Student>>, Subscription) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::unbounded();
        let subscription = Subscription {
            id,
            query,
            rx,
            registry: Arc::downgrade(self),
        };
        (tx, subscription)
    }

    /// Activate a reserved subscriber and send it the current result set.
    pub(crate) fn activate<E: StudentEngine>(
        &self,
        engine: &E,
        id: u64,
        query: Query,
        tx: Sender<Vec<Student>>,
    ) {
        let snapshot = match evaluate(engine, &query) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Subscription {id} on {query:?} failed: {e}");
                return;
            }
        };
        info!("Subscription {id} registered for {query:?}");
        self.subscribers.insert(
            id,
            Subscriber {
                query,
                tx: tx.clone(),
            },
        );
        if tx.send(snapshot).is_err() {
            debug!("Subscription {id} cancelled before activation");
            self.subscribers.remove(&id);
        }
    }

    pub fn unregister(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            info!("Subscription {id} unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Re-run every distinct query once and push the result to its subscribers.
    pub fn publish<E: StudentEngine>(&self, engine: &E) {
        let mut groups: HashMap<Query, Vec<u64>> = HashMap::new();
        for entry in self.subscribers.iter() {
            groups
                .entry(entry.value().query.clone())
                .or_default()
                .push(*entry.key());
        }

        let mut dead = Vec::new();
        for (query, ids) in groups {
            let snapshot = match evaluate(engine, &query) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("Re-running {query:?} failed: {e}");
                    continue;
                }
            };
            for id in ids {
                let delivered = match self.subscribers.get(&id) {
                    Some(subscriber) => subscriber.tx.send(snapshot.clone()).is_ok(),
                    None => true,
                };
                if !delivered {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            debug!("Pruning subscription {id}, receiver is gone");
            self.subscribers.remove(&id);
        }
    }
}

fn evaluate<E: StudentEngine>(engine: &E, query: &Query) -> Result<Vec<Student>> {
    match query {
        Query::All => engine.get_all(),
        Query::Search(q) => engine.search(q),
    }
}

/// Receiving side of a live query. Dropping it cancels the subscription.
pub struct Subscription {
    id: u64,
    query: Query,
    rx: Receiver<Vec<Student>>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Block until the next result set arrives.
    ///
    /// Fails with `StoreError::Disconnected` once the store is gone.
    pub fn recv(&self) -> Result<Vec<Student>> {
        self.rx.recv().map_err(|_| StoreError::Disconnected)
    }

    pub fn try_recv(&self) -> Result<Option<Vec<Student>>> {
        match self.rx.try_recv() {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StoreError::Disconnected),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<Student>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Disconnected),
        }
    }

    /// Skip to the most recent result set already delivered, if any.
    pub fn latest(&self) -> Option<Vec<Student>> {
        self.rx.try_iter().last()
    }

    /// Iterate over result sets until the store goes away.
    pub fn iter(&self) -> channel::Iter<'_, Vec<Student>> {
        self.rx.iter()
    }

    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}
