//! `StudentStore`: runs engine calls on a thread pool and keeps live queries fresh.

use crate::subscription::{Registry, Subscription};
use crate::{Query, Result, StoreError, Student, StudentEngine, ThreadPool};
use crossbeam_channel::{self as channel, Receiver, Sender, TryRecvError};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

type LaneJob<E> = Box<dyn FnOnce(&E, &Registry) + Send + 'static>;

/// Asynchronous front of a `StudentEngine`.
///
/// Mutations (and subscription setup) go through a serial lane drained by one
/// pool task at a time, so they apply in submission order and every mutation
/// is published to subscribers before the next one starts. Reads are spawned
/// straight onto the pool. Clones share the same engine, lane and subscribers.
pub struct StudentStore<E: StudentEngine, P: ThreadPool> {
    engine: E,
    pool: Arc<P>,
    shared: Arc<Shared<E>>,
}

struct Shared<E> {
    registry: Arc<Registry>,
    lane: Mutex<Lane<E>>,
}

struct Lane<E> {
    jobs: VecDeque<LaneJob<E>>,
    draining: bool,
}

impl<E: StudentEngine, P: ThreadPool> Clone for StudentStore<E, P> {
    fn clone(&self) -> Self {
        StudentStore {
            engine: self.engine.clone(),
            pool: Arc::clone(&self.pool),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: StudentEngine, P: ThreadPool> StudentStore<E, P> {
    pub fn new(engine: E, pool: P) -> StudentStore<E, P> {
        StudentStore {
            engine,
            pool: Arc::new(pool),
            shared: Arc::new(Shared {
                registry: Arc::new(Registry::new()),
                lane: Mutex::new(Lane {
                    jobs: VecDeque::new(),
                    draining: false,
                }),
            }),
        }
    }

    pub fn insert_or_replace(&self, student: Student) -> Pending<()> {
        self.mutate(move |engine| engine.insert_or_replace(student))
    }

    pub fn insert(&self, student: Student) -> Pending<()> {
        self.mutate(move |engine| engine.insert(student))
    }

    pub fn delete(&self, student: Student) -> Pending<usize> {
        self.mutate(move |engine| engine.delete(&student))
    }

    pub fn delete_multiple<I>(&self, keys: I) -> Pending<usize>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.mutate(move |engine| engine.delete_multiple(&keys))
    }

    pub fn find_by_key(&self, mssv: impl Into<String>) -> Pending<Vec<Student>> {
        let mssv = mssv.into();
        self.read(move |engine| engine.find_by_key(&mssv))
    }

    pub fn find_by_name(&self, pattern: impl Into<String>) -> Pending<Vec<Student>> {
        let pattern = pattern.into();
        self.read(move |engine| engine.find_by_name(&pattern))
    }

    pub fn search(&self, query: impl Into<String>) -> Pending<Vec<Student>> {
        let query = query.into();
        self.read(move |engine| engine.search(&query))
    }

    pub fn get_all(&self) -> Pending<Vec<Student>> {
        self.read(|engine| engine.get_all())
    }

    pub fn len(&self) -> Pending<usize> {
        self.read(|engine| engine.len())
    }

    /// Start a live query. Its first delivery is the current result set.
    pub fn subscribe(&self, query: Query) -> Subscription {
        let (tx, subscription) = self.shared.registry.reserve(query.clone());
        let id = subscription.id();
        self.enqueue(Box::new(move |engine: &E, registry: &Registry| {
            registry.activate(engine, id, query, tx);
        }));
        subscription
    }

    /// Number of active subscriptions.
    pub fn subscriptions(&self) -> usize {
        self.shared.registry.len()
    }

    fn mutate<T, F>(&self, op: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&E) -> Result<T> + Send + 'static,
    {
        let (tx, pending) = Pending::channel();
        self.enqueue(Box::new(move |engine: &E, registry: &Registry| {
            let res = op(engine);
            match &res {
                Ok(_) => registry.publish(engine),
                Err(e) => warn!("Mutation failed: {e}"),
            }
            if tx.send(res).is_err() {
                debug!("Receiving end is dropped");
            }
        }));
        pending
    }

    fn read<T, F>(&self, op: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&E) -> Result<T> + Send + 'static,
    {
        let (tx, pending) = Pending::channel();
        let engine = self.engine.clone();
        self.pool.spawn(move || {
            if tx.send(op(&engine)).is_err() {
                debug!("Receiving end is dropped");
            }
        });
        pending
    }

    fn enqueue(&self, job: LaneJob<E>) {
        let mut lane = self.shared.lock_lane();
        lane.jobs.push_back(job);
        if !lane.draining {
            lane.draining = true;
            spawn_drain(
                Arc::clone(&self.shared),
                self.engine.clone(),
                Arc::clone(&self.pool),
            );
        }
    }
}

impl<E> Shared<E> {
    fn lock_lane(&self) -> MutexGuard<'_, Lane<E>> {
        self.lane.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_drain<E: StudentEngine, P: ThreadPool>(shared: Arc<Shared<E>>, engine: E, pool: Arc<P>) {
    let worker = Arc::clone(&pool);
    worker.spawn(move || drain(shared, engine, pool));
}

/// Run lane jobs until the lane is empty.
fn drain<E: StudentEngine, P: ThreadPool>(shared: Arc<Shared<E>>, engine: E, pool: Arc<P>) {
    let guard = DrainGuard {
        shared,
        engine,
        pool,
    };
    loop {
        let job = {
            let mut lane = guard.shared.lock_lane();
            match lane.jobs.pop_front() {
                Some(job) => job,
                None => {
                    lane.draining = false;
                    return;
                }
            }
        };
        job(&guard.engine, guard.shared.registry.as_ref());
    }
}

// A panicking job hands the rest of the lane to a fresh drain task.
struct DrainGuard<E: StudentEngine, P: ThreadPool> {
    shared: Arc<Shared<E>>,
    engine: E,
    pool: Arc<P>,
}

impl<E: StudentEngine, P: ThreadPool> Drop for DrainGuard<E, P> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let mut lane = self.shared.lock_lane();
        if lane.jobs.is_empty() {
            warn!("Lane job panicked, lane is empty");
            lane.draining = false;
            return;
        }
        warn!("Lane job panicked, rescheduling {} queued job(s)", lane.jobs.len());
        drop(lane);
        spawn_drain(
            Arc::clone(&self.shared),
            self.engine.clone(),
            Arc::clone(&self.pool),
        );
    }
}

/// Result of an operation running in the background.
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    fn channel() -> (Sender<Result<T>>, Pending<T>) {
        let (tx, rx) = channel::bounded(1);
        (tx, Pending { rx })
    }

    /// Block the calling thread until the operation finishes.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| StoreError::Disconnected)?
    }

    /// The result, if the operation already finished.
    pub fn try_get(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StoreError::Disconnected)),
        }
    }
}
