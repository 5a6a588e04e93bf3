//! Background execution contexts for engine calls.

pub mod naive;
pub mod rayon;
pub mod shared_queue;

pub use self::naive::NaiveThreadPool;
pub use self::rayon::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;

use crate::Result;

pub trait ThreadPool: Send + Sync + 'static {
    /// Create a pool with `threads` workers.
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Run `job` on some worker. Never blocks on the job itself.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}
