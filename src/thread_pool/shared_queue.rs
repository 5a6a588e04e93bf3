use crossbeam_channel::{self as channel, Receiver, Sender};
use log::{debug, error};
use std::thread;

use crate::{Result, ThreadPool};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of workers pulling jobs off one shared queue.
///
/// A worker whose job panics is replaced by a fresh thread.
pub struct SharedQueueThreadPool {
    producer: Sender<Job>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<SharedQueueThreadPool> {
        let (producer, consumer) = channel::unbounded::<Job>();
        for _ in 0..threads.max(1) {
            let consumer = JobReceiver(consumer.clone());
            thread::Builder::new().spawn(move || worker_loop(consumer))?;
        }
        Ok(SharedQueueThreadPool { producer })
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // workers only leave once the producer is gone
        if self.producer.send(Box::new(job)).is_err() {
            error!("Thread pool has no worker left");
        }
    }
}

#[derive(Clone)]
struct JobReceiver(Receiver<Job>);

impl Drop for JobReceiver {
    fn drop(&mut self) {
        if thread::panicking() {
            let consumer = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || worker_loop(consumer)) {
                error!("Failed to respawn worker: {e}");
            }
        }
    }
}

fn worker_loop(consumer: JobReceiver) {
    while let Ok(job) = consumer.0.recv() {
        job();
    }
    debug!("Worker exits, the pool was dropped");
}
