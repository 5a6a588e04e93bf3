//! A persistent roster of student records with substring search, batch
//! deletion and live queries.

pub mod config;
pub mod engines;
pub mod error;
pub mod pattern;
pub mod proto;
pub mod store;
pub mod subscription;
pub mod thread_pool;

pub use config::{EngineKind, PoolKind, StoreConfig};
pub use engines::{RosterStore, SledStore, StudentEngine};
pub use error::{Result, StoreError};
pub use proto::{Query, Student};
pub use store::{Pending, StudentStore};
pub use subscription::Subscription;
pub use thread_pool::{NaiveThreadPool, RayonThreadPool, SharedQueueThreadPool, ThreadPool};
