use crate::{Result, StoreError};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

pub const CONFIG_FILE: &str = "roster.json";
pub const DEFAULT_WORKER_NUM: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Roster,
    Sled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Naive,
    SharedQueue,
    Rayon,
}

/// Settings persisted next to the data. The engine is pinned on first run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub engine: EngineKind,
    #[serde(default)]
    pub thread_pool: Option<PoolKind>,
    #[serde(default)]
    pub worker_num: Option<u32>,
}

impl StoreConfig {
    pub fn new(engine: EngineKind) -> StoreConfig {
        StoreConfig {
            engine,
            thread_pool: None,
            worker_num: None,
        }
    }

    /// Read the config in `dir`, if one was written.
    pub fn load(dir: &Path) -> Result<Option<StoreConfig>> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let value = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&value)?))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let value = serde_json::to_string_pretty(self)?;
        let mut f = File::create(dir.join(CONFIG_FILE))?;
        f.write_all(value.as_bytes())?;
        f.flush()?;
        Ok(())
    }

    /// Load the config in `dir` or write a fresh one.
    ///
    /// `engine` must match the persisted engine if there is one; `None` means
    /// "whatever is there", or `roster` on first run. Pool settings given here
    /// override the persisted ones for this run only.
    pub fn resolve(
        dir: &Path,
        engine: Option<EngineKind>,
        thread_pool: Option<PoolKind>,
        worker_num: Option<u32>,
    ) -> Result<StoreConfig> {
        let mut config = match StoreConfig::load(dir)? {
            Some(config) => {
                if let Some(requested) = engine {
                    if requested != config.engine {
                        return Err(StoreError::WrongEngine {
                            existing: config.engine.to_string(),
                            requested: requested.to_string(),
                        });
                    }
                }
                config
            }
            None => {
                let config = StoreConfig::new(engine.unwrap_or(EngineKind::Roster));
                config.save(dir)?;
                info!("Initialised {} with engine {}", dir.display(), config.engine);
                config
            }
        };
        if thread_pool.is_some() {
            config.thread_pool = thread_pool;
        }
        if worker_num.is_some() {
            config.worker_num = worker_num;
        }
        Ok(config)
    }

    pub fn thread_pool(&self) -> PoolKind {
        self.thread_pool.unwrap_or(PoolKind::SharedQueue)
    }

    pub fn worker_num(&self) -> u32 {
        self.worker_num.unwrap_or(DEFAULT_WORKER_NUM)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Roster => write!(f, "roster"),
            EngineKind::Sled => write!(f, "sled"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<EngineKind> {
        match s {
            "roster" => Ok(EngineKind::Roster),
            "sled" => Ok(EngineKind::Sled),
            other => Err(StoreError::UnknownEngine(other.to_owned())),
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Naive => write!(f, "naive"),
            PoolKind::SharedQueue => write!(f, "shared_queue"),
            PoolKind::Rayon => write!(f, "rayon"),
        }
    }
}

impl FromStr for PoolKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<PoolKind> {
        match s {
            "naive" => Ok(PoolKind::Naive),
            "shared_queue" => Ok(PoolKind::SharedQueue),
            "rayon" => Ok(PoolKind::Rayon),
            other => Err(StoreError::UnknownThreadPool(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_run_writes_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::resolve(temp_dir.path(), None, None, None).unwrap();
        assert_eq!(config.engine, EngineKind::Roster);
        assert_eq!(config.thread_pool(), PoolKind::SharedQueue);
        assert_eq!(config.worker_num(), DEFAULT_WORKER_NUM);
        assert_eq!(StoreConfig::load(temp_dir.path()).unwrap(), Some(config));
    }

    #[test]
    fn engine_is_pinned() {
        let temp_dir = TempDir::new().unwrap();
        StoreConfig::resolve(temp_dir.path(), Some(EngineKind::Sled), None, None).unwrap();
        let config = StoreConfig::resolve(temp_dir.path(), None, None, None).unwrap();
        assert_eq!(config.engine, EngineKind::Sled);
        match StoreConfig::resolve(temp_dir.path(), Some(EngineKind::Roster), None, None) {
            Err(StoreError::WrongEngine { existing, requested }) => {
                assert_eq!(existing, "sled");
                assert_eq!(requested, "roster");
            }
            other => panic!("expected WrongEngine, got {other:?}"),
        }
    }

    #[test]
    fn pool_overrides_are_not_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            StoreConfig::resolve(temp_dir.path(), None, Some(PoolKind::Rayon), Some(2)).unwrap();
        assert_eq!(config.thread_pool(), PoolKind::Rayon);
        assert_eq!(config.worker_num(), 2);
        let persisted = StoreConfig::load(temp_dir.path()).unwrap().unwrap();
        assert_eq!(persisted.thread_pool, None);
    }

    #[test]
    fn names_parse() {
        assert_eq!("sled".parse::<EngineKind>().unwrap(), EngineKind::Sled);
        assert_eq!("shared_queue".parse::<PoolKind>().unwrap(), PoolKind::SharedQueue);
        assert!("kvs".parse::<EngineKind>().is_err());
        assert!("fifo".parse::<PoolKind>().is_err());
    }
}
