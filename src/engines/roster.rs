use crate::pattern::Pattern;
use crate::{Result, StoreError, Student, StudentEngine};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const LOG_FILE: &str = "roster.log";
const COMPACT_FILE: &str = "roster.log.compact";

/// Number of dead log lines tolerated before the log is rewritten.
const COMPACTION_THRESHOLD: u64 = 1024;

/// One line of the log.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "lowercase")]
enum Command {
    Set { mssv: String, hoten: String },
    Remove { keys: Vec<String> },
}

/// The built-in engine.
///
/// Every mutation is appended to `roster.log` as one JSON line before it is
/// applied to the in-memory table, so a batch delete is a single record on
/// disk. The table is rebuilt by replaying the log on open.
#[derive(Clone)]
pub struct RosterStore {
    dir: Arc<PathBuf>,
    table: Arc<RwLock<BTreeMap<String, String>>>,
    log: Arc<Mutex<LogWriter>>,
}

struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    // file length covered by successful appends
    len: u64,
    // lines in the log that no longer describe a live record
    stale: u64,
}

impl LogWriter {
    fn open(path: PathBuf, stale: u64) -> Result<LogWriter> {
        let file = open_append(&path)?;
        let len = file.metadata()?.len();
        Ok(LogWriter {
            path,
            writer: BufWriter::new(file),
            len,
            stale,
        })
    }

    /// Forget anything written since the last successful append, both the
    /// bytes still buffered and any partial line already on disk.
    fn rollback(&mut self) -> Result<()> {
        let file = open_append(&self.path)?;
        file.set_len(self.len)?;
        let failed = mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it
        let (_, _unflushed) = failed.into_parts();
        Ok(())
    }
}

impl StudentEngine for RosterStore {
    fn insert_or_replace(&self, student: Student) -> Result<()> {
        let mut log = self.lock_log();
        let cmd = Command::Set {
            mssv: student.mssv,
            hoten: student.hoten,
        };
        append(&mut log, &cmd)?;
        if let Command::Set { mssv, hoten } = cmd {
            debug!("Set: mssv: {mssv}, hoten: {hoten}");
            if self.write_table().insert(mssv, hoten).is_some() {
                log.stale += 1;
            }
        }
        self.maybe_compact(&mut log)
    }

    fn insert(&self, student: Student) -> Result<()> {
        let mut log = self.lock_log();
        if self.read_table().contains_key(&student.mssv) {
            return Err(StoreError::DuplicateKey(student.mssv));
        }
        append(
            &mut log,
            &Command::Set {
                mssv: student.mssv.clone(),
                hoten: student.hoten.clone(),
            },
        )?;
        debug!("Insert: mssv: {}, hoten: {}", student.mssv, student.hoten);
        self.write_table().insert(student.mssv, student.hoten);
        Ok(())
    }

    fn find_by_key(&self, mssv: &str) -> Result<Vec<Student>> {
        Ok(self
            .read_table()
            .get(mssv)
            .map(|hoten| Student::new(mssv, hoten.as_str()))
            .into_iter()
            .collect())
    }

    fn find_by_name(&self, pattern: &str) -> Result<Vec<Student>> {
        let pattern = Pattern::like(pattern);
        Ok(self.collect(|_, hoten| pattern.matches(hoten)))
    }

    fn search(&self, query: &str) -> Result<Vec<Student>> {
        let pattern = Pattern::contains(query);
        Ok(self.collect(|mssv, hoten| pattern.matches(mssv) || pattern.matches(hoten)))
    }

    fn delete_multiple(&self, keys: &[String]) -> Result<usize> {
        let mut log = self.lock_log();
        let keys: Vec<String> = {
            let table = self.read_table();
            let mut seen = HashSet::new();
            let mut present = Vec::new();
            for key in keys {
                if table.contains_key(key) && seen.insert(key.as_str()) {
                    present.push(key.clone());
                }
            }
            present
        };
        if keys.is_empty() {
            return Ok(0);
        }
        append(&mut log, &Command::Remove { keys: keys.clone() })?;
        {
            let mut table = self.write_table();
            for key in &keys {
                table.remove(key);
            }
        }
        debug!("Removed {} record(s)", keys.len());
        // the removed sets plus the remove line itself
        log.stale += keys.len() as u64 + 1;
        self.maybe_compact(&mut log)?;
        Ok(keys.len())
    }

    fn get_all(&self) -> Result<Vec<Student>> {
        Ok(self.collect(|_, _| true))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read_table().len())
    }
}

impl RosterStore {
    /// Open (or create) the store living in directory `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<RosterStore> {
        let dir: PathBuf = path.into();
        fs::create_dir_all(&dir)?;
        let log_path = dir.join(LOG_FILE);

        let mut table = BTreeMap::new();
        let stale = if log_path.exists() {
            replay(&log_path, &mut table)?
        } else {
            0
        };
        info!(
            "Opened {}: {} record(s), {} stale log line(s)",
            log_path.display(),
            table.len(),
            stale
        );

        let log = LogWriter::open(log_path, stale)?;
        let store = RosterStore {
            dir: Arc::new(dir),
            table: Arc::new(RwLock::new(table)),
            log: Arc::new(Mutex::new(log)),
        };
        {
            let mut log = store.lock_log();
            store.maybe_compact(&mut log)?;
        }
        Ok(store)
    }

    fn collect<F>(&self, mut keep: F) -> Vec<Student>
    where
        F: FnMut(&str, &str) -> bool,
    {
        self.read_table()
            .iter()
            .filter(|(mssv, hoten)| keep(mssv.as_str(), hoten.as_str()))
            .map(|(mssv, hoten)| Student::new(mssv.as_str(), hoten.as_str()))
            .collect()
    }

    fn maybe_compact(&self, log: &mut LogWriter) -> Result<()> {
        if log.stale < COMPACTION_THRESHOLD {
            return Ok(());
        }
        self.compact(log)
    }

    /// Rewrite the log so it holds exactly one line per live record.
    ///
    /// Must be called with the log lock held.
    fn compact(&self, log: &mut LogWriter) -> Result<()> {
        let log_path = self.dir.join(LOG_FILE);
        let tmp_path = self.dir.join(COMPACT_FILE);
        log.writer.flush()?;

        let mut tmp = BufWriter::new(File::create(&tmp_path)?);
        let mut live = 0;
        for (mssv, hoten) in self.read_table().iter() {
            let line = serde_json::to_string(&Command::Set {
                mssv: mssv.clone(),
                hoten: hoten.clone(),
            })?;
            tmp.write_all(line.as_bytes())?;
            tmp.write_all(b"\n")?;
            live += 1;
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &log_path)?;
        info!("Compacted {}: dropped {} stale line(s), {live} live", log_path.display(), log.stale);
        *log = LogWriter::open(log_path, 0)?;
        Ok(())
    }

    fn lock_log(&self) -> MutexGuard<'_, LogWriter> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_table(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().append(true).create(true).open(path)?)
}

/// Append one command line. On failure the log is rolled back so a command
/// reported as failed never reaches disk later.
fn append(log: &mut LogWriter, cmd: &Command) -> Result<()> {
    let line = serde_json::to_string(cmd)? + "\n";
    let written = log
        .writer
        .write_all(line.as_bytes())
        .and_then(|_| log.writer.flush());
    if let Err(e) = written {
        warn!("Append to {} failed: {e}", log.path.display());
        log.rollback()?;
        return Err(e.into());
    }
    log.len += line.len() as u64;
    Ok(())
}

/// Rebuild `table` from the log at `path`, returning the number of stale lines.
fn replay(path: &Path, table: &mut BTreeMap<String, String>) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut stale = 0;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(&line)? {
            Command::Set { mssv, hoten } => {
                if table.insert(mssv, hoten).is_some() {
                    stale += 1;
                }
            }
            Command::Remove { keys } => {
                stale += 1;
                for key in keys {
                    if table.remove(&key).is_some() {
                        stale += 1;
                    }
                }
            }
        }
    }
    Ok(stale)
}
