use crossbeam_channel::{self as channel, Receiver};
use crossbeam_utils::thread;
use roster::{
    NaiveThreadPool, Pending, Query, RayonThreadPool, Result, RosterStore, SharedQueueThreadPool,
    SledStore, StoreError, Student, StudentEngine, StudentStore, ThreadPool,
};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn roster_store<P: ThreadPool>(temp_dir: &TempDir, threads: u32) -> Result<StudentStore<RosterStore, P>> {
    Ok(StudentStore::new(
        RosterStore::open(temp_dir.path())?,
        P::new(threads)?,
    ))
}

#[test]
fn operations_run_on_the_pool() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<SharedQueueThreadPool>(&temp_dir, 4)?;

    store.insert_or_replace(Student::new("20194433", "An")).wait()?;
    store.insert_or_replace(Student::new("999", "Anna")).wait()?;
    assert_eq!(store.len().wait()?, 2);
    assert_eq!(store.search("An").wait()?.len(), 2);
    assert_eq!(
        store.find_by_key("999").wait()?,
        vec![Student::new("999", "Anna")]
    );
    assert_eq!(store.find_by_name("A_n_").wait()?, vec![Student::new("999", "Anna")]);
    assert_eq!(store.delete_multiple(vec!["999", "nope"]).wait()?, 1);
    assert_eq!(store.delete(Student::new("20194433", "An")).wait()?, 1);
    assert!(store.get_all().wait()?.is_empty());
    Ok(())
}

#[test]
fn strict_insert_error_reaches_the_caller() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<NaiveThreadPool>(&temp_dir, 1)?;
    store.insert(Student::new("A", "X")).wait()?;
    match store.insert(Student::new("A", "Y")).wait() {
        Err(StoreError::DuplicateKey(mssv)) => assert_eq!(mssv, "A"),
        other => panic!("expected DuplicateKey, got {other:?}"),
    }
    Ok(())
}

#[test]
fn subscription_sees_every_mutation() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<SharedQueueThreadPool>(&temp_dir, 4)?;

    let all = store.subscribe(Query::All);
    assert_eq!(all.recv_timeout(TIMEOUT)?, Some(vec![]));

    store.insert_or_replace(Student::new("1", "Linh")).wait()?;
    // delivered before the insert reported completion
    assert_eq!(all.try_recv()?, Some(vec![Student::new("1", "Linh")]));

    store.insert_or_replace(Student::new("2", "Minh")).wait()?;
    assert_eq!(
        all.try_recv()?,
        Some(vec![Student::new("1", "Linh"), Student::new("2", "Minh")])
    );

    store.delete_multiple(vec!["1"]).wait()?;
    assert_eq!(all.try_recv()?, Some(vec![Student::new("2", "Minh")]));

    assert_eq!(store.delete(Student::new("2", "Minh")).wait()?, 1);
    assert_eq!(all.try_recv()?, Some(vec![]));
    // deleting an unknown key still publishes
    assert_eq!(store.delete(Student::new("2", "Minh")).wait()?, 0);
    assert_eq!(all.try_recv()?, Some(vec![]));
    assert_eq!(all.try_recv()?, None);
    Ok(())
}

#[test]
fn empty_search_subscription_sees_everything() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<SharedQueueThreadPool>(&temp_dir, 2)?;
    store.insert_or_replace(Student::new("2", "Minh")).wait()?;

    let everything = store.subscribe(Query::Search(String::new()));
    assert_eq!(
        everything.recv_timeout(TIMEOUT)?,
        Some(vec![Student::new("2", "Minh")])
    );

    store.insert_or_replace(Student::new("1", "Linh")).wait()?;
    assert_eq!(
        everything.try_recv()?,
        Some(vec![Student::new("1", "Linh"), Student::new("2", "Minh")])
    );
    assert_eq!(everything.latest(), None);
    assert_eq!(store.get_all().wait()?, store.search("").wait()?);
    Ok(())
}

#[test]
fn search_subscription_filters() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<RayonThreadPool>(&temp_dir, 2)?;
    store.insert_or_replace(Student::new("20194433", "An")).wait()?;

    let search = store.subscribe(Query::Search("nn".to_owned()));
    let same = store.subscribe(Query::Search("nn".to_owned()));
    assert_eq!(search.recv_timeout(TIMEOUT)?, Some(vec![]));
    assert_eq!(same.recv_timeout(TIMEOUT)?, Some(vec![]));

    store.insert_or_replace(Student::new("999", "Anna")).wait()?;
    assert_eq!(search.try_recv()?, Some(vec![Student::new("999", "Anna")]));
    assert_eq!(same.try_recv()?, Some(vec![Student::new("999", "Anna")]));
    assert_eq!(search.query(), &Query::Search("nn".to_owned()));
    Ok(())
}

#[test]
fn cancelled_subscription_stops_receiving() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<SharedQueueThreadPool>(&temp_dir, 2)?;

    let kept = store.subscribe(Query::All);
    let cancelled = store.subscribe(Query::All);
    kept.recv_timeout(TIMEOUT)?;
    cancelled.recv_timeout(TIMEOUT)?;
    assert_eq!(store.subscriptions(), 2);

    cancelled.cancel();
    assert_eq!(store.subscriptions(), 1);

    store.insert_or_replace(Student::new("A", "X")).wait()?;
    assert_eq!(kept.try_recv()?, Some(vec![Student::new("A", "X")]));
    // cancelling never touches the data
    assert_eq!(store.get_all().wait()?, vec![Student::new("A", "X")]);
    Ok(())
}

#[test]
fn failed_mutation_is_not_published() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<SharedQueueThreadPool>(&temp_dir, 2)?;
    store.insert(Student::new("A", "X")).wait()?;

    let all = store.subscribe(Query::All);
    all.recv_timeout(TIMEOUT)?;
    assert!(store.insert(Student::new("A", "Y")).wait().is_err());
    assert_eq!(all.try_recv()?, None);
    Ok(())
}

#[test]
fn subscription_ends_with_the_store() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<SharedQueueThreadPool>(&temp_dir, 2)?;
    let all = store.subscribe(Query::All);
    all.recv_timeout(TIMEOUT)?;
    drop(store);
    match all.recv() {
        Err(StoreError::Disconnected) => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }
    Ok(())
}

// Many writes to the same key from one caller: the last one submitted wins.
#[test]
fn mutations_apply_in_submission_order() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = StudentStore::new(
        SledStore::open(temp_dir.path())?,
        SharedQueueThreadPool::new(8)?,
    );
    let all = store.subscribe(Query::All);

    let pending: Vec<_> = (0..200)
        .map(|i| store.insert_or_replace(Student::new("A", format!("{i}"))))
        .collect();
    for p in pending {
        p.wait()?;
    }
    assert_eq!(store.find_by_key("A").wait()?, vec![Student::new("A", "199")]);

    // first the initial empty set, then one delivery per write, in order
    assert_eq!(all.recv_timeout(TIMEOUT)?, Some(vec![]));
    for i in 0..200 {
        assert_eq!(
            all.recv_timeout(TIMEOUT)?,
            Some(vec![Student::new("A", format!("{i}"))])
        );
    }
    Ok(())
}

#[test]
fn concurrent_callers_keep_keys_unique() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<RayonThreadPool>(&temp_dir, 4)?;

    thread::scope(|s| {
        for t in 0..4 {
            let store = store.clone();
            s.spawn(move |_| {
                for i in 0..50 {
                    store
                        .insert_or_replace(Student::new(format!("{}", i % 10), format!("t{t}")))
                        .wait()
                        .unwrap();
                }
            });
        }
    })
    .unwrap();

    let all = store.get_all().wait()?;
    assert_eq!(all.len(), 10);
    assert_eq!(store.len().wait()?, 10);
    Ok(())
}

#[test]
fn pending_can_be_polled() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = roster_store::<NaiveThreadPool>(&temp_dir, 1)?;
    let pending = store.insert_or_replace(Student::new("A", "X"));
    loop {
        if let Some(res) = pending.try_get() {
            res?;
            break;
        }
        std::thread::yield_now();
    }
    assert_eq!(store.len().wait()?, 1);
    Ok(())
}

// Wraps `RosterStore`; inserting "boom" panics once `gate` fires.
#[derive(Clone)]
struct PanickingEngine {
    inner: RosterStore,
    gate: Receiver<()>,
}

impl StudentEngine for PanickingEngine {
    fn insert_or_replace(&self, student: Student) -> Result<()> {
        if student.mssv == "boom" {
            let _ = self.gate.recv();
            panic!("engine blew up on {}", student.mssv);
        }
        self.inner.insert_or_replace(student)
    }

    fn insert(&self, student: Student) -> Result<()> {
        self.inner.insert(student)
    }

    fn find_by_key(&self, mssv: &str) -> Result<Vec<Student>> {
        self.inner.find_by_key(mssv)
    }

    fn find_by_name(&self, pattern: &str) -> Result<Vec<Student>> {
        self.inner.find_by_name(pattern)
    }

    fn search(&self, query: &str) -> Result<Vec<Student>> {
        self.inner.search(query)
    }

    fn delete_multiple(&self, keys: &[String]) -> Result<usize> {
        self.inner.delete_multiple(keys)
    }

    fn get_all(&self) -> Result<Vec<Student>> {
        self.inner.get_all()
    }

    fn len(&self) -> Result<usize> {
        self.inner.len()
    }
}

fn poll<T>(pending: &Pending<T>) -> Option<Result<T>> {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if let Some(res) = pending.try_get() {
            return Some(res);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn jobs_queued_behind_a_panic_still_run() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let (open_gate, gate) = channel::bounded(1);
    let engine = PanickingEngine {
        inner: RosterStore::open(temp_dir.path())?,
        gate,
    };
    let store = StudentStore::new(engine, SharedQueueThreadPool::new(2)?);

    let boom = store.insert_or_replace(Student::new("boom", "x"));
    let queued = store.insert_or_replace(Student::new("A", "X"));
    open_gate.send(()).unwrap();

    match poll(&boom) {
        Some(Err(StoreError::Disconnected)) => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }
    match poll(&queued) {
        Some(res) => res?,
        None => panic!("job queued behind the panic never ran"),
    }
    assert_eq!(store.get_all().wait()?, vec![Student::new("A", "X")]);

    // the lane keeps working afterwards
    store.insert_or_replace(Student::new("B", "Y")).wait()?;
    assert_eq!(store.len().wait()?, 2);
    Ok(())
}
