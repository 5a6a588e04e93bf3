use crate::pattern::Pattern;
use crate::{Result, StoreError, Student, StudentEngine};
use log::debug;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, IVec, Tree};
use std::path::PathBuf;

const TREE: &str = "students";

/// `StudentEngine` on top of a sled tree: key `mssv`, value `hoten`.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl StudentEngine for SledStore {
    fn insert_or_replace(&self, student: Student) -> Result<()> {
        self.tree
            .insert(student.mssv.as_bytes(), student.hoten.as_bytes())?;
        self.db.flush()?;
        debug!("Set: mssv: {}, hoten: {}", student.mssv, student.hoten);
        Ok(())
    }

    fn insert(&self, student: Student) -> Result<()> {
        let swapped = self.tree.compare_and_swap(
            student.mssv.as_bytes(),
            None as Option<&[u8]>,
            Some(student.hoten.as_bytes()),
        )?;
        if swapped.is_err() {
            return Err(StoreError::DuplicateKey(student.mssv));
        }
        self.db.flush()?;
        Ok(())
    }

    fn find_by_key(&self, mssv: &str) -> Result<Vec<Student>> {
        match self.tree.get(mssv.as_bytes())? {
            None => Ok(Vec::new()),
            Some(hoten) => Ok(vec![Student::new(mssv, decode(hoten)?)]),
        }
    }

    fn find_by_name(&self, pattern: &str) -> Result<Vec<Student>> {
        let pattern = Pattern::like(pattern);
        self.scan(|s| pattern.matches(&s.hoten))
    }

    fn search(&self, query: &str) -> Result<Vec<Student>> {
        let pattern = Pattern::contains(query);
        self.scan(|s| pattern.matches(&s.mssv) || pattern.matches(&s.hoten))
    }

    fn delete_multiple(&self, keys: &[String]) -> Result<usize> {
        let removed = self
            .tree
            .transaction(|tx| -> ConflictableTransactionResult<usize> {
                let mut removed = 0;
                for key in keys {
                    if tx.remove(key.as_bytes())?.is_some() {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .map_err(|e| match e {
                // the closure never aborts
                TransactionError::Abort(()) => StoreError::Disconnected,
                TransactionError::Storage(e) => StoreError::Sled(e),
            })?;
        if removed > 0 {
            self.db.flush()?;
        }
        debug!("Removed {removed} record(s)");
        Ok(removed)
    }

    fn get_all(&self) -> Result<Vec<Student>> {
        self.scan(|_| true)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}

impl SledStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<SledStore> {
        let db = sled::open(path.into())?;
        let tree = db.open_tree(TREE)?;
        Ok(SledStore { db, tree })
    }

    fn scan<F>(&self, keep: F) -> Result<Vec<Student>>
    where
        F: Fn(&Student) -> bool,
    {
        let mut students = Vec::new();
        for entry in self.tree.iter() {
            let (mssv, hoten) = entry?;
            let student = Student::new(decode(mssv)?, decode(hoten)?);
            if keep(&student) {
                students.push(student);
            }
        }
        Ok(students)
    }
}

fn decode(bytes: IVec) -> Result<String> {
    Ok(String::from_utf8(bytes.to_vec())?)
}
