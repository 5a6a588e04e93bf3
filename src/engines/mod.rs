pub mod roster;
pub mod sled;

pub use self::roster::RosterStore;
pub use self::sled::SledStore;

use crate::{Result, Student};

/// Blocking data-access contract over a roster of students.
///
/// Every sequence an engine returns is ordered by `mssv` ascending (byte order).
/// Implementations are cheap to clone and share state between clones.
pub trait StudentEngine: Clone + Send + Sync + 'static {
    /// Insert the student, replacing the name of an existing record with the same `mssv`.
    fn insert_or_replace(&self, student: Student) -> Result<()>;

    /// Insert the student, failing with `StoreError::DuplicateKey` if the key exists.
    fn insert(&self, student: Student) -> Result<()>;

    fn find_by_key(&self, mssv: &str) -> Result<Vec<Student>>;

    /// Records whose `hoten` matches a `LIKE` pattern.
    fn find_by_name(&self, pattern: &str) -> Result<Vec<Student>>;

    /// Records whose `mssv` or `hoten` contains `query`, case-sensitively.
    fn search(&self, query: &str) -> Result<Vec<Student>>;

    /// Remove every record keyed by one of `keys`. Returns how many were removed.
    fn delete_multiple(&self, keys: &[String]) -> Result<usize>;

    /// Remove the record sharing `student`'s key, if any.
    fn delete(&self, student: &Student) -> Result<usize> {
        self.delete_multiple(std::slice::from_ref(&student.mssv))
    }

    fn get_all(&self) -> Result<Vec<Student>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
