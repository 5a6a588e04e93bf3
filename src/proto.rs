use serde::{Deserialize, Serialize};
use std::fmt;

/// A single roster entry. `mssv` is the primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Student {
    pub mssv: String,
    pub hoten: String,
}

impl Student {
    pub fn new(mssv: impl Into<String>, hoten: impl Into<String>) -> Student {
        Student {
            mssv: mssv.into(),
            hoten: hoten.into(),
        }
    }
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.mssv, self.hoten)
    }
}

/// What a live subscription is watching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    All,
    Search(String),
}
