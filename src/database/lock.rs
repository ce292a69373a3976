//! Advisory inter-process database lock.
//!
//! Each database root carries a `.lock` file. Mutating commands take it
//! exclusively, read-only commands take it shared, so two processes working
//! on the same database serialize while disjoint databases stay independent.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs4::FileExt;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = ".lock";

/// Held advisory lock; released on drop.
pub struct DatabaseLock {
    file: File,
}

impl DatabaseLock {
    /// Block until the exclusive lock on `<root>/.lock` is held.
    pub fn exclusive(root: &Path) -> Result<Self> {
        let file = Self::open(root)?;
        file.lock_exclusive()
            .map_err(|e| Error::io(format!("locking {}", root.display()), &e))?;
        Ok(DatabaseLock { file })
    }

    /// Block until a shared lock on `<root>/.lock` is held.
    pub fn shared(root: &Path) -> Result<Self> {
        let file = Self::open(root)?;
        file.lock_shared()
            .map_err(|e| Error::io(format!("locking {}", root.display()), &e))?;
        Ok(DatabaseLock { file })
    }

    fn open(root: &Path) -> Result<File> {
        let path = root.join(LOCK_FILE);
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(format!("opening {}", path.display()), &e))
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
