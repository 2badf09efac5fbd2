// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Advisory lock that makes a single [`QueueFile`](crate::QueueFile) the
//! only writer of a queue path.
//!
//! The lock lives on a `<name>.lock` sibling so the queue file itself can be
//! replaced by compaction while the lock stays held. The sibling is never
//! removed.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::ErrorKind,
    mem,
    path::{Path, PathBuf},
};

use fd_lock::RwLock;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    Result,
    error::{IoSnafu, LockedSnafu},
    queue_file::sibling,
};

const LOCK_SUFFIX: &str = ".lock";

/// Exclusive lock held for the lifetime of an open queue.
pub(crate) struct QueueLock {
    path: PathBuf,
    // Unlocked when the file descriptor closes.
    _lock: RwLock<File>,
}

impl QueueLock {
    /// Takes the exclusive lock for `queue_path`, failing with
    /// [`QueueError::Locked`](crate::QueueError::Locked) when another handle
    /// holds it.
    pub(crate) fn acquire(queue_path: &Path) -> Result<Self> {
        let path = sibling(queue_path, LOCK_SUFFIX);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(IoSnafu { path: &path })?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            Ok(guard) => mem::forget(guard),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return LockedSnafu { path: queue_path }.fail();
            }
            Err(err) => return Err(err).context(IoSnafu { path: &path }),
        }

        debug!(path = %path.display(), "Acquired queue lock");
        Ok(Self { path, _lock: lock })
    }

    /// Reports whether some handle currently owns `queue_path`, without
    /// taking the lock for longer than the check.
    pub(crate) fn is_held(queue_path: &Path) -> Result<bool> {
        let path = sibling(queue_path, LOCK_SUFFIX);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err).context(IoSnafu { path: &path }),
        };

        let mut lock = RwLock::new(file);
        match lock.try_read() {
            Ok(_guard) => Ok(false),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(true),
            Err(err) => Err(err).context(IoSnafu { path: &path }),
        }
    }
}

impl fmt::Debug for QueueLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueLock").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue_path = temp_dir.path().join("build.db");

        let held = QueueLock::acquire(&queue_path).unwrap();
        assert!(QueueLock::is_held(&queue_path).unwrap());
        assert!(matches!(
            QueueLock::acquire(&queue_path),
            Err(crate::QueueError::Locked { .. })
        ));

        drop(held);
        assert!(!QueueLock::is_held(&queue_path).unwrap());
        let _again = QueueLock::acquire(&queue_path).unwrap();
        assert!(temp_dir.path().join("build.db.lock").exists());
    }

    #[test]
    fn test_missing_lock_file_is_not_held() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(!QueueLock::is_held(&temp_dir.path().join("build.db")).unwrap());
    }
}
