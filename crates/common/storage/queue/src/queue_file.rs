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

//! Single-file persistent FIFO queue.
//!
//! All mutations are completed and fsynced before they return. A record is
//! appended at the tail and fsynced first, then the header is committed into
//! the inactive slot, so a crash at any point leaves the file describing
//! either the old or the new state.
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────┬──────────────────┐
//! │ Header slot 0│ Header slot 1│ consumed …    │ live records …   │
//! │ (64B)        │ (64B)        │ (dead prefix) │ head ..... tail  │
//! └──────────────┴──────────────┴───────────────┴──────────────────┘
//! ```
//!
//! Removal only advances the head. The consumed prefix is reclaimed either
//! when the queue drains completely, or by compaction once the prefix is
//! larger than the configured threshold and larger than the live region.

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use snafu::{IntoError, ResultExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    QueueConfig, QueueError, Result,
    error::{CorruptedSnafu, CorruptedRecordSnafu, EmptyQueueSnafu, IoSnafu, PayloadTooLargeSnafu},
    header::{DATA_START, HEADER_SLOT_SIZE, Header},
    lock::QueueLock,
    record::{
        RecordFault, encode_record, read_exact_at, read_record, read_record_len, record_disk_size,
        write_all_at,
    },
};

const COMPACT_SUFFIX: &str = ".compact";
const INIT_SUFFIX: &str = ".init";
const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct Inner {
    file:        File,
    header:      Header,
    active_slot: u8,
}

/// A durable FIFO of opaque byte payloads backed by one file.
///
/// Safe to share between threads; every operation takes an internal lock.
#[derive(Debug)]
pub struct QueueFile {
    path:              PathBuf,
    max_payload:       u32,
    compact_threshold: u64,
    inner:             Mutex<Inner>,
    // Dropped last so the file is closed before the lock is released.
    _lock:             QueueLock,
}

/// Point-in-time summary of a queue file, read without taking ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub records:    u64,
    pub live_bytes: u64,
    pub file_len:   u64,
    /// Whether a [`QueueFile`] currently holds the queue open.
    pub in_use:     bool,
}

impl QueueFile {
    /// Opens the queue at `config.path`, creating an empty one if the file
    /// does not exist. A damaged file is reported and left untouched.
    ///
    /// Only one handle may own a path at a time; a second open fails with
    /// [`QueueError::Locked`] until the first is dropped.
    pub fn open(config: QueueConfig) -> Result<Self> {
        let path = config.path;

        if let Some(parent) = parent_dir(&path) {
            fs::create_dir_all(parent).context(IoSnafu { path: parent })?;
        }
        let lock = QueueLock::acquire(&path)?;
        remove_stale(&sibling(&path, COMPACT_SUFFIX));
        remove_stale(&sibling(&path, INIT_SUFFIX));

        if !path.exists() {
            create_empty(&path)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .context(IoSnafu { path: &path })?;
        let mut file_len = file.metadata().context(IoSnafu { path: &path })?.len();

        if file_len == 0 {
            debug!(path = %path.display(), "Initialising empty queue file in place");
            write_initial_header(&mut file).context(IoSnafu { path: &path })?;
            file.sync_all().context(IoSnafu { path: &path })?;
            file_len = DATA_START;
        }
        ensure!(
            file_len >= DATA_START,
            CorruptedSnafu {
                path: &path,
                reason: format!("file is {file_len} bytes, shorter than its header"),
            }
        );

        let mut region = [0u8; DATA_START as usize];
        read_exact_at(&mut file, 0, &mut region).context(IoSnafu { path: &path })?;
        let (header, active_slot) = Header::select(&path, &region)?;
        let header = header.validate(&path, file_len)?;

        if config.verify_on_open {
            verify_records(&mut file, &path, header)?;
        }

        if file_len > header.tail {
            // Bytes past the tail belong to an append that never committed.
            if let Err(e) = file.set_len(header.tail) {
                warn!(path = %path.display(), error = %e, "Failed to drop uncommitted tail bytes");
            }
        }

        debug!(
            path = %path.display(),
            count = header.count,
            head = header.head,
            tail = header.tail,
            generation = header.generation,
            "Opened queue file"
        );

        Ok(Self {
            path,
            max_payload: config.max_payload,
            compact_threshold: config.compact_threshold,
            inner: Mutex::new(Inner {
                file,
                header,
                active_slot,
            }),
            _lock: lock,
        })
    }

    /// Reads the committed header of the queue at `path` without locking,
    /// repairing, or cleaning up anything. Safe to call while another
    /// process owns the queue.
    pub fn inspect(path: impl AsRef<Path>) -> Result<QueueStatus> {
        let path = path.as_ref();
        let mut file = File::open(path).context(IoSnafu { path })?;
        let file_len = file.metadata().context(IoSnafu { path })?.len();
        ensure!(
            file_len >= DATA_START,
            CorruptedSnafu {
                path,
                reason: format!("file is {file_len} bytes, shorter than its header"),
            }
        );

        let mut region = [0u8; DATA_START as usize];
        read_exact_at(&mut file, 0, &mut region).context(IoSnafu { path })?;
        let (header, _) = Header::select(path, &region)?;
        let header = header.validate(path, file_len)?;

        Ok(QueueStatus {
            records: header.count,
            live_bytes: header.live_bytes(),
            file_len,
            in_use: QueueLock::is_held(path)?,
        })
    }

    /// Appends one record. When this returns `Ok` the record is durable.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        ensure!(
            payload.len() <= self.max_payload as usize,
            PayloadTooLargeSnafu {
                len: payload.len(),
                max: self.max_payload,
            }
        );

        let mut inner = self.lock();
        let encoded = encode_record(payload);
        let tail = inner.header.tail;

        write_all_at(&mut inner.file, tail, &encoded).context(IoSnafu { path: &self.path })?;
        inner.file.sync_data().context(IoSnafu { path: &self.path })?;

        let next = Header {
            tail: tail + encoded.len() as u64,
            count: inner.header.count + 1,
            ..inner.header
        };
        self.commit(&mut inner, next)
    }

    /// Returns the oldest payload without removing it.
    pub fn peek(&self) -> Result<Option<Bytes>> {
        let mut inner = self.lock();
        let Header {
            head, tail, count, ..
        } = inner.header;
        if count == 0 {
            return Ok(None);
        }

        let (payload, _) =
            read_record(&mut inner.file, head, tail).map_err(|f| self.fault(head, f))?;
        Ok(Some(payload))
    }

    /// Removes the oldest record. Fails with [`QueueError::EmptyQueue`] when
    /// there is nothing to remove.
    pub fn remove(&self) -> Result<()> {
        let mut inner = self.lock();
        let Header {
            head, tail, count, ..
        } = inner.header;
        ensure!(count > 0, EmptyQueueSnafu);

        let length = read_record_len(&mut inner.file, head, tail).map_err(|f| self.fault(head, f))?;
        let next_head = head + record_disk_size(length);

        if count == 1 {
            let next = inner.header.reset();
            self.commit(&mut inner, next)?;
            if let Err(e) = inner.file.set_len(DATA_START) {
                warn!(path = %self.path.display(), error = %e, "Failed to truncate drained queue file");
            }
            return Ok(());
        }

        let next = Header {
            head: next_head,
            count: count - 1,
            ..inner.header
        };
        self.commit(&mut inner, next)?;

        if self.should_compact(&inner.header) {
            if let Err(e) = self.compact(&mut inner) {
                warn!(path = %self.path.display(), error = %e, "Queue compaction failed");
                remove_stale(&sibling(&self.path, COMPACT_SUFFIX));
            }
        }
        Ok(())
    }

    /// Number of live records.
    pub fn size(&self) -> u64 { self.lock().header.count }

    pub fn is_empty(&self) -> bool { self.size() == 0 }

    pub fn path(&self) -> &Path { &self.path }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes `next` into the inactive slot with a higher generation and
    /// makes it the active header once durable.
    fn commit(&self, inner: &mut Inner, next: Header) -> Result<()> {
        let next = Header {
            generation: inner.header.generation + 1,
            ..next
        };
        let slot = 1 - inner.active_slot;

        write_all_at(&mut inner.file, Header::slot_offset(slot), &next.encode())
            .context(IoSnafu { path: &self.path })?;
        inner.file.sync_data().context(IoSnafu { path: &self.path })?;

        inner.header = next;
        inner.active_slot = slot;
        Ok(())
    }

    const fn should_compact(&self, header: &Header) -> bool {
        let dead = header.dead_bytes();
        dead >= self.compact_threshold && dead >= header.live_bytes()
    }

    /// Rewrites the live region into a fresh file and swaps it in by rename.
    fn compact(&self, inner: &mut Inner) -> Result<()> {
        let tmp_path = sibling(&self.path, COMPACT_SUFFIX);
        let current = inner.header;
        let live = current.live_bytes();

        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .context(IoSnafu { path: &tmp_path })?;

        let mut buf = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;
        while copied < live {
            let n = usize::try_from(live - copied).map_or(COPY_CHUNK, |rest| rest.min(COPY_CHUNK));
            read_exact_at(&mut inner.file, current.head + copied, &mut buf[..n])
                .context(IoSnafu { path: &self.path })?;
            write_all_at(&mut tmp, DATA_START + copied, &buf[..n])
                .context(IoSnafu { path: &tmp_path })?;
            copied += n as u64;
        }

        let compacted = Header {
            generation: current.generation + 1,
            head:       DATA_START,
            tail:       DATA_START + live,
            count:      current.count,
        };
        write_all_at(&mut tmp, 0, &compacted.encode()).context(IoSnafu { path: &tmp_path })?;
        write_all_at(&mut tmp, HEADER_SLOT_SIZE, &[0u8; HEADER_SLOT_SIZE as usize])
            .context(IoSnafu { path: &tmp_path })?;
        tmp.sync_all().context(IoSnafu { path: &tmp_path })?;

        fs::rename(&tmp_path, &self.path).context(IoSnafu { path: &self.path })?;
        sync_parent_dir(&self.path);

        info!(
            path = %self.path.display(),
            reclaimed = current.dead_bytes(),
            live,
            "Compacted queue file"
        );

        inner.file = tmp;
        inner.header = compacted;
        inner.active_slot = 0;
        Ok(())
    }

    fn fault(&self, offset: u64, fault: RecordFault) -> QueueError {
        record_error(&self.path, offset, fault)
    }
}

fn verify_records(file: &mut File, path: &Path, header: Header) -> Result<()> {
    let mut offset = header.head;
    let mut seen = 0u64;
    while offset < header.tail {
        let (_, size) = read_record(file, offset, header.tail)
            .map_err(|fault| record_error(path, offset, fault))?;
        offset += size;
        seen += 1;
    }

    ensure!(
        seen == header.count,
        CorruptedSnafu {
            path,
            reason: format!("header counts {} records, found {seen}", header.count),
        }
    );
    Ok(())
}

fn record_error(path: &Path, offset: u64, fault: RecordFault) -> QueueError {
    match fault {
        RecordFault::Io(source) => IoSnafu { path }.into_error(source),
        RecordFault::Invalid(reason) => CorruptedRecordSnafu { offset, reason }.build(),
    }
}

fn write_initial_header(file: &mut File) -> io::Result<()> {
    write_all_at(file, 0, &Header::empty().encode())?;
    write_all_at(file, HEADER_SLOT_SIZE, &[0u8; HEADER_SLOT_SIZE as usize])
}

/// Creates an empty queue file by writing it aside and renaming it into
/// place, so a crash never leaves a half-written header at `path`.
fn create_empty(path: &Path) -> Result<()> {
    let tmp_path = sibling(path, INIT_SUFFIX);
    let mut tmp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .context(IoSnafu { path: &tmp_path })?;
    write_initial_header(&mut tmp).context(IoSnafu { path: &tmp_path })?;
    tmp.sync_all().context(IoSnafu { path: &tmp_path })?;
    drop(tmp);

    fs::rename(&tmp_path, path).context(IoSnafu { path })?;
    sync_parent_dir(path);
    info!(path = %path.display(), "Created queue file");
    Ok(())
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn remove_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale temporary file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale temporary file"),
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let Some(parent) = parent_dir(path) else {
        return;
    };
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(path = %parent.display(), error = %e, "Failed to sync parent directory");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path) -> QueueFile {
        QueueFile::open(QueueConfig {
            path: dir.join("build.db"),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_queue_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open(temp_dir.path());

        assert!(queue.is_empty());
        assert_eq!(queue.peek().unwrap(), None);
        assert_eq!(fs::metadata(queue.path()).unwrap().len(), DATA_START);
    }

    #[test]
    fn test_fifo_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open(temp_dir.path());

        queue.append(b"first").unwrap();
        queue.append(b"second").unwrap();
        assert_eq!(queue.size(), 2);

        assert_eq!(queue.peek().unwrap().unwrap().as_ref(), b"first");
        queue.remove().unwrap();
        assert_eq!(queue.peek().unwrap().unwrap().as_ref(), b"second");
        queue.remove().unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open(temp_dir.path());

        queue.append(b"stay").unwrap();
        assert_eq!(queue.peek().unwrap(), queue.peek().unwrap());
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_remove_on_empty_queue() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open(temp_dir.path());

        assert!(matches!(queue.remove(), Err(QueueError::EmptyQueue { .. })));
    }

    #[test]
    fn test_empty_payload_is_a_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open(temp_dir.path());

        queue.append(b"").unwrap();
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.peek().unwrap().unwrap().len(), 0);
    }

    #[test]
    fn test_payload_limit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = QueueFile::open(QueueConfig {
            path: temp_dir.path().join("build.db"),
            max_payload: 8,
            ..Default::default()
        })
        .unwrap();

        queue.append(&[0u8; 8]).unwrap();
        assert!(matches!(
            queue.append(&[0u8; 9]),
            Err(QueueError::PayloadTooLarge { len: 9, max: 8, .. })
        ));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_draining_truncates_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open(temp_dir.path());

        for _ in 0..10 {
            queue.append(&[7u8; 100]).unwrap();
        }
        for _ in 0..10 {
            queue.remove().unwrap();
        }

        assert_eq!(fs::metadata(queue.path()).unwrap().len(), DATA_START);
        queue.append(b"again").unwrap();
        assert_eq!(queue.peek().unwrap().unwrap().as_ref(), b"again");
    }

    #[test]
    fn test_commit_alternates_slots() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open(temp_dir.path());

        let before = queue.lock().active_slot;
        queue.append(b"one").unwrap();
        let after = queue.lock().active_slot;
        assert_ne!(before, after);
        assert_eq!(queue.lock().header.generation, 1);
    }

    #[test]
    fn test_compaction_reclaims_dead_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = QueueFile::open(QueueConfig {
            path: temp_dir.path().join("build.db"),
            compact_threshold: 512,
            ..Default::default()
        })
        .unwrap();

        for i in 0..20u8 {
            queue.append(&[i; 92]).unwrap();
        }
        // Each record takes 100 bytes on disk; the tenth removal leaves equal
        // dead and live regions.
        for _ in 0..10 {
            queue.remove().unwrap();
        }

        let inner = queue.lock();
        assert_eq!(inner.header.head, DATA_START);
        assert_eq!(inner.header.count, 10);
        drop(inner);

        assert_eq!(fs::metadata(queue.path()).unwrap().len(), DATA_START + 1000);
        assert_eq!(queue.peek().unwrap().unwrap().as_ref(), &[10u8; 92]);
        assert!(!sibling(queue.path(), COMPACT_SUFFIX).exists());
    }

    #[test]
    fn test_sibling_paths() {
        let path = Path::new("/var/lib/mqnotify/build.db");
        assert_eq!(
            sibling(path, COMPACT_SUFFIX),
            PathBuf::from("/var/lib/mqnotify/build.db.compact")
        );
    }
}
