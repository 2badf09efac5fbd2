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

use std::{
    fs::{self, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::Path,
    sync::Arc,
    thread,
};

use mqnotify_common_storage_queue::{DATA_START, HEADER_SLOT_SIZE, QueueBuilder, QueueError, QueueFile};
use tempfile::TempDir;

fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

fn drain(queue: &QueueFile) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(payload) = queue.peek().unwrap() {
        out.push(String::from_utf8(payload.to_vec()).unwrap());
        queue.remove().unwrap();
    }
    out
}

#[test]
fn test_queue_recovery() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");

    {
        let queue = QueueBuilder::new(&path).build().unwrap();
        for i in 0..50 {
            queue.append(format!("msg-{i}").as_bytes()).unwrap();
        }
        for _ in 0..5 {
            queue.remove().unwrap();
        }
    }

    let queue = QueueBuilder::new(&path).verify_on_open(true).build().unwrap();
    assert_eq!(queue.size(), 45);

    let expected: Vec<String> = (5..50).map(|i| format!("msg-{i}")).collect();
    assert_eq!(drain(&queue), expected);
}

#[test]
fn test_creates_missing_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("dir").join("build.db");

    let queue = QueueBuilder::new(&path).build().unwrap();
    queue.append(b"hello").unwrap();
    assert!(path.exists());
}

#[test]
fn test_uncommitted_append_is_discarded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");

    {
        let queue = QueueBuilder::new(&path).build().unwrap();
        queue.append(b"committed").unwrap();
    }

    // A record that reached the disk without its header commit.
    let len = fs::metadata(&path).unwrap().len();
    overwrite(&path, len, &[5, 0, 0, 0, b'l', b'o', b's', b't', b'!', 0xAA, 0xBB, 0xCC, 0xDD]);

    let queue = QueueBuilder::new(&path).verify_on_open(true).build().unwrap();
    assert_eq!(queue.size(), 1);
    assert_eq!(fs::metadata(&path).unwrap().len(), len);

    queue.append(b"next").unwrap();
    assert_eq!(drain(&queue), vec!["committed".to_string(), "next".to_string()]);
}

#[test]
fn test_torn_header_falls_back_to_previous_commit() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");

    {
        let queue = QueueBuilder::new(&path).build().unwrap();
        // Generation 1 lands in slot 1, generation 2 in slot 0.
        queue.append(b"one").unwrap();
        queue.append(b"two").unwrap();
    }

    overwrite(&path, 20, &[0xFF; 8]);

    let queue = QueueBuilder::new(&path).build().unwrap();
    assert_eq!(queue.size(), 1);
    assert_eq!(drain(&queue), vec!["one".to_string()]);
}

#[test]
fn test_unreadable_header_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");

    {
        let queue = QueueBuilder::new(&path).build().unwrap();
        queue.append(b"one").unwrap();
    }
    overwrite(&path, 0, &[0u8; (HEADER_SLOT_SIZE * 2) as usize]);

    let err = QueueBuilder::new(&path).build().unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {err}");

    // The damaged file is left in place for inspection.
    assert!(fs::metadata(&path).unwrap().len() > DATA_START);
}

#[test]
fn test_short_file_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");
    fs::write(&path, b"MQTP").unwrap();

    let err = QueueBuilder::new(&path).build().unwrap_err();
    assert!(matches!(err, QueueError::Corrupted { .. }));
}

#[test]
fn test_zero_length_file_is_initialised() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");
    fs::write(&path, b"").unwrap();

    let queue = QueueBuilder::new(&path).build().unwrap();
    assert!(queue.is_empty());
    assert_eq!(fs::metadata(&path).unwrap().len(), DATA_START);
}

#[test]
fn test_corrupted_record_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");

    {
        let queue = QueueBuilder::new(&path).build().unwrap();
        queue.append(b"payload").unwrap();
    }
    // First payload byte sits right after the 4-byte length prefix.
    overwrite(&path, DATA_START + 4, b"X");

    let queue = QueueBuilder::new(&path).build().unwrap();
    assert!(matches!(
        queue.peek(),
        Err(QueueError::CorruptedRecord { offset, .. }) if offset == DATA_START
    ));
    assert_eq!(queue.size(), 1);
    drop(queue);

    let err = QueueBuilder::new(&path).verify_on_open(true).build().unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_compaction_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");

    {
        let queue = QueueBuilder::new(&path).compact_threshold(1024).build().unwrap();
        for i in 0..100 {
            queue.append(format!("record-{i:03}").as_bytes()).unwrap();
        }
        for _ in 0..70 {
            queue.remove().unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() < 100 * 18);
    }

    let queue = QueueBuilder::new(&path).verify_on_open(true).build().unwrap();
    let expected: Vec<String> = (70..100).map(|i| format!("record-{i:03}")).collect();
    assert_eq!(drain(&queue), expected);
}

#[test]
fn test_stale_compaction_file_is_removed() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");
    let stale = temp_dir.path().join("build.db.compact");
    fs::write(&stale, b"leftover").unwrap();

    let _queue = QueueBuilder::new(&path).build().unwrap();
    assert!(!stale.exists());
}

#[test]
fn test_concurrent_appends() {
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(
        QueueBuilder::new(temp_dir.path().join("build.db"))
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..50 {
                    queue.append(format!("{t}-{i}").as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(queue.size(), 200);
    let drained = drain(&queue);
    assert_eq!(drained.len(), 200);

    // Records from one producer keep their relative order.
    for t in 0..4 {
        let prefix = format!("{t}-");
        let mine: Vec<_> = drained.iter().filter(|m| m.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..50).map(|i| format!("{t}-{i}")).collect();
        assert_eq!(mine, expected.iter().collect::<Vec<_>>());
    }
}

#[test]
fn test_second_open_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");

    let owner = QueueBuilder::new(&path).build().unwrap();
    owner.append(b"from-run").unwrap();

    let err = QueueBuilder::new(&path).build().unwrap_err();
    assert!(matches!(err, QueueError::Locked { .. }), "unexpected error: {err}");
    assert!(!err.is_corruption());

    owner.append(b"after-rejected-open").unwrap();
    drop(owner);

    let queue = QueueBuilder::new(&path).verify_on_open(true).build().unwrap();
    assert_eq!(
        drain(&queue),
        vec!["from-run".to_string(), "after-rejected-open".to_string()]
    );
}

#[test]
fn test_inspect_leaves_file_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("build.db");
    let stale = temp_dir.path().join("build.db.compact");

    let queue = QueueBuilder::new(&path).build().unwrap();
    queue.append(b"one").unwrap();
    queue.append(b"two").unwrap();
    let committed_len = fs::metadata(&path).unwrap().len();

    fs::write(&stale, b"leftover").unwrap();
    overwrite(&path, committed_len, b"uncommitted");

    let status = QueueFile::inspect(&path).unwrap();
    assert_eq!(status.records, 2);
    assert_eq!(status.live_bytes, committed_len - DATA_START);
    assert_eq!(status.file_len, committed_len + 11);
    assert!(status.in_use);
    assert!(stale.exists());
    assert_eq!(fs::metadata(&path).unwrap().len(), committed_len + 11);

    drop(queue);
    assert!(!QueueFile::inspect(&path).unwrap().in_use);
}

#[test]
fn test_inspect_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let err = QueueFile::inspect(temp_dir.path().join("build.db")).unwrap_err();
    assert!(matches!(err, QueueError::Io { .. }));
}
