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

use std::path::PathBuf;

use snafu::Snafu;

/// Queue file operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(display("IO error on queue file {}", path.display()))]
    Io {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The file header is unreadable. Surfaced on open and never repaired
    /// automatically.
    #[snafu(display("Queue file {} is corrupted: {reason}", path.display()))]
    Corrupted {
        path:   PathBuf,
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// A record failed its bounds or CRC check.
    #[snafu(display("Corrupted record at offset {offset}: {reason}"))]
    CorruptedRecord {
        offset: u64,
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Unsupported queue file version {version}"))]
    UnsupportedVersion {
        version: u32,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Payload of {len} bytes exceeds the {max} byte limit"))]
    PayloadTooLarge {
        len: usize,
        max: u32,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// Another handle, in this process or another, owns the queue.
    #[snafu(display("Queue file {} is already in use by another process", path.display()))]
    Locked {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// `remove` was called on an empty queue.
    #[snafu(display("Cannot remove from an empty queue"))]
    EmptyQueue {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

impl QueueError {
    /// Returns `true` if the error describes damaged on-disk state rather
    /// than a failed system call.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. } | Self::CorruptedRecord { .. } | Self::UnsupportedVersion { .. }
        )
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
