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

//! Crash-safe, single-file FIFO queue of opaque byte records.
//!
//! ```no_run
//! use mqnotify_common_storage_queue::QueueBuilder;
//!
//! let queue = QueueBuilder::new("/var/lib/mqnotify/build.db").build()?;
//! queue.append(br#"{"result":"SUCCESS"}"#)?;
//! if let Some(payload) = queue.peek()? {
//!     // deliver payload ...
//!     # let _ = payload;
//!     queue.remove()?;
//! }
//! # Ok::<(), mqnotify_common_storage_queue::QueueError>(())
//! ```

pub mod builder;
pub mod config;
mod crc;
pub mod error;
mod header;
mod lock;
pub mod queue_file;
mod record;

pub use builder::QueueBuilder;
pub use config::{DEFAULT_COMPACT_THRESHOLD, DEFAULT_MAX_PAYLOAD, QueueConfig};
pub use error::{QueueError, Result};
pub use header::{DATA_START, HEADER_MAGIC, HEADER_SLOT_SIZE, HEADER_VERSION};
pub use queue_file::{QueueFile, QueueStatus};
