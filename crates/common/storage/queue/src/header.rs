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

//! Queue file header with a dual-slot commit strategy.
//!
//! The first 128 bytes of the file hold two fixed-size header slots. Every
//! commit writes the slot that is *not* currently active, with a generation
//! one higher than the active one, and fsyncs it. On open the valid slot with
//! the highest generation wins, so a torn header write falls back to the
//! previous commit.
//!
//! ## Slot Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ Slot (64 bytes)                                        │
//! ├──────────────────┬─────────────────────────────────────┤
//! │ magic: [u8; 4]   │ "MQTP"                              │
//! │ version: u32     │ Format version, currently 1         │
//! │ generation: u64  │ Commit counter                      │
//! │ head: u64        │ Offset of the first live record     │
//! │ tail: u64        │ Offset one past the last record     │
//! │ count: u64       │ Number of live records              │
//! │ checksum: u32    │ CRC32 of the 40 bytes above         │
//! │ reserved: [u8;20]│ Zero                                │
//! └──────────────────┴─────────────────────────────────────┘
//! ```

use std::path::Path;

use snafu::ensure;

use crate::{
    Result,
    crc::calculate_header_crc,
    error::{CorruptedSnafu, UnsupportedVersionSnafu},
};

/// Magic bytes identifying a queue file: "MQTP".
pub const HEADER_MAGIC: [u8; 4] = *b"MQTP";

/// Current file format version.
pub const HEADER_VERSION: u32 = 1;

/// Size of one header slot.
pub const HEADER_SLOT_SIZE: u64 = 64;

/// Offset of the first record; everything before it belongs to the header.
pub const DATA_START: u64 = HEADER_SLOT_SIZE * 2;

const HEADER_BODY_LEN: usize = 40;

/// Committed queue bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub generation: u64,
    pub head:       u64,
    pub tail:       u64,
    pub count:      u64,
}

impl Header {
    pub(crate) const fn empty() -> Self {
        Self {
            generation: 0,
            head:       DATA_START,
            tail:       DATA_START,
            count:      0,
        }
    }

    /// The same generation with head and tail rewound to the data start.
    pub(crate) const fn reset(self) -> Self {
        Self {
            head: DATA_START,
            tail: DATA_START,
            count: 0,
            ..self
        }
    }

    pub(crate) const fn live_bytes(&self) -> u64 { self.tail - self.head }

    pub(crate) const fn dead_bytes(&self) -> u64 { self.head - DATA_START }

    pub(crate) fn encode(&self) -> [u8; HEADER_SLOT_SIZE as usize] {
        let mut slot = [0u8; HEADER_SLOT_SIZE as usize];
        slot[0..4].copy_from_slice(&HEADER_MAGIC);
        slot[4..8].copy_from_slice(&HEADER_VERSION.to_le_bytes());
        slot[8..16].copy_from_slice(&self.generation.to_le_bytes());
        slot[16..24].copy_from_slice(&self.head.to_le_bytes());
        slot[24..32].copy_from_slice(&self.tail.to_le_bytes());
        slot[32..40].copy_from_slice(&self.count.to_le_bytes());

        let checksum = calculate_header_crc(&slot[..HEADER_BODY_LEN]);
        slot[40..44].copy_from_slice(&checksum.to_le_bytes());
        slot
    }

    /// Decodes one slot. Validates magic, checksum and version.
    pub(crate) fn decode(path: &Path, slot: &[u8]) -> Result<Self> {
        ensure!(
            slot.len() >= HEADER_SLOT_SIZE as usize,
            CorruptedSnafu {
                path,
                reason: format!("header slot is {} bytes", slot.len()),
            }
        );
        ensure!(
            slot[0..4] == HEADER_MAGIC,
            CorruptedSnafu {
                path,
                reason: format!("invalid magic: {:?}", &slot[0..4]),
            }
        );

        let stored = u32_at(slot, 40);
        let computed = calculate_header_crc(&slot[..HEADER_BODY_LEN]);
        ensure!(
            stored == computed,
            CorruptedSnafu {
                path,
                reason: format!("header checksum mismatch: stored={stored:#x}, computed={computed:#x}"),
            }
        );

        let version = u32_at(slot, 4);
        ensure!(version == HEADER_VERSION, UnsupportedVersionSnafu { version });

        Ok(Self {
            generation: u64_at(slot, 8),
            head:       u64_at(slot, 16),
            tail:       u64_at(slot, 24),
            count:      u64_at(slot, 32),
        })
    }

    /// Picks the newest valid slot from the raw header region. Returns the
    /// header and the index of the slot it was read from.
    pub(crate) fn select(path: &Path, region: &[u8]) -> Result<(Self, u8)> {
        let size = HEADER_SLOT_SIZE as usize;
        let first = Self::decode(path, &region[..size]);
        let second = Self::decode(path, &region[size..size * 2]);

        match (first, second) {
            (Ok(a), Ok(b)) if b.generation > a.generation => Ok((b, 1)),
            (Ok(a), _) => Ok((a, 0)),
            (Err(_), Ok(b)) => Ok((b, 1)),
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Checks the header against the physical file length.
    pub(crate) fn validate(self, path: &Path, file_len: u64) -> Result<Self> {
        ensure!(
            DATA_START <= self.head && self.head <= self.tail,
            CorruptedSnafu {
                path,
                reason: format!("head {} and tail {} out of order", self.head, self.tail),
            }
        );
        ensure!(
            self.tail <= file_len,
            CorruptedSnafu {
                path,
                reason: format!("tail {} beyond file length {file_len}", self.tail),
            }
        );
        ensure!(
            (self.count == 0) == (self.head == self.tail),
            CorruptedSnafu {
                path,
                reason: format!(
                    "count {} disagrees with live region {}..{}",
                    self.count, self.head, self.tail
                ),
            }
        );
        Ok(self)
    }

    /// File offset of slot `index`.
    pub(crate) const fn slot_offset(index: u8) -> u64 { index as u64 * HEADER_SLOT_SIZE }
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
