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

//! On-disk record format.
//!
//! Records are stored back to back between the queue head and tail:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┬─────────────────┐
//! │  Length (4B)    │   Payload (variable) │   CRC32 (4B)    │
//! │  little-endian  │   raw bytes          │   little-endian │
//! └─────────────────┴──────────────────────┴─────────────────┘
//! ```
//!
//! The CRC covers the length prefix and the payload.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
};

use bytes::Bytes;

use crate::crc::{calculate_record_crc, verify_record_crc};

/// Size of the length prefix in bytes.
pub(crate) const RECORD_LENGTH_SIZE: u64 = 4;

/// Size of the trailing CRC32 in bytes.
pub(crate) const RECORD_CRC_SIZE: u64 = 4;

/// Total on-disk size of a record holding `payload_len` bytes.
#[inline]
pub(crate) const fn record_disk_size(payload_len: u64) -> u64 {
    RECORD_LENGTH_SIZE + payload_len + RECORD_CRC_SIZE
}

/// Encodes a payload into its framed on-disk form.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn encode_record(payload: &[u8]) -> Vec<u8> {
    let length = payload.len() as u32;
    let crc = calculate_record_crc(length, payload);

    let mut buf = Vec::with_capacity(payload.len() + 8);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Why a record could not be read back.
#[derive(Debug)]
pub(crate) enum RecordFault {
    Io(std::io::Error),
    Invalid(String),
}

impl From<std::io::Error> for RecordFault {
    fn from(err: std::io::Error) -> Self { Self::Io(err) }
}

/// Reads the length prefix at `offset` and checks that the whole record fits
/// before `limit`. Returns the payload length.
pub(crate) fn read_record_len(file: &mut File, offset: u64, limit: u64) -> Result<u64, RecordFault> {
    if offset + RECORD_LENGTH_SIZE > limit {
        return Err(RecordFault::Invalid(format!(
            "length prefix crosses tail at {limit}"
        )));
    }

    let mut buf = [0u8; 4];
    read_exact_at(file, offset, &mut buf)?;
    let length = u64::from(u32::from_le_bytes(buf));

    if offset + record_disk_size(length) > limit {
        return Err(RecordFault::Invalid(format!(
            "record of {length} bytes crosses tail at {limit}"
        )));
    }
    Ok(length)
}

/// Reads and verifies the record at `offset`. Returns the payload and the
/// record's on-disk size.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn read_record(
    file: &mut File,
    offset: u64,
    limit: u64,
) -> Result<(Bytes, u64), RecordFault> {
    let length = read_record_len(file, offset, limit)?;

    let mut buf = vec![0u8; (length + RECORD_CRC_SIZE) as usize];
    read_exact_at(file, offset + RECORD_LENGTH_SIZE, &mut buf)?;

    let crc_at = length as usize;
    let stored = u32::from_le_bytes([
        buf[crc_at],
        buf[crc_at + 1],
        buf[crc_at + 2],
        buf[crc_at + 3],
    ]);
    buf.truncate(crc_at);

    if !verify_record_crc(length as u32, &buf, stored) {
        return Err(RecordFault::Invalid("checksum mismatch".to_string()));
    }
    Ok((Bytes::from(buf), record_disk_size(length)))
}

pub(crate) fn read_exact_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

pub(crate) fn write_all_at(file: &mut File, offset: u64, buf: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}
