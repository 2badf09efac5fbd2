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

//! CRC32 checksums for records and header slots.
//!
//! Uses CRC-32 (IEEE polynomial) via crc32fast. A record checksum covers the
//! length prefix as well as the payload so a torn length field is caught.

use crc32fast::Hasher;

/// Checksum of a record: length prefix followed by payload.
#[inline]
pub(crate) fn calculate_record_crc(length: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

#[inline]
pub(crate) fn verify_record_crc(length: u32, payload: &[u8], expected: u32) -> bool {
    calculate_record_crc(length, payload) == expected
}

/// Checksum of an encoded header slot body.
#[inline]
pub(crate) fn calculate_header_crc(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_crc_covers_length() {
        let data = b"build finished";
        let length = data.len() as u32;
        let crc = calculate_record_crc(length, data);

        assert_eq!(crc, calculate_record_crc(length, data));
        assert_ne!(crc, calculate_record_crc(length + 1, data));
    }

    #[test]
    fn test_verify_record_crc() {
        let data = b"payload";
        let length = data.len() as u32;
        let crc = calculate_record_crc(length, data);

        assert!(verify_record_crc(length, data, crc));
        assert!(!verify_record_crc(length, data, crc.wrapping_add(1)));
        assert!(!verify_record_crc(length, b"other!!", crc));
    }
}
