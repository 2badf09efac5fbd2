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

use smart_default::SmartDefault;

/// Largest payload accepted by `append`, 64 MiB.
pub const DEFAULT_MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

/// Dead prefix size above which removal may trigger compaction, 1 MiB.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, Clone, SmartDefault)]
pub struct QueueConfig {
    /// Location of the queue file.
    #[default(PathBuf::from("./build.db"))]
    pub path:              PathBuf,
    #[default(DEFAULT_MAX_PAYLOAD)]
    pub max_payload:       u32,
    /// Compaction runs once the consumed prefix reaches this many bytes and
    /// outweighs the live region.
    #[default(DEFAULT_COMPACT_THRESHOLD)]
    pub compact_threshold: u64,
    /// Walk every live record on open and fail if any is unreadable.
    pub verify_on_open:    bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.path, PathBuf::from("./build.db"));
        assert_eq!(config.max_payload, 64 * 1024 * 1024);
        assert_eq!(config.compact_threshold, 1024 * 1024);
        assert!(!config.verify_on_open);
    }
}
