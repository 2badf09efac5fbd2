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

use crate::{QueueConfig, QueueFile, Result};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config: QueueConfig {
                path: path.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub const fn max_payload(mut self, max: u32) -> Self {
        self.config.max_payload = max;
        self
    }

    #[must_use]
    pub const fn compact_threshold(mut self, bytes: u64) -> Self {
        self.config.compact_threshold = bytes;
        self
    }

    #[must_use]
    pub const fn verify_on_open(mut self, verify: bool) -> Self {
        self.config.verify_on_open = verify;
        self
    }

    pub fn build(self) -> Result<QueueFile> { QueueFile::open(self.config) }
}
