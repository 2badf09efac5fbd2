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

use bytes::Bytes;
use mqnotify_common_storage_queue::{QueueFile, Result};

/// The durable queue as seen by the publisher.
pub trait MessageQueue: Send + Sync + 'static {
    fn append(&self, payload: &[u8]) -> Result<()>;

    fn peek(&self) -> Result<Option<Bytes>>;

    fn remove(&self) -> Result<()>;

    fn size(&self) -> u64;
}

impl MessageQueue for QueueFile {
    fn append(&self, payload: &[u8]) -> Result<()> { Self::append(self, payload) }

    fn peek(&self) -> Result<Option<Bytes>> { Self::peek(self) }

    fn remove(&self) -> Result<()> { Self::remove(self) }

    fn size(&self) -> u64 { Self::size(self) }
}
