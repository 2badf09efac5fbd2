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

use chrono::{DateTime, Utc};

use crate::config::PublishConfig;

/// AMQP delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[repr(u8)]
pub enum DeliveryMode {
    #[display("non-persistent")]
    NonPersistent = 1,
    #[display("persistent")]
    Persistent = 2,
}

impl DeliveryMode {
    #[must_use]
    pub const fn from_persistent(persistent: bool) -> Self {
        if persistent { Self::Persistent } else { Self::NonPersistent }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 { self as u8 }
}

/// Per-message broker metadata. Built fresh for every publish attempt and
/// never stored with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub app_id:        String,
    pub delivery_mode: DeliveryMode,
    pub content_type:  String,
    pub timestamp:     DateTime<Utc>,
}

impl Envelope {
    /// Returns `None` when the publisher is disabled.
    #[must_use]
    pub fn build(config: &PublishConfig) -> Option<Self> { Self::build_at(config, Utc::now()) }

    #[must_use]
    pub fn build_at(config: &PublishConfig, now: DateTime<Utc>) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self {
            app_id:        config.app_id.clone(),
            delivery_mode: DeliveryMode::from_persistent(config.persistent),
            content_type:  config.content_type.clone(),
            timestamp:     now,
        })
    }

    /// Seconds since the epoch, as carried in the AMQP `timestamp` property.
    #[must_use]
    pub fn unix_timestamp(&self) -> u64 { u64::try_from(self.timestamp.timestamp()).unwrap_or(0) }
}
