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

//! Publisher metrics. Everything is registered in the prometheus default
//! registry, so a host process with its own exporter scrapes them as is.

use std::sync::LazyLock;

use prometheus::{
    Encoder, IntCounter, IntGauge, TextEncoder, register_int_counter, register_int_gauge,
};

pub static MESSAGES_ENQUEUED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "mqnotify_messages_enqueued_total",
        "Messages persisted to the queue file"
    )
    .unwrap()
});

pub static MESSAGES_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "mqnotify_messages_dropped_total",
        "Messages dropped after exhausting append attempts"
    )
    .unwrap()
});

pub static MESSAGES_PUBLISHED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "mqnotify_messages_published_total",
        "Messages accepted by the broker"
    )
    .unwrap()
});

pub static PUBLISH_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "mqnotify_publish_failures_total",
        "Failed connection, channel or publish attempts"
    )
    .unwrap()
});

pub static CONNECTIONS_OPENED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "mqnotify_connections_opened_total",
        "Broker connections established"
    )
    .unwrap()
});

pub static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("mqnotify_queue_depth", "Records waiting in the queue file").unwrap()
});

#[allow(clippy::cast_possible_wrap)]
pub(crate) fn set_queue_depth(depth: u64) { QUEUE_DEPTH.set(depth as i64); }

/// Renders every metric in the default registry in the text exposition
/// format.
#[must_use]
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
