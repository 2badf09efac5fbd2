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

//! Durable, asynchronous publishing of build events to an AMQP exchange.
//!
//! Producers call [`Publisher::enqueue`], which persists the payload to a
//! local queue file and returns. A background drainer peeks the oldest
//! record, publishes it with the envelope derived from the current
//! [`PublishConfig`] and removes it only after the broker accepted it.
//! Broker outages, disabled configuration and process restarts delay
//! delivery but never lose a queued message.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mqnotify_publisher::{
//!     PublishConfig, Publisher, PublisherOptions, SharedConfig, broker::amqp::AmqpBroker,
//! };
//!
//! let config = SharedConfig::new(PublishConfig {
//!     exchange: "builds".to_string(),
//!     ..PublishConfig::default()
//! });
//! let publisher = Publisher::builder()
//!     .options(PublisherOptions::builder().root_dir("/var/lib/mqnotify").build())
//!     .config(Arc::new(config))
//!     .broker(Arc::new(AmqpBroker))
//!     .build()?;
//! publisher.enqueue(br#"{"result":"SUCCESS"}"#);
//! # Ok::<(), mqnotify_publisher::Error>(())
//! ```

pub mod broker;
pub mod channel;
pub mod config;
mod drainer;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod publisher;
pub mod queue;
pub mod runtime;

pub use config::{
    ConfigSource, FileConfig, PublishConfig, PublisherOptions, Secret, SharedConfig,
};
pub use envelope::{DeliveryMode, Envelope};
pub use error::{BrokerError, ConfigError, Error, Result, Severity};
pub use provider::{DataProvider, PayloadBuilder, RunDescriptor};
pub use publisher::Publisher;
pub use queue::MessageQueue;
pub use runtime::RuntimeOptions;
