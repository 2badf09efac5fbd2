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

//! Broker seam.
//!
//! The drainer only talks to these traits. [`amqp::AmqpBroker`] is backed by
//! lapin. With the `testing` feature, `memory::MemoryBroker` keeps
//! everything in process for tests.

pub mod amqp;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    config::{PublishConfig, Secret},
    envelope::Envelope,
    error::BrokerError,
};

/// Everything needed to open a connection. A change in any field means the
/// current connection has to be replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub uri:          String,
    pub virtual_host: String,
    pub username:     String,
    pub password:     Secret,
    pub heartbeat:    Duration,
    pub confirms:     bool,
}

impl ConnectionSettings {
    #[must_use]
    pub fn from_config(config: &PublishConfig, heartbeat: Duration, confirms: bool) -> Self {
        Self {
            uri: config.broker_uri.clone(),
            virtual_host: config.virtual_host.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            heartbeat,
            confirms,
        }
    }
}

/// Why the broker side went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// The whole connection is gone.
    Hard {
        initiated_by_application: bool,
        reason:                   String,
    },
    /// Only a channel was closed.
    Soft { reason: String },
}

/// Installed on a connection at open time. The broker client may call it
/// from any thread, at any time, any number of times.
pub trait ShutdownObserver: Send + Sync {
    fn on_shutdown(&self, signal: ShutdownSignal);
}

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        observer: Arc<dyn ShutdownObserver>,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_open(&self) -> bool;

    /// Whether the peer address is a loopback address.
    fn is_loopback(&self) -> bool;

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Closes the connection. Errors are logged, not returned.
    async fn close(&self);
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Checks that `exchange` exists without creating it.
    async fn declare_exchange_passive(&self, exchange: &str) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    async fn close(&self);
}
