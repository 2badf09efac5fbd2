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

//! Connection and channel lifecycle.
//!
//! ```text
//! Absent --ensure--> Connecting --ok--> Open --shutdown(hard, external)--> Absent
//!                               --fail--> Absent (caller backs off)
//! Open   --publish failed-->    channel Absent, connection kept
//! ```
//!
//! The drainer is the only caller of [`ChannelManager`]. The broker client
//! may concurrently fire the [`ShutdownObserver`] installed on each
//! connection; both sides only ever clear the cached references, so the
//! race is harmless and a repeated signal is a no-op.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::{
    broker::{
        Broker, BrokerChannel, BrokerConnection, ConnectionSettings, ShutdownObserver,
        ShutdownSignal,
    },
    config::PublishConfig,
    error::BrokerError,
    metrics::CONNECTIONS_OPENED,
};

#[derive(Default)]
struct Slots {
    /// Bumped for every connection attempt. Observers of older connections
    /// carry a smaller value and are ignored.
    generation: u64,
    settings:   Option<ConnectionSettings>,
    connection: Option<Arc<dyn BrokerConnection>>,
    channel:    Option<Arc<dyn BrokerChannel>>,
}

type SharedSlots = Arc<Mutex<Slots>>;

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ChannelManager {
    broker:    Arc<dyn Broker>,
    heartbeat: Duration,
    confirms:  bool,
    slots:     SharedSlots,
    handle:    Handle,
}

impl ChannelManager {
    /// `handle` runs the closes triggered by shutdown observers.
    pub fn new(broker: Arc<dyn Broker>, heartbeat: Duration, confirms: bool, handle: Handle) -> Self {
        Self {
            broker,
            heartbeat,
            confirms,
            slots: SharedSlots::default(),
            handle,
        }
    }

    /// Returns an open channel, connecting first if needed. On a non-loopback
    /// broker a fresh channel is only handed out once the target exchange is
    /// known to exist.
    pub async fn ensure_channel(
        &self,
        config: &PublishConfig,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let settings = ConnectionSettings::from_config(config, self.heartbeat, self.confirms);

        let settings_changed = lock(&self.slots)
            .settings
            .as_ref()
            .is_some_and(|current| *current != settings);
        if settings_changed {
            info!("Broker connection settings changed, reconnecting");
            self.close_all().await;
        }

        let (channel, connection) = {
            let slots = lock(&self.slots);
            (slots.channel.clone(), slots.connection.clone())
        };
        if let Some(channel) = channel.filter(|c| c.is_open()) {
            return Ok(channel);
        }

        let connection = match connection.filter(|c| c.is_open()) {
            Some(connection) => connection,
            None => self.connect(settings).await?,
        };

        let channel = connection.create_channel().await?;
        if connection.is_loopback() {
            debug!(exchange = %config.exchange, "Loopback broker, skipping passive exchange check");
        } else if let Err(e) = channel.declare_exchange_passive(&config.exchange).await {
            channel.close().await;
            return Err(e);
        }

        lock(&self.slots).channel = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn connect(
        &self,
        settings: ConnectionSettings,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let generation = {
            let mut slots = lock(&self.slots);
            slots.generation += 1;
            slots.connection = None;
            slots.channel = None;
            slots.generation
        };
        let observer = Arc::new(SlotObserver {
            slots: Arc::downgrade(&self.slots),
            generation,
            handle: self.handle.clone(),
        });

        let connection = self.broker.connect(&settings, observer).await?;
        CONNECTIONS_OPENED.inc();

        let mut slots = lock(&self.slots);
        slots.connection = Some(Arc::clone(&connection));
        slots.settings = Some(settings);
        Ok(connection)
    }

    /// Drops the cached channel after a failed publish. The connection is
    /// kept; the next [`Self::ensure_channel`] opens a new channel on it.
    pub async fn invalidate_channel(&self) {
        let channel = lock(&self.slots).channel.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }

    /// Closes channel and connection.
    pub async fn close_all(&self) {
        let (channel, connection) = {
            let mut slots = lock(&self.slots);
            slots.settings = None;
            (slots.channel.take(), slots.connection.take())
        };
        if let Some(channel) = channel {
            channel.close().await;
        }
        if let Some(connection) = connection {
            connection.close().await;
            debug!("Closed broker connection");
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.slots)
            .connection
            .as_ref()
            .is_some_and(|c| c.is_open())
    }
}

/// Invalidates the slots of one connection generation.
struct SlotObserver {
    slots:      Weak<Mutex<Slots>>,
    generation: u64,
    handle:     Handle,
}

impl ShutdownObserver for SlotObserver {
    fn on_shutdown(&self, signal: ShutdownSignal) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };

        let (connection, channel) = {
            let mut slots = lock(&slots);
            if slots.generation != self.generation {
                debug!(
                    generation = self.generation,
                    current = slots.generation,
                    "Ignoring shutdown of a replaced connection"
                );
                return;
            }
            match &signal {
                ShutdownSignal::Hard {
                    initiated_by_application: true,
                    ..
                } => return,
                ShutdownSignal::Hard { reason, .. } => {
                    if slots.connection.is_some() {
                        warn!(reason = %reason, "Broker connection was closed unexpectedly");
                    }
                    (slots.connection.take(), slots.channel.take())
                }
                ShutdownSignal::Soft { reason } => {
                    if slots.channel.is_some() {
                        warn!(reason = %reason, "Broker channel was closed unexpectedly");
                    }
                    (None, slots.channel.take())
                }
            }
        };

        if connection.is_none() && channel.is_none() {
            return;
        }
        self.handle.spawn(async move {
            if let Some(channel) = channel.filter(|c| c.is_open()) {
                channel.close().await;
            }
            if let Some(connection) = connection.filter(|c| c.is_open()) {
                connection.close().await;
            }
        });
    }
}
