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

//! An in-process broker for exercising the drainer without a server.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::IntoError;
use tokio::{sync::Notify, time::Instant};

use super::{
    Broker, BrokerChannel, BrokerConnection, ConnectionSettings, ShutdownObserver, ShutdownSignal,
};
use crate::{
    envelope::Envelope,
    error::{
        BoxedError, BrokerError, ChannelClosedSnafu, ConnectSnafu, ExchangeNotFoundSnafu,
        PublishSnafu,
    },
};

/// A message the broker accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange:    String,
    pub routing_key: String,
    pub envelope:    Envelope,
    pub payload:     Bytes,
}

struct LiveConnection {
    open:     Arc<AtomicBool>,
    observer: Arc<dyn ShutdownObserver>,
}

#[derive(Default)]
struct State {
    available:         AtomicBool,
    loopback:          AtomicBool,
    exchanges:         Mutex<HashSet<String>>,
    published:         Mutex<Vec<PublishedMessage>>,
    connections:       Mutex<Vec<LiveConnection>>,
    settings:          Mutex<Vec<ConnectionSettings>>,
    connects:          AtomicUsize,
    passive_declares:  AtomicUsize,
    failing_publishes: AtomicUsize,
    notify:            Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap to clone; clones share one broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl Default for MemoryBroker {
    fn default() -> Self { Self::new() }
}

impl MemoryBroker {
    /// A reachable, non-loopback broker with no exchanges.
    #[must_use]
    pub fn new() -> Self {
        let state = State::default();
        state.available.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn with_exchange(self, exchange: &str) -> Self {
        lock(&self.state.exchanges).insert(exchange.to_string());
        self
    }

    #[must_use]
    pub fn with_loopback(self, loopback: bool) -> Self {
        self.state.loopback.store(loopback, Ordering::SeqCst);
        self
    }

    /// Makes the broker unreachable and kills every open connection.
    pub fn stop(&self) {
        self.state.available.store(false, Ordering::SeqCst);
        self.drop_connections();
    }

    pub fn start(&self) { self.state.available.store(true, Ordering::SeqCst); }

    /// Closes every open connection from the broker side and notifies the
    /// observers with a hard, externally initiated shutdown.
    pub fn drop_connections(&self) {
        let live = std::mem::take(&mut *lock(&self.state.connections));
        for connection in live {
            connection.open.store(false, Ordering::SeqCst);
            connection.observer.on_shutdown(ShutdownSignal::Hard {
                initiated_by_application: false,
                reason:                   "connection forced".to_string(),
            });
        }
    }

    /// Fails the next `count` publishes as if the channel broke underneath.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.failing_publishes.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> { lock(&self.state.published).clone() }

    #[must_use]
    pub fn connect_count(&self) -> usize { self.state.connects.load(Ordering::SeqCst) }

    #[must_use]
    pub fn passive_declare_count(&self) -> usize {
        self.state.passive_declares.load(Ordering::SeqCst)
    }

    /// Settings of every connection attempt that succeeded, oldest first.
    #[must_use]
    pub fn connection_settings(&self) -> Vec<ConnectionSettings> {
        lock(&self.state.settings).clone()
    }

    /// Waits until at least `count` messages were published.
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.state.notify.notified();
            if lock(&self.state.published).len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return lock(&self.state.published).len() >= count;
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        observer: Arc<dyn ShutdownObserver>,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(ConnectSnafu { host: "memory" }
                .into_error(BoxedError::from("connection refused")));
        }

        let open = Arc::new(AtomicBool::new(true));
        lock(&self.state.connections).push(LiveConnection {
            open: Arc::clone(&open),
            observer,
        });
        lock(&self.state.settings).push(settings.clone());
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            open,
        }))
    }
}

struct MemoryConnection {
    state: Arc<State>,
    open:  Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_open(&self) -> bool { self.open.load(Ordering::SeqCst) }

    fn is_loopback(&self) -> bool { self.state.loopback.load(Ordering::SeqCst) }

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        if !self.is_open() {
            return ChannelClosedSnafu.fail();
        }
        Ok(Arc::new(MemoryChannel {
            state:      Arc::clone(&self.state),
            connection: Arc::clone(&self.open),
            open:       AtomicBool::new(true),
        }))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        lock(&self.state.connections).retain(|c| !Arc::ptr_eq(&c.open, &self.open));
    }
}

struct MemoryChannel {
    state:      Arc<State>,
    connection: Arc<AtomicBool>,
    open:       AtomicBool,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection.load(Ordering::SeqCst)
    }

    async fn declare_exchange_passive(&self, exchange: &str) -> Result<(), BrokerError> {
        self.state.passive_declares.fetch_add(1, Ordering::SeqCst);
        if lock(&self.state.exchanges).contains(exchange) {
            return Ok(());
        }
        // A failed passive declare closes the channel on a real broker too.
        self.open.store(false, Ordering::SeqCst);
        Err(ExchangeNotFoundSnafu { exchange }.into_error(BoxedError::from("NOT_FOUND")))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        if !self.is_open() {
            return ChannelClosedSnafu.fail();
        }
        let failing = self
            .state
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            self.open.store(false, Ordering::SeqCst);
            return Err(PublishSnafu { exchange }.into_error(BoxedError::from("channel reset")));
        }

        lock(&self.state.published).push(PublishedMessage {
            exchange:    exchange.to_string(),
            routing_key: routing_key.to_string(),
            envelope:    envelope.clone(),
            payload:     Bytes::copy_from_slice(payload),
        });
        self.state.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) { self.open.store(false, Ordering::SeqCst); }
}
