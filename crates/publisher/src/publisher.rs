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

//! Producer-facing handle.
//!
//! [`Publisher::enqueue`] persists the payload and returns; the drainer
//! delivers it in the background. The queue file and the drainer are both
//! created on first use.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bon::bon;
use mqnotify_common_storage_queue::{QueueBuilder, QueueError};
use once_cell::sync::OnceCell;
use snafu::ResultExt;
use tokio::{
    runtime::{Handle, Runtime},
    sync::Notify,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    broker::Broker,
    channel::ChannelManager,
    config::{ConfigSource, PublisherOptions},
    drainer::Drainer,
    error::{QueueSnafu, Result},
    metrics::{MESSAGES_DROPPED, MESSAGES_ENQUEUED, set_queue_depth},
    queue::MessageQueue,
};

/// How long [`Publisher::shutdown`] waits for the drainer before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Publisher {
    options:  PublisherOptions,
    config:   Arc<dyn ConfigSource>,
    broker:   Arc<dyn Broker>,
    queue:    OnceCell<Arc<dyn MessageQueue>>,
    runtime:  Option<Runtime>,
    handle:   Handle,
    drainer:  Mutex<Option<JoinHandle<()>>>,
    wakeup:   Arc<Notify>,
    cancel:   CancellationToken,
}

#[bon]
impl Publisher {
    /// Without `runtime` the publisher builds and owns a dedicated runtime
    /// from `options.runtime`. A `queue` replaces the queue file at
    /// `options.queue_path()`.
    #[builder]
    pub fn new(
        #[builder(default)] options: PublisherOptions,
        config: Arc<dyn ConfigSource>,
        broker: Arc<dyn Broker>,
        runtime: Option<Handle>,
        queue: Option<Arc<dyn MessageQueue>>,
    ) -> Result<Self> {
        let (owned, handle) = match runtime {
            Some(handle) => (None, handle),
            None => {
                let runtime = options.runtime.clone().create()?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };

        let cell = OnceCell::new();
        if let Some(queue) = queue {
            let _ = cell.set(queue);
        }

        Ok(Self {
            options,
            config,
            broker,
            queue: cell,
            runtime: owned,
            handle,
            drainer: Mutex::new(None),
            wakeup: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        })
    }
}

impl Publisher {
    /// Persists `payload` for delivery. Never blocks on the broker and never
    /// fails: after `append_attempts` local failures the message is dropped
    /// and logged.
    pub fn enqueue(&self, payload: impl AsRef<[u8]>) {
        let payload = payload.as_ref();
        let attempts = self.options.append_attempts.max(1);

        for attempt in 1..=attempts {
            match self.try_enqueue(payload) {
                Ok(depth) => {
                    MESSAGES_ENQUEUED.inc();
                    set_queue_depth(depth);
                    self.wakeup.notify_one();
                    return;
                }
                Err(e) if matches!(e, QueueError::PayloadTooLarge { .. }) => {
                    MESSAGES_DROPPED.inc();
                    error!(error = %e, "Dropping message that can never be queued");
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Failed to add message to queue");
                }
                Err(e) => {
                    MESSAGES_DROPPED.inc();
                    error!(attempts, error = %e, "Failed to add message to queue, dropping it");
                }
            }
        }
    }

    fn try_enqueue(&self, payload: &[u8]) -> Result<u64, QueueError> {
        let queue = self.queue()?;
        self.ensure_drainer(queue);
        queue.append(payload)?;
        Ok(queue.size())
    }

    /// Opens the queue and starts the drainer without enqueueing anything,
    /// so a backlog left by a previous process starts moving immediately.
    pub fn start(&self) -> Result<()> {
        let queue = self.queue().context(QueueSnafu)?;
        set_queue_depth(queue.size());
        self.ensure_drainer(queue);
        Ok(())
    }

    fn queue(&self) -> Result<&Arc<dyn MessageQueue>, QueueError> {
        self.queue.get_or_try_init(|| {
            let path = self.options.queue_path();
            let queue = QueueBuilder::new(&path)
                .verify_on_open(self.options.verify_on_open)
                .build()?;
            info!(path = %path.display(), records = queue.size(), "Opened queue file");
            Ok(Arc::new(queue) as Arc<dyn MessageQueue>)
        })
    }

    /// Spawns the drainer unless one is running. A drainer that died is
    /// replaced; after [`Self::shutdown`] nothing is spawned.
    fn ensure_drainer(&self, queue: &Arc<dyn MessageQueue>) {
        let mut drainer = self.drainer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return;
        }
        match drainer.as_ref() {
            Some(task) if !task.is_finished() => return,
            Some(_) => warn!("Drainer is not running, restarting it"),
            None => {}
        }

        let channels = ChannelManager::new(
            Arc::clone(&self.broker),
            self.options.heartbeat,
            self.options.publisher_confirms,
            self.handle.clone(),
        );
        let task = Drainer::new(
            Arc::clone(queue),
            Arc::clone(&self.config),
            channels,
            self.options.connection_wait,
            self.options.idle_interval,
            Arc::clone(&self.wakeup),
            self.cancel.clone(),
        );
        *drainer = Some(self.handle.spawn(task.run()));
    }

    /// Records waiting for delivery. Zero before the queue file is opened.
    #[must_use]
    pub fn pending(&self) -> u64 { self.queue.get().map_or(0, |q| q.size()) }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.drainer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Waits until the queue is empty. Returns `false` on timeout.
    pub async fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Stops the drainer after its current iteration and closes the broker
    /// connection. Records still queued stay on disk; later enqueues are
    /// persisted but not delivered by this instance.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .drainer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut task) = task else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(())) => info!(pending = self.pending(), "Publisher shut down"),
            Ok(Err(e)) => error!(error = %e, "Drainer task failed"),
            Err(_) => {
                warn!(grace = ?SHUTDOWN_GRACE, "Drainer did not stop in time, aborting it");
                task.abort();
            }
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
