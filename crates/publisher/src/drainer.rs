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

//! The single background task that moves records from the queue file to the
//! broker.
//!
//! Each iteration takes a fresh config snapshot, peeks the head record and
//! publishes it. The record is removed only after the broker accepted it, so
//! it survives any number of failed attempts and process restarts.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use snafu::ResultExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    channel::ChannelManager,
    config::ConfigSource,
    envelope::Envelope,
    error::{JoinSnafu, QueueSnafu, Result, Severity},
    metrics::{MESSAGES_PUBLISHED, PUBLISH_FAILURES, set_queue_depth},
    queue::MessageQueue,
};

/// What the loop does after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A record went out; go straight to the next one.
    Published,
    /// Nothing to do; sleep for the idle interval or until an enqueue.
    Idle,
    /// The broker failed; sleep for the connection wait.
    Backoff,
}

pub(crate) struct Drainer {
    queue:             Arc<dyn MessageQueue>,
    config:            Arc<dyn ConfigSource>,
    channels:          ChannelManager,
    connection_wait:   Duration,
    idle_interval:     Duration,
    wakeup:            Arc<Notify>,
    cancel:            CancellationToken,
    last_config_error: Option<String>,
    last_queue_error:  Option<String>,
}

impl Drainer {
    pub(crate) const fn new(
        queue: Arc<dyn MessageQueue>,
        config: Arc<dyn ConfigSource>,
        channels: ChannelManager,
        connection_wait: Duration,
        idle_interval: Duration,
        wakeup: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            config,
            channels,
            connection_wait,
            idle_interval,
            wakeup,
            cancel,
            last_config_error: None,
            last_queue_error: None,
        }
    }

    /// Runs until cancelled. Cancellation is observed between iterations and
    /// during sleeps, never in the middle of a publish.
    pub(crate) async fn run(mut self) {
        info!("Drainer started");
        while !self.cancel.is_cancelled() {
            let step = self.step().await;
            let pause = match step {
                Step::Published => continue,
                Step::Idle => self.idle_interval,
                Step::Backoff => self.connection_wait,
            };

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.wakeup.notified(), if step == Step::Idle => {}
                () = tokio::time::sleep(pause) => {}
            }
        }
        self.channels.close_all().await;
        info!("Drainer stopped");
    }

    pub(crate) async fn step(&mut self) -> Step {
        let config = match self.config.snapshot() {
            Ok(config) => {
                if self.last_config_error.take().is_some() {
                    info!("Publisher configuration is valid again");
                }
                config
            }
            Err(e) => {
                let message = e.to_string();
                if self.last_config_error.as_deref() != Some(message.as_str()) {
                    warn!(error = %e, "Publisher configuration is unusable, idling");
                    self.last_config_error = Some(message);
                }
                return Step::Idle;
            }
        };
        let Some(envelope) = Envelope::build(&config) else {
            debug!("Publisher disabled, idling");
            return Step::Idle;
        };

        let head = match self.peek().await {
            Ok(Some(head)) => head,
            Ok(None) => return Step::Idle,
            Err(e) => {
                self.report_queue_error(&e, "Failed to read queue head");
                return Step::Idle;
            }
        };

        let channel = match self.channels.ensure_channel(&config).await {
            Ok(channel) => channel,
            Err(e) => {
                PUBLISH_FAILURES.inc();
                warn!(
                    error = %e,
                    retry_in = ?self.connection_wait,
                    "Broker is not available"
                );
                return Step::Backoff;
            }
        };

        if let Err(e) = channel
            .publish(&config.exchange, &config.routing_key, &envelope, &head)
            .await
        {
            PUBLISH_FAILURES.inc();
            warn!(
                error = %e,
                exchange = %config.exchange,
                retry_in = ?self.connection_wait,
                "Failed to publish message"
            );
            if e.severity() == Severity::Fatal {
                self.channels.invalidate_channel().await;
            }
            return Step::Backoff;
        }
        MESSAGES_PUBLISHED.inc();
        debug!(
            exchange = %config.exchange,
            routing_key = %config.routing_key,
            bytes = head.len(),
            "Published message"
        );

        match self.remove().await {
            Ok(remaining) => {
                self.last_queue_error = None;
                set_queue_depth(remaining);
                Step::Published
            }
            Err(e) => {
                self.report_queue_error(&e, "Failed to remove published message");
                Step::Idle
            }
        }
    }

    async fn peek(&self) -> Result<Option<Bytes>> {
        let queue = Arc::clone(&self.queue);
        tokio::task::spawn_blocking(move || queue.peek())
            .await
            .context(JoinSnafu)?
            .context(QueueSnafu)
    }

    async fn remove(&self) -> Result<u64> {
        let queue = Arc::clone(&self.queue);
        tokio::task::spawn_blocking(move || queue.remove().map(|()| queue.size()))
            .await
            .context(JoinSnafu)?
            .context(QueueSnafu)
    }

    fn report_queue_error(&mut self, err: &crate::error::Error, what: &str) {
        let message = format!("{what}: {err:?}");
        if self.last_queue_error.as_deref() != Some(message.as_str()) {
            error!(error = ?err, "{what}");
            self.last_queue_error = Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use mqnotify_common_storage_queue::QueueBuilder;
    use tempfile::TempDir;
    use tokio::runtime::Handle;

    use super::*;
    use crate::{
        broker::memory::MemoryBroker,
        config::{PublishConfig, SharedConfig},
    };

    struct Fixture {
        _temp_dir: TempDir,
        queue:     Arc<dyn MessageQueue>,
        config:    SharedConfig,
        broker:    MemoryBroker,
        drainer:   Drainer,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let queue: Arc<dyn MessageQueue> = Arc::new(
            QueueBuilder::new(temp_dir.path().join("build.db"))
                .build()
                .unwrap(),
        );
        let config = SharedConfig::new(PublishConfig {
            exchange: "ex".to_string(),
            routing_key: "rk".to_string(),
            ..Default::default()
        });
        let broker = MemoryBroker::new().with_exchange("ex");
        let channels = ChannelManager::new(
            Arc::new(broker.clone()),
            Duration::from_secs(30),
            true,
            Handle::current(),
        );
        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::new(config.clone()),
            channels,
            Duration::from_millis(20),
            Duration::from_millis(10),
            Arc::new(Notify::new()),
            CancellationToken::new(),
        );
        Fixture {
            _temp_dir: temp_dir,
            queue,
            config,
            broker,
            drainer,
        }
    }

    #[tokio::test]
    async fn test_empty_queue_idles() {
        let mut f = fixture();
        assert_eq!(f.drainer.step().await, Step::Idle);
        assert_eq!(f.broker.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_then_remove() {
        let mut f = fixture();
        f.queue.append(b"payload").unwrap();

        assert_eq!(f.drainer.step().await, Step::Published);
        assert_eq!(f.queue.size(), 0);

        let published = f.broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload.as_ref(), b"payload");
        assert_eq!(published[0].routing_key, "rk");
    }

    #[tokio::test]
    async fn test_disabled_keeps_record() {
        let mut f = fixture();
        f.queue.append(b"payload").unwrap();
        f.config.set_enabled(false);

        assert_eq!(f.drainer.step().await, Step::Idle);
        assert_eq!(f.queue.size(), 1);
        assert!(f.broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_idles() {
        let mut f = fixture();
        f.queue.append(b"payload").unwrap();
        f.config.update(PublishConfig::default());

        assert_eq!(f.drainer.step().await, Step::Idle);
        assert!(f.drainer.last_config_error.is_some());
        assert_eq!(f.queue.size(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_backs_off() {
        let mut f = fixture();
        f.queue.append(b"payload").unwrap();
        f.broker.stop();

        assert_eq!(f.drainer.step().await, Step::Backoff);
        assert_eq!(f.queue.size(), 1);

        f.broker.start();
        assert_eq!(f.drainer.step().await, Step::Published);
    }

    #[tokio::test]
    async fn test_failed_publish_rebuilds_channel() {
        let mut f = fixture();
        f.queue.append(b"payload").unwrap();
        f.broker.fail_next_publishes(1);

        assert_eq!(f.drainer.step().await, Step::Backoff);
        assert_eq!(f.queue.size(), 1);

        assert_eq!(f.drainer.step().await, Step::Published);
        assert_eq!(f.broker.published().len(), 1);
        assert_eq!(f.broker.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture();
        let cancel = f.drainer.cancel.clone();
        let task = tokio::spawn(f.drainer.run());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
