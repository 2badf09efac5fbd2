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

use mqnotify_common_storage_queue::QueueError;
use snafu::Snafu;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How the drainer should treat a broker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The broker or exchange may come back; keep the channel and retry.
    Transient,
    /// The channel is unusable for this attempt and must be rebuilt.
    Fatal,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BrokerError {
    #[snafu(display("Invalid broker URI: {message}"))]
    InvalidUri {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Failed to connect to broker at {host}"))]
    Connect {
        host:   String,
        source: BoxedError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to open channel"))]
    OpenChannel {
        source: BoxedError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Exchange {exchange:?} is not available"))]
    ExchangeNotFound {
        exchange: String,
        source:   BoxedError,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Failed to publish to exchange {exchange:?}"))]
    Publish {
        exchange: String,
        source:   BoxedError,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Broker rejected message for exchange {exchange:?}"))]
    Nacked {
        exchange: String,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Channel is already closed"))]
    ChannelClosed {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

impl BrokerError {
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Publish { .. } | Self::ChannelClosed { .. } => Severity::Fatal,
            Self::InvalidUri { .. }
            | Self::Connect { .. }
            | Self::OpenChannel { .. }
            | Self::ExchangeNotFound { .. }
            | Self::Nacked { .. } => Severity::Transient,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("Failed to load publisher configuration"))]
    Load {
        source: config::ConfigError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Invalid publisher configuration: {source}"))]
    Invalid {
        source: validator::ValidationErrors,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to build drainer runtime"))]
    Runtime {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Queue operation failed"))]
    Queue {
        source: QueueError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Blocking queue task failed"))]
    Join {
        source: tokio::task::JoinError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}
