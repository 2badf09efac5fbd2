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

//! Publisher configuration.
//!
//! [`PublishConfig`] is what an operator edits; the drainer takes a fresh
//! snapshot from a [`ConfigSource`] on every iteration, so toggling
//! `enabled` or pointing at another broker takes effect without a restart.
//! [`PublisherOptions`] are fixed for the lifetime of a publisher.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use validator::{Validate, ValidationError};

use crate::{
    error::{ConfigError, InvalidSnafu, LoadSnafu},
    runtime::RuntimeOptions,
};

/// Content type used when none is configured.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Prefix for environment overrides read by [`FileConfig`], e.g.
/// `MQNOTIFY__ROUTING_KEY`.
pub const ENV_PREFIX: &str = "MQNOTIFY";

/// A credential that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    #[must_use]
    pub fn expose(&self) -> &str { &self.0 }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(\"\")")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self { Self::new(value) }
}

impl From<String> for Secret {
    fn from(value: String) -> Self { Self(value) }
}

/// Runtime-editable publishing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_broker_uri"))]
pub struct PublishConfig {
    /// When false the drainer idles and messages accumulate on disk.
    #[default = true]
    pub enabled:      bool,
    #[default = "amqp://localhost:5672"]
    pub broker_uri:   String,
    /// Overrides the virtual host from the URI when non-empty.
    pub virtual_host: String,
    /// Overrides the user from the URI when non-empty.
    pub username:     String,
    pub password:     Secret,
    #[validate(length(min = 1, message = "exchange must not be empty"))]
    pub exchange:     String,
    pub routing_key:  String,
    #[default = "mqnotify"]
    pub app_id:       String,
    #[default(DEFAULT_CONTENT_TYPE.to_string())]
    pub content_type: String,
    /// Publish with delivery mode 2 instead of 1.
    #[default = true]
    pub persistent:   bool,
}

fn validate_broker_uri(config: &PublishConfig) -> Result<(), ValidationError> {
    if config.enabled && config.broker_uri.trim().is_empty() {
        return Err(ValidationError::new("broker_uri")
            .with_message("broker_uri must be set when the publisher is enabled".into()));
    }
    Ok(())
}

impl PublishConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate().context(InvalidSnafu)?;
        Ok(self)
    }
}

/// Where the drainer gets its configuration from.
pub trait ConfigSource: Send + Sync + 'static {
    /// A consistent, validated snapshot. Called once per drain iteration.
    fn snapshot(&self) -> Result<PublishConfig, ConfigError>;
}

/// In-memory configuration the host updates directly.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<PublishConfig>>,
}

impl SharedConfig {
    #[must_use]
    pub fn new(config: PublishConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn update(&self, config: PublishConfig) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled = enabled;
    }

    #[must_use]
    pub fn current(&self) -> PublishConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConfigSource for SharedConfig {
    fn snapshot(&self) -> Result<PublishConfig, ConfigError> { self.current().validated() }
}

/// A TOML file layered with `MQNOTIFY__*` environment overrides, re-read on
/// every snapshot. A missing file yields the defaults.
#[derive(Debug, Clone)]
pub struct FileConfig {
    path: PathBuf,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    pub fn load(&self) -> Result<PublishConfig, ConfigError> {
        config::Config::builder()
            .add_source(
                config::File::from(self.path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context(LoadSnafu)?
            .try_deserialize::<PublishConfig>()
            .context(LoadSnafu)
    }
}

impl ConfigSource for FileConfig {
    fn snapshot(&self) -> Result<PublishConfig, ConfigError> { self.load()?.validated() }
}

/// Fixed settings of one publisher instance.
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(finish_fn = build)]
pub struct PublisherOptions {
    /// Directory that holds the queue file.
    #[default(PathBuf::from("."))]
    #[builder(into, default = PathBuf::from("."))]
    pub root_dir:           PathBuf,

    #[default("build.db".to_string())]
    #[builder(into, default = "build.db".to_string())]
    pub queue_file_name:    String,

    /// Append attempts before a message is dropped.
    #[default(5)]
    #[builder(default = 5)]
    pub append_attempts:    u32,

    /// Back-off after a failed connection, channel or publish attempt.
    #[default(Duration::from_secs(10))]
    #[builder(default = Duration::from_secs(10))]
    pub connection_wait:    Duration,

    /// Sleep while disabled or empty. An enqueue cuts it short.
    #[default(Duration::from_secs(1))]
    #[builder(default = Duration::from_secs(1))]
    pub idle_interval:      Duration,

    #[default(Duration::from_secs(30))]
    #[builder(default = Duration::from_secs(30))]
    pub heartbeat:          Duration,

    /// Wait for broker confirms before removing a record.
    #[default(true)]
    #[builder(default = true)]
    pub publisher_confirms: bool,

    /// Check every record when the queue file is opened.
    #[default(false)]
    #[builder(default = false)]
    pub verify_on_open:     bool,

    #[builder(default)]
    pub runtime:            RuntimeOptions,
}

impl PublisherOptions {
    #[must_use]
    pub fn queue_path(&self) -> PathBuf { self.root_dir.join(&self.queue_file_name) }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use test_case::test_case;

    use super::*;

    fn valid() -> PublishConfig {
        PublishConfig {
            exchange: "builds".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_secret_is_redacted() {
        let config = PublishConfig {
            password: Secret::new("hunter2"),
            ..valid()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(config.password.expose(), "hunter2");
    }

    #[test]
    fn test_defaults() {
        let config = PublishConfig::default();
        assert!(config.enabled);
        assert!(config.persistent);
        assert_eq!(config.content_type, "application/json");
        assert_eq!(config.broker_uri, "amqp://localhost:5672");
    }

    #[test_case(valid(), true ; "valid")]
    #[test_case(PublishConfig::default(), false ; "missing exchange")]
    #[test_case(PublishConfig { broker_uri: String::new(), ..valid() }, false ; "enabled without uri")]
    #[test_case(PublishConfig { broker_uri: String::new(), enabled: false, ..valid() }, true ; "disabled without uri")]
    fn test_validation(config: PublishConfig, ok: bool) {
        assert_eq!(config.validated().is_ok(), ok);
    }

    #[test]
    fn test_shared_config_updates() {
        let shared = SharedConfig::new(valid());
        assert!(shared.snapshot().unwrap().enabled);

        shared.set_enabled(false);
        assert!(!shared.snapshot().unwrap().enabled);

        shared.update(PublishConfig {
            routing_key: "rk".to_string(),
            ..valid()
        });
        let snapshot = shared.snapshot().unwrap();
        assert!(snapshot.enabled);
        assert_eq!(snapshot.routing_key, "rk");
    }

    #[test]
    fn test_file_config_is_reread() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mqnotify.toml");
        fs::write(
            &path,
            r#"
broker_uri = "amqp://mq.example.com:5672"
exchange = "builds"
routing_key = "ci"
password = "s3cret"
"#,
        )
        .unwrap();

        let source = FileConfig::new(&path);
        let config = source.snapshot().unwrap();
        assert_eq!(config.broker_uri, "amqp://mq.example.com:5672");
        assert_eq!(config.routing_key, "ci");
        assert_eq!(config.password.expose(), "s3cret");
        assert!(config.enabled);

        fs::write(&path, "exchange = \"builds\"\nenabled = false\n").unwrap();
        assert!(!source.snapshot().unwrap().enabled);
    }

    #[test]
    fn test_file_config_rejects_invalid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mqnotify.toml");
        fs::write(&path, "routing_key = \"ci\"\n").unwrap();

        assert!(matches!(
            FileConfig::new(&path).snapshot(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_publisher_options_defaults() {
        let options = PublisherOptions::builder().root_dir("/var/lib/jenkins").build();
        assert_eq!(options.queue_path(), PathBuf::from("/var/lib/jenkins/build.db"));
        assert_eq!(options.append_attempts, 5);
        assert_eq!(options.connection_wait, Duration::from_secs(10));
        assert_eq!(options.heartbeat, Duration::from_secs(30));
        assert!(options.publisher_confirms);

        let defaults = PublisherOptions::default();
        assert_eq!(defaults.idle_interval, Duration::from_secs(1));
        assert_eq!(defaults.queue_file_name, "build.db");
    }
}
