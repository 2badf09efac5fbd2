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

use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once, PoisonError},
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter,
    layer::{Layered, SubscriberExt},
    reload,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// Populated by [`init_global_logging`], used by [`set_log_level`].
static RELOAD_HANDLE: OnceCell<reload::Handle<filter::Targets, Registry>> = OnceCell::new();

const DEFAULT_LOG_TARGETS: &str = "info";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LoggingError {
    #[snafu(display("Failed to bridge `log` records into tracing"))]
    LogBridge {
        source: tracing_log::log::SetLoggerError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to create rolling log file in {dir}"))]
    RollingFile {
        dir:    String,
        source: tracing_appender::rolling::InitError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Invalid log level filter {filter:?}"))]
    InvalidFilter {
        filter: String,
        source: filter::ParseError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Global logging is not initialised"))]
    NotInitialized {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to swap the log level filter"))]
    Reload {
        source: reload::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("A global tracing subscriber is already installed"))]
    SubscriberAlreadySet {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files. Empty disables file logging.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Filter string such as `"info,lapin=warn"`. Falls back to `RUST_LOG`,
    /// then to `info`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log stream (hourly rotation).
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event.
    Json,

    /// Human-readable lines.
    #[default]
    Text,
}

/// Sets up file logging for unit tests. Safe to call from every test.
///
/// `UNITTEST_LOG_DIR` overrides the directory (default
/// `/tmp/__unittest_logs`), `UNITTEST_LOG_LEVEL` the filter.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD
            .as_ref()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,lapin=info,pinky_swear=info,amq_protocol=info".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };

        match init_global_logging("unittest", &opts) {
            Ok(guards) => {
                *g = Some(guards);
                tracing::info!("logs dir = {}", dir);
            }
            Err(e) => eprintln!("unit test logging disabled: {e}"),
        }
    });
}

static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

type FilteredRegistry = Layered<reload::Layer<filter::Targets, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Installs the global subscriber: stdout, a rotated main log file and a
/// rotated error-only file, depending on `opts`.
///
/// The returned guards flush the non-blocking writers when dropped and must
/// be held for the life of the process. Calling this a second time is a
/// no-op that returns no guards.
pub fn init_global_logging(
    app_name: &str,
    opts: &LoggingOptions,
) -> Result<Vec<WorkerGuard>, LoggingError> {
    static INITIALIZED: OnceCell<()> = OnceCell::new();
    let mut guards = vec![];

    INITIALIZED.get_or_try_init(|| -> Result<(), LoggingError> {
        let filter_str = opts
            .level
            .clone()
            .or_else(|| env::var(EnvFilter::DEFAULT_ENV).ok())
            .unwrap_or_else(|| DEFAULT_LOG_TARGETS.to_string());
        let targets = filter_str
            .parse::<filter::Targets>()
            .context(InvalidFilterSnafu { filter: &filter_str })?;

        let mut layers: Vec<BoxedLayer> = Vec::new();

        if opts.append_stdout {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            let ansi = std::io::stdout().is_terminal();
            layers.push(match opts.log_format {
                LogFormat::Json => tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
                LogFormat::Text => tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .boxed(),
            });
        }

        if !opts.dir.is_empty() {
            let (writer, guard) = tracing_appender::non_blocking(rolling_appender(
                &opts.dir,
                app_name,
                opts.max_log_files,
            )?);
            guards.push(guard);
            layers.push(match opts.log_format {
                LogFormat::Json => tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
                LogFormat::Text => tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed(),
            });

            let (writer, guard) = tracing_appender::non_blocking(rolling_appender(
                &opts.dir,
                &format!("{app_name}-err"),
                opts.max_log_files,
            )?);
            guards.push(guard);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter::LevelFilter::ERROR)
                    .boxed(),
            );
        }

        let (dyn_filter, reload_handle) = reload::Layer::new(targets);
        let subscriber = Registry::default().with(dyn_filter).with(layers);

        tracing::subscriber::set_global_default(subscriber).context(SubscriberAlreadySetSnafu)?;
        LogTracer::init().context(LogBridgeSnafu)?;
        let _ = RELOAD_HANDLE.set(reload_handle);
        Ok(())
    })?;

    Ok(guards)
}

/// Replaces the level filter of the global subscriber, e.g. with
/// `"debug,lapin=warn"`. The old filter stays active if `filter` does not
/// parse.
pub fn set_log_level(filter: &str) -> Result<(), LoggingError> {
    let targets = filter
        .parse::<filter::Targets>()
        .context(InvalidFilterSnafu { filter })?;
    let handle = RELOAD_HANDLE.get().context(NotInitializedSnafu)?;
    handle.reload(targets).context(ReloadSnafu)?;
    tracing::info!(filter, "Log level changed");
    Ok(())
}

fn rolling_appender(
    dir: &str,
    prefix: &str,
    max_log_files: usize,
) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(max_log_files)
        .build(dir)
        .context(RollingFileSnafu { dir })
}
