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
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use mqnotify_common_storage_queue::QueueFile;
use mqnotify_common_telemetry::{
    LogFormat, LoggingOptions, init_global_logging, set_log_level, set_panic_hook,
};
use mqnotify_publisher::{
    FileConfig, PayloadBuilder, Publisher, PublisherOptions, RunDescriptor,
    broker::amqp::AmqpBroker, config::ENV_PREFIX, metrics,
};
use snafu::{ResultExt, Whatever, whatever};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

mod build_info;

#[derive(Debug, Parser)]
#[clap(
    name = "mqnotify",
    about = "Durable AMQP notifier for build events",
    author = build_info::AUTHOR,
    version = build_info::FULL_VERSION,
    long_version = build_info::LONG_VERSION
)]
struct Cli {
    #[command(flatten)]
    global:   GlobalArgs,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Publisher configuration (TOML). `MQNOTIFY__*` variables override it.
    #[arg(long, short, global = true, env = "MQNOTIFY_CONFIG", default_value = "mqnotify.toml")]
    config:     PathBuf,
    /// Directory holding the queue file.
    #[arg(long, global = true, env = "MQNOTIFY_ROOT_DIR", default_value = ".")]
    root_dir:   PathBuf,
    #[arg(long, global = true, default_value = "build.db")]
    queue_file: String,
    /// Also write rotated log files into this directory.
    #[arg(long, global = true)]
    log_dir:    Option<String>,
    /// Log filter such as `info,lapin=warn`. Defaults to the `log_level`
    /// key of the configuration file.
    #[arg(long, global = true)]
    log_level:  Option<String>,
    #[arg(long, global = true)]
    log_json:   bool,
}

impl GlobalArgs {
    fn logging_options(&self) -> LoggingOptions {
        let level = self
            .log_level
            .clone()
            .or_else(|| configured_log_level(&self.config).ok().flatten());
        LoggingOptions {
            dir: self.log_dir.clone().unwrap_or_default(),
            level,
            log_format: if self.log_json {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
            ..LoggingOptions::default()
        }
    }

    fn queue_path(&self) -> PathBuf { self.root_dir.join(&self.queue_file) }

    fn publisher(&self) -> Result<Publisher, Whatever> {
        let options = PublisherOptions::builder()
            .root_dir(self.root_dir.clone())
            .queue_file_name(self.queue_file.clone())
            .build();
        Publisher::builder()
            .options(options)
            .config(Arc::new(FileConfig::new(&self.config)))
            .broker(Arc::new(AmqpBroker))
            .runtime(Handle::current())
            .build()
            .whatever_context("Failed to create publisher")
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Enqueue(EnqueueArgs),
    Notify(NotifyArgs),
    Run(RunArgs),
    Status(StatusArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Queue one payload for delivery. Without --wait the payload stays on disk
until a later `mqnotify run` delivers it. Fails while another process,
such as `mqnotify run`, owns the queue file.
Examples:

mqnotify enqueue --file event.json --wait 30
echo '{}' | mqnotify enqueue

")]
struct EnqueueArgs {
    /// Payload file. Reads stdin when absent.
    #[arg(long, short)]
    file: Option<PathBuf>,
    /// Seconds to wait for the queue to drain before exiting.
    #[arg(long, value_name = "SECS")]
    wait: Option<u64>,
}

impl EnqueueArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let payload = read_input(self.file.as_deref())?;
        if payload.is_empty() {
            whatever!("Refusing to enqueue an empty payload");
        }
        let publisher = global.publisher()?;
        publisher
            .start()
            .whatever_context("Failed to open queue file")?;
        publisher.enqueue(&payload);
        finish(publisher, self.wait).await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r#"

Build a run-completed message from a run descriptor and queue it.
Examples:

mqnotify notify --run run.json
echo '{"name":"nightly","number":42,"result":"SUCCESS"}' | mqnotify notify

"#)]
struct NotifyArgs {
    /// Run descriptor JSON. Reads stdin when absent.
    #[arg(long, short)]
    run:  Option<PathBuf>,
    /// Seconds to wait for the queue to drain before exiting.
    #[arg(long, value_name = "SECS")]
    wait: Option<u64>,
}

impl NotifyArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let input = read_input(self.run.as_deref())?;
        let run: RunDescriptor =
            serde_json::from_slice(&input).whatever_context("Invalid run descriptor")?;
        let payload = PayloadBuilder::default()
            .build(&run)
            .whatever_context("Failed to serialise payload")?;

        let publisher = global.publisher()?;
        publisher
            .start()
            .whatever_context("Failed to open queue file")?;
        publisher.enqueue(&payload);
        info!(name = %run.name, number = run.number, "Queued run-completed message");
        finish(publisher, self.wait).await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Deliver queued messages until Ctrl+C or SIGTERM. SIGHUP re-reads the
`log_level` key of the configuration file.
Examples:

mqnotify run --config /etc/mqnotify.toml --root-dir /var/lib/mqnotify

")]
struct RunArgs {}

impl RunArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let publisher = global.publisher()?;
        publisher
            .start()
            .whatever_context("Failed to open queue file")?;
        info!(pending = publisher.pending(), "Draining queue");

        let reload = tokio::spawn(reload_log_level_on_hangup(global.config.clone()));
        shutdown_signal().await;
        reload.abort();
        publisher.shutdown().await;
        print!("{}", metrics::render());
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the number of queued records and the size of the queue file. Reads
the committed header only, so it is safe while `mqnotify run` is active.
Examples:

mqnotify status --root-dir /var/lib/mqnotify

")]
struct StatusArgs {}

impl StatusArgs {
    fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let path = global.queue_path();
        if !path.exists() {
            println!("{}: no queue file", path.display());
            return Ok(());
        }

        let status = QueueFile::inspect(&path)
            .with_whatever_context(|_| format!("Failed to read {}", path.display()))?;
        println!(
            "{}: {} records, {} live bytes, {} bytes on disk{}",
            path.display(),
            status.records,
            status.live_bytes,
            status.file_len,
            if status.in_use { ", in use" } else { "" }
        );
        Ok(())
    }
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>, Whatever> {
    match path {
        Some(path) => std::fs::read(path)
            .with_whatever_context(|_| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .whatever_context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn finish(publisher: Publisher, wait: Option<u64>) -> Result<(), Whatever> {
    if let Some(secs) = wait {
        if !publisher.wait_until_drained(Duration::from_secs(secs)).await {
            warn!(
                pending = publisher.pending(),
                "Queue not drained in time, remaining messages stay on disk"
            );
        }
    }
    publisher.shutdown().await;
    Ok(())
}

/// Reads `log_level` from the configuration file, with `MQNOTIFY__LOG_LEVEL`
/// taking precedence.
fn configured_log_level(path: &Path) -> Result<Option<String>, Whatever> {
    let config = config::Config::builder()
        .add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .with_whatever_context(|_| format!("Failed to load {}", path.display()))?;
    match config.get_string("log_level") {
        Ok(level) => Ok(Some(level)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e).whatever_context("Invalid log_level"),
    }
}

#[cfg(unix)]
async fn reload_log_level_on_hangup(config: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        match configured_log_level(&config) {
            Ok(Some(level)) => {
                if let Err(e) = set_log_level(&level) {
                    warn!(error = %e, "Keeping the current log level");
                }
            }
            Ok(None) => info!("No log_level configured, keeping the current log level"),
            Err(e) => warn!(error = %e, "Failed to reload configuration"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_log_level_on_hangup(_config: PathBuf) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("mqnotify", &cli.global.logging_options())
        .whatever_context("Failed to initialise logging")?;
    set_panic_hook();

    match &cli.commands {
        Commands::Enqueue(args) => args.run(&cli.global).await,
        Commands::Notify(args) => args.run(&cli.global).await,
        Commands::Run(args) => args.run(&cli.global).await,
        Commands::Status(args) => args.run(&cli.global),
    }
}
