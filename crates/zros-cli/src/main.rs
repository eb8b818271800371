//! `zros` – bridges numeric samples from a ZeroMQ topic onto a ROS topic.
//!
//! 1. Loads `~/.zros/config.toml` (or `--config`), then `ZROS_*` overrides,
//!    then command-line flags.
//! 2. Connects the ZeroMQ SUB socket and advertises the ROS topic through
//!    rosbridge.  Either failure aborts before anything is bridged.
//! 3. Runs the bridge on a single-threaded runtime until SIGINT/SIGTERM,
//!    or until a malformed payload under `--on-parse-error fail`.
//!
//! # Usage
//!
//! ```bash
//! zros --topic B
//! zros --endpoint tcp://10.0.0.5:4242 --filter B --topic /sensor/value
//! zros --topic B -- __name:=zmq_bridge
//! zros --gen-config ~/.zros/config.toml
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::{debug, error, info, warn};

use zros_middleware::{Bridge, BridgeStats, RosbridgePublisher, ZmqSubscriber};
use zros_types::{BridgeError, ParseFailurePolicy};

use crate::config::Config;

/// ZeroMQ → ROS numeric bridge
#[derive(Parser, Debug)]
#[command(name = "zros")]
#[command(about = "Republish numeric ZeroMQ messages as std_msgs/Float64 on a ROS topic")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Outbound ROS topic; inbound payloads equal to it are dropped
    #[arg(short, long)]
    topic: Option<String>,

    /// ZeroMQ endpoint to subscribe to
    #[arg(short, long)]
    endpoint: Option<String>,

    /// ZeroMQ subscription prefix
    #[arg(short, long)]
    filter: Option<String>,

    /// rosbridge WebSocket URL
    #[arg(long)]
    rosbridge_url: Option<String>,

    /// Node name reported to rosbridge
    #[arg(long)]
    node_name: Option<String>,

    /// What to do with a payload that is not a number (skip, fail)
    #[arg(long)]
    on_parse_error: Option<ParseFailurePolicy>,

    /// Pause after a failed receive, in milliseconds
    #[arg(long)]
    retry_backoff_ms: Option<u64>,

    /// Give up connecting to the ZeroMQ endpoint after this many milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Reconnect the SUB socket after this many milliseconds without traffic (0 never)
    #[arg(long)]
    idle_resubscribe_ms: Option<u64>,

    /// Write a configuration file with the default settings and exit
    #[arg(long, value_name = "PATH")]
    gen_config: Option<Option<PathBuf>>,

    /// ROS process arguments (e.g. `__name:=bridge`), given after `--`
    #[arg(last = true)]
    ros_args: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // The OTLP exporter is synchronous; install tracing before the runtime.
    let _guard = telemetry::init_tracing("zros");

    if let Some(output) = &args.gen_config {
        let path = output.clone().unwrap_or_else(config::config_path);
        return match config::save_to(&Config::default(), &path) {
            Ok(()) => {
                println!(
                    "  {} Config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                ExitCode::FAILURE
            }
        };
    }

    let cfg = match resolve_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    print_banner(&cfg);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(stats) => {
            info!(published = stats.published, received = stats.received, "exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "bridge failed");
            ExitCode::FAILURE
        }
    }
}

/// Connect both transports, then bridge until a shutdown signal.
async fn run(cfg: Config) -> Result<BridgeStats, BridgeError> {
    let source = ZmqSubscriber::connect(
        cfg.endpoint.as_str(),
        cfg.filter_token.as_str(),
        cfg.subscriber_settings(),
    )
    .await?;
    // On failure here the subscriber is dropped, closing the inbound socket.
    let publisher = RosbridgePublisher::connect(
        cfg.rosbridge_url.as_str(),
        cfg.outbound_topic.as_str(),
        &cfg.node_name,
    )
    .await?;

    Bridge::new(source, publisher, cfg.bridge_settings())
        .run_until(shutdown_signal())
        .await
}

/// Resolve the effective configuration: file, environment, then flags.
fn resolve_config(args: &Args) -> Result<Config, BridgeError> {
    let mut cfg = config::load(args.config.as_deref())?;
    apply_args(&mut cfg, args);
    cfg.validate()?;
    debug!(?cfg, "configuration resolved");
    Ok(cfg)
}

fn apply_args(cfg: &mut Config, args: &Args) {
    if let Some(v) = &args.topic {
        cfg.outbound_topic = v.clone();
    }
    if let Some(v) = &args.endpoint {
        cfg.endpoint = v.clone();
    }
    if let Some(v) = &args.filter {
        cfg.filter_token = v.clone();
    }
    if let Some(v) = &args.rosbridge_url {
        cfg.rosbridge_url = v.clone();
    }
    if let Some(v) = &args.node_name {
        cfg.node_name = v.clone();
    }
    if let Some(v) = args.on_parse_error {
        cfg.on_parse_error = v;
    }
    if let Some(v) = args.retry_backoff_ms {
        cfg.retry_backoff_ms = v;
    }
    if let Some(v) = args.connect_timeout_ms {
        cfg.connect_timeout_ms = v;
    }
    if let Some(v) = args.idle_resubscribe_ms {
        cfg.idle_resubscribe_ms = v;
    }
    apply_ros_args(cfg, &args.ros_args);
}

/// Honour the ROS bootstrap arguments that mean something over rosbridge.
///
/// Only `__name:=` is applied; everything else is logged and ignored.
fn apply_ros_args(cfg: &mut Config, ros_args: &[String]) {
    for arg in ros_args {
        match arg.split_once(":=") {
            Some(("__name", name)) if !name.is_empty() => cfg.node_name = name.to_string(),
            _ => warn!(arg = %arg, "ROS argument has no effect over rosbridge"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn print_banner(cfg: &Config) {
    println!();
    println!("  {} {}", "zros".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  {} {} [{}]", "in ".dimmed(), cfg.endpoint.bold(), cfg.filter_token);
    println!("  {} {} via {}", "out".dimmed(), cfg.outbound_topic.bold(), cfg.rosbridge_url);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("zros").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_config() {
        let args = parse(&[
            "--topic",
            "/sensor/value",
            "--endpoint",
            "tcp://10.0.0.5:4242",
            "--filter",
            "S",
            "--on-parse-error",
            "fail",
            "--retry-backoff-ms",
            "0",
            "--connect-timeout-ms",
            "750",
            "--idle-resubscribe-ms",
            "0",
        ]);
        let mut cfg = Config::default();
        apply_args(&mut cfg, &args);

        assert_eq!(cfg.outbound_topic, "/sensor/value");
        assert_eq!(cfg.endpoint, "tcp://10.0.0.5:4242");
        assert_eq!(cfg.filter_token, "S");
        assert_eq!(cfg.on_parse_error, ParseFailurePolicy::FailFast);
        assert!(cfg.bridge_settings().retry_backoff.is_zero());
        assert_eq!(cfg.subscriber_settings().connect_timeout.as_millis(), 750);
        assert!(cfg.subscriber_settings().idle_resubscribe.is_zero());
    }

    #[test]
    fn absent_flags_keep_config_values() {
        let args = parse(&[]);
        let mut cfg = Config::default();
        apply_args(&mut cfg, &args);
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn ros_name_argument_sets_node_name() {
        let args = parse(&["--topic", "B", "--", "__name:=bridge", "__log:=/tmp/x"]);
        let mut cfg = Config::default();
        apply_args(&mut cfg, &args);
        assert_eq!(cfg.node_name, "bridge");
        assert_eq!(args.ros_args.len(), 2);
    }

    #[test]
    fn invalid_policy_is_rejected_by_parser() {
        let result = Args::try_parse_from(["zros", "--on-parse-error", "explode"]);
        assert!(result.is_err());
    }

    #[test]
    fn gen_config_flag_parses() {
        let args = parse(&["--gen-config", "/tmp/zros.toml"]);
        assert_eq!(args.gen_config, Some(Some(PathBuf::from("/tmp/zros.toml"))));

        let args = parse(&["--gen-config"]);
        assert_eq!(args.gen_config, Some(None));

        assert_eq!(parse(&[]).gen_config, None);
    }
}
