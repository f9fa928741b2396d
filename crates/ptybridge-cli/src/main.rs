//! ptybridge CLI and bridge entry point.

mod args;
mod daemon;
mod error;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use ptybridge_core::error::ErrorKind;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info, warn};

use crate::args::{Cli, Commands, PortsArgs, RunArgs};
use crate::daemon::announce::Announcement;
use crate::daemon::{launcher, paths, Bridge, BridgeOptions};
use crate::error::BridgeError;

fn main() {
    let cli = Cli::parse();

    // A detached bridge has no terminal, so it logs to its session log file.
    let log_file = match &cli.command {
        Commands::Run(args) if args.detached => {
            Some(paths::get_log_path(args.relay.session.as_deref()))
        }
        _ => None,
    };
    init_tracing(log_file);

    let code = match cli.command {
        Commands::Run(args) => run_bridge(args),
        Commands::Start(args) => report(launcher::start(&args).map(|listing| {
            print!("{}", listing.render());
        })),
        Commands::Stop(args) => report(launcher::stop(args.session.as_deref())),
        Commands::Ports(args) => report(print_ports(&args)),
    };
    std::process::exit(code);
}

/// Initialize tracing.
///
/// Logs go to stderr so that stdout carries only the port listing, or to
/// `log_file` when given.
fn init_tracing(log_file: Option<PathBuf>) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let file = log_file.and_then(|path| {
        paths::ensure_runtime_dir().ok()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Log a command failure and turn it into an exit status.
fn report(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            report_error(&e);
            1
        }
    }
}

/// One-line diagnostic naming the failure kind, when there is one.
fn report_error(e: &anyhow::Error) {
    match e.downcast_ref::<BridgeError>() {
        Some(bridge_error) => report_bridge_error(bridge_error),
        None => error!("{:#}", e),
    }
}

fn report_bridge_error(e: &BridgeError) {
    let kind = e.kind();
    match kind.suggestion() {
        Some(hint) => error!("[{}] {} (hint: {})", kind, e, hint),
        None => error!("[{}] {}", kind, e),
    }
}

fn print_ports(args: &PortsArgs) -> anyhow::Result<()> {
    let status = launcher::status(args.session.as_deref(), args.ports_file.as_deref())?;
    if !status.alive {
        warn!("Bridge '{}' does not appear to be running", status.session);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", status.ports.render());
    }
    Ok(())
}

/// Run a bridge until interrupted or until a transfer fails.
///
/// The same entry point serves foreground and detached bridges; only the
/// announcement destination and the log target differ.
fn run_bridge(args: RunArgs) -> i32 {
    let session = paths::resolve_session(args.relay.session.as_deref());

    let options = if args.detached {
        let ports_path = args
            .relay
            .ports_file
            .clone()
            .unwrap_or_else(|| paths::get_ports_path(Some(&session)));
        BridgeOptions {
            relay: args.relay.relay_config(),
            announcement: Announcement::file(ports_path),
            pid_path: Some(paths::get_pid_path(Some(&session))),
        }
    } else {
        let announcement = match &args.relay.ports_file {
            Some(path) => Announcement::stdout().with_file(path),
            None => Announcement::stdout(),
        };
        BridgeOptions {
            relay: args.relay.relay_config(),
            announcement,
            pid_path: None,
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    runtime.block_on(async {
        if args.detached {
            if let Err(e) = paths::ensure_runtime_dir() {
                error!("Failed to create runtime directory: {}", e);
                return 1;
            }
        }

        let shutdown = shutdown_signal();

        let bridge = match Bridge::open(options) {
            Ok(bridge) => bridge,
            Err(e) => {
                report_error(&e);
                return 1;
            }
        };

        if args.detached {
            let listing = bridge.listing();
            info!(
                "Bridge '{}' running (PID {}) on {} and {}",
                session,
                std::process::id(),
                listing.port_a.display(),
                listing.port_b.display()
            );
        } else {
            info!("Bridging ports... Press Ctrl+C to exit.");
        }

        let code = match bridge.run_until(shutdown).await {
            Ok(name) => {
                info!("Received {}, shutting down gracefully", name);
                info!("Bridge terminated.");
                ErrorKind::Interrupted.exit_code()
            }
            Err(e) => {
                report_bridge_error(&e);
                e.kind().exit_code()
            }
        };

        // Bridge is dropped here, closing both PTYs and removing its files
        drop(bridge);
        code
    })
}

/// Listen for SIGINT and SIGTERM, resolving with the name of the first one.
///
/// Handlers are installed when this is called, so a signal that arrives
/// right after the ports are announced still shuts the bridge down cleanly.
fn shutdown_signal() -> impl Future<Output = &'static str> {
    let sigint = listen(SignalKind::interrupt(), "SIGINT");
    let sigterm = listen(SignalKind::terminate(), "SIGTERM");
    async move {
        tokio::select! {
            _ = received(sigint) => "SIGINT",
            _ = received(sigterm) => "SIGTERM",
        }
    }
}

/// Register a signal handler; if registration fails, logs a warning and the
/// bridge will only respond to the other signal.
fn listen(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Failed to register {} handler: {}", name, e);
            None
        }
    }
}

async fn received(stream: Option<Signal>) {
    match stream {
        Some(mut stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
