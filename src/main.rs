//! # nvmon
//!
//! A real-time NVIDIA GPU monitor driven by `nvidia-smi`.
//!
//! ## Overview
//!
//! `nvmon` polls the driver tool on a background thread, parses its CSV
//! query output into typed metrics, keeps a bounded in-memory history,
//! evaluates debounced alert thresholds, and renders everything in a
//! terminal dashboard. It tolerates the messy reality of driver output:
//! field counts vary across driver versions and operating systems, fan
//! speed may be reported as `[N/A]`, and the tool itself may be missing
//! entirely - none of which stops the monitor.
//!
//! ## Features
//!
//! - **Background polling** with retries and a latest-value mailbox, so a
//!   slow or failing driver call never blocks the dashboard
//! - **Bounded history**: the last 300 samples of utilization, temperature,
//!   power, and memory, exportable as CSV or JSON
//! - **Debounced alerts**: desktop notifications for temperature and
//!   utilization thresholds, at most once per 5 minutes per kind
//! - **Power limit control**: query the supported range and apply a new
//!   limit (privileged) from the command line
//!
//! ## Usage
//!
//! ```bash
//! # Run the dashboard
//! nvmon
//!
//! # Headless status lines over SSH
//! nvmon --headless --interval-ms 5000
//!
//! # One-shot power limit management
//! nvmon --power-limits
//! nvmon --set-power-limit 200
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: command-line argument parsing
//! - [`settings`]: persisted user preferences
//! - [`metrics`]: parsed data structures
//! - [`parser`]: tolerant parsing of nvidia-smi query output
//! - [`smi`]: subprocess invocation and retry policy
//! - [`scheduler`]: background polling worker and mailbox
//! - [`history`]: bounded time-series store and export
//! - [`alerts`]: debounced threshold alerting
//! - [`power`]: power-limit query and mutation
//! - [`app`]: consumer-loop state and coordination
//! - [`ui`]: terminal dashboard and headless mode

mod alerts;
mod app;
mod cli;
mod history;
mod metrics;
mod parser;
mod power;
mod scheduler;
mod settings;
mod smi;
mod thresholds;
mod ui;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use app::App;
use cli::Cli;
use power::PowerControl;

fn main() -> std::io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // One-shot power management modes skip the dashboard entirely.
    if cli.power_limits || cli.set_power_limit.is_some() {
        return run_power_mode(&cli);
    }

    // Setup Ctrl+C / SIGTERM handler
    let running = Arc::new(AtomicBool::new(true));
    setup_signal_handler(running.clone());

    let app = App::new(cli.clone());

    // Check if stdout is a TTY - if not, force headless mode
    let use_headless = cli.headless || !is_terminal();
    if !cli.headless && !is_terminal() {
        eprintln!("Warning: stdout is not a TTY, running in headless mode");
    }

    if use_headless {
        ui::run_headless(app, running)?;
    } else {
        ui::run(app, running)?;
    }

    Ok(())
}

/// Handle `--power-limits` and `--set-power-limit`.
fn run_power_mode(cli: &Cli) -> std::io::Result<()> {
    let mut power = PowerControl::default();
    let limits = power.read_limits();

    let show = |value: Option<f64>| match value {
        Some(w) => format!("{} W", w),
        None => "Unknown".to_string(),
    };
    println!("GPU: {}", power.device_name());
    println!("Current power limit: {}", show(limits.current_w));
    println!(
        "Supported range:     {} - {}",
        show(limits.min_w),
        show(limits.max_w)
    );

    if let Some(watts) = cli.set_power_limit {
        match power.apply_limit(watts) {
            Ok(output) => {
                println!("\nPower limit applied successfully.");
                let output = output.trim();
                if !output.is_empty() {
                    println!("{}", output);
                }
            }
            Err(err) => {
                eprintln!("\nFailed to apply power limit: {}", err);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Global flag for signal handler (must be static for signal safety).
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Set up signal handlers for graceful shutdown.
fn setup_signal_handler(running: Arc<AtomicBool>) {
    // Spawn a thread to monitor the signal flag and propagate to running
    let running_clone = running.clone();
    std::thread::spawn(move || {
        while running_clone.load(Ordering::Relaxed) {
            if SIGNAL_RECEIVED.load(Ordering::Relaxed) {
                running_clone.store(false, Ordering::Relaxed);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    });

    unsafe {
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
}

/// Signal handler that sets the signal flag (async-signal-safe).
extern "C" fn signal_handler(_: i32) {
    SIGNAL_RECEIVED.store(true, Ordering::Relaxed);
}

/// Check if stdout is connected to a terminal.
fn is_terminal() -> bool {
    unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 }
}
