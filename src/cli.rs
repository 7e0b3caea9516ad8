//! Command-line interface for nvmon.
//!
//! Persistent user preferences (poll interval, alert thresholds) live in
//! [`crate::settings`]; the flags here either override them for one run or
//! select a one-shot mode that skips the dashboard entirely.

use clap::Parser;

/// Real-time NVIDIA GPU monitor.
///
/// nvmon polls nvidia-smi in the background and shows utilization, VRAM,
/// temperature, power draw and the compute process list in a terminal
/// dashboard, with bounded in-memory history, debounced desktop alerts,
/// and CSV/JSON export.
///
/// # Examples
///
/// ```bash
/// # Run the dashboard
/// nvmon
///
/// # Headless status lines, polling every 5 seconds
/// nvmon --headless --interval-ms 5000
///
/// # Print the power limit range and exit
/// nvmon --power-limits
///
/// # Set a 200 W power limit (needs elevated privileges) and exit
/// nvmon --set-power-limit 200
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Monitor NVIDIA GPU metrics from nvidia-smi")]
pub struct Cli {
    /// Poll interval override in milliseconds.
    ///
    /// Clamped to 500-60000 ms. Without this flag the persisted setting
    /// (default 2000 ms) is used.
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// Run in headless mode (no TUI, one status line per sample).
    ///
    /// Useful over SSH or when piping output to a log. Also forced
    /// automatically when stdout is not a terminal.
    #[arg(long)]
    pub headless: bool,

    /// Path used by the in-dashboard CSV export (key `e`).
    #[arg(long, default_value = "nvmon-history.csv")]
    pub csv_file: String,

    /// Path used by the in-dashboard JSON export (key `j`).
    #[arg(long, default_value = "nvmon-history.json")]
    pub json_file: String,

    /// Print the current/min/max power limits and exit.
    #[arg(long)]
    pub power_limits: bool,

    /// Set a new GPU power limit in Watts and exit.
    ///
    /// Requires administrator privileges (sudo is prefixed automatically on
    /// non-Windows systems). Values outside the driver-reported range are
    /// rejected before the privileged command is issued.
    #[arg(long, value_name = "WATTS")]
    pub set_power_limit: Option<f64>,
}
