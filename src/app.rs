//! Application state and the consumer loop for nvmon.
//!
//! The [`App`] owns everything the front end needs: settings, history,
//! alert state, cached device facts, and the handle to the background
//! sampler. Its [`App::tick`] method is the single cooperative step any
//! front end (TUI or headless loop) drives: read the mailbox, parse, record
//! history, evaluate alerts, and report how long to wait before the next
//! tick.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use log::info;

use crate::alerts::{self, AlertEngine};
use crate::cli::Cli;
use crate::history::History;
use crate::metrics::{GpuSnapshot, ProcessEntry};
use crate::parser;
use crate::power::PowerControl;
use crate::scheduler::Sampler;
use crate::settings::Settings;
use crate::thresholds::DisplayBands;

/// Delay before re-checking the mailbox while waiting for the very first
/// observation after startup (or after a manual refresh).
const STARTUP_POLL: Duration = Duration::from_millis(500);

/// Delay between ticks while the sampler keeps reporting errors.
const ERROR_POLL: Duration = Duration::from_secs(3);

/// What a tick produced, so front ends can react without re-reading state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing published yet
    Waiting,
    /// A fresh sample was parsed and recorded
    Fresh,
    /// The mailbox held a sample we already consumed
    Unchanged,
    /// The sampler reported a fetch failure
    Errored,
}

/// Presentation state derived from the latest consumed observation.
#[derive(Clone, Debug, Default)]
pub struct View {
    /// Latest parsed snapshot, if any sample arrived yet
    pub snapshot: Option<GpuSnapshot>,
    /// Compute process table, replaced wholesale each sample
    pub processes: Vec<ProcessEntry>,
    /// Persistent error banner (tool missing, driver failure)
    pub error: Option<String>,
    /// One-line status for the bottom bar
    pub status: String,
}

/// Main application state.
pub struct App {
    pub cli: Cli,
    pub settings: Settings,
    pub history: History,
    pub bands: DisplayBands,
    pub view: View,
    pub device_name: String,
    power: PowerControl,
    alert_engine: AlertEngine,
    sampler: Sampler,
    last_consumed: Option<DateTime<Local>>,
}

impl App {
    /// Build the application: load persisted settings, apply CLI overrides,
    /// resolve static device facts, and start the background sampler.
    pub fn new(cli: Cli) -> Self {
        let mut settings = Settings::load();
        if let Some(interval) = cli.interval_ms {
            settings.poll_interval_ms = interval;
            settings.clamp();
        }

        let mut power = PowerControl::default();
        let device_name = power.device_name().to_string();

        let sampler = Sampler::start(settings.poll_interval());
        info!(
            "monitoring {} every {} ms",
            device_name, settings.poll_interval_ms
        );

        Self {
            cli,
            settings,
            history: History::default(),
            bands: DisplayBands::default(),
            view: View {
                status: "Initializing...".into(),
                ..Default::default()
            },
            device_name,
            power,
            alert_engine: AlertEngine::default(),
            sampler,
            last_consumed: None,
        }
    }

    /// One consumer-loop step. Returns how long the front end should wait
    /// before calling again: sub-second while waiting for the first
    /// observation, a few seconds while the tool keeps failing, and the
    /// configured poll interval once samples flow.
    pub fn tick(&mut self) -> (TickOutcome, Duration) {
        let Some(obs) = self.sampler.mailbox().latest() else {
            self.view.status = "Waiting for first sample...".into();
            return (TickOutcome::Waiting, STARTUP_POLL);
        };

        let raw = match obs.outcome {
            Ok(raw) => raw,
            Err(err) => {
                self.view.error = Some(err.to_string());
                self.view.status =
                    format!("Error at {}", obs.taken_at.format("%H:%M:%S"));
                return (TickOutcome::Errored, ERROR_POLL);
            }
        };

        // The mailbox keeps the latest observation around between worker
        // cycles; only record each one once.
        if self.last_consumed == Some(obs.taken_at) {
            return (TickOutcome::Unchanged, self.settings.poll_interval());
        }
        self.last_consumed = Some(obs.taken_at);

        let snapshot = parser::parse_metrics(&raw.gpu_csv);
        let processes = parser::parse_processes(&raw.proc_csv);

        self.history
            .push(&snapshot, obs.taken_at.format("%H:%M:%S").to_string());

        for event in self
            .alert_engine
            .evaluate(&snapshot, &self.settings, Utc::now())
        {
            info!("alert fired: {}", event.message);
            alerts::dispatch(&event);
        }

        self.view.error = None;
        self.view.status = format!(
            "Last updated {} · every {:.1}s · alerts {}",
            obs.taken_at.format("%H:%M:%S"),
            self.settings.poll_interval_ms as f64 / 1000.0,
            if self.settings.alerts_enabled { "on" } else { "off" }
        );
        self.view.snapshot = Some(snapshot);
        self.view.processes = processes;

        (TickOutcome::Fresh, self.settings.poll_interval())
    }

    /// Cancel the current poll cycle and start a fresh one.
    ///
    /// The old worker is stopped with a bounded wait and its mailbox
    /// abandoned, so a late in-flight result cannot surface afterwards.
    pub fn manual_refresh(&mut self) {
        self.sampler.stop();
        self.sampler = Sampler::start(self.settings.poll_interval());
        self.last_consumed = None;
        self.view.status = "Refreshing...".into();
    }

    /// Adjust the poll interval by `delta_ms`, clamped, persisted, and
    /// applied by restarting the sampler.
    pub fn adjust_interval(&mut self, delta_ms: i64) {
        let current = self.settings.poll_interval_ms as i64;
        self.settings.poll_interval_ms = current.saturating_add(delta_ms).max(0) as u64;
        self.settings.clamp();
        self.settings.save();
        self.manual_refresh();
    }

    /// Flip the alert master switch and persist it.
    pub fn toggle_alerts(&mut self) {
        self.settings.alerts_enabled = !self.settings.alerts_enabled;
        self.settings.save();
    }

    /// Export the retained history as CSV to the configured path.
    pub fn export_csv(&mut self) {
        let path = self.cli.csv_file.clone();
        self.view.status = match self.history.export_csv(Path::new(&path)) {
            Ok(()) => format!("History exported to {}", path),
            Err(err) => format!("CSV export failed: {}", err),
        };
    }

    /// Export the retained history as JSON to the configured path.
    pub fn export_json(&mut self) {
        let path = self.cli.json_file.clone();
        let name = self.device_name.clone();
        self.view.status = match self.history.export_json(Path::new(&path), &name) {
            Ok(()) => format!("History exported to {}", path),
            Err(err) => format!("JSON export failed: {}", err),
        };
    }

    /// Current/min/max power limits (cached after the first read).
    pub fn power_limits(&mut self) -> crate::power::PowerLimits {
        self.power.read_limits()
    }

    /// Stop the sampler and persist settings.
    pub fn shutdown(&mut self) {
        self.sampler.stop();
        self.settings.save();
    }
}

#[cfg(test)]
impl App {
    /// An app wired to an idle sampler, so tests drive the mailbox directly
    /// instead of going through the external tool.
    fn with_sampler(sampler: Sampler) -> Self {
        Self {
            cli: <Cli as clap::Parser>::parse_from(["nvmon"]),
            settings: Settings::default(),
            history: History::default(),
            bands: DisplayBands::default(),
            view: View::default(),
            device_name: "Test GPU".into(),
            power: PowerControl::default(),
            alert_engine: AlertEngine::default(),
            sampler,
            last_consumed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Observation, Sampler};
    use crate::smi::{FetchError, RawSample};

    fn observation(gpu_csv: &str) -> Observation {
        Observation {
            taken_at: Local::now(),
            outcome: Ok(RawSample {
                gpu_csv: gpu_csv.to_string(),
                proc_csv: String::new(),
            }),
        }
    }

    #[test]
    fn observation_is_recorded_once_across_ticks() {
        let mut app = App::with_sampler(Sampler::idle());
        app.sampler
            .mailbox()
            .publish(observation("45, 2048, 8192, 67, 120.5, 250.0, 55, 1850, 7000"));

        let (outcome, _) = app.tick();
        assert_eq!(outcome, TickOutcome::Fresh);
        assert_eq!(app.history.len(), 1);

        // The mailbox still holds the same observation; ticking again must
        // not append it a second time.
        let (outcome, delay) = app.tick();
        assert_eq!(outcome, TickOutcome::Unchanged);
        assert_eq!(app.history.len(), 1);
        assert_eq!(delay, app.settings.poll_interval());
    }

    #[test]
    fn fresh_observation_is_recorded_after_a_duplicate() {
        let mut app = App::with_sampler(Sampler::idle());
        app.sampler
            .mailbox()
            .publish(observation("45, 2048, 8192, 67, 120.5, 250.0, 55, 1850, 7000"));
        app.tick();
        app.tick();
        assert_eq!(app.history.len(), 1);

        // A new publish carries a new timestamp and must be recorded.
        std::thread::sleep(std::time::Duration::from_millis(5));
        app.sampler
            .mailbox()
            .publish(observation("50, 2048, 8192, 68, 121.0, 250.0, 55, 1850, 7000"));
        let (outcome, _) = app.tick();
        assert_eq!(outcome, TickOutcome::Fresh);
        assert_eq!(app.history.len(), 2);
    }

    #[test]
    fn empty_mailbox_waits_without_recording() {
        let mut app = App::with_sampler(Sampler::idle());
        let (outcome, delay) = app.tick();
        assert_eq!(outcome, TickOutcome::Waiting);
        assert_eq!(delay, STARTUP_POLL);
        assert!(app.history.is_empty());
    }

    #[test]
    fn errored_observation_sets_the_banner_and_skips_history() {
        let mut app = App::with_sampler(Sampler::idle());
        app.sampler.mailbox().publish(Observation {
            taken_at: Local::now(),
            outcome: Err(FetchError::ToolMissing),
        });

        let (outcome, delay) = app.tick();
        assert_eq!(outcome, TickOutcome::Errored);
        assert_eq!(delay, ERROR_POLL);
        assert!(app.view.error.as_deref().unwrap().contains("not found"));
        assert!(app.history.is_empty());
    }
}
