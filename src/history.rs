//! Bounded time-series history for nvmon.
//!
//! Five parallel ring buffers (timestamp, utilization, temperature, power,
//! memory-percent) with a fixed capacity. The invariant maintained here is
//! that all five series always have equal length and that index `i` across
//! all of them refers to the same poll cycle; appending is the only mutation
//! and eviction happens simultaneously across the series.
//!
//! The store is owned by the single consumer loop and never shared across
//! threads, so exports always see a fully consistent snapshot.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use chrono::Local;
use serde::Serialize;

use crate::metrics::GpuSnapshot;

/// Number of poll cycles retained. At the default 2-second poll interval
/// this is ten minutes of history.
pub const HISTORY_SIZE: usize = 300;

/// Column headers of the CSV export, in row order.
const CSV_HEADER: [&str; 5] = [
    "Timestamp",
    "Utilization (%)",
    "Temperature (C)",
    "Power (W)",
    "Memory (%)",
];

/// Fixed-capacity history of recent poll cycles.
pub struct History {
    capacity: usize,
    timestamps: VecDeque<String>,
    utilization: VecDeque<f64>,
    temperature: VecDeque<i64>,
    power: VecDeque<f64>,
    memory_pct: VecDeque<f64>,
}

/// One history row as it appears in the JSON export.
#[derive(Serialize)]
struct ExportSample<'a> {
    timestamp: &'a str,
    utilization: f64,
    temperature: i64,
    power: f64,
    memory: f64,
}

/// Top-level JSON export document.
#[derive(Serialize)]
struct ExportDocument<'a> {
    export_time: String,
    gpu_name: &'a str,
    data: Vec<ExportSample<'a>>,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(HISTORY_SIZE)
    }
}

impl History {
    /// Create a store retaining at most `capacity` cycles.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            timestamps: VecDeque::with_capacity(capacity),
            utilization: VecDeque::with_capacity(capacity),
            temperature: VecDeque::with_capacity(capacity),
            power: VecDeque::with_capacity(capacity),
            memory_pct: VecDeque::with_capacity(capacity),
        }
    }

    /// Append one poll cycle, evicting the oldest cycle from every series
    /// once capacity is reached.
    pub fn push(&mut self, snapshot: &GpuSnapshot, timestamp: String) {
        if self.timestamps.len() >= self.capacity {
            self.timestamps.pop_front();
            self.utilization.pop_front();
            self.temperature.pop_front();
            self.power.pop_front();
            self.memory_pct.pop_front();
        }

        self.timestamps.push_back(timestamp);
        self.utilization.push_back(snapshot.utilization);
        self.temperature.push_back(snapshot.temperature_c);
        self.power.push_back(snapshot.power_draw_w);
        self.memory_pct.push_back(snapshot.memory_percent());
    }

    /// Number of retained cycles.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Utilization series, oldest first (for charting).
    pub fn utilization(&self) -> &VecDeque<f64> {
        &self.utilization
    }

    /// Temperature series, oldest first (for charting).
    pub fn temperature(&self) -> &VecDeque<i64> {
        &self.temperature
    }

    /// Write the full retained history as CSV.
    pub fn export_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = csv::Writer::from_path(path).map_err(std::io::Error::other)?;
        writer
            .write_record(CSV_HEADER)
            .map_err(std::io::Error::other)?;

        for i in 0..self.len() {
            writer
                .write_record([
                    self.timestamps[i].clone(),
                    self.utilization[i].to_string(),
                    self.temperature[i].to_string(),
                    self.power[i].to_string(),
                    self.memory_pct[i].to_string(),
                ])
                .map_err(std::io::Error::other)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Write the full retained history as JSON, tagged with the export time
    /// and device name.
    pub fn export_json(&self, path: &Path, gpu_name: &str) -> std::io::Result<()> {
        let doc = ExportDocument {
            export_time: Local::now().to_rfc3339(),
            gpu_name,
            data: (0..self.len())
                .map(|i| ExportSample {
                    timestamp: &self.timestamps[i],
                    utilization: self.utilization[i],
                    temperature: self.temperature[i],
                    power: self.power[i],
                    memory: self.memory_pct[i],
                })
                .collect(),
        };

        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &doc).map_err(std::io::Error::other)?;
        Ok(())
    }
}
