//! Metrics data structures for nvmon.
//!
//! This module defines the [`GpuSnapshot`] struct holding one fully-parsed
//! set of GPU metrics from a single poll cycle, and the [`ProcessEntry`]
//! records for the compute processes currently using the GPU.

/// Complete snapshot of GPU metrics at a point in time.
///
/// Produced fresh by [`crate::parser::parse_metrics`] on every poll cycle and
/// never mutated afterwards. The history store takes rows from it by value;
/// the alert engine only reads it.
///
/// Every numeric field always resolves to a concrete value even on malformed
/// driver output (see the parser for the per-field fallbacks). Fan speed is
/// the only field that can be genuinely unknown: some GPUs (and most laptop
/// drivers) report `[N/A]` for it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GpuSnapshot {
    /// GPU compute utilization in percent (nominally 0-100, not clamped)
    pub utilization: f64,
    /// VRAM currently in use, in MB
    pub mem_used_mb: f64,
    /// Total VRAM, in MB (falls back to 1 so ratios stay defined)
    pub mem_total_mb: f64,
    /// Core temperature in Celsius
    pub temperature_c: i64,
    /// Current power draw in Watts
    pub power_draw_w: f64,
    /// Enforced power limit in Watts (falls back to 1, see mem_total_mb)
    pub power_limit_w: f64,
    /// Fan speed in percent, None when the driver reports it unavailable
    pub fan_pct: Option<f64>,
    /// Graphics clock in MHz
    pub clock_core_mhz: f64,
    /// Memory clock in MHz
    pub clock_mem_mhz: f64,
}

impl GpuSnapshot {
    /// VRAM usage as a percentage, guarded against a zero total.
    pub fn memory_percent(&self) -> f64 {
        if self.mem_total_mb != 0.0 {
            self.mem_used_mb / self.mem_total_mb * 100.0
        } else {
            0.0
        }
    }

    /// Power draw as a percentage of the enforced limit.
    pub fn power_percent(&self) -> f64 {
        if self.power_limit_w != 0.0 {
            self.power_draw_w / self.power_limit_w * 100.0
        } else {
            0.0
        }
    }
}

/// One compute process currently holding GPU memory.
///
/// All fields are kept as the raw strings reported by the driver. The memory
/// column in particular is unit-bearing ("123 MiB") and deliberately not
/// normalized; it is display data, not something thresholds are applied to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process ID as reported
    pub pid: String,
    /// Executable name or path
    pub name: String,
    /// Used GPU memory, unit included
    pub memory: String,
}
