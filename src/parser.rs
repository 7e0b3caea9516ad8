//! Parsing of nvidia-smi query output.
//!
//! The `--query-gpu` line is a single row of comma-separated values whose
//! exact field count and contents vary across driver versions, operating
//! systems, and GPU models. Strict parsing would make the whole pipeline
//! fragile to a single vendor quirk, so every field here is independently
//! defensive: an empty string, a missing trailing field, or the `[N/A]`
//! marker yields a defined fallback instead of an error. The parser never
//! fails, it degrades.

use log::debug;

use crate::metrics::{GpuSnapshot, ProcessEntry};

/// Sentinel nvidia-smi emits for fields the driver cannot report.
const NOT_AVAILABLE: &str = "[N/A]";

/// Parse one `--query-gpu` CSV line into a snapshot.
///
/// Expected field order: utilization.gpu, memory.used, memory.total,
/// temperature.gpu, power.draw, power.limit, fan.speed, clocks.gr,
/// clocks.mem. Counters default to 0; totals and limits default to 1 so
/// downstream ratios stay defined; fan speed is the only field allowed to
/// stay unknown.
pub fn parse_metrics(line: &str) -> GpuSnapshot {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();

    if parts.len() < 9 {
        debug!("query-gpu line has {} fields, expected 9", parts.len());
    }

    GpuSnapshot {
        utilization: float_field(&parts, 0, 0.0),
        mem_used_mb: float_field(&parts, 1, 0.0),
        mem_total_mb: float_field(&parts, 2, 1.0),
        temperature_c: float_field(&parts, 3, 0.0) as i64,
        power_draw_w: float_field(&parts, 4, 0.0),
        power_limit_w: float_field(&parts, 5, 1.0),
        fan_pct: optional_field(&parts, 6),
        clock_core_mhz: float_field(&parts, 7, 0.0),
        clock_mem_mhz: float_field(&parts, 8, 0.0),
    }
}

/// Parse the `--query-compute-apps` block into process entries.
///
/// One line per process. Blank lines are skipped and lines that don't have
/// exactly three comma-separated fields are dropped: truncated or corrupted
/// rows must not take down the table.
pub fn parse_processes(block: &str) -> Vec<ProcessEntry> {
    block
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            match parts.as_slice() {
                [pid, name, memory] => Some(ProcessEntry {
                    pid: (*pid).to_string(),
                    name: (*name).to_string(),
                    memory: (*memory).to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Format a used/total VRAM pair for display, returning the usage percent
/// alongside so callers don't recompute it from the rounded string.
///
/// Totals above 1024 MB switch the display to GB. The percent value, not the
/// string, is what alert thresholds compare against; the two must never be
/// confused.
pub fn format_memory(mem_used: f64, mem_total: f64) -> (String, f64) {
    let percent = if mem_total != 0.0 {
        mem_used / mem_total * 100.0
    } else {
        0.0
    };

    let text = if mem_total > 1024.0 {
        format!(
            "{:.1} GB / {:.1} GB ({:.1}%)",
            mem_used / 1024.0,
            mem_total / 1024.0,
            percent
        )
    } else {
        format!("{:.0} MB / {:.0} MB ({:.1}%)", mem_used, mem_total, percent)
    };

    (text, percent)
}

/// Numeric field with a fallback for missing/empty/`[N/A]`/unparsable input.
fn float_field(parts: &[&str], index: usize, default: f64) -> f64 {
    parts
        .get(index)
        .filter(|v| !v.is_empty() && **v != NOT_AVAILABLE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Numeric field that is allowed to be genuinely absent.
fn optional_field(parts: &[&str], index: usize) -> Option<f64> {
    parts
        .get(index)
        .filter(|v| !v.is_empty() && **v != NOT_AVAILABLE)
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let snap = parse_metrics("45, 2048, 8192, 67, 120.50, 250.00, 55, 1850, 7000");
        assert_eq!(snap.utilization, 45.0);
        assert_eq!(snap.mem_used_mb, 2048.0);
        assert_eq!(snap.mem_total_mb, 8192.0);
        assert_eq!(snap.temperature_c, 67);
        assert_eq!(snap.power_draw_w, 120.5);
        assert_eq!(snap.power_limit_w, 250.0);
        assert_eq!(snap.fan_pct, Some(55.0));
        assert_eq!(snap.clock_core_mhz, 1850.0);
        assert_eq!(snap.clock_mem_mhz, 7000.0);
    }

    #[test]
    fn missing_trailing_fields_never_panic() {
        let snap = parse_metrics("45, 2048, 8192, 67, 120.50, 250.00");
        assert_eq!(snap.utilization, 45.0);
        assert_eq!(snap.fan_pct, None);
        assert_eq!(snap.clock_core_mhz, 0.0);
        assert_eq!(snap.clock_mem_mhz, 0.0);
    }

    #[test]
    fn fan_sentinel_resolves_to_unknown() {
        let snap = parse_metrics("45, 2048, 8192, 67, 120.50, 250.00, [N/A], 1850, 7000");
        assert_eq!(snap.fan_pct, None);
    }

    #[test]
    fn empty_fields_use_per_field_defaults() {
        let snap = parse_metrics(", , , , , , , ,");
        assert_eq!(snap.utilization, 0.0);
        assert_eq!(snap.mem_used_mb, 0.0);
        assert_eq!(snap.mem_total_mb, 1.0);
        assert_eq!(snap.temperature_c, 0);
        assert_eq!(snap.power_draw_w, 0.0);
        assert_eq!(snap.power_limit_w, 1.0);
        assert_eq!(snap.fan_pct, None);
    }

    #[test]
    fn garbage_line_degrades_instead_of_failing() {
        let snap = parse_metrics("not a number at all");
        assert_eq!(snap.utilization, 0.0);
        assert_eq!(snap.mem_total_mb, 1.0);
        assert_eq!(snap.power_limit_w, 1.0);
    }

    #[test]
    fn parses_process_block() {
        let procs = parse_processes("1234, python3, 512 MiB\n5678, ffmpeg, 128 MiB\n");
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].pid, "1234");
        assert_eq!(procs[0].name, "python3");
        assert_eq!(procs[0].memory, "512 MiB");
        assert_eq!(procs[1].pid, "5678");
    }

    #[test]
    fn process_block_drops_malformed_rows() {
        let procs = parse_processes("\n1234, python3, 512 MiB\ncorrupted row\n99, a, b, extra\n");
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].pid, "1234");
    }

    #[test]
    fn format_memory_switches_units_at_one_gb() {
        assert_eq!(
            format_memory(2048.0, 8192.0),
            ("2.0 GB / 8.0 GB (25.0%)".to_string(), 25.0)
        );
        assert_eq!(
            format_memory(512.0, 1024.0),
            ("512 MB / 1024 MB (50.0%)".to_string(), 50.0)
        );
    }

    #[test]
    fn format_memory_guards_zero_total() {
        let (text, percent) = format_memory(100.0, 0.0);
        assert_eq!(percent, 0.0);
        assert!(text.contains("0.0%"));
    }
}
