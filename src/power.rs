//! Power-limit control for nvmon.
//!
//! Wraps the driver's power-management query and the privileged `-pl`
//! mutation. Static facts (device name, limit bounds) are resolved once and
//! cached for the process lifetime; the limits cache is invalidated after a
//! successful write, since a new limit shifts what is queryable as
//! "current".

use std::fmt;

use log::debug;

use crate::smi::{self, FetchError};

/// Power limit facts from `nvidia-smi -q -d POWER`.
///
/// Each field is independently optional: vendors differ in which lines the
/// query block actually contains.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PowerLimits {
    pub current_w: Option<f64>,
    pub min_w: Option<f64>,
    pub max_w: Option<f64>,
}

/// Why an `apply_limit` request was not carried out.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyError {
    /// Requested value is outside the cached [min, max] bounds. The external
    /// tool was not invoked.
    OutOfRange { requested: f64, min: f64, max: f64 },
    /// The privileged command itself failed.
    Tool(FetchError),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::OutOfRange { requested, min, max } => write!(
                f,
                "{} W is outside the supported range {} - {} W",
                requested, min, max
            ),
            ApplyError::Tool(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ApplyError {}

/// Cached static facts plus the power-limit operations.
#[derive(Default)]
pub struct PowerControl {
    device_name: Option<String>,
    limits: Option<PowerLimits>,
}

impl PowerControl {
    /// Device name, queried once and cached for the process lifetime.
    /// Falls back to "Unknown" when the tool is unavailable.
    pub fn device_name(&mut self) -> &str {
        if self.device_name.is_none() {
            let name = match smi::query_device_name() {
                Ok(name) if !name.is_empty() => name,
                Ok(_) => "Unknown".to_string(),
                Err(err) => {
                    debug!("device name query failed: {}", err);
                    "Unknown".to_string()
                }
            };
            self.device_name = Some(name);
        }
        self.device_name.as_deref().unwrap_or("Unknown")
    }

    /// Current/min/max power limits, cached after the first successful read
    /// and never re-queried unless invalidated by a write.
    pub fn read_limits(&mut self) -> PowerLimits {
        if let Some(limits) = self.limits {
            return limits;
        }
        match smi::query_power_block() {
            Ok(block) => {
                let limits = parse_power_block(&block);
                self.limits = Some(limits);
                limits
            }
            Err(err) => {
                debug!("power limit query failed: {}", err);
                PowerLimits::default()
            }
        }
    }

    /// Apply a new power limit in Watts.
    ///
    /// Rejects values outside the cached bounds without invoking the tool
    /// (when both bounds are known). On success the limits cache is
    /// invalidated and the raw tool output is returned for display. The
    /// mutation is irreversible from this process's perspective; there is
    /// no rollback on partial failure and no retry.
    pub fn apply_limit(&mut self, watts: f64) -> Result<String, ApplyError> {
        let bounds = self.limits.unwrap_or_default();
        validate_limit(watts, bounds)?;

        match smi::set_power_limit(watts as i64) {
            Ok(output) => {
                self.limits = None;
                Ok(output)
            }
            Err(err) => Err(ApplyError::Tool(err)),
        }
    }
}

#[cfg(test)]
impl PowerControl {
    fn with_limits(limits: PowerLimits) -> Self {
        Self {
            device_name: None,
            limits: Some(limits),
        }
    }
}

/// Check a requested limit against known bounds. When either bound is
/// unknown the request is allowed through; the driver is the final arbiter.
fn validate_limit(watts: f64, bounds: PowerLimits) -> Result<(), ApplyError> {
    if let (Some(min), Some(max)) = (bounds.min_w, bounds.max_w) {
        if watts < min || watts > max {
            return Err(ApplyError::OutOfRange {
                requested: watts,
                min,
                max,
            });
        }
    }
    Ok(())
}

/// Scan the `-q -d POWER` key:value block for the three limit lines.
///
/// The block nests sections and repeats labels across them; the last
/// occurrence of each label wins, matching how the flat scan of the query
/// output has always behaved.
fn parse_power_block(block: &str) -> PowerLimits {
    let mut limits = PowerLimits::default();

    for line in block.lines() {
        let line = line.trim();
        // Order matters: the bare "Power Limit" prefix must not swallow the
        // Min/Max lines.
        if let Some(value) = labeled_watts(line, "Min Power Limit") {
            limits.min_w = Some(value);
        } else if let Some(value) = labeled_watts(line, "Max Power Limit") {
            limits.max_w = Some(value);
        } else if let Some(value) = labeled_watts(line, "Power Limit") {
            limits.current_w = Some(value);
        }
    }

    limits
}

/// Parse `"<label> : <number> W"` into the number, if the line matches.
fn labeled_watts(line: &str, label: &str) -> Option<f64> {
    let rest = line.strip_prefix(label)?.trim_start();
    let rest = rest.strip_prefix(':')?.trim();
    let number = rest.strip_suffix('W')?.trim();
    number.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POWER_BLOCK: &str = "\
==============NVSMI LOG==============

Attached GPUs                             : 1
GPU 00000000:01:00.0
    GPU Power Readings
        Power Draw                        : 35.12 W
        Power Limit                       : 220.00 W
        Default Power Limit               : 220.00 W
        Enforced Power Limit              : 220.00 W
        Min Power Limit                   : 100.00 W
        Max Power Limit                   : 300.00 W
";

    #[test]
    fn parses_all_three_limits() {
        let limits = parse_power_block(POWER_BLOCK);
        assert_eq!(limits.current_w, Some(220.0));
        assert_eq!(limits.min_w, Some(100.0));
        assert_eq!(limits.max_w, Some(300.0));
    }

    #[test]
    fn missing_lines_stay_none() {
        let limits = parse_power_block("Power Limit : 220.00 W\n");
        assert_eq!(limits.current_w, Some(220.0));
        assert_eq!(limits.min_w, None);
        assert_eq!(limits.max_w, None);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let limits = parse_power_block("Power Draw : 35.12 W\nRandom : stuff\n");
        assert_eq!(limits, PowerLimits::default());
    }

    #[test]
    fn out_of_range_is_rejected_without_invoking_the_tool() {
        let bounds = PowerLimits {
            current_w: Some(220.0),
            min_w: Some(100.0),
            max_w: Some(300.0),
        };
        assert_eq!(
            validate_limit(50.0, bounds),
            Err(ApplyError::OutOfRange {
                requested: 50.0,
                min: 100.0,
                max: 300.0,
            })
        );
        assert_eq!(validate_limit(250.0, bounds), Ok(()));
        assert_eq!(validate_limit(100.0, bounds), Ok(()));
        assert_eq!(validate_limit(300.0, bounds), Ok(()));
    }

    #[test]
    fn apply_rejects_before_reaching_the_tool() {
        let mut control = PowerControl::with_limits(PowerLimits {
            current_w: Some(220.0),
            min_w: Some(100.0),
            max_w: Some(300.0),
        });
        // The rejection happens during validation; no subprocess is spawned
        // and the cached bounds survive untouched.
        let err = control.apply_limit(50.0).unwrap_err();
        assert!(matches!(err, ApplyError::OutOfRange { .. }));
        assert_eq!(control.limits.unwrap().min_w, Some(100.0));
    }

    #[test]
    fn unknown_bounds_defer_to_the_driver() {
        assert_eq!(validate_limit(999.0, PowerLimits::default()), Ok(()));
    }
}
