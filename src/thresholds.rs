//! Display severity bands for nvmon.
//!
//! These bands only drive coloring in the dashboard; they are distinct from
//! the user-configured alert thresholds in [`crate::settings`], which go
//! through the debounced alert engine instead.

/// Severity level for a displayed metric.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Severity {
    /// Normal operating range
    #[default]
    Normal,
    /// Approaching problematic levels
    Warning,
    /// Critical - immediate attention needed
    Critical,
}

/// Fixed display bands for the dashboard.
#[derive(Clone, Debug)]
pub struct DisplayBands {
    /// Utilization / memory-percent warning threshold (%)
    pub percent_warning: f64,
    /// Utilization / memory-percent critical threshold (%)
    pub percent_critical: f64,
    /// Temperature warning threshold (C)
    pub temp_warning: i64,
    /// Temperature critical threshold (C)
    pub temp_critical: i64,
    /// Power draw warning threshold, as a fraction of the limit
    pub power_warning_ratio: f64,
    /// Power draw critical threshold, as a fraction of the limit
    pub power_critical_ratio: f64,
}

impl Default for DisplayBands {
    fn default() -> Self {
        Self {
            percent_warning: 70.0,
            percent_critical: 90.0,
            temp_warning: 65,
            temp_critical: 80,
            power_warning_ratio: 0.8,
            power_critical_ratio: 0.95,
        }
    }
}

impl DisplayBands {
    /// Evaluate a utilization or memory percentage.
    pub fn percent_severity(&self, value: f64) -> Severity {
        if value >= self.percent_critical {
            Severity::Critical
        } else if value >= self.percent_warning {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }

    /// Evaluate a core temperature.
    pub fn temp_severity(&self, value: i64) -> Severity {
        if value >= self.temp_critical {
            Severity::Critical
        } else if value >= self.temp_warning {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }

    /// Evaluate power draw against the enforced limit.
    pub fn power_severity(&self, draw_w: f64, limit_w: f64) -> Severity {
        if draw_w >= limit_w * self.power_critical_ratio {
            Severity::Critical
        } else if draw_w >= limit_w * self.power_warning_ratio {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_match_display_policy() {
        let bands = DisplayBands::default();
        assert_eq!(bands.percent_severity(50.0), Severity::Normal);
        assert_eq!(bands.percent_severity(75.0), Severity::Warning);
        assert_eq!(bands.percent_severity(95.0), Severity::Critical);

        assert_eq!(bands.temp_severity(60), Severity::Normal);
        assert_eq!(bands.temp_severity(70), Severity::Warning);
        assert_eq!(bands.temp_severity(80), Severity::Critical);

        assert_eq!(bands.power_severity(100.0, 250.0), Severity::Normal);
        assert_eq!(bands.power_severity(210.0, 250.0), Severity::Warning);
        assert_eq!(bands.power_severity(245.0, 250.0), Severity::Critical);
    }
}
