//! Threshold alerting for nvmon.
//!
//! The engine compares each poll's snapshot against the user-configured
//! thresholds and fires at most one event per alert kind, subject to a
//! per-kind cooldown: once a kind fires it stays quiet for the debounce
//! window, then may fire again even if the metric never dropped below the
//! threshold in between. The cooldown is tracked independently per kind.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;

use crate::metrics::GpuSnapshot;
use crate::settings::Settings;

/// Minimum elapsed time between two firings of the same alert kind.
pub const DEBOUNCE_SECS: i64 = 300;

/// The metrics an alert can be raised about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AlertKind {
    Temperature,
    Utilization,
}

/// One fired alert, ready for the notification collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
}

/// Stateful threshold evaluator.
///
/// Owns the last-fired map for the process lifetime; entries are upserted
/// on firing and never pruned.
#[derive(Default)]
pub struct AlertEngine {
    last_fired: HashMap<AlertKind, DateTime<Utc>>,
}

impl AlertEngine {
    /// Evaluate one snapshot against the configured thresholds.
    ///
    /// Returns the events that fired this cycle (at most one per kind).
    /// A kind with no prior firing always fires when its condition holds.
    pub fn evaluate(
        &mut self,
        snapshot: &GpuSnapshot,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        if !settings.alerts_enabled {
            return Vec::new();
        }

        let mut events = Vec::new();

        if snapshot.temperature_c >= settings.alert_temp_c
            && self.cooled_down(AlertKind::Temperature, now)
        {
            self.last_fired.insert(AlertKind::Temperature, now);
            events.push(AlertEvent {
                kind: AlertKind::Temperature,
                title: "Temperature Alert".into(),
                message: format!(
                    "GPU temperature is {}°C (threshold: {}°C)",
                    snapshot.temperature_c, settings.alert_temp_c
                ),
            });
        }

        if snapshot.utilization >= settings.alert_util_pct
            && self.cooled_down(AlertKind::Utilization, now)
        {
            self.last_fired.insert(AlertKind::Utilization, now);
            events.push(AlertEvent {
                kind: AlertKind::Utilization,
                title: "Utilization Alert".into(),
                message: format!(
                    "GPU utilization is {:.0}% (threshold: {:.0}%)",
                    snapshot.utilization, settings.alert_util_pct
                ),
            });
        }

        events
    }

    /// Whether the debounce window for `kind` has elapsed.
    fn cooled_down(&self, kind: AlertKind, now: DateTime<Utc>) -> bool {
        match self.last_fired.get(&kind) {
            Some(last) => now.signed_duration_since(*last).num_seconds() > DEBOUNCE_SECS,
            None => true,
        }
    }
}

/// Hand an event to the desktop notification backend.
///
/// Fire-and-forget: a missing or broken notification daemon must never
/// affect the polling pipeline, so every failure is swallowed here.
pub fn dispatch(event: &AlertEvent) {
    let result = notify_rust::Notification::new()
        .appname("nvmon")
        .summary(&event.title)
        .body(&event.message)
        .timeout(notify_rust::Timeout::Milliseconds(5000))
        .show();

    if let Err(err) = result {
        debug!("notification dispatch failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn hot_snapshot() -> GpuSnapshot {
        GpuSnapshot {
            temperature_c: 85,
            utilization: 10.0,
            ..Default::default()
        }
    }

    fn settings() -> Settings {
        Settings {
            alert_temp_c: 80,
            alert_util_pct: 90.0,
            alerts_enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn debounce_is_a_cooldown_not_an_edge_trigger() {
        let mut engine = AlertEngine::default();
        let snapshot = hot_snapshot();
        let settings = settings();

        // First-ever trigger fires immediately.
        let events = engine.evaluate(&snapshot, &settings, at(0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Temperature);

        // Still hot inside the window: silent.
        assert!(engine.evaluate(&snapshot, &settings, at(100)).is_empty());

        // Window elapsed, metric never dropped: fires again.
        let events = engine.evaluate(&snapshot, &settings, at(301));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn kinds_are_debounced_independently() {
        let mut engine = AlertEngine::default();
        let settings = settings();

        let temp_only = GpuSnapshot {
            temperature_c: 85,
            utilization: 10.0,
            ..Default::default()
        };
        let both = GpuSnapshot {
            temperature_c: 85,
            utilization: 95.0,
            ..Default::default()
        };

        let events = engine.evaluate(&temp_only, &settings, at(0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Temperature);

        // Utilization's first firing is independent of temperature's clock.
        let events = engine.evaluate(&both, &settings, at(150));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Utilization);

        // Temperature's window has elapsed, utilization's has not.
        let events = engine.evaluate(&both, &settings, at(310));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Temperature);
    }

    #[test]
    fn disabled_alerts_fire_nothing() {
        let mut engine = AlertEngine::default();
        let mut settings = settings();
        settings.alerts_enabled = false;

        assert!(engine.evaluate(&hot_snapshot(), &settings, at(0)).is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut engine = AlertEngine::default();
        let settings = settings();
        let exactly = GpuSnapshot {
            temperature_c: 80,
            ..Default::default()
        };
        let events = engine.evaluate(&exactly, &settings, at(0));
        assert_eq!(events.len(), 1);
    }
}
