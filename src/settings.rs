//! Persisted user settings for nvmon.
//!
//! Settings live in an INI file in the platform config directory (e.g.
//! `~/.config/nvmon/settings.ini` on Linux). The file is loaded once at
//! startup with defaults merged under whatever it contains: unknown or
//! missing keys fall back to their defaults, and a corrupt file is ignored
//! entirely in favor of defaults. Saves happen on any mutating settings
//! action and at clean shutdown, and failures to save are logged, never
//! fatal.

use std::path::PathBuf;

use directories::ProjectDirs;
use ini::Ini;
use log::warn;

/// Bounds on the poll interval, in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 500;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

const SECTION: &str = "monitor";

/// User-adjustable configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Delay between poll cycles, clamped to [500, 60000] ms
    pub poll_interval_ms: u64,
    /// Temperature alert threshold in Celsius
    pub alert_temp_c: i64,
    /// Utilization alert threshold in percent
    pub alert_util_pct: f64,
    /// Master switch for alerting
    pub alerts_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            alert_temp_c: 80,
            alert_util_pct: 90.0,
            alerts_enabled: true,
        }
    }
}

impl Settings {
    /// Load settings from the platform config dir, falling back to defaults.
    pub fn load() -> Self {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load settings from a specific file. Missing or corrupt files yield
    /// defaults; individual unparsable keys fall back per-key.
    pub fn load_from(path: &std::path::Path) -> Self {
        let defaults = Self::default();
        let ini = match Ini::load_from_file(path) {
            Ok(ini) => ini,
            Err(_) => return defaults,
        };
        let section = ini.section(Some(SECTION));

        let get = |key: &str| section.and_then(|s| s.get(key));

        let mut settings = Self {
            poll_interval_ms: get("poll_interval_ms")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_ms),
            alert_temp_c: get("alert_temp_c")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.alert_temp_c),
            alert_util_pct: get("alert_util_pct")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.alert_util_pct),
            alerts_enabled: get("alerts_enabled")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.alerts_enabled),
        };
        settings.clamp();
        settings
    }

    /// Save to the platform config dir. Failures are logged and swallowed.
    pub fn save(&self) {
        let Some(path) = config_path() else {
            warn!("no config directory available, settings not saved");
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("cannot create config directory: {}", err);
                return;
            }
        }
        if let Err(err) = self.save_to(&path) {
            warn!("failed to save settings: {}", err);
        }
    }

    /// Save to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        let mut ini = Ini::new();
        ini.with_section(Some(SECTION))
            .set("poll_interval_ms", self.poll_interval_ms.to_string())
            .set("alert_temp_c", self.alert_temp_c.to_string())
            .set("alert_util_pct", self.alert_util_pct.to_string())
            .set("alerts_enabled", self.alerts_enabled.to_string());
        ini.write_to_file(path)
    }

    /// Clamp the poll interval into its supported range.
    pub fn clamp(&mut self) {
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
    }

    /// Poll interval as a [`std::time::Duration`].
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

/// Location of the settings file, if a home directory exists at all.
fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "nvmon").map(|dirs| dirs.config_dir().join("settings.ini"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.ini"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ini");
        std::fs::write(&path, "\u{0}\u{1}not an ini [[[").unwrap();
        // rust-ini is lenient; whatever it makes of this, no key parses.
        let settings = Settings::load_from(&path);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ini");

        let original = Settings {
            poll_interval_ms: 5000,
            alert_temp_c: 75,
            alert_util_pct: 85.0,
            alerts_enabled: false,
        };
        original.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), original);
    }

    #[test]
    fn unknown_keys_are_ignored_and_missing_keys_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ini");
        std::fs::write(
            &path,
            "[monitor]\nalert_temp_c = 70\nfuture_option = whatever\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path);
        assert_eq!(settings.alert_temp_c, 70);
        assert_eq!(settings.poll_interval_ms, Settings::default().poll_interval_ms);
        assert!(settings.alerts_enabled);
    }

    #[test]
    fn interval_is_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ini");
        std::fs::write(&path, "[monitor]\npoll_interval_ms = 10\n").unwrap();
        assert_eq!(Settings::load_from(&path).poll_interval_ms, MIN_POLL_INTERVAL_MS);

        std::fs::write(&path, "[monitor]\npoll_interval_ms = 999999\n").unwrap();
        assert_eq!(Settings::load_from(&path).poll_interval_ms, MAX_POLL_INTERVAL_MS);
    }
}
