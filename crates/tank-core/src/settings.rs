use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TankError};
use crate::time_utils::TimezoneHandler;

/// Directory under `$HOME` holding the store, remembered settings and logs.
pub const APP_DIR_NAME: &str = ".tank-monitor";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Water tank level telemetry monitor with pump inference and usage rollups
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tank-monitor",
    about = "Water tank level telemetry monitor with pump inference and usage rollups",
    version
)]
pub struct Settings {
    /// Telemetry channel identifier
    #[arg(long, env = "TANK_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Read API key for the channel
    #[arg(long, env = "TANK_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Provider base URL used by the primary transport
    #[arg(long, default_value = "https://api.thingspeak.com")]
    pub api_url: String,

    /// Alternate base URL tried when the primary transport fails
    #[arg(long)]
    pub fallback_url: Option<String>,

    /// Relay endpoint tried last; receives the provider URL as `?url=`
    #[arg(long)]
    pub relay_url: Option<String>,

    /// Tank capacity in liters (a capacity reported by the node wins)
    #[arg(long, default_value = "1000")]
    pub capacity_liters: f64,

    /// Assumed pump intake rate in liters per minute
    #[arg(long, default_value = "20")]
    pub pump_rate_lpm: f64,

    /// Seconds between level polls (5-3600)
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(5..=3600))]
    pub poll_interval: u32,

    /// Seconds between history refreshes (30-86400)
    #[arg(long, default_value = "300", value_parser = clap::value_parser!(u32).range(30..=86400))]
    pub history_interval: u32,

    /// Hours of level history to chart (1-720)
    #[arg(long, default_value = "24", value_parser = clap::value_parser!(u32).range(1..=720))]
    pub history_hours: u32,

    /// Timezone used for daily buckets (auto-detected if not specified)
    #[arg(long, default_value = "auto")]
    pub timezone: String,

    /// Directory for the usage store (defaults to ~/.tank-monitor)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// What to run
    #[arg(long, default_value = "live", value_parser = ["live", "summary", "history", "check"])]
    pub view: String,

    /// Days of records printed by the history view
    #[arg(long, default_value = "30")]
    pub days: u32,

    /// Wipe stored usage records before running
    #[arg(long)]
    pub reset_usage: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.tank-monitor/last_used.json`.
///
/// The API key is deliberately absent.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_liters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump_rate_lpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl LastUsedParams {
    /// Default path of the remembered-settings file.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(APP_DIR_NAME).join("last_used.json")
    }

    /// Load persisted params from an explicit path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> std::result::Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the file at `path` if it exists.
    pub fn clear_at(path: &Path) -> std::result::Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse process arguments, merge remembered values, resolve `"auto"`
    /// values and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Same as [`Settings::load_with_last_used`] with explicit arguments and
    /// config path so tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(args: Vec<std::ffi::OsString>, config_path: &Path) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!(error = %e, "failed to clear remembered settings");
            }
            return Self::resolve_auto_values(settings);
        }

        let last = LastUsedParams::load_from(config_path);

        // CLI and environment always win over remembered values.
        if !is_arg_explicitly_set(&matches, "channel_id") && settings.channel_id.is_none() {
            settings.channel_id = last.channel_id;
        }
        if !is_arg_explicitly_set(&matches, "api_url") {
            if let Some(v) = last.api_url {
                settings.api_url = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "fallback_url") && settings.fallback_url.is_none() {
            settings.fallback_url = last.fallback_url;
        }
        if !is_arg_explicitly_set(&matches, "relay_url") && settings.relay_url.is_none() {
            settings.relay_url = last.relay_url;
        }
        if !is_arg_explicitly_set(&matches, "capacity_liters") {
            if let Some(v) = last.capacity_liters {
                settings.capacity_liters = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "pump_rate_lpm") {
            if let Some(v) = last.pump_rate_lpm {
                settings.pump_rate_lpm = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "poll_interval") {
            if let Some(v) = last.poll_interval {
                settings.poll_interval = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "timezone") {
            if let Some(v) = last.timezone {
                settings.timezone = v;
            }
        }

        settings = Self::resolve_auto_values(settings);

        if let Err(e) = LastUsedParams::from(&settings).save_to(config_path) {
            tracing::warn!(error = %e, "failed to remember settings");
        }

        settings
    }

    /// Resolve `"auto"` sentinel values and apply the `--debug` flag.
    fn resolve_auto_values(mut settings: Settings) -> Settings {
        if settings.timezone == "auto" {
            settings.timezone = crate::time_utils::get_system_timezone();
        }
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Check the combination of values a run depends on.
    ///
    /// `live` and `check` need a channel id; every view needs a positive
    /// capacity and pump rate and a recognised timezone.
    pub fn validate(&self) -> Result<()> {
        let needs_channel = matches!(self.view.as_str(), "live" | "check");
        if needs_channel && self.channel_id.as_deref().map_or(true, str::is_empty) {
            return Err(TankError::Config(
                "a channel id is required (--channel-id or TANK_CHANNEL_ID)".to_string(),
            ));
        }
        if !(self.capacity_liters.is_finite() && self.capacity_liters > 0.0) {
            return Err(TankError::Config(format!(
                "capacity must be positive, got {}",
                self.capacity_liters
            )));
        }
        if !(self.pump_rate_lpm.is_finite() && self.pump_rate_lpm >= 0.0) {
            return Err(TankError::Config(format!(
                "pump rate must not be negative, got {}",
                self.pump_rate_lpm
            )));
        }
        if !TimezoneHandler::validate_timezone(&self.timezone) {
            return Err(TankError::Config(format!(
                "unknown timezone: {}",
                self.timezone
            )));
        }
        Ok(())
    }

    /// Directory holding the usage store.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME)
        })
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            channel_id: s.channel_id.clone(),
            api_url: Some(s.api_url.clone()),
            fallback_url: s.fallback_url.clone(),
            relay_url: s.relay_url.clone(),
            capacity_liters: Some(s.capacity_liters),
            pump_rate_lpm: Some(s.pump_rate_lpm),
            poll_interval: Some(s.poll_interval),
            timezone: Some(s.timezone.clone()),
        }
    }
}

/// Returns `true` when `name` was supplied on the command line or through
/// its environment variable (not via a default value).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches!(
        matches.value_source(name),
        Some(clap::parser::ValueSource::CommandLine) | Some(clap::parser::ValueSource::EnvVariable)
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tmp_config_path(tmp: &TempDir) -> PathBuf {
        LastUsedParams::config_path_in(tmp.path())
    }

    fn base_settings() -> Settings {
        Settings::parse_from(["tank-monitor", "--channel-id", "1234", "--timezone", "UTC"])
    }

    #[test]
    fn test_last_used_params_save_load() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        let params = LastUsedParams {
            channel_id: Some("98765".to_string()),
            api_url: Some("https://api.example.test".to_string()),
            fallback_url: None,
            relay_url: Some("https://relay.example.test/raw".to_string()),
            capacity_liters: Some(5000.0),
            pump_rate_lpm: Some(12.5),
            poll_interval: Some(60),
            timezone: Some("Asia/Kolkata".to_string()),
        };

        params.save_to(&path).expect("save");
        let loaded = LastUsedParams::load_from(&path);

        assert_eq!(loaded, params);
    }

    #[test]
    fn test_last_used_params_default_when_missing() {
        let tmp = TempDir::new().expect("tempdir");
        let loaded = LastUsedParams::load_from(&tmp_config_path(&tmp));
        assert_eq!(loaded, LastUsedParams::default());
    }

    #[test]
    fn test_last_used_params_default_when_corrupt() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(LastUsedParams::load_from(&path), LastUsedParams::default());
    }

    #[test]
    fn test_last_used_params_clear() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        LastUsedParams::default().save_to(&path).expect("save");
        assert!(path.exists());

        LastUsedParams::clear_at(&path).expect("clear");
        assert!(!path.exists());
    }

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::parse_from(["tank-monitor"]);

        assert_eq!(settings.api_url, "https://api.thingspeak.com");
        assert!(settings.fallback_url.is_none());
        assert!(settings.relay_url.is_none());
        assert_eq!(settings.capacity_liters, 1000.0);
        assert_eq!(settings.pump_rate_lpm, 20.0);
        assert_eq!(settings.poll_interval, 30);
        assert_eq!(settings.history_interval, 300);
        assert_eq!(settings.history_hours, 24);
        assert_eq!(settings.timezone, "auto");
        assert_eq!(settings.view, "live");
        assert_eq!(settings.days, 30);
        assert_eq!(settings.log_level, "INFO");
        assert!(!settings.reset_usage);
        assert!(!settings.debug);
        assert!(!settings.clear);
    }

    #[test]
    fn test_settings_poll_interval_range_enforced() {
        let result = Settings::try_parse_from(["tank-monitor", "--poll-interval", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_view_restricted() {
        let result = Settings::try_parse_from(["tank-monitor", "--view", "chart"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_settings_to_last_used_skips_api_key() {
        let mut settings = base_settings();
        settings.api_key = Some("SECRET".to_string());
        let last = LastUsedParams::from(&settings);
        let json = serde_json::to_string(&last).unwrap();
        assert!(!json.contains("SECRET"));
        assert_eq!(last.channel_id.as_deref(), Some("1234"));
    }

    #[test]
    fn test_validate_requires_channel_for_live() {
        let mut settings = Settings::parse_from(["tank-monitor", "--timezone", "UTC"]);
        settings.channel_id = None;
        assert!(matches!(settings.validate(), Err(TankError::Config(_))));
    }

    #[test]
    fn test_validate_summary_without_channel_ok() {
        let mut settings = Settings::parse_from(["tank-monitor", "--view", "summary", "--timezone", "UTC"]);
        settings.channel_id = None;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_capacity_and_timezone() {
        let mut settings = base_settings();
        settings.capacity_liters = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = base_settings();
        settings.timezone = "Nowhere/City".to_string();
        assert!(settings.validate().is_err());

        assert!(base_settings().validate().is_ok());
    }

    #[test]
    fn test_load_with_last_used_merges_persisted_capacity() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            capacity_liters: Some(7500.0),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings =
            Settings::load_with_last_used_impl(vec!["tank-monitor".into()], &config_path);
        assert_eq!(settings.capacity_liters, 7500.0);
        assert_eq!(settings.timezone, "UTC");
    }

    #[test]
    fn test_load_with_last_used_cli_overrides_persisted() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            capacity_liters: Some(7500.0),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings = Settings::load_with_last_used_impl(
            vec![
                "tank-monitor".into(),
                "--capacity-liters".into(),
                "300".into(),
            ],
            &config_path,
        );
        assert_eq!(settings.capacity_liters, 300.0);
    }

    #[test]
    fn test_load_with_last_used_clear_removes_file() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams::default().save_to(&config_path).expect("save");

        Settings::load_with_last_used_impl(
            vec!["tank-monitor".into(), "--clear".into()],
            &config_path,
        );

        assert!(!config_path.exists());
    }

    #[test]
    fn test_load_with_last_used_debug_overrides_log_level() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        let settings = Settings::load_with_last_used_impl(
            vec!["tank-monitor".into(), "--debug".into(), "--timezone".into(), "UTC".into()],
            &config_path,
        );
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_load_with_last_used_persists_after_run() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        Settings::load_with_last_used_impl(
            vec![
                "tank-monitor".into(),
                "--pump-rate-lpm".into(),
                "15".into(),
                "--timezone".into(),
                "Europe/Berlin".into(),
            ],
            &config_path,
        );

        let loaded = LastUsedParams::load_from(&config_path);
        assert_eq!(loaded.pump_rate_lpm, Some(15.0));
        assert_eq!(loaded.timezone.as_deref(), Some("Europe/Berlin"));
    }

    #[test]
    fn test_resolved_data_dir_prefers_explicit() {
        let settings = Settings::parse_from(["tank-monitor", "--data-dir", "/srv/tank"]);
        assert_eq!(settings.resolved_data_dir(), PathBuf::from("/srv/tank"));
    }
}
