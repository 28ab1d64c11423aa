use crate::models::RestrictionSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration from foodfilter.yaml
///
/// Every section falls back to its defaults, so a partial (or missing) file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerSettings,
    pub profile: ProfileSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Scan arbitration tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Cooldown from lock to re-arm, in milliseconds
    pub cooldown_ms: u64,

    /// Capacity of the arbiter's inbound command queue
    pub command_buffer: usize,

    /// Capacity of the state change broadcast channel
    pub event_buffer: usize,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            command_buffer: 64,
            event_buffer: 100,
        }
    }
}

impl ScannerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn default_cooldown_ms() -> u64 {
    3000
}

/// The scanning user's dietary profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    pub restrictions: Vec<String>,
}

impl ProfileSettings {
    pub fn restriction_set(&self) -> RestrictionSet {
        RestrictionSet::from_names(&self.restrictions)
    }
}

/// Locations of the product catalog and the activity history.
///
/// Relative paths are resolved against the configuration directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub catalog_dir: String,
    pub activity_file: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            catalog_dir: "catalog".to_string(),
            activity_file: "activity.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_dir: String,
    pub log_prefix: String,
    pub debug: bool,
    pub console: bool,
    /// Write the log file as JSON lines instead of plain text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            log_prefix: "foodfilter".to_string(),
            debug: false,
            console: true,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_defaults() {
        let settings = ScannerSettings::default();
        assert_eq!(settings.cooldown(), Duration::from_secs(3));
        assert_eq!(settings.command_buffer, 64);
        assert_eq!(settings.event_buffer, 100);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig =
            serde_yaml_ng::from_str("scanner:\n  cooldown_ms: 500\nprofile:\n  restrictions: [Milk]\n")
                .unwrap();

        assert_eq!(config.scanner.cooldown_ms, 500);
        assert_eq!(config.scanner.command_buffer, 64);
        assert_eq!(config.profile.restrictions, vec!["Milk".to_string()]);
        assert_eq!(config.storage, StorageSettings::default());
        assert!(config.logging.console);
    }

    #[test]
    fn test_profile_restriction_set() {
        let profile = ProfileSettings {
            restrictions: vec!["Peanuts".to_string(), "peanuts".to_string(), "".to_string()],
        };
        let set = profile.restriction_set();
        assert_eq!(set.len(), 1);
        assert!(set.contains("PEANUTS"));
    }
}
