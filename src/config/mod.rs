use crate::models::AppConfig;
use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "FOODFILTER";

/// Name of the configuration file inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "foodfilter.yaml";

/// Configuration manager for loading and saving the YAML configuration file.
///
/// Settings are layered: `foodfilter.yaml` first, then environment variables such as
/// `FOODFILTER_SCANNER__COOLDOWN_MS=5000` (`__` separates nested keys).
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "FoodFilter Data")
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        // Create config directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the configuration from file and process environment.
    ///
    /// # Returns
    /// The loaded AppConfig, or defaults (plus overrides) if the file doesn't exist
    pub fn load_config(&self) -> Result<AppConfig> {
        self.load_config_with_env(None)
    }

    /// Load the configuration with an explicit environment.
    ///
    /// `None` reads the process environment; `Some(map)` uses only the given variables.
    pub fn load_config_with_env(
        &self,
        env: Option<::config::Map<String, String>>,
    ) -> Result<AppConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(self.config_path.as_std_path())
                    .format(::config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        validate(&config)?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Save the configuration file.
    ///
    /// # Arguments
    /// * `config` - The AppConfig to save
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Resolve a configured path; relative paths are taken from the config directory
    pub fn resolve(&self, path: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Get the configuration file path.
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

/// Reject settings the arbiter cannot run with
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.scanner.cooldown_ms == 0 {
        bail!("scanner.cooldown_ms must be greater than zero");
    }
    if config.scanner.command_buffer == 0 {
        bail!("scanner.command_buffer must be greater than zero");
    }
    if config.scanner.event_buffer == 0 {
        bail!("scanner.event_buffer must be greater than zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    fn no_env() -> Option<::config::Map<String, String>> {
        Some(::config::Map::new())
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let config = manager.load_config_with_env(no_env()).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_save_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut config = AppConfig::default();
        config.scanner.cooldown_ms = 1200;
        config.profile.restrictions = vec!["Soy".to_string(), "Fish".to_string()];
        manager.save_config(&config).unwrap();

        let loaded = manager.load_config_with_env(no_env()).unwrap();
        assert_eq!(loaded.scanner.cooldown_ms, 1200);
        assert_eq!(loaded.profile.restrictions, vec!["Soy", "Fish"]);
    }

    #[test]
    fn test_zero_cooldown_rejected() {
        let mut config = AppConfig::default();
        config.scanner.cooldown_ms = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_resolve_paths() {
        let (manager, _temp_dir) = create_test_config_manager();

        assert_eq!(
            manager.resolve("catalog"),
            manager.config_dir().join("catalog")
        );
        assert_eq!(manager.resolve("/var/lib/ff"), Utf8PathBuf::from("/var/lib/ff"));
    }
}
