//! Layered settings: built-in defaults, then an optional `fieldtask.toml` (or
//! the file given with `--config`), then `FIELDTASK__*` environment variables.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::mutation::MutationOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub store: StoreSettings,
    pub telemetry: TelemetrySettings,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    /// Path of the JSON database file.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    /// Deliver notifications in the background instead of awaiting them.
    pub detach: bool,
}

/// `~/.fieldtask/tasks.json`, or `./.fieldtask/tasks.json` when `HOME` is unset.
pub fn default_store_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".fieldtask").join("tasks.json")
}

impl Settings {
    /// Load settings. An explicit `config_file` must exist; the implicit
    /// `fieldtask.toml` in the working directory is optional.
    pub fn new(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("store.path", default_store_path().to_string_lossy().to_string())?
            .set_default("telemetry.log_level", "info")?
            .set_default("telemetry.json", false)?
            .set_default("notifications.detach", true)?;

        let builder = match config_file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("fieldtask").required(false)),
        };

        builder
            .add_source(Environment::with_prefix("FIELDTASK").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn mutation_options(&self) -> MutationOptions {
        MutationOptions {
            detach_notifications: self.notifications.detach,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "[store]\npath = \"/tmp/ft/tasks.json\"\n\n[notifications]\ndetach = false\n",
        )
        .unwrap();

        let settings = Settings::new(Some(&path)).unwrap();
        assert_eq!(settings.store.path, PathBuf::from("/tmp/ft/tasks.json"));
        assert!(!settings.notifications.detach);
        assert!(!settings.mutation_options().detach_notifications);
        assert_eq!(settings.telemetry.log_level, "info");
        assert!(!settings.telemetry.json);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::new(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_default_store_path() {
        assert!(default_store_path().ends_with(".fieldtask/tasks.json"));
    }
}
