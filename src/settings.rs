use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::ROOT_SETTINGS_FILE_NAME;
use crate::error::ConfigError;

/// The root settings document, read from `xtask.project` at the project
/// root. Unknown fields are an error; a missing file yields the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    /// Directory hosting the task cache. Caching is disabled when absent or
    /// not a directory. A relative path is resolved against the project root.
    pub cache_location: Option<Utf8PathBuf>,
    /// Directory the host front-end prepends to its extension search path.
    pub extension_location: Option<Utf8PathBuf>,
    /// Log level name handed to the logging surface, `"info"` by default.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cache_location: None,
            extension_location: None,
            log_level: String::from("info"),
        }
    }
}

impl Settings {
    pub fn load(file_path: &Utf8Path) -> Result<Settings, ConfigError> {
        let text = std::fs::read_to_string(file_path)
            .map_err(|err| ConfigError::SettingsRead(file_path.to_owned(), err))?;

        serde_json::from_str(&text)
            .map_err(|err| ConfigError::SettingsParse(file_path.to_owned(), err))
    }
}

/// Ascends from `start` to the first ancestor containing the root settings
/// file. If no ancestor has one, `start` itself is the project root.
pub fn find_project_root(start: &Utf8Path) -> Utf8PathBuf {
    let mut current = start;

    loop {
        if current.join(ROOT_SETTINGS_FILE_NAME).exists() {
            return current.to_owned();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return start.to_owned(),
        }
    }
}
