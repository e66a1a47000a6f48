use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors that can occur when loading configuration or cap files from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a TOML file.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to parse a JSON file.
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The file parsed but its contents are unusable.
    Invalid { path: PathBuf, reason: String },

    /// No home or config directory could be determined.
    NoConfigDir,
}

impl ConfigError {
    fn display_path(path: &Path) -> String {
        path_display(path)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read {}: {}", Self::display_path(path), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse {}: {}", Self::display_path(path), source)
            }
            ConfigError::ParseJson { path, source } => {
                write!(f, "Failed to parse {}: {}", Self::display_path(path), source)
            }
            ConfigError::Invalid { path, reason } => {
                write!(f, "Invalid {}: {}", Self::display_path(path), reason)
            }
            ConfigError::NoConfigDir => write!(f, "Failed to determine config directory"),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::ParseJson { source, .. } => Some(source),
            ConfigError::Invalid { .. } | ConfigError::NoConfigDir => None,
        }
    }
}

/// Reads a file to a string, tagging failures with the path.
pub(crate) fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            return Ok(Config::default());
        }
        let contents = read_file(config_path)?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Loads the config from the default location, or defaults when absent.
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from_path(&Self::get_config_path()?)
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };

        temp_file.write_all(contents.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file
            .persist(config_path)
            .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let proj_dirs =
            ProjectDirs::from("org", "capdeck", "capdeck").ok_or(ConfigError::NoConfigDir)?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}
