use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::track::NamingOptions;

pub const APP_NAME: &str = "lastrecorder";
pub const CONFIG_FILE: &str = "lastrecorder.toml";

/// Settings persisted between runs
///
/// Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub username: Option<String>,
    /// MD5 hex digest of the account password
    pub password_md5: Option<String>,
    pub output_dir: PathBuf,
    /// Replace characters Windows cannot store in file names
    pub strip_reserved: bool,
    /// Replace spaces in file names with underscores
    pub strip_spaces: bool,
    pub skip_existing: bool,
    pub save_credentials: bool,
    pub quote_urls: bool,
    pub discovery: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            password_md5: None,
            output_dir: default_output_dir(),
            strip_reserved: true,
            strip_spaces: true,
            skip_existing: true,
            save_credentials: true,
            quote_urls: true,
            discovery: false,
            debug: false,
        }
    }
}

impl Config {
    /// Read the config file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write the config file, creating its directory when needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        let write_err = |e| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        std::fs::write(path, contents).map_err(write_err)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Forget the stored password hash
    pub fn clear_password(&mut self) {
        self.password_md5 = None;
    }

    pub fn naming(&self) -> NamingOptions {
        NamingOptions {
            strip_reserved: self.strip_reserved,
            strip_spaces: self.strip_spaces,
        }
    }
}

/// `<config dir>/lastrecorder/lastrecorder.toml`
pub fn default_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

/// `~/.lastrecorder/music`
pub fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(format!(".{}", APP_NAME))
        .join("music")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();

        let config = Config::load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert!(config.skip_existing);
        assert!(config.save_credentials);
        assert!(!config.discovery);
        assert!(config.output_dir.ends_with(".lastrecorder/music"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
username = "listener"
strip_spaces = false
output_dir = "/srv/music"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.username.as_deref(), Some("listener"));
        assert_eq!(config.password_md5, None);
        assert_eq!(config.output_dir, PathBuf::from("/srv/music"));
        assert_eq!(
            config.naming(),
            NamingOptions {
                strip_reserved: true,
                strip_spaces: false,
            }
        );
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(APP_NAME).join(CONFIG_FILE);
        let config = Config {
            username: Some("listener".to_string()),
            password_md5: Some("5f4dcc3b5aa765d61d8327deb882cf99".to_string()),
            quote_urls: false,
            ..Config::default()
        };

        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "skip_existing = \"sometimes\"").unwrap();

        let result = Config::load(&path);

        assert!(matches!(result, Err(ConfigError::ParseFailed { .. })));
    }

    #[test]
    fn clear_password_keeps_username() {
        let mut config = Config {
            username: Some("listener".to_string()),
            password_md5: Some("abc".to_string()),
            ..Config::default()
        };

        config.clear_password();

        assert_eq!(config.password_md5, None);
        assert_eq!(config.username.as_deref(), Some("listener"));
    }
}
