use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_YOUTUBE_API_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_FILE_PATH: &str = "PythonScripts/playlists.json";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Automated playlist sync";
pub const DEFAULT_REDIRECT_PORT: u16 = 19285;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// YAML config file structure (`~/.autosync/config.yaml`). Secrets are not
/// stored here; they live in the keyring (see `KeyService`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigYaml {
    pub google_client_id: String,
    /// Only needed for OAuth clients registered as confidential.
    pub google_client_secret: Option<String>,
    pub repo_owner: String,
    pub repo_name: String,
    pub file_path: Option<String>,
    pub commit_message: Option<String>,
    pub youtube_api_url: Option<String>,
    pub github_api_url: Option<String>,
    pub redirect_port: Option<u16>,
}

/// Application configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub google_client_id: String,
    pub google_client_secret: Option<String>,
    pub repo_owner: String,
    pub repo_name: String,
    /// Repository-relative path of the persisted selection file.
    pub file_path: String,
    pub commit_message: String,
    pub youtube_api_url: String,
    pub github_api_url: String,
    /// Localhost port for the OAuth callback during interactive sign-in.
    pub redirect_port: u16,
    /// True when loaded from the environment. Secrets are then read from
    /// env vars too (see `KeyService::new`).
    pub dev_mode: bool,
}

/// The subset of configuration the sync controller needs, passed in
/// explicitly at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub file_path: String,
    pub commit_message: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            file_path: DEFAULT_FILE_PATH.to_string(),
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        // dotenv() also searches parent directories; whatever it decides here
        // is carried on `Config::dev_mode` so keys follow the same source.
        let dev_mode = std::env::var("AUTOSYNC_DEV_MODE").is_ok() || dotenvy::dotenv().is_ok();
        if dev_mode {
            info!("Dev mode activated - loading from environment");
            Self::from_env()
        } else {
            info!("Production mode - loading from config.yaml");
            Self::from_config_file()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let redirect_port = match get("AUTOSYNC_REDIRECT_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "AUTOSYNC_REDIRECT_PORT",
                value: raw,
            })?,
            None => DEFAULT_REDIRECT_PORT,
        };

        Ok(Self {
            google_client_id: required("AUTOSYNC_GOOGLE_CLIENT_ID")?,
            google_client_secret: get("AUTOSYNC_GOOGLE_CLIENT_SECRET"),
            repo_owner: required("AUTOSYNC_REPO_OWNER")?,
            repo_name: required("AUTOSYNC_REPO_NAME")?,
            file_path: get("AUTOSYNC_FILE_PATH").unwrap_or_else(|| DEFAULT_FILE_PATH.to_string()),
            commit_message: get("AUTOSYNC_COMMIT_MESSAGE")
                .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string()),
            youtube_api_url: get("AUTOSYNC_YOUTUBE_API_URL")
                .unwrap_or_else(|| DEFAULT_YOUTUBE_API_URL.to_string()),
            github_api_url: get("AUTOSYNC_GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            redirect_port,
            dev_mode: true,
        })
    }

    fn from_config_file() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::Missing("home directory"))?;
        Self::load_from_file(&home.join(".autosync").join("config.yaml"))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml: ConfigYaml = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        Ok(Self::from_yaml(yaml))
    }

    fn from_yaml(yaml: ConfigYaml) -> Self {
        Self {
            google_client_id: yaml.google_client_id,
            google_client_secret: yaml.google_client_secret,
            repo_owner: yaml.repo_owner,
            repo_name: yaml.repo_name,
            file_path: yaml
                .file_path
                .unwrap_or_else(|| DEFAULT_FILE_PATH.to_string()),
            commit_message: yaml
                .commit_message
                .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string()),
            youtube_api_url: yaml
                .youtube_api_url
                .unwrap_or_else(|| DEFAULT_YOUTUBE_API_URL.to_string()),
            github_api_url: yaml
                .github_api_url
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            redirect_port: yaml.redirect_port.unwrap_or(DEFAULT_REDIRECT_PORT),
            dev_mode: false,
        }
    }

    /// Write the non-secret settings to a YAML file, creating parent
    /// directories as needed.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = ConfigYaml {
            google_client_id: self.google_client_id.clone(),
            google_client_secret: self.google_client_secret.clone(),
            repo_owner: self.repo_owner.clone(),
            repo_name: self.repo_name.clone(),
            file_path: Some(self.file_path.clone()),
            commit_message: Some(self.commit_message.clone()),
            youtube_api_url: Some(self.youtube_api_url.clone()),
            github_api_url: Some(self.github_api_url.clone()),
            redirect_port: Some(self.redirect_port),
        };
        std::fs::write(path, serde_yaml::to_string(&yaml)?)?;
        Ok(())
    }

    /// Default location of the YAML config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".autosync").join("config.yaml"))
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            file_path: self.file_path.clone(),
            commit_message: self.commit_message.clone(),
        }
    }
}
