//! CLI configuration management.
//!
//! Reads/writes TOML at `<config dir>/scanrelay/config.toml`. A missing
//! file is created with defaults; the device id is generated once and
//! persisted so the backend always sees the same device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use scanrelay_session::ApiConfig;
use scanrelay_session::config::DEFAULT_BASE_URL;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.toml";
const CREDENTIAL_FILE_NAME: &str = "credential.json";
const STAGING_DIR_NAME: &str = "staging";

/// On-disk config format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    base_url: String,
    device_id: String,
    request_timeout_secs: u64,
    upload_timeout_secs: u64,
    poll_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_dir: Option<PathBuf>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            device_id: String::new(),
            request_timeout_secs: 60,
            upload_timeout_secs: 300,
            poll_interval_secs: 10,
            data_dir: None,
        }
    }
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub device_id: String,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
    pub poll_interval: Duration,
    /// Holds the credential file and the staging directory.
    pub data_dir: PathBuf,
    data_dir_overridden: bool,
    file_path: PathBuf,
}

impl Config {
    /// Loads configuration from `dir`, or from the platform config
    /// directory when `dir` is `None`.
    pub fn load(dir: Option<&Path>) -> anyhow::Result<Self> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => config_base_dir()?.join("scanrelay"),
        };
        Self::load_from(dir.join(CONFIG_FILE_NAME), default_data_dir())
    }

    fn load_from(file_path: PathBuf, default_data_dir: PathBuf) -> anyhow::Result<Self> {
        let mut file = ConfigFile::default();
        let mut dirty = !file_path.exists();

        if !dirty {
            let content = std::fs::read_to_string(&file_path)
                .with_context(|| format!("failed to read {}", file_path.display()))?;
            match toml::from_str::<ConfigFile>(&content) {
                Ok(parsed) => file = parsed,
                Err(e) => {
                    tracing::warn!(
                        path = %file_path.display(),
                        error = %e,
                        "failed to parse config, using defaults"
                    );
                }
            }
        }

        if file.device_id.trim().is_empty() {
            file.device_id = uuid::Uuid::new_v4().to_string();
            dirty = true;
        }

        let defaults = ConfigFile::default();
        let config = Config {
            base_url: non_empty_or(file.base_url, defaults.base_url),
            device_id: file.device_id,
            request_timeout: secs_or(file.request_timeout_secs, defaults.request_timeout_secs),
            upload_timeout: secs_or(file.upload_timeout_secs, defaults.upload_timeout_secs),
            poll_interval: secs_or(file.poll_interval_secs, defaults.poll_interval_secs),
            data_dir_overridden: file.data_dir.is_some(),
            data_dir: file.data_dir.unwrap_or(default_data_dir),
            file_path,
        };

        if dirty {
            config.save()?;
        }
        Ok(config)
    }

    /// Saves configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = ConfigFile {
            base_url: self.base_url.clone(),
            device_id: self.device_id.clone(),
            request_timeout_secs: self.request_timeout.as_secs(),
            upload_timeout_secs: self.upload_timeout.as_secs(),
            poll_interval_secs: self.poll_interval.as_secs(),
            data_dir: self.data_dir_overridden.then(|| self.data_dir.clone()),
        };

        let text = toml::to_string_pretty(&file)?;
        std::fs::write(&self.file_path, text)
            .with_context(|| format!("failed to write {}", self.file_path.display()))?;
        set_permissions_0600(&self.file_path);

        tracing::debug!(path = %self.file_path.display(), "configuration saved");
        Ok(())
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn credential_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIAL_FILE_NAME)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR_NAME)
    }

    /// Backend settings for the session and the clients built on it.
    pub fn api_config(&self) -> ApiConfig {
        let mut api = ApiConfig::new(self.base_url.clone(), self.device_id.clone());
        api.request_timeout = self.request_timeout;
        api.upload_timeout = self.upload_timeout;
        api
    }
}

fn non_empty_or(value: String, fallback: String) -> String {
    if value.trim().is_empty() { fallback } else { value }
}

fn secs_or(value: u64, fallback: u64) -> Duration {
    Duration::from_secs(if value == 0 { fallback } else { value })
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var_os("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".config"))
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let local = std::env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| "C:\\Users\\Default\\AppData\\Local".into());
        PathBuf::from(local).join("scanrelay")
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|d| !d.is_empty()) {
            return PathBuf::from(dir).join("scanrelay");
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".local").join("share").join("scanrelay")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(dir: &tempfile::TempDir) -> Config {
        Config::load_from(dir.path().join(CONFIG_FILE_NAME), dir.path().join("data")).unwrap()
    }

    #[test]
    fn first_run_writes_defaults_with_device_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.upload_timeout, Duration::from_secs(300));
        assert!(uuid::Uuid::parse_str(&config.device_id).is_ok());
        assert!(config.file_path().exists());
        assert_eq!(config.credential_path(), dir.path().join("data").join("credential.json"));
        assert_eq!(config.staging_dir(), dir.path().join("data").join("staging"));
    }

    #[test]
    fn device_id_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let first = load(&dir);
        let second = load(&dir);
        assert_eq!(first.device_id, second.device_id);
    }

    #[test]
    fn reads_values_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
base_url = "https://scans.example.com/api/v1"
device_id = "ipad-7"
poll_interval_secs = 3
data_dir = "/var/lib/scanrelay"
"#,
        )
        .unwrap();

        let config = load(&dir);
        assert_eq!(config.base_url, "https://scans.example.com/api/v1");
        assert_eq!(config.device_id, "ipad-7");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.upload_timeout, Duration::from_secs(300));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/scanrelay"));

        let api = config.api_config();
        assert_eq!(api.device_id, "ipad-7");
        assert_eq!(api.tickets_url(), "https://scans.example.com/api/v1/tickets");
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "base_url = [").unwrap();

        let config = load(&dir);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn zero_durations_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "device_id = \"d\"\npoll_interval_secs = 0\n",
        )
        .unwrap();

        let config = load(&dir);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        let mode = std::fs::metadata(config.file_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
