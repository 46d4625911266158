//! Daemon configuration management.
//!
//! Reads/writes JSON at `~/.config/ftpwatch/ftp_config.json`. The
//! per-file upload log lives next to it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk config format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default, rename = "user")]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    monitored_folder: PathBuf,
}

fn default_port() -> u16 {
    21
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub monitored_folder: PathBuf,
    file_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            monitored_folder: PathBuf::new(),
            file_path: config_file_path().unwrap_or_else(|_| PathBuf::from("/tmp/ftp_config.json")),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from disk. A missing file writes a template
    /// with defaults for the user to fill in.
    pub fn load() -> anyhow::Result<Self> {
        let file_path = config_file_path()?;
        let mut config = DaemonConfig {
            file_path: file_path.clone(),
            ..Default::default()
        };

        if file_path.exists() {
            let content = std::fs::read_to_string(&file_path)?;
            if let Ok(file) = serde_json::from_str::<ConfigFile>(&content) {
                config.host = file.host;
                config.port = file.port;
                config.username = file.username;
                config.password = file.password;
                config.monitored_folder = file.monitored_folder;
            } else {
                tracing::warn!(
                    path = %file_path.display(),
                    "failed to parse daemon config, using defaults"
                );
            }
        } else {
            config.save()?;
            tracing::info!(
                path = %file_path.display(),
                "wrote default config, fill in the connection details"
            );
        }

        Ok(config)
    }

    /// Saves configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = ConfigFile {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            monitored_folder: self.monitored_folder.clone(),
        };

        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.file_path, &json)?;
        set_permissions_0600(&self.file_path);

        tracing::debug!("daemon configuration saved");
        Ok(())
    }

    /// Path the configuration was (or will be) read from.
    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

// The config carries the FTP password.
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

fn config_file_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("ftpwatch").join("ftp_config.json"))
}

/// Where the per-file upload log is persisted.
pub fn file_log_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("ftpwatch").join("file_log.json"))
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
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }
}
