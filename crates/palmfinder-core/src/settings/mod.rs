//! Settings Persistence System
//!
//! Provides persistent client settings with:
//! - Atomic file writes (temp file + rename)
//! - Schema validation with defaults
//! - Migration support for schema changes
//!
//! Storage location: {config_dir}/palmfinder/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{CoreError, CoreResult, MediaKind};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Application directory name under the platform config/cache/data dirs
pub const APP_DIR_NAME: &str = "palmfinder";

/// Default detection service address (backend listens on port 5000)
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Detection service settings
    #[serde(default)]
    pub service: ServiceSettings,

    /// Local storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Capability grants
    #[serde(default)]
    pub permissions: PermissionSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            service: ServiceSettings::default(),
            storage: StorageSettings::default(),
            permissions: PermissionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Bad values are corrected instead of rejected so that a corrupted or
    /// hand-edited file never prevents the client from starting.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let base_url = self.service.base_url.trim().trim_end_matches('/').to_string();
        self.service.base_url =
            if base_url.starts_with("http://") || base_url.starts_with("https://") {
                base_url
            } else {
                warn!(
                    "Invalid service base URL '{}', falling back to {}",
                    self.service.base_url, DEFAULT_BASE_URL
                );
                DEFAULT_BASE_URL.to_string()
            };
        self.service.timeout_sec = self.service.timeout_sec.clamp(5, 900);
        self.service.max_upload_mb = self.service.max_upload_mb.clamp(1, 1024);

        self.storage.max_download_mb = self.storage.max_download_mb.clamp(1, 4096);
        if !is_valid_album_name(&self.storage.album_name) {
            self.storage.album_name = default_album_name();
        }
        normalize_optional_path(&mut self.storage.scratch_dir);
        normalize_optional_path(&mut self.storage.library_dir);
        normalize_optional_path(&mut self.storage.capture_dir);
        normalize_optional_path(&mut self.logging.log_dir);
    }
}

fn normalize_optional_path(value: &mut Option<String>) {
    if value.as_deref().map(str::trim).is_some_and(str::is_empty) {
        *value = None;
    }
}

fn is_valid_album_name(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed != "."
        && !trimmed.contains("..")
        && !trimmed.contains(['/', '\\', ':'])
}

/// Detection service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    /// Base URL of the detection service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds (applies to detection and health checks)
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,

    /// Maximum upload size accepted by the service, in MiB
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_sec: default_timeout_sec(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl ServiceSettings {
    /// Upload limit in bytes
    pub fn max_upload_bytes(&self) -> u64 {
        u64::from(self.max_upload_mb) * 1024 * 1024
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_sec() -> u64 {
    120
}

fn default_max_upload_mb() -> u32 {
    32
}

/// Local storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Directory for scoped scratch files (defaults to the platform cache dir)
    #[serde(default)]
    pub scratch_dir: Option<String>,

    /// Root of the media library (defaults to the platform pictures/videos dirs)
    #[serde(default)]
    pub library_dir: Option<String>,

    /// Camera roll drop folder used for camera capture
    #[serde(default)]
    pub capture_dir: Option<String>,

    /// Album (sub-directory) that saved media is committed into
    #[serde(default = "default_album_name")]
    pub album_name: String,

    /// Maximum size of a downloaded result, in MiB
    #[serde(default = "default_max_download_mb")]
    pub max_download_mb: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            library_dir: None,
            capture_dir: None,
            album_name: default_album_name(),
            max_download_mb: default_max_download_mb(),
        }
    }
}

impl StorageSettings {
    /// Resolved scratch directory
    pub fn scratch_dir_path(&self) -> PathBuf {
        match &self.scratch_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::cache_dir()
                .map(|d| d.join(APP_DIR_NAME).join("scratch"))
                .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR_NAME)),
        }
    }

    /// Resolved library root for a media kind (album directory included)
    pub fn library_root(&self, kind: MediaKind) -> PathBuf {
        let base = match &self.library_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let platform = match kind {
                    MediaKind::Image => dirs::picture_dir(),
                    MediaKind::Video => dirs::video_dir(),
                };
                platform
                    .or_else(dirs::home_dir)
                    .unwrap_or_else(|| PathBuf::from("."))
            }
        };
        base.join(&self.album_name)
    }

    /// Resolved capture directory, if configured
    pub fn capture_dir_path(&self) -> Option<PathBuf> {
        self.capture_dir.as_ref().map(PathBuf::from)
    }

    /// Download limit in bytes
    pub fn max_download_bytes(&self) -> u64 {
        u64::from(self.max_download_mb) * 1024 * 1024
    }
}

fn default_album_name() -> String {
    "PalmFinder".to_string()
}

fn default_max_download_mb() -> u32 {
    500
}

/// Capability grants used by the policy permission gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSettings {
    /// Allow camera capture
    #[serde(default = "default_true")]
    pub camera: bool,

    /// Allow reading from the media library
    #[serde(default = "default_true")]
    pub library_read: bool,

    /// Allow writing to the media library
    #[serde(default = "default_true")]
    pub library_write: bool,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            camera: true,
            library_read: true,
            library_write: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Directory for rolling log files (defaults to the platform data dir)
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Write logs to a daily rolling file in addition to stderr
    #[serde(default = "default_true")]
    pub file_logging: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_logging: true,
        }
    }
}

impl LoggingSettings {
    /// Resolved log directory
    pub fn log_dir_path(&self) -> PathBuf {
        match &self.log_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .map(|d| d.join(APP_DIR_NAME).join("logs"))
                .unwrap_or_else(|| PathBuf::from(".logs")),
        }
    }
}

/// Settings manager for loading, saving, and resetting settings
#[derive(Debug)]
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager rooted at the given directory
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    /// Platform default configuration directory
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(".").join(format!(".{}", APP_DIR_NAME)))
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        // Ensure parent directory exists so the lock file can be created.
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::Settings(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| CoreError::Settings(format!("Failed to open settings lock file: {}", e)))?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file).map_err(|e| {
                CoreError::Settings(format!("Failed to lock settings file (exclusive): {}", e))
            })?;
        } else {
            fs2::FileExt::lock_shared(&lock_file).map_err(|e| {
                CoreError::Settings(format!("Failed to lock settings file (shared): {}", e))
            })?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or unreadable
    pub fn load(&self) -> AppSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AppSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<AppSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
                settings = self.migrate(settings);
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &AppSettings) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            crate::fs::atomic_write_json_pretty(&self.settings_path, &normalized)?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(AppSettings::default())
        })
    }

    /// Migrate settings from older version
    fn migrate(&self, mut settings: AppSettings) -> AppSettings {
        settings.version = SETTINGS_VERSION;
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();

        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.service.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.service.max_upload_bytes(), 32 * 1024 * 1024);
        assert_eq!(settings.storage.album_name, "PalmFinder");
        assert!(settings.permissions.camera);
        assert!(settings.permissions.library_write);
        assert!(settings.logging.file_logging);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"service":{"baseUrl":"http://10.0.0.2:5000"}}"#;
        let settings: AppSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.service.base_url, "http://10.0.0.2:5000");
        assert_eq!(settings.service.timeout_sec, 120);
        assert_eq!(settings.storage.max_download_mb, 500);
        assert!(settings.permissions.library_read);
    }

    #[test]
    fn test_normalize_repairs_invalid_values() {
        let mut settings = AppSettings::default();
        settings.service.base_url = "ftp://somewhere".to_string();
        settings.service.timeout_sec = 0;
        settings.service.max_upload_mb = 0;
        settings.storage.album_name = "../escape".to_string();
        settings.storage.max_download_mb = 100_000;
        settings.storage.capture_dir = Some("   ".to_string());

        settings.normalize();

        assert_eq!(settings.service.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.service.timeout_sec, 5);
        assert_eq!(settings.service.max_upload_mb, 1);
        assert_eq!(settings.storage.album_name, "PalmFinder");
        assert_eq!(settings.storage.max_download_mb, 4096);
        assert!(settings.storage.capture_dir.is_none());
    }

    #[test]
    fn test_normalize_strips_trailing_slash() {
        let mut settings = AppSettings::default();
        settings.service.base_url = " http://172.16.13.46:5000/ ".to_string();
        settings.normalize();
        assert_eq!(settings.service.base_url, "http://172.16.13.46:5000");
    }

    #[test]
    fn test_library_root_uses_override_and_album() {
        let storage = StorageSettings {
            library_dir: Some("/media/library".to_string()),
            ..Default::default()
        };
        assert_eq!(
            storage.library_root(MediaKind::Video),
            PathBuf::from("/media/library/PalmFinder")
        );
    }

    #[test]
    fn test_manager_load_missing_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());
        assert_eq!(manager.load(), AppSettings::default());
    }

    #[test]
    fn test_manager_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());

        let mut settings = AppSettings::default();
        settings.service.base_url = "http://192.168.1.20:5000/".to_string();
        settings.permissions.camera = false;

        let saved = manager.save(&settings).unwrap();
        assert_eq!(saved.service.base_url, "http://192.168.1.20:5000");

        let loaded = manager.load();
        assert_eq!(loaded, saved);
        assert!(!loaded.permissions.camera);
    }

    #[test]
    fn test_manager_load_corrupt_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());
        fs::write(manager.settings_path(), "{ not json").unwrap();

        assert_eq!(manager.load(), AppSettings::default());
    }

    #[test]
    fn test_manager_reset_deletes_file() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());
        manager.save(&AppSettings::default()).unwrap();
        assert!(manager.settings_path().exists());

        let settings = manager.reset().unwrap();
        assert_eq!(settings, AppSettings::default());
        assert!(!manager.settings_path().exists());
    }
}
