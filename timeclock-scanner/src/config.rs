//! Scanner configuration
//!
//! Handles:
//! - Backend attendance service endpoint settings
//! - Camera defaults and decode buffering
//! - Scan policy (pending decode freshness, cooldown heuristic, badge prefix)
//! - Environment overrides (`.env` is loaded by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::Facing;

pub const CONFIG_ENV: &str = "TIMECLOCK_SCANNER_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub backend: BackendConfig,
    pub camera: CameraConfig,
    pub scan: ScanConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub scan_path: String,
    pub login_path: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub facing: Facing,
    /// Capacity of the channel between the frame pump and the controller
    pub decode_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// A decode held back while a submission is in flight is dropped once older than this
    pub pending_max_age_ms: u64,
    /// Lowercase keywords marking a backend failure message as a cooldown condition
    pub cooldown_markers: Vec<String>,
    /// Badge prefix; payloads without it are rejected locally
    pub payload_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    /// Pre-issued bearer token; requires `user_id`
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    #[serde(skip)] // Never serialize passwords
    pub password: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            scan_path: "/api/attendance/scan".to_string(),
            login_path: "/api/auth/login".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Back,
            decode_buffer: 8,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pending_max_age_ms: 1500,
            cooldown_markers: default_cooldown_markers(),
            payload_prefix: None,
        }
    }
}

fn default_cooldown_markers() -> Vec<String> {
    ["wait", "cooldown", "too soon", "poczekaj", "odczekaj", "za wcześnie"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl BackendConfig {
    pub fn scan_url(&self) -> String {
        join_url(&self.base_url, &self.scan_path)
    }

    pub fn login_url(&self) -> String {
        join_url(&self.base_url, &self.login_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

impl ScannerConfig {
    /// Load config from `TIMECLOCK_SCANNER_CONFIG` or the OS-specific location,
    /// then apply environment overrides
    pub async fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => Self::config_file_path()?,
        };

        let mut config = Self::load_from(&path).await?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults
    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(&content)?)
    }

    pub async fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("timeclock-scanner");
        path.push("config.toml");
        Ok(path)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("TIMECLOCK_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(token) = non_empty("TIMECLOCK_TOKEN") {
            self.auth.token = Some(token);
        }
        if let Some(username) = non_empty("TIMECLOCK_USERNAME") {
            self.auth.username = Some(username);
        }
        if let Some(user_id) = non_empty("TIMECLOCK_USER_ID") {
            self.auth.user_id = Some(user_id);
        }
        if let Some(password) = non_empty("TIMECLOCK_PASSWORD") {
            self.auth.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        reqwest::Url::parse(&self.backend.base_url).map_err(|e| ConfigError::Invalid {
            field: "backend.base_url",
            reason: e.to_string(),
        })?;
        if self.backend.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "backend.request_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.camera.decode_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "camera.decode_buffer",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ScannerConfig::default();
        assert_eq!(config.camera.facing, Facing::Back);
        assert_eq!(config.backend.request_timeout_secs, 10);
        assert!(config.scan.cooldown_markers.iter().any(|m| m == "wait"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_path() {
        if let Ok(path) = ScannerConfig::config_file_path() {
            assert!(path.to_string_lossy().contains("timeclock-scanner"));
            assert!(path.to_string_lossy().ends_with("config.toml"));
        }
    }

    #[test]
    fn test_url_joining() {
        let mut backend = BackendConfig::default();
        backend.base_url = "http://kiosk.local:8001/".into();
        assert_eq!(backend.scan_url(), "http://kiosk.local:8001/api/attendance/scan");
        assert_eq!(backend.login_url(), "http://kiosk.local:8001/api/auth/login");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TIMECLOCK_BACKEND_URL", "https://timeclock.example.com"),
            ("TIMECLOCK_TOKEN", "abc"),
            ("TIMECLOCK_USERNAME", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = ScannerConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.backend.base_url, "https://timeclock.example.com");
        assert_eq!(config.auth.token.as_deref(), Some("abc"));
        assert!(config.auth.username.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ScannerConfig::default();
        config.backend.base_url = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "backend.base_url", .. })
        ));

        let mut config = ScannerConfig::default();
        config.camera.decode_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_partial_file_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        tokio::fs::write(&path, "[camera]\nfacing = \"front\"\n[scan]\npayload_prefix = \"QR-EMP-\"\n")
            .await
            .unwrap();
        let config = ScannerConfig::load_from(&path).await.unwrap();
        assert_eq!(config.camera.facing, Facing::Front);
        assert_eq!(config.camera.decode_buffer, 8);
        assert_eq!(config.scan.payload_prefix.as_deref(), Some("QR-EMP-"));

        let mut with_password = config.clone();
        with_password.auth.password = Some("secret".into());
        let saved = dir.path().join("nested").join("config.toml");
        with_password.save_to(&saved).await.unwrap();
        let text = tokio::fs::read_to_string(&saved).await.unwrap();
        assert!(!text.contains("secret"));
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScannerConfig::load_from(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.backend.scan_path, "/api/attendance/scan");
    }
}
