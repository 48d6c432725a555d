//! Client-local configuration.
//!
//! One JSON file under the platform config directory holds the server
//! endpoint plus the last-selected provider/model. Selections are loaded at
//! startup and written back whenever they change; the core components take
//! provider/model as plain parameters and never read this state themselves.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub selected_provider: Option<String>,
    #[serde(default)]
    pub selected_model: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_key: String::new(),
            selected_provider: None,
            selected_model: None,
        }
    }
}

fn default_server_url() -> String {
    std::env::var("PALAVER_URL").unwrap_or_else(|_| "http://127.0.0.1:8840".to_string())
}

pub fn default_config_path() -> PathBuf {
    let Some(dirs) = ProjectDirs::from("dev", "palaver", "palaver") else {
        return Path::new("palaver-api.json").to_path_buf();
    };
    dirs.config_dir().join("api.json")
}

pub fn load_config(path: &Path) -> ApiConfig {
    let Ok(bytes) = fs::read(path) else {
        return ApiConfig::default();
    };
    serde_json::from_slice::<ApiConfig>(&bytes).unwrap_or_default()
}

pub fn save_config(path: &Path, cfg: &ApiConfig) -> Result<(), String> {
    let json = serde_json::to_vec_pretty(cfg).map_err(|e| e.to_string())?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::write(path, json).map_err(|e| e.to_string())
}

/// Record the provider/model the user just picked, writing the file only when
/// something actually changed.
pub fn remember_selection(
    path: &Path,
    cfg: &mut ApiConfig,
    provider: &str,
    model: &str,
) -> Result<(), String> {
    let unchanged = cfg.selected_provider.as_deref() == Some(provider)
        && cfg.selected_model.as_deref() == Some(model);
    cfg.selected_provider = Some(provider.to_string());
    cfg.selected_model = Some(model.to_string());
    if unchanged {
        return Ok(());
    }
    save_config(path, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.json"));
        assert!(cfg.selected_provider.is_none());
        assert!(cfg.api_key.is_empty());
    }

    #[test]
    fn test_selection_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.json");

        let mut cfg = ApiConfig::default();
        remember_selection(&path, &mut cfg, "local", "tiny-9b").unwrap();

        let reloaded = load_config(&path);
        assert_eq!(reloaded.selected_provider.as_deref(), Some("local"));
        assert_eq!(reloaded.selected_model.as_deref(), Some("tiny-9b"));
    }

    #[test]
    fn test_unchanged_selection_skips_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.json");

        let mut cfg = ApiConfig::default();
        remember_selection(&path, &mut cfg, "local", "tiny-9b").unwrap();
        fs::remove_file(&path).unwrap();

        // Same selection again: no write happens, so the file stays gone.
        remember_selection(&path, &mut cfg, "local", "tiny-9b").unwrap();
        assert!(!path.exists());
    }
}
