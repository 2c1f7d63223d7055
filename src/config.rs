use anyhow::Result;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for convsearch directories
pub struct ConvsearchDirs {
    project_dirs: Option<ProjectDirs>,
}

impl ConvsearchDirs {
    /// Create a new ConvsearchDirs instance
    pub fn new() -> Self {
        let project_dirs = ProjectDirs::from("com", "convsearch", "convsearch");
        Self { project_dirs }
    }

    /// Get the default cache directory for embedding models
    pub fn default_cache_dir(&self) -> PathBuf {
        match &self.project_dirs {
            Some(dirs) => dirs.cache_dir().to_path_buf(),
            None => {
                // Fallback to current directory if ProjectDirs fails
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(".cache")
            }
        }
    }

    /// Get the state directory holding per-project progress files and
    /// embedded vector databases. `CONVSEARCH_STATE_DIR` overrides the
    /// platform default.
    pub fn state_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("CONVSEARCH_STATE_DIR") {
            return PathBuf::from(dir);
        }
        match &self.project_dirs {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Get the root directory holding conversation logs, one subdirectory per
    /// project. `CONVSEARCH_LOGS_DIR` overrides the default location.
    pub fn logs_root(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("CONVSEARCH_LOGS_DIR") {
            return PathBuf::from(dir);
        }
        match BaseDirs::new() {
            Some(base) => base.home_dir().join(".claude").join("projects"),
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("projects"),
        }
    }

    /// Ensure the cache directory exists
    pub fn ensure_cache_dir(&self) -> std::io::Result<PathBuf> {
        let cache_dir = self.default_cache_dir();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(cache_dir)
    }

    /// Ensure the state directory exists
    pub fn ensure_state_dir(&self) -> std::io::Result<PathBuf> {
        let state_dir = self.state_dir();
        std::fs::create_dir_all(&state_dir)?;
        Ok(state_dir)
    }
}

impl Default for ConvsearchDirs {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint configuration for the networked vector store backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub qdrant_host: String,
    pub qdrant_port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            qdrant_host: "localhost".to_string(),
            qdrant_port: 6333,
        }
    }
}

impl BackendConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.qdrant_host, self.qdrant_port)
    }

    /// Parse a `host`, `host:port`, or `scheme://host:port` string. A missing
    /// or malformed port falls back to the default.
    pub fn from_url(url: &str) -> Self {
        let defaults = BackendConfig::default();
        let url_part = match url.split_once("://") {
            Some((_, rest)) => rest,
            None => url,
        };
        match url_part.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => BackendConfig {
                    qdrant_host: host.to_string(),
                    qdrant_port: port,
                },
                Err(_) => BackendConfig {
                    qdrant_host: url_part.to_string(),
                    ..defaults
                },
            },
            None => BackendConfig {
                qdrant_host: url_part.to_string(),
                ..defaults
            },
        }
    }

    fn config_path() -> PathBuf {
        ConvsearchDirs::new().state_dir().join("config.json")
    }

    /// Load the backend endpoint. The `QDRANT_URL` environment variable takes
    /// precedence over the config file, which takes precedence over defaults.
    pub fn load() -> Self {
        if let Ok(url) = std::env::var("QDRANT_URL") {
            return BackendConfig::from_url(&url);
        }

        let path = Self::config_path();
        if let Ok(data) = std::fs::read_to_string(&path)
            && let Ok(config) = serde_json::from_str::<BackendConfig>(&data)
        {
            return config;
        }

        BackendConfig::default()
    }

    /// Save the backend endpoint to the config file.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
