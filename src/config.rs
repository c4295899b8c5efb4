use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::enumerator::DEFAULT_PAGE_SIZE;
use crate::core::profile::ScanProfile;

pub const DEFAULT_HOST: &str = "http://localhost:8983";
pub const DEFAULT_CONTEXT_PATH: &str = "api/cores";
pub const DEFAULT_COLLECTION: &str = "my-collection";

/// Document cap of the free backend plan.
pub const DEFAULT_MAX_DOCS: usize = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub host: String,
    pub context_path: String,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            context_path: DEFAULT_CONTEXT_PATH.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            timeout_secs: 60,
        }
    }
}

impl FlowConfig {
    /// `host/context_path/collection` with surrounding slashes removed.
    pub fn collection_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.trimmed_host(),
            self.context_path.trim_matches('/'),
            self.collection.trim_matches('/')
        )
    }

    pub fn trimmed_host(&self) -> &str {
        self.host.trim_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("host cannot be empty".to_string()));
        }
        if self.collection.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid(
                "collection cannot be empty".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub concurrency: usize,
    /// Minimum score for a candidate to count as a duplicate.
    pub threshold: f64,
    pub profile: ScanProfile,
    pub limit: Option<usize>,
    pub top_k: usize,
    pub page_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            threshold: 0.6,
            profile: ScanProfile::Balanced,
            limit: None,
            top_k: 10,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.top_k < 2 {
            return Err(ConfigError::Invalid("top_k must be at least 2".to_string()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.limit == Some(0) {
            return Err(ConfigError::Invalid("limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub concurrency: usize,
    pub recursive: bool,
    pub max_docs: usize,
    pub thumbnail_size: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            recursive: true,
            max_docs: DEFAULT_MAX_DOCS,
            thumbnail_size: crate::core::thumbnail::UPLOAD_THUMBNAIL_SIZE,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.thumbnail_size == 0 {
            return Err(ConfigError::Invalid(
                "thumbnail_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings file; every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub flow: FlowConfig,
    pub scan: ScanConfig,
    pub index: IndexConfig,
}

pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collection_url_trims_slashes() {
        let config = FlowConfig {
            host: "http://flow:8983/".to_string(),
            context_path: "/api/cores/".to_string(),
            collection: "photos/".to_string(),
            ..FlowConfig::default()
        };
        assert_eq!(config.collection_url(), "http://flow:8983/api/cores/photos");
    }

    #[test]
    fn test_scan_config_validation() {
        assert!(ScanConfig::default().validate().is_ok());

        let bad = [
            ScanConfig {
                threshold: 1.5,
                ..ScanConfig::default()
            },
            ScanConfig {
                threshold: -0.1,
                ..ScanConfig::default()
            },
            ScanConfig {
                concurrency: 0,
                ..ScanConfig::default()
            },
            ScanConfig {
                limit: Some(0),
                ..ScanConfig::default()
            },
            ScanConfig {
                top_k: 1,
                ..ScanConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_load_partial_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"flow": {"collection": "holiday"}, "scan": {"threshold": 0.9, "profile": "speed"}}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.flow.collection, "holiday");
        assert_eq!(config.flow.host, DEFAULT_HOST);
        assert_eq!(config.scan.threshold, 0.9);
        assert_eq!(config.scan.profile, ScanProfile::Speed);
        assert_eq!(config.index.max_docs, DEFAULT_MAX_DOCS);
    }

    #[test]
    fn test_load_invalid_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            load_config(&temp_dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
