//! Pipeline configuration: jobs, platforms, runtimes, build configs, trees
//! and fragments, loaded from a `config/pipeline.yaml` YAML catalog.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
}

/// A single scheduled job description (a `job` block in `pipeline.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub name: String,
    pub kind: String,
    pub image: Option<String>,
    pub template: Option<String>,
    pub params: BTreeMap<String, String>,
    pub fragments: Vec<String>,
    pub rules: RuleSet,
}

/// Dispatch rules gating whether a job runs for a given event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub tree: Vec<String>,
    pub branch: Vec<String>,
    pub min_version: Option<MinVersion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinVersion {
    pub version: u32,
    pub patchlevel: u32,
}

/// A lab/runtime platform (device type) a job can be dispatched to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub name: String,
    pub architecture: Option<String>,
    pub boot_method: Option<String>,
    pub mach: Option<String>,
    pub context: BTreeMap<String, String>,
}

/// A configured runtime/backend instance (e.g. a LAVA lab).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub name: String,
    pub lab_type: String,
    pub url: Option<String>,
    pub priority_min: Option<i32>,
    pub priority_max: Option<i32>,
    pub max_jobs_per_arch: BTreeMap<String, u32>,
}

/// A kernel build configuration (defconfig + fragments + compiler).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub name: String,
    pub tree: String,
    pub branch: String,
    pub arch: Vec<String>,
    pub defconfig: Vec<String>,
    pub compiler: String,
    pub fragments: Vec<String>,
}

/// A tracked kernel tree/branch combination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub name: String,
    pub url: String,
    pub branches: Vec<String>,
}

/// A named config fragment, either a path or a literal `CONFIG_*` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    pub name: String,
    pub path: Option<String>,
    pub configs: Vec<String>,
}

/// Blob storage backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub name: String,
    pub storage_type: String,
    pub base_url: String,
}

/// The full pipeline configuration catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub jobs: BTreeMap<String, JobConfig>,
    pub platforms: BTreeMap<String, PlatformConfig>,
    pub runtimes: BTreeMap<String, RuntimeConfig>,
    pub build_configs: BTreeMap<String, BuildConfig>,
    pub trees: BTreeMap<String, TreeConfig>,
    pub fragments: BTreeMap<String, FragmentConfig>,
    pub storage_configs: BTreeMap<String, StorageConfig>,
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn job(&self, name: &str) -> Result<&JobConfig, ConfigError> {
        self.jobs
            .get(name)
            .ok_or_else(|| ConfigError::UnknownJob(name.to_string()))
    }

    pub fn platform(&self, name: &str) -> Result<&PlatformConfig, ConfigError> {
        self.platforms
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPlatform(name.to_string()))
    }

    pub fn is_job_defined(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn is_platform_defined(&self, name: &str) -> bool {
        self.platforms.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_parses() {
        let config = Config::from_yaml_str("").unwrap();
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn job_lookup_round_trips() {
        let yaml = r#"
jobs:
  baseline-arm64:
    name: baseline-arm64
    kind: job
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.job("baseline-arm64").unwrap().kind, "job");
        assert!(matches!(
            config.job("missing"),
            Err(ConfigError::UnknownJob(_))
        ));
    }

    #[test]
    fn platform_lookup_round_trips() {
        let yaml = r#"
platforms:
  qemu-arm64:
    name: qemu-arm64
    architecture: arm64
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.is_platform_defined("qemu-arm64"));
        assert!(!config.is_platform_defined("bogus"));
    }
}
