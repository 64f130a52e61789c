use std::path::Path;

use anyhow::Result;
use nettest_core::read_yaml;
use serde::{Deserialize, Serialize};

/// Constants of the generated CI pipeline. Every field has a default, so a
/// config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub include_remote: String,
    pub extends: String,
    pub image: String,
    pub timeout: String,
    pub slurm: SlurmConfig,
    pub time_limits: TimeLimits,
    /// Lines every job script starts with.
    pub preamble: Vec<String>,
    /// Module prefix of the collaborator entry points, e.g. `<launcher>.train`.
    pub launcher: String,
    pub artifact_expiry: String,
    pub baseline_source: DatasetSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmConfig {
    pub nodes: u32,
    pub tasks: u32,
    pub cpu_bind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeLimits {
    pub data: String,
    pub training: String,
    pub testing: String,
}

/// A Hugging Face dataset repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetSource {
    pub owner: String,
    pub repo: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            include_remote: "https://gitlab.com/cscs-ci/recipes/-/raw/master/templates/v2/.ci-ext.yml"
                .to_string(),
            extends: ".container-runner-clariden-gh200".to_string(),
            image: "$PERSIST_IMAGE_NAME".to_string(),
            timeout: "48h".to_string(),
            slurm: SlurmConfig::default(),
            time_limits: TimeLimits::default(),
            preamble: vec![
                "cd /workspace/".to_string(),
                "ln -s $CI_PROJECT_DIR ./cidir".to_string(),
            ],
            launcher: "python -u -m nettest".to_string(),
            artifact_expiry: "1 month".to_string(),
            baseline_source: DatasetSource::default(),
        }
    }
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            nodes: 1,
            tasks: 1,
            cpu_bind: "none".to_string(),
        }
    }
}

impl Default for TimeLimits {
    fn default() -> Self {
        Self {
            data: "04:00:00".to_string(),
            training: "12:00:00".to_string(),
            testing: "12:00:00".to_string(),
        }
    }
}

impl Default for DatasetSource {
    fn default() -> Self {
        Self {
            owner: "official-stockfish".to_string(),
            repo: "master-binpacks".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_yaml(path)
    }
}
