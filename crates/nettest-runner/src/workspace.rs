//! Identity-keyed scratch workspace.
//!
//! ```text
//! <root>/<step identity>/step.yaml        step definition, written while New
//! <root>/<step identity>/final.yaml       marker written once the step completed
//! <root>/<test identity>/testing.yaml     evaluation definition
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use nettest_core::{ensure_dir, read_yaml, write_yaml};
use nettest_recipe::{with_sha, IdentifiedRecipe};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

pub const STEP_FILE: &str = "step.yaml";
pub const FINAL_FILE: &str = "final.yaml";
pub const TESTING_FILE: &str = "testing.yaml";

/// Previous identity handed to the first step of a chain.
pub const PREVIOUS_NONE: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    New,
    Final,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::New => "New",
            StepStatus::Final => "Final",
        }
    }
}

/// Contents of `final.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub short_nnue: String,
    pub std_nnue: String,
    pub checkpoint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    pub identity: String,
    pub spec: Value,
    pub status: StepStatus,
    /// Stage base name, only for steps that still need to run.
    pub stage: Option<String>,
    /// What an earlier run produced, only for finalized steps.
    pub artifact: Option<FinalRecord>,
}

impl ResolvedStep {
    pub fn is_final(&self) -> bool {
        self.status == StepStatus::Final
    }

    pub fn repetitions(&self) -> u64 {
        self.spec
            .pointer("/run/repetitions")
            .and_then(Value::as_u64)
            .unwrap_or(1)
    }

    pub fn max_epochs(&self) -> u64 {
        self.spec
            .pointer("/run/max_epochs")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledRecipe {
    pub steps: Vec<ResolvedStep>,
    pub evaluation: Option<nettest_recipe::IdentifiedEvaluation>,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The `scratch` workspace below `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("scratch"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validate_identity(identity: &str) -> Result<()> {
        let valid = !identity.is_empty()
            && identity
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(())
        } else {
            Err(anyhow!("invalid identity '{}': expected lowercase hex", identity))
        }
    }

    pub fn identity_dir(&self, identity: &str) -> Result<PathBuf> {
        Self::validate_identity(identity)?;
        Ok(self.root.join(identity))
    }

    pub fn step_definition_path(&self, identity: &str) -> Result<PathBuf> {
        Ok(self.identity_dir(identity)?.join(STEP_FILE))
    }

    pub fn final_marker_path(&self, identity: &str) -> Result<PathBuf> {
        Ok(self.identity_dir(identity)?.join(FINAL_FILE))
    }

    pub fn evaluation_definition_path(&self, identity: &str) -> Result<PathBuf> {
        Ok(self.identity_dir(identity)?.join(TESTING_FILE))
    }

    pub fn is_final(&self, identity: &str) -> Result<bool> {
        Ok(self.final_marker_path(identity)?.is_file())
    }

    pub fn read_final_marker(&self, identity: &str) -> Result<Option<FinalRecord>> {
        let path = self.final_marker_path(identity)?;
        if !path.is_file() {
            return Ok(None);
        }
        read_yaml(&path).map(Some)
    }

    pub fn write_final_marker(&self, identity: &str, record: &FinalRecord) -> Result<()> {
        write_yaml(&self.final_marker_path(identity)?, record)
    }

    /// Load a persisted step definition and check it belongs to `identity`.
    pub fn load_step_definition(&self, identity: &str) -> Result<Value> {
        let path = self.step_definition_path(identity)?;
        let step: Value = read_yaml(&path)?;
        match step.get("sha").and_then(Value::as_str) {
            Some(sha) if sha == identity => Ok(step),
            other => Err(anyhow!(
                "{} records sha {:?}, expected {}",
                path.display(),
                other,
                identity
            )),
        }
    }

    pub fn load_evaluation_definition(&self, identity: &str) -> Result<Value> {
        read_yaml(&self.evaluation_definition_path(identity)?)
    }

    /// Artifact a step resumes from. The first step of a chain (previous
    /// identity `None`) has none; any other predecessor must be final.
    pub fn require_prior_artifact(&self, previous: &str) -> Result<Option<FinalRecord>> {
        if previous.eq_ignore_ascii_case(PREVIOUS_NONE) {
            return Ok(None);
        }
        match self.read_final_marker(previous)? {
            Some(record) => Ok(Some(record)),
            None => Err(anyhow!(
                "previous step {} has no {}; it did not complete",
                previous,
                FINAL_FILE
            )),
        }
    }

    /// Classify every step as `New` or `Final` and persist what later jobs
    /// load by identity. Finalized step directories are never written to.
    pub fn reconcile(&self, identified: &IdentifiedRecipe) -> Result<ReconciledRecipe> {
        ensure_dir(&self.root)?;

        if let Some(evaluation) = &identified.evaluation {
            let dir = self.identity_dir(&evaluation.identity)?;
            ensure_dir(&dir)?;
            write_yaml(
                &dir.join(TESTING_FILE),
                &with_sha(&evaluation.spec, &evaluation.identity),
            )?;
        }

        let mut steps = Vec::with_capacity(identified.steps.len());
        for step in &identified.steps {
            let dir = self.identity_dir(&step.identity)?;
            ensure_dir(&dir)?;
            let resolved = match self.read_final_marker(&step.identity)? {
                Some(record) => ResolvedStep {
                    identity: step.identity.clone(),
                    spec: step.spec.clone(),
                    status: StepStatus::Final,
                    stage: None,
                    artifact: Some(record),
                },
                None => {
                    let mut definition = with_sha(&step.spec, &step.identity);
                    if let Some(fields) = definition.as_object_mut() {
                        fields.insert("status".to_string(), json!(StepStatus::New.as_str()));
                    }
                    write_yaml(&dir.join(STEP_FILE), &definition)?;
                    ResolvedStep {
                        identity: step.identity.clone(),
                        spec: step.spec.clone(),
                        status: StepStatus::New,
                        stage: Some(format!("step_{}", step.identity)),
                        artifact: None,
                    }
                }
            };
            info!(
                identity = %resolved.identity,
                status = resolved.status.as_str(),
                "reconciled step"
            );
            steps.push(resolved);
        }

        Ok(ReconciledRecipe {
            steps,
            evaluation: identified.evaluation.clone(),
        })
    }
}
