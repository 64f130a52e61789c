//! CI pipeline and flat task schedule for a reconciled recipe.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{DatasetSource, PipelineConfig};
use crate::workspace::{ReconciledRecipe, ResolvedStep, PREVIOUS_NONE};

pub const DATA_STAGE: &str = "ensureData";
pub const TESTING_STAGE: &str = "testing";
const JOB_SUFFIX: &str = "Job";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Include {
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobVariables {
    #[serde(rename = "SLURM_JOB_NUM_NODES")]
    pub nodes: u32,
    #[serde(rename = "SLURM_NTASKS")]
    pub tasks: u32,
    #[serde(rename = "SLURM_TIMELIMIT")]
    pub time_limit: String,
    #[serde(rename = "SLURM_CPU_BIND")]
    pub cpu_bind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub expire_in: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub timeout: String,
    pub extends: String,
    pub image: String,
    pub variables: JobVariables,
    pub stage: String,
    pub script: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<JobArtifacts>,
}

/// Pipeline document consumed by the CI system. Jobs sit next to `include`
/// and `stages` at the top level, keyed `<stage>Job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub include: Vec<Include>,
    pub stages: Vec<String>,
    #[serde(flatten)]
    pub jobs: BTreeMap<String, Job>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTask {
    pub owner: String,
    pub repo: String,
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainTask {
    pub current_sha: String,
    pub previous_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTask {
    pub test_config_sha: String,
    pub testing_sha: String,
}

/// Keyword bundles for `run_data_update`, `run_step` and `run_test`, in the
/// order an executor must issue them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub data: Vec<DataTask>,
    pub train: Vec<TrainTask>,
    pub test: Vec<TestTask>,
}

pub fn generate(recipe: &ReconciledRecipe, config: &PipelineConfig) -> (Pipeline, Schedule) {
    let mut pipeline = Pipeline {
        include: vec![Include {
            remote: config.include_remote.clone(),
        }],
        stages: stage_names(recipe),
        jobs: BTreeMap::new(),
    };
    let mut schedule = Schedule::default();

    add_data_job(recipe, config, &mut pipeline, &mut schedule);
    add_training_jobs(recipe, config, &mut pipeline, &mut schedule);
    add_testing_job(recipe, config, &mut pipeline, &mut schedule);

    info!(stages = ?pipeline.stages, "pipeline stages");
    (pipeline, schedule)
}

fn stage_names(recipe: &ReconciledRecipe) -> Vec<String> {
    let mut stages = vec![DATA_STAGE.to_string()];
    for step in &recipe.steps {
        if let Some(stage) = &step.stage {
            stages.extend((0..step.repetitions()).map(|rep| format!("{}_{}", stage, rep)));
        }
    }
    if recipe.evaluation.is_some() {
        stages.push(TESTING_STAGE.to_string());
    }
    stages
}

fn job_base(config: &PipelineConfig, stage: &str, time_limit: &str) -> Job {
    Job {
        timeout: config.timeout.clone(),
        extends: config.extends.clone(),
        image: config.image.clone(),
        variables: JobVariables {
            nodes: config.slurm.nodes,
            tasks: config.slurm.tasks,
            time_limit: time_limit.to_string(),
            cpu_bind: config.slurm.cpu_bind.clone(),
        },
        stage: stage.to_string(),
        script: config.preamble.clone(),
        artifacts: None,
    }
}

/// Every dataset repository any step touches, finalized steps included, with
/// the binpack files wanted from it.
pub fn dataset_sources(
    recipe: &ReconciledRecipe,
    baseline: &DatasetSource,
) -> BTreeMap<DatasetSource, BTreeSet<String>> {
    let mut sources: BTreeMap<DatasetSource, BTreeSet<String>> = BTreeMap::new();
    sources.entry(baseline.clone()).or_default();

    for step in &recipe.steps {
        let datasets = step.spec.get("datasets").and_then(Value::as_array);
        for hf in datasets.into_iter().flatten().filter_map(|d| d.get("hf")) {
            let owner = hf.get("owner").and_then(Value::as_str);
            let repo = hf.get("repo").and_then(Value::as_str);
            if let (Some(owner), Some(repo)) = (owner, repo) {
                sources
                    .entry(DatasetSource {
                        owner: owner.to_string(),
                        repo: repo.to_string(),
                    })
                    .or_default();
            }
        }

        let binpacks = step
            .spec
            .pointer("/run/binpacks")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .chain(step.spec.pointer("/convert/binpack"))
            .filter_map(Value::as_str);
        for binpack in binpacks {
            match split_binpack(binpack) {
                Some((source, filename)) => {
                    sources.entry(source).or_default().insert(filename);
                }
                None => warn!(
                    identity = %step.identity,
                    binpack,
                    "binpack is not of the form owner/repo/file; skipping"
                ),
            }
        }
    }
    sources
}

fn split_binpack(binpack: &str) -> Option<(DatasetSource, String)> {
    let mut parts = binpack.splitn(3, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let filename = parts.next().filter(|s| !s.is_empty())?;
    Some((
        DatasetSource {
            owner: owner.to_string(),
            repo: repo.to_string(),
        },
        filename.to_string(),
    ))
}

fn add_data_job(
    recipe: &ReconciledRecipe,
    config: &PipelineConfig,
    pipeline: &mut Pipeline,
    schedule: &mut Schedule,
) {
    let mut job = job_base(config, DATA_STAGE, &config.time_limits.data);
    for (source, filenames) in dataset_sources(recipe, &config.baseline_source) {
        let filenames: Vec<String> = filenames.into_iter().collect();
        // ensure_data needs at least one file to fetch.
        if !filenames.is_empty() {
            job.script.push(format!(
                "{}.ensure_data {} {} {}",
                config.launcher,
                source.owner,
                source.repo,
                filenames.join(" ")
            ));
        }
        schedule.data.push(DataTask {
            owner: source.owner,
            repo: source.repo,
            filenames,
        });
    }
    pipeline
        .jobs
        .insert(format!("{}{}", DATA_STAGE, JOB_SUFFIX), job);
}

fn add_training_jobs(
    recipe: &ReconciledRecipe,
    config: &PipelineConfig,
    pipeline: &mut Pipeline,
    schedule: &mut Schedule,
) {
    let mut previous = PREVIOUS_NONE.to_string();
    for step in &recipe.steps {
        let current = &step.identity;
        info!("Step starting from {} leading to {}", previous, current);

        let Some(stage) = step.stage.as_deref().filter(|_| !step.is_final()) else {
            let produced = step
                .artifact
                .as_ref()
                .map(|a| a.std_nnue.as_str())
                .unwrap_or("unknown");
            info!(result = produced, "step is final already");
            previous = current.clone();
            continue;
        };
        info!(epochs = step.max_epochs(), "step needs training");

        for rep in 0..step.repetitions() {
            let stage_name = format!("{}_{}", stage, rep);
            let mut job = job_base(config, &stage_name, &config.time_limits.training);
            job.script
                .push(format!("{}.train {} {}", config.launcher, current, previous));
            job.artifacts = Some(JobArtifacts {
                expire_in: config.artifact_expiry.clone(),
                paths: vec![format!("step_{}", current)],
            });
            pipeline
                .jobs
                .insert(format!("{}{}", stage_name, JOB_SUFFIX), job);
            schedule.train.push(TrainTask {
                current_sha: current.clone(),
                previous_sha: previous.clone(),
            });
        }
        previous = current.clone();
    }
}

/// Steps whose nets get evaluated, newest first: every step still to be
/// trained plus the most recent finalized one as a reference.
pub fn evaluation_targets(steps: &[ResolvedStep]) -> Vec<&ResolvedStep> {
    let mut baseline_taken = false;
    steps
        .iter()
        .rev()
        .filter(|step| {
            if !step.is_final() {
                return true;
            }
            !std::mem::replace(&mut baseline_taken, true)
        })
        .collect()
}

fn add_testing_job(
    recipe: &ReconciledRecipe,
    config: &PipelineConfig,
    pipeline: &mut Pipeline,
    schedule: &mut Schedule,
) {
    let Some(evaluation) = &recipe.evaluation else {
        return;
    };
    let mut job = job_base(config, TESTING_STAGE, &config.time_limits.testing);
    for step in evaluation_targets(&recipe.steps) {
        job.script.push(format!(
            "{}.test {} {}",
            config.launcher, evaluation.identity, step.identity
        ));
        schedule.test.push(TestTask {
            test_config_sha: evaluation.identity.clone(),
            testing_sha: step.identity.clone(),
        });
    }
    pipeline
        .jobs
        .insert(format!("{}{}", TESTING_STAGE, JOB_SUFFIX), job);
}
