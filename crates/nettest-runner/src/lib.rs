//! Turns a recipe into a reconciled workspace, a CI pipeline and a task
//! schedule, and drives a schedule through the collaborator tools.

mod config;
mod execute;
mod pipeline;
mod retry;
mod workspace;

use std::path::Path;

use anyhow::{anyhow, Result};
use nettest_core::{read_yaml, to_yaml_string, write_yaml};
use nettest_recipe::{expand, resolve, IdentifiedRecipe, Recipe};
use tracing::info;

pub use config::{DatasetSource, PipelineConfig, SlurmConfig, TimeLimits};
pub use execute::{execute_schedule, Collaborators, ExecutionReport, TestOutcome, TestReport};
pub use pipeline::{
    dataset_sources, evaluation_targets, generate, DataTask, Include, Job, JobArtifacts,
    JobVariables, Pipeline, Schedule, TestTask, TrainTask, DATA_STAGE, TESTING_STAGE,
};
pub use retry::RetryPolicy;
pub use workspace::{
    FinalRecord, ReconciledRecipe, ResolvedStep, StepStatus, Workspace, FINAL_FILE,
    PREVIOUS_NONE, STEP_FILE, TESTING_FILE,
};

/// Everything derived from one recipe against one workspace.
#[derive(Debug, Clone)]
pub struct Plan {
    pub identified: IdentifiedRecipe,
    pub reconciled: ReconciledRecipe,
    pub pipeline: Pipeline,
    pub schedule: Schedule,
}

pub fn load_recipe(path: &Path) -> Result<Recipe> {
    read_yaml(path)
}

/// Expand the meta-recipe at `input` and write the concrete recipe to `output`.
pub fn expand_recipe_file(input: &Path, output: &Path) -> Result<Recipe> {
    let recipe = load_recipe(input)?;
    let expanded =
        expand(&recipe).map_err(|e| anyhow!("cannot expand {}: {}", input.display(), e))?;
    write_yaml(output, &expanded)?;
    info!(output = %output.display(), "expanded recipe written");
    Ok(expanded)
}

/// Expand, validate and identify `recipe`, reconcile it against `workspace`
/// and derive the pipeline and schedule. An invalid recipe fails before the
/// workspace is touched.
pub fn plan_recipe(recipe: &Recipe, workspace: &Workspace, config: &PipelineConfig) -> Result<Plan> {
    let identified = resolve(recipe)?;
    info!(
        "Recipe, augmented with shas:\n{}",
        to_yaml_string(&identified.annotated())?
    );

    let reconciled = workspace.reconcile(&identified)?;
    let (pipeline, schedule) = generate(&reconciled, config);
    info!(
        data = schedule.data.len(),
        train = schedule.train.len(),
        test = schedule.test.len(),
        "schedule information:\n{}",
        to_yaml_string(&schedule)?
    );

    Ok(Plan {
        identified,
        reconciled,
        pipeline,
        schedule,
    })
}

/// Plan the recipe file at `input` and write the pipeline document to `output`.
pub fn plan_recipe_file(
    input: &Path,
    output: &Path,
    workspace: &Workspace,
    config: &PipelineConfig,
) -> Result<Plan> {
    info!(recipe = %input.display(), "translating recipe");
    let recipe = load_recipe(input)?;
    let plan = plan_recipe(&recipe, workspace, config)
        .map_err(|e| anyhow!("cannot plan {}: {:#}", input.display(), e))?;
    write_pipeline(output, &plan.pipeline)?;
    info!(pipeline = %output.display(), "resulting pipeline");
    Ok(plan)
}

pub fn write_pipeline(path: &Path, pipeline: &Pipeline) -> Result<()> {
    write_yaml(path, pipeline)
}

pub fn write_schedule(path: &Path, schedule: &Schedule) -> Result<()> {
    write_yaml(path, schedule)
}

/// Plan `recipe` and run the resulting schedule.
pub fn execute_recipe<C>(
    recipe: &Recipe,
    workspace: &Workspace,
    config: &PipelineConfig,
    collaborators: &C,
) -> Result<ExecutionReport>
where
    C: Collaborators + ?Sized,
{
    let plan = plan_recipe(recipe, workspace, config)?;
    let report = execute_schedule(workspace, collaborators, &plan.schedule)?;
    match report.best_rating {
        Some(rating) => info!("Execution of the recipe led to a net of {} nElo.", rating),
        None => info!("Execution of the recipe produced no rating estimate."),
    }
    Ok(report)
}
