use std::thread;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::{Schedule, TestTask};
use crate::workspace::Workspace;

/// The external tools a schedule drives. Implementations locate everything
/// else they need in the workspace by identity.
pub trait Collaborators: Sync {
    fn run_data_update(&self, owner: &str, repo: &str, filenames: &[String]) -> Result<()>;

    /// Train `current` starting from the artifact of `previous` (or from
    /// scratch when `previous` is `None`), writing its final marker when the
    /// epoch budget is reached.
    fn run_step(&self, current: &str, previous: &str) -> Result<()>;

    fn run_test(&self, test_identity: &str, step_identity: &str) -> Result<TestOutcome>;
}

/// Result of one evaluation match series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestOutcome {
    /// Label of the side the statistical test accepted, if it concluded.
    pub winner: Option<String>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub test_config_sha: String,
    pub testing_sha: String,
    pub outcome: TestOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub started_at: String,
    pub finished_at: String,
    /// Data updates handed to the collaborator.
    pub data_tasks: usize,
    /// Training tasks handed to the collaborator, in order.
    pub trained: Vec<String>,
    /// Training repetitions skipped because the step was already final.
    pub skipped: Vec<String>,
    pub tests: Vec<TestReport>,
    pub best_rating: Option<f64>,
}

/// Run a schedule: data updates one after another, training in chain order,
/// evaluations concurrently.
pub fn execute_schedule<C>(
    workspace: &Workspace,
    collaborators: &C,
    schedule: &Schedule,
) -> Result<ExecutionReport>
where
    C: Collaborators + ?Sized,
{
    let started_at = Utc::now().to_rfc3339();

    info!(tasks = schedule.data.len(), "submitting data update");
    let mut data_tasks = 0;
    for task in &schedule.data {
        if task.filenames.is_empty() {
            info!(owner = %task.owner, repo = %task.repo, "no files wanted; skipping data update");
            continue;
        }
        data_tasks += 1;
        collaborators
            .run_data_update(&task.owner, &task.repo, &task.filenames)
            .map_err(|e| anyhow!("data update {}/{} failed: {:#}", task.owner, task.repo, e))?;
    }

    let total = schedule.train.len();
    let mut trained = Vec::new();
    let mut skipped = Vec::new();
    for (idx, task) in schedule.train.iter().enumerate() {
        if workspace.is_final(&task.current_sha)? {
            info!(
                identity = %task.current_sha,
                "step is already final; skipping repetition"
            );
            skipped.push(task.current_sha.clone());
            continue;
        }
        info!("submitting training step {} / {}", idx + 1, total);
        collaborators
            .run_step(&task.current_sha, &task.previous_sha)
            .map_err(|e| anyhow!("training step {} failed: {:#}", task.current_sha, e))?;
        trained.push(task.current_sha.clone());
    }

    let tests = run_tests(collaborators, &schedule.test)?;
    let best_rating = tests
        .iter()
        .filter_map(|t| t.outcome.rating)
        .fold(None, |best: Option<f64>, rating| match best {
            Some(best) if best >= rating => Some(best),
            _ => Some(rating),
        });
    info!(best_rating = ?best_rating, "all done");

    Ok(ExecutionReport {
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        data_tasks,
        trained,
        skipped,
        tests,
        best_rating,
    })
}

fn run_tests<C>(collaborators: &C, tasks: &[TestTask]) -> Result<Vec<TestReport>>
where
    C: Collaborators + ?Sized,
{
    let total = tasks.len();
    let outcomes: Vec<Result<TestOutcome>> = thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .iter()
            .enumerate()
            .map(|(idx, task)| {
                info!("submitting testing step {} / {}", idx + 1, total);
                scope.spawn(move || {
                    collaborators.run_test(&task.test_config_sha, &task.testing_sha)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("evaluation thread panicked")))
            })
            .collect()
    });

    let mut reports = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (task, outcome) in tasks.iter().zip(outcomes) {
        match outcome {
            Ok(outcome) => {
                info!(
                    identity = %task.testing_sha,
                    winner = ?outcome.winner,
                    rating = ?outcome.rating,
                    "evaluation finished"
                );
                reports.push(TestReport {
                    test_config_sha: task.test_config_sha.clone(),
                    testing_sha: task.testing_sha.clone(),
                    outcome,
                });
            }
            Err(err) => {
                warn!(identity = %task.testing_sha, error = %err, "evaluation failed");
                failures.push(format!("  - {}: {:#}", task.testing_sha, err));
            }
        }
    }

    if failures.is_empty() {
        Ok(reports)
    } else {
        Err(anyhow!("evaluation failed:\n{}", failures.join("\n")))
    }
}
