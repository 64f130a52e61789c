use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;
use nettest_runner::{
    execute_recipe, expand_recipe_file, load_recipe, plan_recipe, plan_recipe_file,
    write_schedule, Collaborators, FinalRecord, PipelineConfig, StepStatus, TestOutcome,
    Workspace,
};
use serde_json::{json, Value};

const RECIPE: &str = r#"
training:
  steps:
    - datasets:
        - hf:
            owner: linrock
            repo: dual-nnue
      trainer:
        owner: vondele
        sha: 1600ce0c04380ae15c3b0912c3609fb37f815431
      run:
        resume: previous_model
        max_epochs: 400
        repetitions: 2
        binpacks:
          - linrock/dual-nnue/hse-v1/a.binpack
          - linrock/dual-nnue/hse-v1/b.binpack
        other_options:
          - --lr=0.1
          - --gamma=0.9
      convert:
        binpack: official-stockfish/master-binpacks/fishpack32.binpack
    - <repeat_last>:
        run:
          max_epochs: 800
          repetitions: 1
          <extend(1,)_bp>:
            binpacks:
              - linrock/dual-nnue/hse-v1/c.binpack
          other_options:
            - --lr=0.01
testing:
  reference:
    owner: official-stockfish
    sha: master
  options:
    tc: 60+0.6
    hash: 16
"#;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "nettest_plan_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn write_recipe(dir: &Path) -> PathBuf {
    let path = dir.join("recipe.yaml");
    fs::write(&path, RECIPE).expect("write recipe");
    path
}

#[test]
fn planning_a_fresh_workspace_schedules_every_step() {
    let dir = temp_dir("fresh");
    let workspace = Workspace::in_dir(&dir);
    let recipe = load_recipe(&write_recipe(&dir)).expect("load");

    let plan = plan_recipe(&recipe, &workspace, &PipelineConfig::default()).expect("plan");

    let first = &plan.identified.steps[0];
    let second = &plan.identified.steps[1];
    assert_ne!(first.identity, second.identity);
    assert_eq!(first.spec["run"]["resume"], json!("none"));
    assert_eq!(second.spec["run"]["resume"], json!("previous_checkpoint"));
    assert_eq!(
        second.spec["run"]["binpacks"],
        json!([
            "linrock/dual-nnue/hse-v1/b.binpack",
            "linrock/dual-nnue/hse-v1/c.binpack"
        ])
    );
    assert_eq!(
        second.spec["run"]["other_options"],
        json!(["--lr=0.01", "--gamma=0.9"])
    );

    assert_eq!(
        plan.pipeline.stages,
        [
            "ensureData".to_string(),
            format!("step_{}_0", first.identity),
            format!("step_{}_1", first.identity),
            format!("step_{}_0", second.identity),
            "testing".to_string(),
        ]
    );
    assert_eq!(plan.schedule.train.len(), 3);
    assert_eq!(plan.schedule.train[0].previous_sha, "None");
    assert_eq!(plan.schedule.train[2].previous_sha, first.identity);
    let tested: Vec<&str> = plan
        .schedule
        .test
        .iter()
        .map(|t| t.testing_sha.as_str())
        .collect();
    assert_eq!(tested, [second.identity.as_str(), first.identity.as_str()]);

    assert!(dir
        .join("scratch")
        .join(&first.identity)
        .join("step.yaml")
        .is_file());
    let evaluation = plan.identified.evaluation.as_ref().expect("evaluation");
    assert!(dir
        .join("scratch")
        .join(&evaluation.identity)
        .join("testing.yaml")
        .is_file());
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn replanning_after_a_finished_step_resumes_from_it() {
    let dir = temp_dir("resume");
    let workspace = Workspace::in_dir(&dir);
    let recipe = load_recipe(&write_recipe(&dir)).expect("load");
    let config = PipelineConfig::default();

    let initial = plan_recipe(&recipe, &workspace, &config).expect("first plan");
    let first = initial.identified.steps[0].identity.clone();
    let second = initial.identified.steps[1].identity.clone();
    workspace
        .write_final_marker(
            &first,
            &FinalRecord {
                short_nnue: "nn-first.nnue".to_string(),
                std_nnue: "/workspace/nets/nn-first.nnue".to_string(),
                checkpoint: "/workspace/runs/first/last.ckpt".to_string(),
            },
        )
        .expect("finish first step");

    let replanned = plan_recipe(&recipe, &workspace, &config).expect("second plan");
    assert_eq!(replanned.identified, initial.identified);
    assert_eq!(replanned.reconciled.steps[0].status, StepStatus::Final);
    assert_eq!(replanned.reconciled.steps[1].status, StepStatus::New);
    assert_eq!(
        replanned.pipeline.stages,
        [
            "ensureData".to_string(),
            format!("step_{}_0", second),
            "testing".to_string(),
        ]
    );
    assert_eq!(replanned.schedule.train.len(), 1);
    assert_eq!(replanned.schedule.train[0].previous_sha, first);

    let again = plan_recipe(&recipe, &workspace, &config).expect("third plan");
    assert_eq!(again.reconciled, replanned.reconciled);
    assert_eq!(again.schedule, replanned.schedule);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn invalid_recipe_leaves_workspace_untouched() {
    let dir = temp_dir("invalid");
    let workspace = Workspace::in_dir(&dir);
    let path = dir.join("broken.yaml");
    fs::write(
        &path,
        "training:\n  steps:\n    - <repeat_last>\n    - run: {max_epochs: 10}\n",
    )
    .expect("write recipe");
    let recipe = load_recipe(&path).expect("load");

    let err = plan_recipe(&recipe, &workspace, &PipelineConfig::default()).expect_err("invalid");
    assert!(err.to_string().contains("<repeat_last>"), "{}", err);
    assert!(!dir.join("scratch").exists());
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn pipeline_and_schedule_files_quote_time_limits() {
    let dir = temp_dir("files");
    let workspace = Workspace::in_dir(&dir);
    let recipe_path = write_recipe(&dir);
    let pipeline_path = dir.join("pipeline.yml");

    let plan = plan_recipe_file(
        &recipe_path,
        &pipeline_path,
        &workspace,
        &PipelineConfig::default(),
    )
    .expect("plan file");
    write_schedule(&dir.join("schedule.yaml"), &plan.schedule).expect("schedule");

    let rendered = fs::read_to_string(&pipeline_path).expect("read pipeline");
    assert!(!rendered.contains("SLURM_TIMELIMIT: 04:00:00"), "{}", rendered);
    assert!(!rendered.contains("SLURM_TIMELIMIT: 12:00:00"), "{}", rendered);

    let parsed: Value = serde_yaml::from_str(&rendered).expect("parse pipeline");
    assert_eq!(
        parsed["include"][0]["remote"],
        json!("https://gitlab.com/cscs-ci/recipes/-/raw/master/templates/v2/.ci-ext.yml")
    );
    assert_eq!(parsed["testingJob"]["stage"], json!("testing"));
    assert_eq!(
        parsed["ensureDataJob"]["variables"]["SLURM_TIMELIMIT"],
        json!("04:00:00")
    );

    let schedule: Value =
        serde_yaml::from_str(&fs::read_to_string(dir.join("schedule.yaml")).expect("read"))
            .expect("parse schedule");
    assert_eq!(
        schedule["train"].as_array().map(Vec::len),
        Some(plan.schedule.train.len())
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn expand_recipe_file_writes_concrete_steps() {
    let dir = temp_dir("expand");
    let output = dir.join("expanded.yaml");
    expand_recipe_file(&write_recipe(&dir), &output).expect("expand");

    let expanded = load_recipe(&output).expect("reload");
    assert_eq!(expanded.steps().len(), 2);
    assert!(expanded.steps().iter().all(|s| s.get("<repeat_last>").is_none()));
    assert_eq!(expanded.steps()[1]["run"]["max_epochs"], json!(800));
    let _ = fs::remove_dir_all(dir);
}

struct FakeTools {
    workspace: Workspace,
    log: Mutex<Vec<String>>,
}

impl Collaborators for FakeTools {
    fn run_data_update(&self, owner: &str, repo: &str, _filenames: &[String]) -> Result<()> {
        self.log
            .lock()
            .expect("log")
            .push(format!("data {}/{}", owner, repo));
        Ok(())
    }

    fn run_step(&self, current: &str, previous: &str) -> Result<()> {
        self.workspace.require_prior_artifact(previous)?;
        let step = self.workspace.load_step_definition(current)?;
        self.log
            .lock()
            .expect("log")
            .push(format!("train {} {}", current, step["run"]["max_epochs"]));
        self.workspace.write_final_marker(
            current,
            &FinalRecord {
                short_nnue: format!("nn-{}.nnue", current),
                std_nnue: format!("/nets/nn-{}.nnue", current),
                checkpoint: format!("/runs/{}/last.ckpt", current),
            },
        )
    }

    fn run_test(&self, test_identity: &str, step_identity: &str) -> Result<TestOutcome> {
        self.workspace.load_evaluation_definition(test_identity)?;
        let marker = self
            .workspace
            .read_final_marker(step_identity)?
            .ok_or_else(|| anyhow::anyhow!("{} has no net", step_identity))?;
        Ok(TestOutcome {
            winner: None,
            rating: Some(marker.std_nnue.len() as f64),
        })
    }
}

#[test]
fn execute_recipe_trains_the_chain_and_reports_best_rating() {
    let dir = temp_dir("execute");
    let workspace = Workspace::in_dir(&dir);
    let recipe = load_recipe(&write_recipe(&dir)).expect("load");
    let tools = FakeTools {
        workspace: workspace.clone(),
        log: Mutex::new(Vec::new()),
    };

    let report = execute_recipe(&recipe, &workspace, &PipelineConfig::default(), &tools)
        .expect("execute");

    assert_eq!(report.data_tasks, 2);
    assert_eq!(report.trained.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.tests.len(), 2);
    assert!(report.best_rating.is_some());

    let log = tools.log.lock().expect("log").clone();
    assert_eq!(log.len(), 4);
    assert!(log[2].ends_with(" 400"), "{:?}", log);
    assert!(log[3].ends_with(" 800"), "{:?}", log);

    let rerun = execute_recipe(&recipe, &workspace, &PipelineConfig::default(), &tools)
        .expect("rerun");
    assert!(rerun.trained.is_empty());
    assert_eq!(rerun.tests.len(), 1);
    let _ = fs::remove_dir_all(dir);
}
