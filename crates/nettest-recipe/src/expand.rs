//! Meta-recipe expansion: resolves `<repeat_last>` entries of the training
//! chain into concrete steps and pins every step's resume mode.

use serde_json::{Map, Value};
use tracing::warn;

use crate::directive::is_repeat_last;
use crate::error::RecipeError;
use crate::merge::merge;
use crate::model::{Recipe, ResumeMode};

enum StepForm<'a> {
    /// Copy of the previous step, optionally with an override payload.
    RepeatLast(Option<&'a Value>),
    Concrete(&'a Value),
}

fn classify(step: &Value, index: usize) -> Result<StepForm<'_>, RecipeError> {
    match step {
        Value::String(token) if is_repeat_last(token) => Ok(StepForm::RepeatLast(None)),
        Value::Object(entries) => match entries.iter().find(|(key, _)| is_repeat_last(key)) {
            Some(_) if entries.len() > 1 => Err(RecipeError::RepeatLastMixedKeys(index)),
            Some((_, Value::Null)) => Ok(StepForm::RepeatLast(None)),
            Some((_, payload)) => Ok(StepForm::RepeatLast(Some(payload))),
            None => Ok(StepForm::Concrete(step)),
        },
        _ => Ok(StepForm::Concrete(step)),
    }
}

/// Resolve every meta-form step of `recipe`. The input is left as is; the
/// returned recipe only holds concrete steps.
pub fn expand(recipe: &Recipe) -> Result<Recipe, RecipeError> {
    let mut expanded = recipe.clone();
    let Some(training) = expanded.training.as_mut() else {
        return Ok(expanded);
    };

    let mut resolved: Vec<Value> = Vec::with_capacity(training.steps.len());
    for (offset, step) in training.steps.iter().enumerate() {
        let index = offset + 1;
        let previous = resolved.last();
        let mut next = match (classify(step, index)?, previous) {
            (StepForm::RepeatLast(_), None) => {
                return Err(RecipeError::RepeatLastOnFirstStep(index))
            }
            (StepForm::RepeatLast(None), Some(previous)) => previous.clone(),
            (StepForm::RepeatLast(Some(payload)), Some(previous)) => {
                merge(previous, payload).map_err(|e| e.in_step(index))?
            }
            (StepForm::Concrete(step), _) => step.clone(),
        };
        enforce_resume(&mut next, resolved.is_empty(), index)?;
        resolved.push(next);
    }

    training.steps = resolved;
    Ok(expanded)
}

/// Pin `step.run.resume` to a mode legal for the step's position in the
/// chain, creating `run` when missing. Corrections are logged, not fatal.
pub fn enforce_resume(step: &mut Value, is_first: bool, index: usize) -> Result<(), RecipeError> {
    let entries = step
        .as_object_mut()
        .ok_or(RecipeError::StepNotMapping(index))?;
    let run = entries
        .entry("run")
        .or_insert_with(|| Value::Object(Map::new()));
    if run.is_null() {
        *run = Value::Object(Map::new());
    }
    let run = run
        .as_object_mut()
        .ok_or(RecipeError::RunNotMapping(index))?;

    let declared = run.get("resume");
    let mode = declared.and_then(Value::as_str).and_then(ResumeMode::parse);
    let corrected = match mode {
        Some(ResumeMode::None) if is_first => None,
        _ if is_first => {
            warn!(
                step = index,
                declared = %describe(declared),
                "first step must have 'resume: none'; overriding"
            );
            Some(ResumeMode::None)
        }
        Some(mode) if mode.resumes_from_prior() => None,
        _ => {
            warn!(
                step = index,
                declared = %describe(declared),
                "resume mode is invalid for a later step; overriding to previous_checkpoint"
            );
            Some(ResumeMode::PreviousCheckpoint)
        }
    };
    if let Some(mode) = corrected {
        run.insert("resume".to_string(), Value::String(mode.as_str().to_string()));
    }
    Ok(())
}

fn describe(declared: Option<&Value>) -> String {
    match declared {
        None => "<unset>".to_string(),
        Some(Value::String(raw)) => raw.clone(),
        Some(other) => other.to_string(),
    }
}
