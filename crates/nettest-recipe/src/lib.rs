//! Recipe core: directive-driven step expansion, expanded-recipe validation
//! and the chained step identities. Nothing in this crate touches the
//! filesystem.

mod directive;
mod error;
mod expand;
mod identity;
mod merge;
mod model;
mod schema;

pub use directive::{
    is_repeat_last, parse_directive, Directive, DirectiveKind, SliceRange, REMOVE, REPEAT_LAST,
};
pub use error::RecipeError;
pub use expand::{enforce_resume, expand};
pub use identity::{assign_identities, chain_identity, IDENTITY_LEN};
pub use merge::merge;
pub use model::{
    with_sha, IdentifiedEvaluation, IdentifiedRecipe, IdentifiedStep, Recipe, ResumeMode,
    TrainingSection,
};
pub use schema::validate_expanded;

/// Expand, validate and identify `recipe` in one go.
pub fn resolve(recipe: &Recipe) -> Result<IdentifiedRecipe, RecipeError> {
    let expanded = expand(recipe)?;
    validate_expanded(&expanded)?;
    assign_identities(&expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettest_core::parse_yaml;

    const TWO_STEP_RECIPE: &str = r#"
training:
  steps:
    - run:
        max_epochs: 400
        resume: none
    - <repeat_last>:
        run:
          max_epochs: 450
testing:
  options:
    tc: 10+0.1
    hash: 16
"#;

    #[test]
    fn resolve_runs_the_whole_chain() {
        let recipe: Recipe = parse_yaml(TWO_STEP_RECIPE).expect("parse");
        let identified = resolve(&recipe).expect("resolve");
        assert_eq!(identified.steps.len(), 2);
        assert_eq!(identified.steps[0].identity, "8d055b14fb96");
        assert_eq!(identified.steps[1].identity, "161740c6efc6");
        assert_eq!(
            identified.steps[1].spec["run"]["resume"],
            serde_json::json!("previous_checkpoint")
        );
        assert_eq!(
            identified.evaluation.map(|e| e.identity).as_deref(),
            Some("9917d69861ec")
        );
    }

    #[test]
    fn resolve_is_deterministic() {
        let recipe: Recipe = parse_yaml(TWO_STEP_RECIPE).expect("parse");
        assert_eq!(
            resolve(&recipe).expect("first"),
            resolve(&recipe.clone()).expect("second")
        );
    }

    #[test]
    fn extend_against_scalar_is_reported_before_identities() {
        let recipe: Recipe = parse_yaml(
            "training:\n  steps:\n    - run: {max_epochs: 400, resume: none}\n    - <repeat_last>:\n        run:\n          <extend_rs>: {max_epochs: [450]}\n",
        )
        .expect("parse");
        let err = resolve(&recipe).expect_err("must fail");
        assert!(err.to_string().contains("<extend_rs>"), "{}", err);
    }
}
