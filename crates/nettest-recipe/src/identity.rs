use nettest_core::{canonical_json, short_digest};
use serde_json::Value;

use crate::error::RecipeError;
use crate::model::{IdentifiedEvaluation, IdentifiedRecipe, IdentifiedStep, Recipe};

/// Hex characters kept from the SHA-256 digest.
pub const IDENTITY_LEN: usize = 12;

/// Identity of `content` given the identity of whatever precedes it.
pub fn chain_identity(previous: &str, content: &Value) -> Result<String, RecipeError> {
    let mut combined = previous.to_string();
    combined.push_str(&canonical_json(content)?);
    Ok(short_digest(combined.as_bytes(), IDENTITY_LEN))
}

/// Identify every step of an expanded recipe. Each step's identity covers its
/// own content and, through the previous identity, every step before it. The
/// evaluation spec gets a chain of its own.
pub fn assign_identities(recipe: &Recipe) -> Result<IdentifiedRecipe, RecipeError> {
    let (_, steps) = recipe.steps().iter().enumerate().try_fold(
        (String::new(), Vec::new()),
        |(previous, mut steps), (offset, spec)| {
            if !spec.is_object() {
                return Err(RecipeError::StepNotMapping(offset + 1));
            }
            let identity = chain_identity(&previous, spec)?;
            steps.push(IdentifiedStep {
                identity: identity.clone(),
                spec: spec.clone(),
            });
            Ok((identity, steps))
        },
    )?;

    let evaluation = match &recipe.testing {
        Some(spec) => Some(IdentifiedEvaluation {
            identity: chain_identity("", spec)?,
            spec: spec.clone(),
        }),
        None => None,
    };

    Ok(IdentifiedRecipe { steps, evaluation })
}
