use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::RecipeError;
use crate::model::Recipe;

const RECIPE_SCHEMA: &str = include_str!("../schemas/recipe_v1.jsonschema");

/// Check an expanded recipe before anything is derived from it. Every schema
/// violation is reported with its instance path.
pub fn validate_expanded(recipe: &Recipe) -> Result<(), RecipeError> {
    if recipe.testing.is_some() && recipe.steps().is_empty() {
        return Err(RecipeError::EvaluationWithoutTraining);
    }

    let schema: Value = serde_json::from_str(RECIPE_SCHEMA)?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| RecipeError::Schema(format!("embedded recipe schema is invalid: {}", e)))?;
    let instance = recipe.to_value()?;
    let result = compiled.validate(&instance);
    if let Err(errors) = result {
        let msgs: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                format!("  - {}: {}", path, e)
            })
            .collect();
        return Err(RecipeError::Schema(msgs.join("\n")));
    }
    Ok(())
}
