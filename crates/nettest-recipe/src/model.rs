use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A training recipe as authored: an optional chain of training steps and an
/// optional evaluation spec. Any other top-level keys are carried through
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testing: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSection {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub steps: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Recipe {
    pub fn steps(&self) -> &[Value] {
        self.training
            .as_ref()
            .map(|training| training.steps.as_slice())
            .unwrap_or(&[])
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Where a training step picks up its initial weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    None,
    PreviousCheckpoint,
    PreviousModel,
}

impl ResumeMode {
    /// Case-insensitive. Unknown spellings give `Option::None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "none" => Some(ResumeMode::None),
            "previous_checkpoint" => Some(ResumeMode::PreviousCheckpoint),
            "previous_model" => Some(ResumeMode::PreviousModel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResumeMode::None => "none",
            ResumeMode::PreviousCheckpoint => "previous_checkpoint",
            ResumeMode::PreviousModel => "previous_model",
        }
    }

    pub fn resumes_from_prior(self) -> bool {
        !matches!(self, ResumeMode::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedStep {
    pub identity: String,
    pub spec: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedEvaluation {
    pub identity: String,
    pub spec: Value,
}

/// An expanded recipe with a content identity attached to every step and to
/// the evaluation spec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifiedRecipe {
    pub steps: Vec<IdentifiedStep>,
    pub evaluation: Option<IdentifiedEvaluation>,
}

/// `spec` with its identity recorded under `sha`, the shape persisted to the
/// workspace and shown in logs.
pub fn with_sha(spec: &Value, identity: &str) -> Value {
    let mut annotated = match spec {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    annotated.insert("sha".to_string(), Value::String(identity.to_string()));
    Value::Object(annotated)
}

impl IdentifiedRecipe {
    /// The recipe in its "augmented with shas" form.
    pub fn annotated(&self) -> Value {
        let mut out = Map::new();
        if !self.steps.is_empty() {
            let steps: Vec<Value> = self
                .steps
                .iter()
                .map(|step| with_sha(&step.spec, &step.identity))
                .collect();
            let mut training = Map::new();
            training.insert("steps".to_string(), Value::Array(steps));
            out.insert("training".to_string(), Value::Object(training));
        }
        if let Some(evaluation) = &self.evaluation {
            out.insert(
                "testing".to_string(),
                with_sha(&evaluation.spec, &evaluation.identity),
            );
        }
        Value::Object(out)
    }
}
