/// Authoring mistakes in a recipe. None of these are retried; the recipe has to
/// be fixed at the source.
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("invalid directive syntax: {0}")]
    InvalidDirective(String),
    #[error("invalid slice bound '{bound}' in directive {directive}")]
    InvalidSliceBound { directive: String, bound: String },
    #[error("{directive} must contain a mapping of fields to {action}")]
    DirectiveNotMapping {
        directive: String,
        action: &'static str,
    },
    #[error("{directive}: cannot extend non-list field '{field}'")]
    ExtendNonList { directive: String, field: String },
    #[error("{0} is only valid as a training step entry, not inside an override")]
    MisplacedRepeatLast(String),
    #[error("step {0} cannot use <repeat_last>; the base step must be fully defined")]
    RepeatLastOnFirstStep(usize),
    #[error("step {0}: a <repeat_last> entry must not carry other keys")]
    RepeatLastMixedKeys(usize),
    #[error("step {0} must be a mapping")]
    StepNotMapping(usize),
    #[error("step {0}: 'run' must be a mapping")]
    RunNotMapping(usize),
    #[error("testing is configured but the recipe has no training steps to evaluate")]
    EvaluationWithoutTraining,
    #[error("recipe validation failed:\n{0}")]
    Schema(String),
    #[error("step {index}: {source}")]
    InStep {
        index: usize,
        #[source]
        source: Box<RecipeError>,
    },
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RecipeError {
    pub(crate) fn in_step(self, index: usize) -> Self {
        match self {
            already @ RecipeError::InStep { .. } => already,
            other => RecipeError::InStep {
                index,
                source: Box::new(other),
            },
        }
    }
}
