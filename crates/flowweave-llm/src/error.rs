use flowweave_core::{DiagramError, SessionError, ValidationError};
use std::fmt;
use thiserror::Error;

/// Which generator-backed stage a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DecisionExtraction,
    DiagramGeneration,
    DiagramQuery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DecisionExtraction => "Analyzing process",
            Stage::DiagramGeneration => "Generating flowchart",
            Stage::DiagramQuery => "Answering question",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    /// Generator credentials or endpoint missing. Not retried.
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The generator call itself failed (network, quota, model error).
    #[error("{stage} failed: {message}")]
    Generation { stage: Stage, message: String },

    /// Extraction response was not the expected JSON shape. Recovered
    /// inside the extractor; never returned from it.
    #[error("Unexpected response shape: {0}")]
    ResponseShape(String),

    #[error(transparent)]
    Diagram(#[from] DiagramError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl FlowError {
    pub(crate) fn generation(stage: Stage, err: anyhow::Error) -> Self {
        FlowError::Generation {
            stage,
            message: format!("{:#}", err),
        }
    }

    /// Whether asking again (with the same input) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Generation { .. } => true,
            FlowError::Diagram(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
