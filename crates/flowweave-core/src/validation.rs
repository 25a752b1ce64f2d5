use thiserror::Error;

/// A required user-supplied field was missing. Raised before any generator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a process description first.")]
    EmptyDescription,

    #[error("Please enter a question about the flowchart.")]
    EmptyQuestion,

    #[error("Please provide your custom answer.")]
    EmptyCustomAnswer,
}

/// Trim `value` and reject it with `err` when nothing is left.
pub fn require_text(value: &str, err: ValidationError) -> Result<&str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(err);
    }
    Ok(trimmed)
}

pub fn validate_description(description: &str) -> Result<&str, ValidationError> {
    require_text(description, ValidationError::EmptyDescription)
}

pub fn validate_question(question: &str) -> Result<&str, ValidationError> {
    require_text(question, ValidationError::EmptyQuestion)
}
