use super::QUERY_TEMPERATURE;
use super::prompt::query_system_prompt;
use crate::{ChatBackend, FlowError, FlowResult, Message, Stage};
use flowweave_core::{Diagram, validate_question};
use tracing::info;

/// Answer a natural-language question about `diagram`.
///
/// Stateless: nothing from earlier questions is sent, and the diagram is
/// only read.
pub async fn ask_diagram(
    backend: &impl ChatBackend,
    diagram: &Diagram,
    question: &str,
) -> FlowResult<String> {
    let question = validate_question(question)?;

    let messages = vec![
        Message::system(query_system_prompt(diagram.sanitized_text())),
        Message::user(question),
    ];

    info!(diagram_id = %diagram.id(), "Answering flowchart question");

    let response = backend
        .chat(messages, Some(QUERY_TEMPERATURE))
        .await
        .map_err(|e| FlowError::generation(Stage::DiagramQuery, e))?;

    response
        .first_text()
        .map(|text| text.trim().to_string())
        .ok_or_else(|| FlowError::Generation {
            stage: Stage::DiagramQuery,
            message: "model returned no text content".to_string(),
        })
}
