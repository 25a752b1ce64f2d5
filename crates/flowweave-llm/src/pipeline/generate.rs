use super::GENERATION_TEMPERATURE;
use super::prompt::{diagram_system_prompt, diagram_user_prompt};
use super::repair::chat_with_repair;
use crate::{ChatBackend, FlowResult, Message, Stage};
use flowweave_core::{Diagram, FallbackPolicy, validate_description};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub fallback: FallbackPolicy,
    /// Extra attempts, each fed the sanitizer's complaint, after a reply that
    /// sanitizes to nothing usable. Zero means report the first failure.
    pub repair_attempts: usize,
}

/// Generate a flowchart for an (optionally clarification-augmented)
/// description and sanitize it into a [`Diagram`].
pub async fn generate_diagram(
    backend: &impl ChatBackend,
    description: &str,
    options: &GenerateOptions,
) -> FlowResult<Diagram> {
    let description = validate_description(description)?;

    let messages = vec![
        Message::system(diagram_system_prompt()),
        Message::user(diagram_user_prompt(description)),
    ];

    info!(
        model = backend.model_name(),
        chars = description.len(),
        "Generating flowchart"
    );

    let diagram = chat_with_repair(
        backend,
        Stage::DiagramGeneration,
        messages,
        GENERATION_TEMPERATURE,
        options.repair_attempts,
        |content| Diagram::from_model_text(content, options.fallback),
    )
    .await?;

    info!(
        diagram_id = %diagram.id(),
        nodes = diagram.nodes().len(),
        edges = diagram.edges().len(),
        "Flowchart generated"
    );

    Ok(diagram)
}
