//! Prompt builders. Each stage sends a system message built from a
//! compiled-in template plus a user message carrying the caller's text.

/// Decision extraction system prompt.
pub(crate) fn decisions_system_prompt(max_questions: usize) -> String {
    include_str!("../../prompts/decisions.md")
        .replace("{{max_questions}}", &max_questions.to_string())
}

pub(crate) fn decisions_user_prompt(description: &str) -> String {
    format!("Process description:\n\n{}", description)
}

/// Diagram generation system prompt. There is exactly one generation
/// prompt; clarifications arrive already merged into the description.
pub(crate) fn diagram_system_prompt() -> &'static str {
    include_str!("../../prompts/diagram.md")
}

pub(crate) fn diagram_user_prompt(augmented_description: &str) -> String {
    format!("Process description:\n\n{}", augmented_description)
}

/// Query system prompt with the diagram embedded verbatim.
pub(crate) fn query_system_prompt(diagram_text: &str) -> String {
    include_str!("../../prompts/query.md").replace("{{diagram}}", diagram_text)
}
