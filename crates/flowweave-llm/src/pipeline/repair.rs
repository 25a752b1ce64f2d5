use crate::{ChatBackend, FlowError, FlowResult, Message, Stage};
use std::fmt::Display;
use tracing::{debug, info};

/// Chat with the generator, re-prompting up to `max_repairs` times with the
/// previous error as feedback when `process` rejects the output.
///
/// Transport failures are returned immediately as [`FlowError::Generation`];
/// only rejections from `process` consume repair attempts.
pub(crate) async fn chat_with_repair<T, E>(
    backend: &impl ChatBackend,
    stage: Stage,
    messages: Vec<Message>,
    temperature: f32,
    max_repairs: usize,
    mut process: impl FnMut(&str) -> Result<T, E>,
) -> FlowResult<T>
where
    E: Display + Into<FlowError>,
{
    let mut messages = messages;
    let mut last_error: Option<String> = None;

    for attempt in 0..=max_repairs {
        if let Some(ref err) = last_error {
            info!("Repair attempt {} for {} error: {}", attempt, stage, err);
            messages.push(Message::user(format!(
                "Your previous output had an error: {}\n\nPlease fix the flowchart and try again. Output ONLY the corrected Mermaid code.",
                err
            )));
        }

        let response = backend
            .chat(messages.clone(), Some(temperature))
            .await
            .map_err(|e| FlowError::generation(stage, e))?;

        // An empty reply is handed to `process` so it surfaces as that
        // stage's own "empty" error.
        let content = response.first_text().unwrap_or_default();

        debug!("{} raw output (attempt {}): {}", stage, attempt, content);

        messages.push(Message::assistant(content));

        match process(content) {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_repairs => {
                last_error = Some(e.to_string());
            }
            Err(e) => return Err(e.into()),
        }
    }

    unreachable!("the final attempt always returns")
}
