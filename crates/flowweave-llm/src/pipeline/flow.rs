//! End-to-end orchestration: describe → (clarify) → generate → ask.

use super::{ExtractOptions, GenerateOptions, ask_diagram, extract_decisions, generate_diagram};
use crate::{ChatBackend, FlowResult};
use flowweave_core::{ClarificationSession, Diagram, validate_description};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub extract: ExtractOptions,
    pub generate: GenerateOptions,
}

/// Outcome of submitting a description.
#[derive(Debug)]
pub enum Submission {
    /// Ambiguities were found and must be resolved before generating.
    Clarify(PendingClarification),
    /// Nothing to clarify; generated from the description as given.
    Diagram(Diagram),
}

/// A description waiting on its clarification session.
#[derive(Debug)]
pub struct PendingClarification {
    description: String,
    session: ClarificationSession,
}

impl PendingClarification {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn session(&self) -> &ClarificationSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ClarificationSession {
        &mut self.session
    }

    /// Drop the session and its answers, handing back the description so
    /// the user can edit it.
    pub fn abandon(self) -> String {
        self.session.abandon();
        self.description
    }
}

pub struct FlowPipeline<B> {
    backend: B,
    options: PipelineOptions,
}

impl<B: ChatBackend> FlowPipeline<B> {
    pub fn new(backend: B, options: PipelineOptions) -> Self {
        Self { backend, options }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Extract decision points; generate immediately when there are none.
    pub async fn submit(&self, description: &str) -> FlowResult<Submission> {
        let description = validate_description(description)?.to_string();
        let decisions =
            extract_decisions(&self.backend, &description, &self.options.extract).await?;

        let session = ClarificationSession::with_decisions(decisions);
        if session.is_complete() {
            info!("No clarification needed");
            let diagram = self.generate(&description).await?;
            return Ok(Submission::Diagram(diagram));
        }

        Ok(Submission::Clarify(PendingClarification {
            description,
            session,
        }))
    }

    /// Generate from a completed clarification. The pending clarification
    /// is only borrowed, so a failed generation can be re-triggered.
    pub async fn finish(&self, pending: &PendingClarification) -> FlowResult<Diagram> {
        let augmented = pending.session.augmented_description(&pending.description)?;
        self.generate(&augmented).await
    }

    pub async fn generate(&self, description: &str) -> FlowResult<Diagram> {
        generate_diagram(&self.backend, description, &self.options.generate).await
    }

    pub async fn ask(&self, diagram: &Diagram, question: &str) -> FlowResult<String> {
        ask_diagram(&self.backend, diagram, question).await
    }
}

/// Guards an in-flight generator call against a user who has moved on.
///
/// The call itself runs to completion; once [`Discardable::abandon`] has been
/// called its result is dropped instead of being delivered.
#[derive(Debug, Clone, Default)]
pub struct Discardable {
    token: CancellationToken,
}

impl Discardable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abandon(&self) {
        self.token.cancel();
    }

    pub fn is_abandoned(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `None` if abandoned before `fut` finished.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let output = fut.await;
        if self.token.is_cancelled() {
            debug!("Discarding result of abandoned request");
            return None;
        }
        Some(output)
    }
}
