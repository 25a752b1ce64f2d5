//! Terminal front end: description entry, one question at a time, diagram
//! output, follow-up questions.
//!
//! Prompts and questions go to stderr; diagrams and answers go to stdout.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::{debug, warn};

use flowweave_core::{Diagram, SessionState};
use flowweave_llm::pipeline::{Discardable, FlowPipeline, PendingClarification, Submission};
use flowweave_llm::{ChatBackend, FlowError};

/// Typed at any clarification prompt to go back to description entry.
const BACK: &str = "back";

pub struct Console<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> Console<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// `None` on end of input.
    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        eprint!("{}", prompt);
        Ok(self.lines.next_line().await?.map(|l| l.trim().to_string()))
    }

    /// Lines up to the first empty one, joined. `None` on end of input with
    /// nothing entered.
    async fn read_block(&mut self, prompt: &str) -> Result<Option<String>> {
        eprintln!("{}", prompt);
        let mut block = Vec::new();
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => {
                    if !block.is_empty() {
                        break;
                    }
                }
                Some(line) => block.push(line),
                None if block.is_empty() => return Ok(None),
                None => break,
            }
        }
        Ok(Some(block.join("\n")))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClarifyOutcome {
    Complete,
    Abandoned,
}

/// Walk the user through every open decision point.
pub async fn clarify<R: AsyncBufRead + Unpin>(
    console: &mut Console<R>,
    pending: &mut PendingClarification,
) -> Result<ClarifyOutcome> {
    loop {
        let session = pending.session();
        let (Some(point), Some((number, total))) = (session.current(), session.progress()) else {
            return Ok(ClarifyOutcome::Complete);
        };
        let awaiting_text = matches!(session.state(), SessionState::AwaitingCustomText(_));
        let option_ids: Vec<String> = point.options.iter().map(|o| o.id.clone()).collect();

        if !awaiting_text {
            eprintln!("\nQuestion {} of {}: {}", number, total, point.question);
            for (i, option) in point.options.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, option.text);
            }
        }

        let prompt = if awaiting_text {
            "Your answer: ".to_string()
        } else {
            format!("Choose 1-{} (or '{}'): ", option_ids.len(), BACK)
        };

        let Some(input) = console.read_line(&prompt).await? else {
            return Ok(ClarifyOutcome::Abandoned);
        };
        if input.eq_ignore_ascii_case(BACK) {
            return Ok(ClarifyOutcome::Abandoned);
        }

        let session = pending.session_mut();
        let result = if awaiting_text {
            session.submit_custom(&input)
        } else {
            match input
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| option_ids.get(i))
            {
                Some(option_id) => session.select(option_id),
                None => {
                    eprintln!("Please enter a number between 1 and {}.", option_ids.len());
                    continue;
                }
            }
        };

        if let Err(e) = result {
            eprintln!("{}", e);
        }
    }
}

/// Run `fut` on its own task. Ctrl-C abandons it: the call still finishes
/// in the background but its result is discarded.
async fn abandonable<F>(fut: F) -> Result<Option<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let guard = Discardable::new();
    let task = tokio::spawn({
        let guard = guard.clone();
        async move { guard.run(fut).await }
    });

    tokio::select! {
        output = task => Ok(output?),
        _ = tokio::signal::ctrl_c() => {
            guard.abandon();
            eprintln!("\nCancelled.");
            Ok(None)
        }
    }
}

fn report(err: &FlowError) {
    warn!(error = %err, "Request failed");
    eprintln!("Error: {}", err);
    if err.is_retryable() {
        eprintln!("You can try again.");
    }
}

/// One description → diagram round. `None` if the user went back.
async fn produce_diagram<B, R>(
    console: &mut Console<R>,
    pipeline: &Arc<FlowPipeline<B>>,
    description: String,
) -> Result<Option<Diagram>>
where
    B: ChatBackend + 'static,
    R: AsyncBufRead + Unpin,
{
    eprintln!("Analyzing process...");
    let submitted = {
        let pipeline = Arc::clone(pipeline);
        abandonable(async move { pipeline.submit(&description).await }).await?
    };

    let mut pending = match submitted {
        None => return Ok(None),
        Some(Err(e)) => {
            report(&e);
            return Ok(None);
        }
        Some(Ok(Submission::Diagram(diagram))) => return Ok(Some(diagram)),
        Some(Ok(Submission::Clarify(pending))) => pending,
    };

    if clarify(console, &mut pending).await? == ClarifyOutcome::Abandoned {
        debug!("Returning to description entry");
        pending.abandon();
        return Ok(None);
    }

    loop {
        eprintln!("Generating flowchart...");
        let pipeline = Arc::clone(pipeline);
        let outcome = abandonable(async move {
            let result = pipeline.finish(&pending).await;
            (pending, result)
        })
        .await?;

        let Some((returned, result)) = outcome else {
            return Ok(None);
        };
        pending = returned;

        match result {
            Ok(diagram) => return Ok(Some(diagram)),
            Err(e) => {
                report(&e);
                let again = console.read_line("Retry? [Y/n] ").await?;
                if !matches!(again.as_deref(), Some("") | Some("y") | Some("Y")) {
                    pending.abandon();
                    return Ok(None);
                }
            }
        }
    }
}

/// Follow-up questions about `diagram` until an empty line.
pub async fn ask_loop<B, R>(
    console: &mut Console<R>,
    pipeline: &Arc<FlowPipeline<B>>,
    diagram: &Diagram,
) -> Result<()>
where
    B: ChatBackend + 'static,
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(question) = console
            .read_line("\nAsk about the flowchart (empty line to finish): ")
            .await?
        else {
            return Ok(());
        };
        if question.is_empty() {
            return Ok(());
        }

        let pipeline = Arc::clone(pipeline);
        let diagram = diagram.clone();
        match abandonable(async move { pipeline.ask(&diagram, &question).await }).await? {
            None => {}
            Some(Ok(answer)) => println!("{}", answer),
            Some(Err(e)) => report(&e),
        }
    }
}

/// Full interactive loop. With `initial` set, runs a single round on it.
pub async fn run<B, R>(
    console: &mut Console<R>,
    pipeline: Arc<FlowPipeline<B>>,
    initial: Option<String>,
) -> Result<()>
where
    B: ChatBackend + 'static,
    R: AsyncBufRead + Unpin,
{
    let once = initial.is_some();
    let mut next = initial;

    loop {
        let description = match next.take() {
            Some(d) => d,
            None => match console
                .read_block("\nDescribe the process (finish with an empty line):")
                .await?
            {
                Some(d) => d,
                None => return Ok(()),
            },
        };

        if let Err(e) = flowweave_core::validate_description(&description) {
            eprintln!("{}", e);
            if once {
                return Ok(());
            }
            continue;
        }

        if let Some(diagram) = produce_diagram(console, &pipeline, description).await? {
            println!("\n{}\n", diagram);
            ask_loop(console, &pipeline, &diagram).await?;
        }

        if once {
            return Ok(());
        }
    }
}
