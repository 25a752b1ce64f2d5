mod decisions;
mod generate;
mod parse;
mod prompt;
mod query;
mod repair;

pub mod flow;


pub use decisions::{DEFAULT_MAX_QUESTIONS, ExtractOptions, extract_decisions};
pub use flow::{Discardable, FlowPipeline, PendingClarification, PipelineOptions, Submission};
pub use generate::{GenerateOptions, generate_diagram};
pub use query::ask_diagram;

// Low for extraction and queries, slightly higher for diagram layout.
pub const EXTRACTION_TEMPERATURE: f32 = 0.2;
pub const GENERATION_TEMPERATURE: f32 = 0.3;
pub const QUERY_TEMPERATURE: f32 = 0.2;
