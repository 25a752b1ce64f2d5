mod client;
pub mod error;
pub mod pipeline;
mod types;

pub use client::*;
pub use error::{FlowError, FlowResult, Stage};
pub use types::*;
