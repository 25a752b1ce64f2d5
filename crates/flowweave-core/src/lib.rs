pub mod decision;
pub mod diagram;
pub mod sanitize;
pub mod session;
mod validation;

pub use decision::*;
pub use diagram::*;
pub use sanitize::{DiagramError, FallbackPolicy, sanitize};
pub use session::*;
pub use validation::*;
