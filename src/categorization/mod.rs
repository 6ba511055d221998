//! Transaction categorization against the fixed category taxonomy

pub mod categorizer;
pub mod rules;
pub mod taxonomy;

pub use categorizer::*;
pub use rules::*;
pub use taxonomy::*;
