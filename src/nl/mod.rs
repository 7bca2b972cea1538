mod insight;
mod llm;
mod translator;

pub use insight::*;
pub use llm::*;
pub use translator::*;
