//! Provider clients (Gemini, OpenRouter) and the seams the pipeline uses.

mod gemini;
mod http;
mod llm_client;
mod prompt;
mod provider;
mod router;

pub use gemini::*;
pub use llm_client::*;
pub use prompt::*;
pub use provider::*;
pub use router::*;
