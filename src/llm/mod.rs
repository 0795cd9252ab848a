//! Language-model access: the completion client seam, prompt builders and
//! defensive parsing of free-form responses.

pub mod client;
pub mod parse;
pub mod prompts;

pub use client::{CompletionClient, OpenRouterClient};
pub use parse::{extract_code, parse_json, Parsed};
