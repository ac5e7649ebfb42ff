//! The conversational agent loop: sends the transcript plus tool definitions
//! to the provider, executes requested tools, and feeds results back until
//! the model answers in plain text.

use thiserror::Error;

mod context;
mod loop_agent;

pub use context::system_prompt;
pub use loop_agent::AgentLoop;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("maximum tool iterations exceeded")]
    MaxIterations,
}

pub type Result<T> = std::result::Result<T, AgentError>;
