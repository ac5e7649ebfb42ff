//! Agent loop - core processing engine

use std::sync::Arc;

use tracing::{debug, warn};

use atlas_provider::{ChatParams, Message, Provider, ToolCallDef};
use atlas_tools::ToolRegistry;

use crate::context::system_prompt;
use crate::{AgentError, Result};

const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// The agent loop drives one conversation: it keeps the transcript, calls the
/// provider, and routes tool calls through the registry.
pub struct AgentLoop<P: Provider> {
    provider: Arc<P>,
    registry: Arc<ToolRegistry>,
    model: String,
    max_iterations: u32,
    history: Vec<Message>,
}

impl<P: Provider> AgentLoop<P> {
    pub fn new(provider: P, registry: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            provider: Arc::new(provider),
            registry,
            model: model.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            history: vec![Message::system(system_prompt())],
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Number of transcript entries, including the system prompt.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Drop the conversation, keeping a fresh system prompt.
    pub fn reset(&mut self) {
        self.history = vec![Message::system(system_prompt())];
    }

    /// Process one user message, running tool calls until the model answers
    /// in plain text.
    pub async fn chat(&mut self, input: impl Into<String>) -> Result<String> {
        self.history.push(Message::user(input));

        let mut iteration = 0;
        loop {
            iteration += 1;
            if iteration > self.max_iterations {
                warn!(max = self.max_iterations, "tool iteration cap hit");
                return Err(AgentError::MaxIterations);
            }
            debug!(iteration, "agent iteration");

            let params = ChatParams {
                model: self.model.clone(),
                messages: self.history.clone(),
                tools: self.registry.definitions(),
                ..Default::default()
            };
            let response = self
                .provider
                .chat(params)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()))?;

            if !response.has_tool_calls() {
                let answer = response
                    .content
                    .unwrap_or_else(|| "Done.".to_string());
                self.history.push(Message::assistant(answer.clone()));
                return Ok(answer);
            }

            // Record the assistant turn with its tool calls, then a tool
            // message per call, in the order the model requested them.
            let defs: Vec<ToolCallDef> = response
                .tool_calls
                .iter()
                .map(|tc| ToolCallDef::new(&tc.id, &tc.name, tc.arguments.clone()))
                .collect();
            self.history.push(Message {
                role: "assistant".to_string(),
                content: response.content.clone(),
                tool_calls: Some(defs),
                tool_call_id: None,
                name: None,
            });

            for tool_call in &response.tool_calls {
                debug!(tool = %tool_call.name, "executing tool");
                let envelope = self
                    .registry
                    .execute(&tool_call.name, tool_call.arguments.clone())
                    .await;
                let result = serde_json::to_string(&envelope)
                    .unwrap_or_else(|_| r#"{"success":false,"error":"unserializable result"}"#.to_string());
                self.history
                    .push(Message::tool(&tool_call.id, &tool_call.name, result));
            }
        }
    }
}
