//! Tool registry and router.
//!
//! The registry is the single source of truth for the model-facing schema:
//! every operation registers once with a name, description, and typed
//! parameter list, and [`ToolRegistry::execute`] dispatches incoming
//! `{name, arguments}` requests after validating the arguments against that
//! list. Nothing escapes this boundary as a fault; every outcome is an
//! [`Envelope`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::Envelope;

/// Semantic parameter types exposed in the tool schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

impl ParamType {
    pub fn json_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// One parameter in a tool's schema entry.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
    pub description: &'static str,
    /// Closed set of accepted values; empty means unrestricted.
    pub choices: &'static [&'static str],
}

impl ParamSpec {
    pub const fn new(
        name: &'static str,
        kind: ParamType,
        required: bool,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required,
            description,
            choices: &[],
        }
    }

    pub const fn one_of(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = choices;
        self
    }
}

/// Build the JSON-schema `parameters` object for a parameter list.
pub fn json_schema(specs: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for spec in specs {
        let mut prop = Map::new();
        prop.insert("type".to_string(), json!(spec.kind.json_name()));
        prop.insert("description".to_string(), json!(spec.description));
        if !spec.choices.is_empty() {
            prop.insert("enum".to_string(), json!(spec.choices));
        }
        properties.insert(spec.name.to_string(), Value::Object(prop));
        if spec.required {
            required.push(spec.name);
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// One named, typed async operation returning an [`Envelope`].
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> &'static [ParamSpec];
    async fn call(&self, args: &Map<String, Value>) -> Envelope;
}

/// Convert a tool into the provider wire definition.
pub fn to_provider_tool(tool: &dyn ToolTrait) -> atlas_provider::Tool {
    atlas_provider::Tool::new(
        tool.name(),
        tool.description(),
        json_schema(tool.parameters()),
    )
}

/// Name-to-operation mapping, built once at startup and queried by exact
/// match. Schema order is registration order.
pub struct ToolRegistry {
    order: Vec<&'static str>,
    tools: HashMap<&'static str, Arc<dyn ToolTrait>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Names must be unique across all domain sets.
    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        let name = tool.name();
        debug_assert!(
            !self.tools.contains_key(name),
            "duplicate tool name: {name}"
        );
        self.order.push(name);
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolTrait>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.iter().map(|n| n.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The ordered, model-facing schema for all registered tools.
    pub fn definitions(&self) -> Vec<atlas_provider::Tool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| to_provider_tool(tool.as_ref()))
            .collect()
    }

    /// Validate `arguments` and dispatch to the named tool.
    ///
    /// Unknown names, malformed arguments, and panics inside an operation all
    /// come back as `Failure` envelopes; this method never faults.
    pub async fn execute(&self, name: &str, arguments: Value) -> Envelope {
        let Some(tool) = self.tools.get(name) else {
            return Envelope::fail(format!("unknown tool: {name}"));
        };

        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Envelope::fail("arguments must be a JSON object"),
        };

        if let Some(envelope) = validate_args(tool.parameters(), &args) {
            return envelope;
        }

        debug!(tool = name, "dispatching tool call");
        match AssertUnwindSafe(tool.call(&args)).catch_unwind().await {
            Ok(envelope) => envelope,
            Err(panic) => {
                let summary = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "operation panicked".to_string());
                warn!(tool = name, %summary, "tool panicked");
                Envelope::fail(format!("internal error: {summary}"))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_args(specs: &[ParamSpec], args: &Map<String, Value>) -> Option<Envelope> {
    for spec in specs {
        // Explicit null counts as absent.
        let value = args.get(spec.name).filter(|v| !v.is_null());
        match value {
            None => {
                if spec.required {
                    return Some(Envelope::fail(format!(
                        "missing required parameter: {}",
                        spec.name
                    )));
                }
            }
            Some(value) => {
                if !spec.kind.matches(value) {
                    return Some(Envelope::fail(format!(
                        "parameter '{}' must be a {}",
                        spec.name,
                        spec.kind.json_name()
                    )));
                }
                if !spec.choices.is_empty() {
                    let accepted = value
                        .as_str()
                        .map(|s| spec.choices.contains(&s))
                        .unwrap_or(false);
                    if !accepted {
                        return Some(Envelope::fail(format!(
                            "parameter '{}' must be one of [{}], got {}",
                            spec.name,
                            spec.choices.join(", "),
                            value
                        )));
                    }
                }
            }
        }
    }
    None
}
