//! Strongly typed request and tool shapes shared by every client layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `_meta` key carrying a signed-auth header value.
pub const META_AUTHORIZATION_KEY: &str = "authorization";
/// `_meta` key carrying an x402 payment authorization.
pub const META_PAYMENT_KEY: &str = "x402/payment";

/// A tool as advertised by a remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl RemoteTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema,
            annotations: None,
        }
    }
}

pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Out-of-band annotation attached to a call through the JSON-RPC `_meta`
/// field rather than through the visible tool arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAnnotation {
    SignedAuth(String),
    Payment(String),
}

impl CallAnnotation {
    pub fn meta_key(&self) -> &'static str {
        match self {
            CallAnnotation::SignedAuth(_) => META_AUTHORIZATION_KEY,
            CallAnnotation::Payment(_) => META_PAYMENT_KEY,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            CallAnnotation::SignedAuth(value) | CallAnnotation::Payment(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Option<Map<String, Value>>,
    pub annotation: Option<CallAnnotation>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
            annotation: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn with_annotation(mut self, annotation: CallAnnotation) -> Self {
        self.annotation = Some(annotation);
        self
    }

    /// Builds a request from a JSON value, accepting objects and `null`.
    pub fn from_json(name: impl Into<String>, arguments: Value) -> Result<Self, String> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => return Err(format!("Tool arguments must be a JSON object, got {other}")),
        };
        Ok(Self {
            name: name.into(),
            arguments,
            annotation: None,
        })
    }
}
