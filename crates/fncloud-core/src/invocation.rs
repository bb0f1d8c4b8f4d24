// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON invocation adapter.
//!
//! Remote calls carry named arguments (and, for methods, the instance's
//! attribute map) as JSON. `#[remote]` generates a [`Handler`] that decodes
//! them, calls the wrapped function and encodes the result.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Failure inside a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("missing argument `{0}`")]
    MissingArgument(String),

    #[error("argument `{name}` has the wrong type: {message}")]
    InvalidArgument { name: String, message: String },

    /// A method was invoked without instance state.
    #[error("method invocation carries no instance state")]
    MissingState,

    #[error("instance state is not serializable: {0}")]
    NotSerializable(String),

    /// The function body panicked or reported a failure.
    #[error("function failed: {0}")]
    Failed(String),
}

/// One remote call: named arguments plus optional instance state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Map<String, Value>>,
}

impl Invocation {
    pub fn new(args: Map<String, Value>) -> Self {
        Self { args, state: None }
    }

    pub fn with_state(mut self, state: Map<String, Value>) -> Self {
        self.state = Some(state);
        self
    }

    /// Decode a named argument.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T, InvokeError> {
        let value = self
            .args
            .get(name)
            .cloned()
            .ok_or_else(|| InvokeError::MissingArgument(name.to_string()))?;
        serde_json::from_value(value).map_err(|e| InvokeError::InvalidArgument {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Rebuild the receiver of a method call from the carried state.
    pub fn receiver<T: DeserializeOwned>(&self) -> Result<T, InvokeError> {
        let state = self.state.clone().ok_or(InvokeError::MissingState)?;
        serde_json::from_value(Value::Object(state))
            .map_err(|e| InvokeError::NotSerializable(e.to_string()))
    }
}

/// Result of one remote call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationOutput {
    pub result: Value,
    /// Attribute map of the receiver after the call (methods only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Map<String, Value>>,
}

impl InvocationOutput {
    /// Encode a plain return value.
    pub fn value<R: Serialize>(result: &R) -> Result<Self, InvokeError> {
        let result = serde_json::to_value(result).map_err(|e| InvokeError::Failed(e.to_string()))?;
        Ok(Self {
            result,
            state: None,
        })
    }

    /// Encode a return value plus the receiver's attributes.
    pub fn with_state<R: Serialize, S: Serialize>(result: &R, receiver: &S) -> Result<Self, InvokeError> {
        let mut output = Self::value(result)?;
        output.state = Some(attribute_map(receiver).map_err(InvokeError::NotSerializable)?);
        Ok(output)
    }

    /// Decode the return value.
    pub fn decode<R: DeserializeOwned>(&self) -> Result<R, serde_json::Error> {
        serde_json::from_value(self.result.clone())
    }
}

/// Serialize a value into its attribute map. Non-object values are rejected.
pub fn attribute_map<S: Serialize>(value: &S) -> Result<Map<String, Value>, String> {
    match serde_json::to_value(value).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        other => Err(format!(
            "expected an object with named attributes, got {}",
            json_type_name(&other)
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

type HandlerFn = dyn Fn(Invocation) -> Result<InvocationOutput, InvokeError> + Send + Sync;

/// Type-erased entry point of a wrapped callable.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Invocation) -> Result<InvocationOutput, InvokeError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Run the callable. Panics inside the body surface as [`InvokeError::Failed`].
    pub fn call(&self, invocation: Invocation) -> Result<InvocationOutput, InvokeError> {
        let f = Arc::clone(&self.0);
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || f(invocation)))
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "function panicked".to_string());
                Err(InvokeError::Failed(message))
            })
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}
