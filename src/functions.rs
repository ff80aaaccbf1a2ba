//! Function-execution collaborator interface.
//!
//! The language model may request a named function with JSON arguments;
//! execution lives outside the engine. The orchestrator feeds the result
//! back into the model before speaking a final answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Declaration of a callable function, advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// What the function does, for the model's benefit.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    /// Function name.
    pub name: String,
    /// Parsed arguments.
    pub arguments: serde_json::Value,
}

/// External function-execution collaborator.
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    /// Functions this executor can run.
    fn specs(&self) -> Vec<FunctionSpec>;

    /// Execute a call, returning the result value to feed back to the model.
    async fn execute(&self, call: &FunctionCall) -> anyhow::Result<serde_json::Value>;
}

/// Executor with no functions; the model is offered none.
#[derive(Debug, Default)]
pub struct NoFunctions;

#[async_trait]
impl FunctionExecutor for NoFunctions {
    fn specs(&self) -> Vec<FunctionSpec> {
        Vec::new()
    }

    async fn execute(&self, call: &FunctionCall) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("no function named '{}' is registered", call.name)
    }
}
