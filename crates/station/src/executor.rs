use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Result, StationError};

pub type OperationArgs = Map<String, Value>;

/// A registered operation: borrows the context for the duration of the step.
pub type OperationFn<C> = for<'a> fn(&'a mut C, OperationArgs) -> BoxFuture<'a, Result<()>>;

/// One entry of a protocol file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub operation: String,
    #[serde(default, alias = "args")]
    pub specs: OperationArgs,
}

impl ProtocolStep {
    pub fn new(operation: impl Into<String>, specs: OperationArgs) -> Self {
        Self {
            operation: operation.into(),
            specs,
        }
    }
}

/// Allow-list of operations a protocol may name.
pub struct OperationRegistry<C> {
    operations: BTreeMap<&'static str, OperationFn<C>>,
}

impl<C> Default for OperationRegistry<C> {
    fn default() -> Self {
        Self {
            operations: BTreeMap::new(),
        }
    }
}

impl<C> OperationRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &'static str, operation: OperationFn<C>) -> Self {
        self.operations.insert(name, operation);
        self
    }

    pub fn get(&self, name: &str) -> Option<OperationFn<C>> {
        self.operations.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.keys().copied()
    }
}

pub struct ProtocolExecutor<C> {
    registry: OperationRegistry<C>,
}

impl<C: Send> ProtocolExecutor<C> {
    pub fn new(registry: OperationRegistry<C>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperationRegistry<C> {
        &self.registry
    }

    /// Checks every step names a registered operation.
    pub fn validate(&self, steps: &[ProtocolStep]) -> Result<()> {
        match steps
            .iter()
            .enumerate()
            .find(|(_, step)| !self.registry.contains(&step.operation))
        {
            Some((index, step)) => Err(StationError::UnknownOperation {
                name: step.operation.clone(),
                index,
            }),
            None => Ok(()),
        }
    }

    /// Runs `steps` in order against `context`.
    ///
    /// Nothing runs if any step names an unknown operation. A failing step
    /// stops the run; steps before it keep their effects.
    pub async fn execute(&self, context: &mut C, steps: &[ProtocolStep]) -> Result<()> {
        self.validate(steps)?;
        for (index, step) in steps.iter().enumerate() {
            let operation =
                self.registry
                    .get(&step.operation)
                    .ok_or_else(|| StationError::UnknownOperation {
                        name: step.operation.clone(),
                        index,
                    })?;
            info!(index, operation = %step.operation, "executor: running step");
            operation(context, step.specs.clone()).await?;
        }
        Ok(())
    }
}

/// Decodes step arguments into the operation's typed parameters.
pub fn decode_args<T: DeserializeOwned>(operation: &str, args: OperationArgs) -> Result<T> {
    serde_json::from_value(Value::Object(args)).map_err(|source| StationError::InvalidArguments {
        operation: operation.to_string(),
        source,
    })
}

/// Parses a protocol file body.
pub fn parse_protocol(text: &str) -> Result<Vec<ProtocolStep>> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "tests/executor_tests.rs"]
mod tests;
