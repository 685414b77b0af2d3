#![allow(dead_code)]

use async_trait::async_trait;
use loomflow::node::{Node, NodeContext, NodeError};
use loomflow::state::{StatePatch, StateView};
use serde_json::Value;
use tokio::time::{Duration, sleep};

/// Writes fixed fields, optionally after a delay.
#[derive(Debug, Clone)]
pub struct SetFields {
    fields: Vec<(String, Value)>,
    delay_ms: u64,
}

impl SetFields {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            fields: vec![(field.into(), value)],
            delay_ms: 0,
        }
    }

    pub fn and(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.push((field.into(), value));
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

#[async_trait]
impl Node for SetFields {
    async fn run(&self, _view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let mut patch = StatePatch::default();
        for (field, value) in &self.fields {
            patch.insert(field.clone(), value.clone());
        }
        Ok(patch)
    }
}

/// Appends values to an accumulating list field, optionally after a delay.
#[derive(Debug, Clone)]
pub struct AppendItems {
    field: String,
    values: Vec<Value>,
    delay_ms: u64,
}

impl AppendItems {
    pub fn new(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            values,
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

#[async_trait]
impl Node for AppendItems {
    async fn run(&self, _view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let mut patch = StatePatch::default();
        patch.insert(self.field.clone(), Value::Array(self.values.clone()));
        Ok(patch)
    }
}

/// Fails every invocation.
#[derive(Debug, Clone)]
pub struct FailNode {
    pub message: &'static str,
}

#[async_trait]
impl Node for FailNode {
    async fn run(&self, _view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        Err(NodeError::ValidationFailed(self.message.to_string()))
    }
}

/// Copies one field to another.
#[derive(Debug, Clone)]
pub struct CopyField {
    pub from: String,
    pub to: String,
}

impl CopyField {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl Node for CopyField {
    async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let value = view
            .get(&self.from)
            .ok_or_else(|| NodeError::ValidationFailed(format!("field {} absent", self.from)))?
            .clone();
        let mut patch = StatePatch::default();
        patch.insert(self.to.clone(), value);
        Ok(patch)
    }
}

/// Asserts that a set of fields is visible, then writes a marker field.
#[derive(Debug, Clone)]
pub struct ExpectFields {
    expect: Vec<String>,
    write: (String, Value),
}

impl ExpectFields {
    pub fn new<I, S>(expect: I, write_field: impl Into<String>, write_value: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expect: expect.into_iter().map(Into::into).collect(),
            write: (write_field.into(), write_value),
        }
    }
}

#[async_trait]
impl Node for ExpectFields {
    async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        for field in &self.expect {
            if !view.contains(field) {
                return Err(NodeError::ValidationFailed(format!(
                    "expected field {field} to be visible"
                )));
            }
        }
        let mut patch = StatePatch::default();
        patch.insert(self.write.0.clone(), self.write.1.clone());
        Ok(patch)
    }
}

/// Emits an event through the node context, then writes nothing.
#[derive(Debug, Clone)]
pub struct EmitNode {
    pub scope: &'static str,
    pub message: &'static str,
}

#[async_trait]
impl Node for EmitNode {
    async fn run(&self, _view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        ctx.emit(self.scope, self.message)?;
        Ok(StatePatch::default())
    }
}
