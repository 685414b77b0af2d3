#![allow(dead_code)]

use std::sync::Arc;

use loomflow::event_bus::{EventBus, MemorySink};
use loomflow::executor::Executor;
use loomflow::graphs::{CompiledGraph, GraphBuilder, compile};
use loomflow::node::NodeRegistry;
use loomflow::schema::{FieldSpec, StateSchema};
use loomflow::types::{FieldType, NodeId};
use serde_json::json;

use super::nodes::AppendItems;

/// An executor whose events land in a memory sink instead of stdout.
pub fn quiet_executor() -> (Executor, MemorySink) {
    let sink = MemorySink::new();
    let executor = Executor::new().with_event_bus(EventBus::with_sink(sink.clone()));
    (executor, sink)
}

/// Schema with one accumulating list field `items` as the output.
pub fn items_schema() -> Arc<StateSchema> {
    Arc::new(
        StateSchema::builder("items")
            .field(FieldSpec::optional("items", FieldType::List).accumulating())
            .output(["items"])
            .build()
            .unwrap(),
    )
}

/// Fan-out graph: Start -> each branch; branch `i` appends `values[i]`
/// to `items` after `delays[i]` milliseconds. Branches are declared in
/// index order.
pub fn fan_out_items_graph(values: &[&str], delays: &[u64]) -> Arc<CompiledGraph> {
    assert_eq!(values.len(), delays.len());
    let mut registry = NodeRegistry::new(items_schema());
    let mut builder = GraphBuilder::new();
    for (i, (value, delay)) in values.iter().zip(delays).enumerate() {
        let name = format!("branch_{i}");
        registry
            .register(
                name.as_str(),
                Arc::new(AppendItems::new("items", vec![json!(value)]).with_delay(*delay)),
                Vec::<String>::new(),
                vec!["items"],
            )
            .unwrap();
        builder = builder.add_node(name.as_str()).add_edge(NodeId::Start, name.as_str());
    }
    Arc::new(compile(builder.build().unwrap(), registry).unwrap())
}
