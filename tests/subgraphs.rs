mod common;
use common::*;

use std::sync::Arc;

use async_trait::async_trait;
use loomflow::graphs::{CompiledGraph, GraphBuilder, compile};
use loomflow::node::{Node, NodeContext, NodeError, NodeRegistry};
use loomflow::schema::{FieldSpec, StateSchema};
use loomflow::state::{StateInstance, StatePatch, StateView};
use loomflow::subgraph::SubgraphNode;
use loomflow::textgen::{MockTextGenerator, TextGenerator};
use loomflow::types::{FieldType, NodeId};
use serde_json::json;

/// Child graph: reads "seed" (text), writes "derived" = seed + suffix.
fn child_graph(suffix: &'static str) -> Arc<CompiledGraph> {
    struct Suffix {
        suffix: &'static str,
    }

    #[async_trait]
    impl Node for Suffix {
        async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
            let seed = view
                .get_str("seed")
                .ok_or(NodeError::MissingInput { what: "seed" })?;
            let mut patch = StatePatch::default();
            patch.insert("derived".into(), json!(format!("{seed}{}", self.suffix)));
            Ok(patch)
        }
    }

    let schema = Arc::new(
        StateSchema::builder(suffix)
            .field(FieldSpec::required("seed", FieldType::Text))
            .field(FieldSpec::optional("scratch", FieldType::Text))
            .field(FieldSpec::required("derived", FieldType::Text))
            .input(["seed"])
            .output(["derived"])
            .build()
            .unwrap(),
    );
    let mut registry = NodeRegistry::new(schema);
    registry
        .register("suffix", Arc::new(Suffix { suffix }), vec!["seed"], vec!["derived"])
        .unwrap();
    let definition = GraphBuilder::new()
        .add_node("suffix")
        .add_edge(NodeId::Start, "suffix")
        .build()
        .unwrap();
    Arc::new(compile(definition, registry).unwrap())
}

#[tokio::test]
async fn embedded_child_matches_direct_invocation() {
    let child = child_graph("-x");

    // Direct.
    let (executor, _) = quiet_executor();
    let direct = executor
        .run(
            &child,
            StateInstance::builder().with_field("seed", json!("v")).build(),
        )
        .await
        .unwrap();

    // Embedded, with field renaming on both sides.
    let parent_schema = Arc::new(
        StateSchema::builder("parent")
            .field(FieldSpec::required("origin", FieldType::Text))
            .field(FieldSpec::required("result", FieldType::Text))
            .input(["origin"])
            .output(["result"])
            .build()
            .unwrap(),
    );
    let wrapped = SubgraphNode::wrap(
        child.clone(),
        [("origin", "seed")],
        [("derived", "result")],
    );
    let reads = wrapped.reads();
    let writes = wrapped.writes();
    let mut registry = NodeRegistry::new(parent_schema);
    registry
        .register("child", Arc::new(wrapped), reads, writes)
        .unwrap();
    let definition = GraphBuilder::new()
        .add_node("child")
        .add_edge(NodeId::Start, "child")
        .build()
        .unwrap();
    let parent = compile(definition, registry).unwrap();

    let embedded = executor
        .run(
            &parent,
            StateInstance::builder()
                .with_field("origin", json!("v"))
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(direct.get("derived"), embedded.get("result"));
    assert_eq!(embedded.get("result"), Some(&json!("v-x")));
}

#[tokio::test]
async fn three_levels_of_nesting_narrow_at_each_boundary() {
    // Level 3 (innermost) appends "-c"; wrap it in level 2 which also runs
    // its own node; wrap that in level 1.
    let inner = child_graph("-c");

    // Level 2: seed -> inner(child) -> derived; its own schema.
    let mid_schema = Arc::new(
        StateSchema::builder("mid")
            .field(FieldSpec::required("seed", FieldType::Text))
            .field(FieldSpec::optional("inner_out", FieldType::Text))
            .field(FieldSpec::required("derived", FieldType::Text))
            .input(["seed"])
            .output(["derived"])
            .build()
            .unwrap(),
    );
    let inner_node = SubgraphNode::wrap(inner, [("seed", "seed")], [("derived", "inner_out")]);
    let (inner_reads, inner_writes) = (inner_node.reads(), inner_node.writes());
    let mut mid_registry = NodeRegistry::new(mid_schema);
    mid_registry
        .register("inner", Arc::new(inner_node), inner_reads, inner_writes)
        .unwrap();
    mid_registry
        .register(
            "rename",
            Arc::new(CopyField::new("inner_out", "derived")),
            vec!["inner_out"],
            vec!["derived"],
        )
        .unwrap();
    let mid_definition = GraphBuilder::new()
        .add_node("inner")
        .add_node("rename")
        .add_edge(NodeId::Start, "inner")
        .add_edge("inner", "rename")
        .build()
        .unwrap();
    let mid = Arc::new(compile(mid_definition, mid_registry).unwrap());

    // Level 1 embeds level 2 transparently.
    let top_schema = Arc::new(
        StateSchema::builder("top")
            .field(FieldSpec::required("seed", FieldType::Text))
            .field(FieldSpec::required("derived", FieldType::Text))
            .input(["seed"])
            .output(["derived"])
            .build()
            .unwrap(),
    );
    let mid_node = SubgraphNode::transparent(mid);
    let (mid_reads, mid_writes) = (mid_node.reads(), mid_node.writes());
    let mut top_registry = NodeRegistry::new(top_schema);
    top_registry
        .register("mid", Arc::new(mid_node), mid_reads, mid_writes)
        .unwrap();
    let top_definition = GraphBuilder::new()
        .add_node("mid")
        .add_edge(NodeId::Start, "mid")
        .build()
        .unwrap();
    let top = compile(top_definition, top_registry).unwrap();

    let (executor, _) = quiet_executor();
    let output = executor
        .run(
            &top,
            StateInstance::builder().with_field("seed", json!("s")).build(),
        )
        .await
        .unwrap();

    assert_eq!(output.get("derived"), Some(&json!("s-c")));
    // Intermediate vocabulary never leaks upward.
    assert!(!output.contains("inner_out"));
    assert!(!output.contains("scratch"));
}

#[tokio::test]
async fn child_failure_surfaces_as_node_error_in_the_parent() {
    let child_schema = Arc::new(
        StateSchema::builder("failing_child")
            .field(FieldSpec::optional("out", FieldType::Text))
            .output(["out"])
            .build()
            .unwrap(),
    );
    let mut child_registry = NodeRegistry::new(child_schema);
    child_registry
        .register("boom", Arc::new(FailNode { message: "inner" }), Vec::<String>::new(), vec!["out"])
        .unwrap();
    let child = Arc::new(
        compile(
            GraphBuilder::new()
                .add_node("boom")
                .add_edge(NodeId::Start, "boom")
                .build()
                .unwrap(),
            child_registry,
        )
        .unwrap(),
    );

    let parent_schema = Arc::new(
        StateSchema::builder("failing_parent")
            .field(FieldSpec::optional("out", FieldType::Text))
            .output(["out"])
            .build()
            .unwrap(),
    );
    let wrapped = SubgraphNode::transparent(child);
    let (reads, writes) = (wrapped.reads(), wrapped.writes());
    let mut registry = NodeRegistry::new(parent_schema);
    registry
        .register("child", Arc::new(wrapped), reads, writes)
        .unwrap();
    let parent = compile(
        GraphBuilder::new()
            .add_node("child")
            .add_edge(NodeId::Start, "child")
            .build()
            .unwrap(),
        registry,
    )
    .unwrap();

    let (executor, _) = quiet_executor();
    let err = executor
        .run(&parent, StateInstance::new())
        .await
        .unwrap_err();
    match err {
        loomflow::executor::RunError::Node { node, .. } => {
            assert_eq!(node, NodeId::custom("child"));
        }
        other => panic!("expected node failure, got {other:?}"),
    }
}

/// A summarizer that short-circuits on empty input without calling its
/// collaborator, in the style of triage workflows over record batches.
struct SummarizeRecords {
    generator: MockTextGenerator,
    sentinel: &'static str,
}

#[async_trait]
impl Node for SummarizeRecords {
    async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let records = view
            .get_array("records")
            .ok_or(NodeError::MissingInput { what: "records" })?;

        let summary = if records.is_empty() {
            self.sentinel.to_string()
        } else {
            let prompt = format!("Summarize {} records", records.len());
            self.generator
                .generate(&prompt, 500)
                .await
                .map_err(|e| NodeError::Provider {
                    provider: "textgen",
                    message: e.to_string(),
                })?
        };

        let mut patch = StatePatch::default();
        patch.insert("summary".into(), json!(summary));
        Ok(patch)
    }
}

#[tokio::test]
async fn empty_record_batch_short_circuits_without_calling_the_generator() {
    let schema = Arc::new(
        StateSchema::builder("summarize")
            .field(FieldSpec::required("records", FieldType::List))
            .field(FieldSpec::required("summary", FieldType::Text))
            .input(["records"])
            .output(["summary"])
            .build()
            .unwrap(),
    );
    let generator = MockTextGenerator::default();
    let mut registry = NodeRegistry::new(schema);
    registry
        .register(
            "summarize",
            Arc::new(SummarizeRecords {
                generator: generator.clone(),
                sentinel: "No failures detected.",
            }),
            vec!["records"],
            vec!["summary"],
        )
        .unwrap();
    let compiled = compile(
        GraphBuilder::new()
            .add_node("summarize")
            .add_edge(NodeId::Start, "summarize")
            .build()
            .unwrap(),
        registry,
    )
    .unwrap();

    let (executor, _) = quiet_executor();
    let output = executor
        .run(
            &compiled,
            StateInstance::builder()
                .with_field("records", json!([]))
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(output.get("summary"), Some(&json!("No failures detected.")));
    assert_eq!(generator.call_count(), 0);

    // A non-empty batch does reach the collaborator.
    let output = executor
        .run(
            &compiled,
            StateInstance::builder()
                .with_field("records", json!([{"id": "r1"}]))
                .build(),
        )
        .await
        .unwrap();
    assert_ne!(output.get("summary"), Some(&json!("No failures detected.")));
    assert_eq!(generator.call_count(), 1);
}
