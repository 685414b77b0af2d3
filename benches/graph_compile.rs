//! Benchmarks for graph building, validation, and compilation.
//!
//! These benchmarks measure:
//! - Topology validation (reachability, cycle detection, layering)
//! - Full compilation against a node registry (shape checks)

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use loomflow::graphs::{GraphBuilder, GraphDefinition, compile};
use loomflow::node::{Node, NodeContext, NodeError, NodeRegistry};
use loomflow::schema::{FieldSpec, StateSchema};
use loomflow::state::{StatePatch, StateView};
use loomflow::types::{FieldType, NodeId};

/// A minimal no-op node for benchmarking graph structure operations.
struct BenchNode;

#[async_trait::async_trait]
impl Node for BenchNode {
    async fn run(&self, _: StateView, _: NodeContext) -> Result<StatePatch, NodeError> {
        Ok(StatePatch::default())
    }
}

fn bench_schema() -> Arc<StateSchema> {
    Arc::new(
        StateSchema::builder("bench")
            .field(FieldSpec::optional("payload", FieldType::Any))
            .output(["payload"])
            .build()
            .expect("schema builds"),
    )
}

/// Linear topology: Start -> N0 -> N1 -> ... -> Nn.
fn linear_builder(node_count: usize) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    for i in 0..node_count {
        builder = builder.add_node(format!("node_{i}").as_str());
    }
    builder = builder.add_edge(NodeId::Start, "node_0");
    for i in 0..node_count.saturating_sub(1) {
        builder = builder.add_edge(
            format!("node_{i}").as_str(),
            format!("node_{}", i + 1).as_str(),
        );
    }
    builder
}

/// Fan-out topology: Start -> N workers.
fn fanout_builder(width: usize) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    for i in 0..width {
        let name = format!("worker_{i}");
        builder = builder
            .add_node(name.as_str())
            .add_edge(NodeId::Start, name.as_str());
    }
    builder
}

/// Layered DAG: `depth` layers of `width` nodes, chained layer to layer.
fn layered_builder(depth: usize, width: usize) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    for layer in 0..depth {
        for node in 0..width {
            builder = builder.add_node(format!("L{layer}_N{node}").as_str());
        }
    }
    for node in 0..width {
        builder = builder.add_edge(NodeId::Start, format!("L0_N{node}").as_str());
    }
    for layer in 0..depth.saturating_sub(1) {
        for node in 0..width {
            builder = builder.add_edge(
                format!("L{layer}_N{node}").as_str(),
                format!("L{}_N{node}", layer + 1).as_str(),
            );
        }
    }
    builder
}

fn registry_for(definition: &GraphDefinition) -> NodeRegistry {
    let mut registry = NodeRegistry::new(bench_schema());
    for node in definition.nodes() {
        if let NodeId::Custom(name) = node {
            registry
                .register(
                    name.as_str(),
                    Arc::new(BenchNode),
                    Vec::<String>::new(),
                    vec!["payload"],
                )
                .expect("registration succeeds");
        }
    }
    registry
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for size in [10, 50, 100, 200] {
        group.bench_with_input(BenchmarkId::new("linear", size), &size, |b, &size| {
            b.iter(|| linear_builder(size).build().expect("valid graph"));
        });
    }

    for width in [10, 50, 100] {
        group.bench_with_input(BenchmarkId::new("fanout", width), &width, |b, &width| {
            b.iter(|| fanout_builder(width).build().expect("valid graph"));
        });
    }

    for (depth, width) in [(5, 10), (10, 10), (5, 20)] {
        group.bench_with_input(
            BenchmarkId::new("layered", format!("{depth}x{width}")),
            &(depth, width),
            |b, &(depth, width)| {
                b.iter(|| layered_builder(depth, width).build().expect("valid graph"));
            },
        );
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_compile");

    for size in [10, 50, 100] {
        let definition = linear_builder(size).build().expect("valid graph");
        group.bench_with_input(
            BenchmarkId::new("linear", size),
            &definition,
            |b, definition| {
                b.iter(|| {
                    compile(definition.clone(), registry_for(definition))
                        .expect("compilation succeeds")
                });
            },
        );
    }

    for (depth, width) in [(5, 10), (10, 10)] {
        let definition = layered_builder(depth, width).build().expect("valid graph");
        group.bench_with_input(
            BenchmarkId::new("layered", format!("{depth}x{width}")),
            &definition,
            |b, definition| {
                b.iter(|| {
                    compile(definition.clone(), registry_for(definition))
                        .expect("compilation succeeds")
                });
            },
        );
    }

    group.finish();
}

fn bench_layering(c: &mut Criterion) {
    let mut group = c.benchmark_group("layering");

    for size in [10, 50, 100, 200] {
        let definition = linear_builder(size).build().expect("valid graph");
        group.bench_with_input(
            BenchmarkId::new("linear", size),
            &definition,
            |b, definition| {
                b.iter(|| definition.layers().expect("acyclic"));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_compile, bench_layering);
criterion_main!(benches);
