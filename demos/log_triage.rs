//! Log triage workflow.
//!
//! Cleans a batch of raw log records, then fans out into two embedded
//! sub-graphs running concurrently: failure analysis (summarize failed
//! entries) and question summarization (digest user questions and post a
//! report). Both sub-graphs append correlation tags to the shared
//! `processed_logs` accumulate field; the barrier merge keeps those tags
//! in branch declaration order on every run.
//!
//! Run with `cargo run --example log_triage`.

use std::sync::Arc;

use async_trait::async_trait;
use loomflow::event_bus::EventBus;
use loomflow::executor::{Executor, ExecutorConfig};
use loomflow::graphs::{CompiledGraph, GraphBuilder, compile};
use loomflow::node::{Node, NodeContext, NodeError, NodeRegistry};
use loomflow::schema::{FieldSpec, StateSchema};
use loomflow::state::{StateInstance, StatePatch, StateView};
use loomflow::subgraph::SubgraphNode;
use loomflow::textgen::{MockTextGenerator, TextGenerator};
use loomflow::types::{FieldType, NodeId};
use loomflow::utils::id_generator::IdGenerator;
use serde_json::{Value, json};

/// Drops malformed records and trims message whitespace.
struct CleanLogs;

#[async_trait]
impl Node for CleanLogs {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let raw = view
            .get_array("raw_logs")
            .ok_or(NodeError::MissingInput { what: "raw_logs" })?;
        let cleaned: Vec<Value> = raw
            .iter()
            .filter(|r| r.get("id").is_some())
            .cloned()
            .collect();
        ctx.emit("clean", format!("kept {} of {} records", cleaned.len(), raw.len()))?;

        let mut patch = StatePatch::default();
        patch.insert("cleaned_logs".into(), Value::Array(cleaned));
        Ok(patch)
    }
}

/// Selects records flagged as failures.
struct GetFailures;

#[async_trait]
impl Node for GetFailures {
    async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let logs = view
            .get_array("cleaned_logs")
            .ok_or(NodeError::MissingInput { what: "cleaned_logs" })?;
        let failures: Vec<Value> = logs
            .iter()
            .filter(|r| r.get("level").and_then(Value::as_str) == Some("error"))
            .cloned()
            .collect();

        let mut patch = StatePatch::default();
        patch.insert("failures".into(), Value::Array(failures));
        Ok(patch)
    }
}

/// Summarizes failures, or short-circuits with a sentinel on an empty batch.
struct SummarizeFailures {
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Node for SummarizeFailures {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let failures = view
            .get_array("failures")
            .ok_or(NodeError::MissingInput { what: "failures" })?;

        let mut patch = StatePatch::default();
        if failures.is_empty() {
            patch.insert("fa_summary".into(), json!("No failures detected."));
            patch.insert("processed_logs".into(), json!([]));
            return Ok(patch);
        }

        let prompt = format!("Summarize these failures: {}", json!(failures));
        let summary = self
            .generator
            .generate(&prompt, 500)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "textgen",
                message: e.to_string(),
            })?;
        ctx.emit("failure-analysis", format!("summarized {} failures", failures.len()))?;

        let tags: Vec<Value> = failures
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str))
            .map(|id| json!(format!("failure-analysis-on-log-{id}")))
            .collect();
        patch.insert("fa_summary".into(), json!(summary));
        patch.insert("processed_logs".into(), Value::Array(tags));
        Ok(patch)
    }
}

/// Digests user questions from the cleaned batch.
struct SummarizeQuestions {
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Node for SummarizeQuestions {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let logs = view
            .get_array("cleaned_logs")
            .ok_or(NodeError::MissingInput { what: "cleaned_logs" })?;
        let questions: Vec<&Value> = logs
            .iter()
            .filter(|r| r.get("question").is_some())
            .collect();

        let mut patch = StatePatch::default();
        if questions.is_empty() {
            patch.insert("qs_summary".into(), json!("No questions to analyze."));
            patch.insert("processed_logs".into(), json!([]));
            return Ok(patch);
        }

        let prompt = format!("Summarize {} user questions", questions.len());
        let summary = self
            .generator
            .generate(&prompt, 800)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "textgen",
                message: e.to_string(),
            })?;
        ctx.emit("question-summarization", format!("digested {} questions", questions.len()))?;

        let tags: Vec<Value> = questions
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str))
            .map(|id| json!(format!("question-summarization-on-log-{id}")))
            .collect();
        patch.insert("qs_summary".into(), json!(summary));
        patch.insert("processed_logs".into(), Value::Array(tags));
        Ok(patch)
    }
}

/// Formats the question digest into an outbound report.
struct SendReport;

#[async_trait]
impl Node for SendReport {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let summary = view
            .get_str("qs_summary")
            .ok_or(NodeError::MissingInput { what: "qs_summary" })?;
        ctx.emit("report", "posting question digest")?;

        let mut patch = StatePatch::default();
        patch.insert("report".into(), json!(format!("[slack] {summary}")));
        Ok(patch)
    }
}

fn failure_analysis_graph(
    generator: Arc<dyn TextGenerator>,
) -> miette::Result<Arc<CompiledGraph>> {
    let schema = Arc::new(
        StateSchema::builder("failure_analysis")
            .field(FieldSpec::required("cleaned_logs", FieldType::List))
            .field(FieldSpec::optional("failures", FieldType::List))
            .field(FieldSpec::required("fa_summary", FieldType::Text))
            .field(FieldSpec::optional("processed_logs", FieldType::List).accumulating())
            .input(["cleaned_logs"])
            .output(["fa_summary", "processed_logs"])
            .build()?,
    );

    let mut registry = NodeRegistry::new(schema);
    registry.register(
        "get_failures",
        Arc::new(GetFailures),
        vec!["cleaned_logs"],
        vec!["failures"],
    )?;
    registry.register(
        "summarize",
        Arc::new(SummarizeFailures { generator }),
        vec!["failures"],
        vec!["fa_summary", "processed_logs"],
    )?;

    let definition = GraphBuilder::new()
        .add_node("get_failures")
        .add_node("summarize")
        .add_edge(NodeId::Start, "get_failures")
        .add_edge("get_failures", "summarize")
        .build()?;
    Ok(Arc::new(compile(definition, registry)?))
}

fn question_summarization_graph(
    generator: Arc<dyn TextGenerator>,
) -> miette::Result<Arc<CompiledGraph>> {
    let schema = Arc::new(
        StateSchema::builder("question_summarization")
            .field(FieldSpec::required("cleaned_logs", FieldType::List))
            .field(FieldSpec::required("qs_summary", FieldType::Text))
            .field(FieldSpec::required("report", FieldType::Text))
            .field(FieldSpec::optional("processed_logs", FieldType::List).accumulating())
            .input(["cleaned_logs"])
            .output(["report", "processed_logs"])
            .build()?,
    );

    let mut registry = NodeRegistry::new(schema);
    registry.register(
        "summarize",
        Arc::new(SummarizeQuestions { generator }),
        vec!["cleaned_logs"],
        vec!["qs_summary", "processed_logs"],
    )?;
    registry.register(
        "send_report",
        Arc::new(SendReport),
        vec!["qs_summary"],
        vec!["report"],
    )?;

    let definition = GraphBuilder::new()
        .add_node("summarize")
        .add_node("send_report")
        .add_edge(NodeId::Start, "summarize")
        .add_edge("summarize", "send_report")
        .build()?;
    Ok(Arc::new(compile(definition, registry)?))
}

fn entry_graph(generator: Arc<dyn TextGenerator>) -> miette::Result<CompiledGraph> {
    let schema = Arc::new(
        StateSchema::builder("log_triage")
            .field(FieldSpec::required("raw_logs", FieldType::List))
            .field(FieldSpec::required("cleaned_logs", FieldType::List))
            .field(FieldSpec::optional("fa_summary", FieldType::Text))
            .field(FieldSpec::optional("report", FieldType::Text))
            .field(FieldSpec::optional("processed_logs", FieldType::List).accumulating())
            .input(["raw_logs"])
            .output(["fa_summary", "report", "processed_logs"])
            .build()?,
    );

    let failure_analysis = SubgraphNode::wrap(
        failure_analysis_graph(generator.clone())?,
        [("cleaned_logs", "cleaned_logs")],
        [
            ("fa_summary", "fa_summary"),
            ("processed_logs", "processed_logs"),
        ],
    );
    let question_summarization = SubgraphNode::wrap(
        question_summarization_graph(generator)?,
        [("cleaned_logs", "cleaned_logs")],
        [("report", "report"), ("processed_logs", "processed_logs")],
    );

    let mut registry = NodeRegistry::new(schema);
    registry.register(
        "clean",
        Arc::new(CleanLogs),
        vec!["raw_logs"],
        vec!["cleaned_logs"],
    )?;
    let (fa_reads, fa_writes) = (failure_analysis.reads(), failure_analysis.writes());
    registry.register("failure_analysis", Arc::new(failure_analysis), fa_reads, fa_writes)?;
    let (qs_reads, qs_writes) = (
        question_summarization.reads(),
        question_summarization.writes(),
    );
    registry.register(
        "question_summarization",
        Arc::new(question_summarization),
        qs_reads,
        qs_writes,
    )?;

    let definition = GraphBuilder::new()
        .add_node("clean")
        .add_node("failure_analysis")
        .add_node("question_summarization")
        .add_edge(NodeId::Start, "clean")
        .add_edge("clean", "failure_analysis")
        .add_edge("clean", "question_summarization")
        .build()?;
    Ok(compile(definition, registry)?)
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let generator: Arc<dyn TextGenerator> = Arc::new(MockTextGenerator::with_prefix("digest:"));
    let graph = entry_graph(generator)?;

    // Human-scannable run id so bus diagnostics are easy to grep.
    let run_tag = IdGenerator::new().generate_tag(6);
    let executor = Executor::new()
        .with_config(ExecutorConfig::from_env().with_run_id(format!("log-triage-{run_tag}")))
        .with_event_bus(EventBus::default());
    let initial = StateInstance::builder()
        .with_field(
            "raw_logs",
            json!([
                {"id": "log-1", "level": "error", "message": "db timeout"},
                {"id": "log-2", "level": "info", "question": "How do I rotate keys?"},
                {"id": "log-3", "level": "error", "message": "disk full"},
                {"level": "info", "message": "malformed, no id"},
            ]),
        )
        .build();

    let output = executor.run(&graph, initial).await?;
    println!("failure summary : {}", output.get("fa_summary").unwrap_or(&json!(null)));
    println!("question report : {}", output.get("report").unwrap_or(&json!(null)));
    println!("processed tags  : {}", output.get("processed_logs").unwrap_or(&json!([])));
    Ok(())
}
