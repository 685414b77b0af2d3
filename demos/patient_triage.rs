//! Patient intake triage workflow.
//!
//! Validates a batch of intake records, then fans out into two embedded
//! sub-graphs: urgent-case triage (flag and summarize cases that need
//! immediate attention) and symptom-pattern analysis (aggregate trends
//! into a report). Both append correlation tags to the shared
//! `processed_patients` accumulate field.
//!
//! Run with `cargo run --example patient_triage`.

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

const URGENT_SYMPTOMS: &[&str] = &["chest pain", "shortness of breath", "severe bleeding"];

/// Drops intake records without a patient id.
struct ValidateIntake;

#[async_trait]
impl Node for ValidateIntake {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let raw = view
            .get_array("raw_intake")
            .ok_or(NodeError::MissingInput { what: "raw_intake" })?;
        let valid: Vec<Value> = raw
            .iter()
            .filter(|r| r.get("patient_id").is_some())
            .cloned()
            .collect();
        ctx.emit("validate", format!("kept {} of {} records", valid.len(), raw.len()))?;

        let mut patch = StatePatch::default();
        patch.insert("patients".into(), Value::Array(valid));
        Ok(patch)
    }
}

/// Flags patients reporting urgent symptoms.
struct IdentifyUrgent;

#[async_trait]
impl Node for IdentifyUrgent {
    async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let patients = view
            .get_array("patients")
            .ok_or(NodeError::MissingInput { what: "patients" })?;
        let urgent: Vec<Value> = patients
            .iter()
            .filter(|p| {
                p.get("symptoms")
                    .and_then(Value::as_array)
                    .is_some_and(|symptoms| {
                        symptoms.iter().any(|s| {
                            s.as_str()
                                .is_some_and(|s| URGENT_SYMPTOMS.contains(&s))
                        })
                    })
            })
            .cloned()
            .collect();

        let mut patch = StatePatch::default();
        patch.insert("urgent_cases".into(), Value::Array(urgent));
        Ok(patch)
    }
}

/// Summarizes urgent cases, or short-circuits on an empty set.
struct SummarizeUrgent {
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Node for SummarizeUrgent {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let urgent = view
            .get_array("urgent_cases")
            .ok_or(NodeError::MissingInput { what: "urgent_cases" })?;

        let mut patch = StatePatch::default();
        if urgent.is_empty() {
            patch.insert("urgent_summary".into(), json!("No urgent cases detected."));
            patch.insert("processed_patients".into(), json!([]));
            return Ok(patch);
        }

        let prompt = format!("Triage these urgent cases: {}", json!(urgent));
        let summary = self
            .generator
            .generate(&prompt, 600)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "textgen",
                message: e.to_string(),
            })?;
        ctx.emit("urgent-triage", format!("{} urgent cases", urgent.len()))?;

        let tags: Vec<Value> = urgent
            .iter()
            .filter_map(|p| p.get("patient_id").and_then(Value::as_str))
            .map(|id| json!(format!("urgent-triage-{id}")))
            .collect();
        patch.insert("urgent_summary".into(), json!(summary));
        patch.insert("processed_patients".into(), Value::Array(tags));
        Ok(patch)
    }
}

/// Aggregates symptom frequencies across the batch.
struct AnalyzePatterns;

#[async_trait]
impl Node for AnalyzePatterns {
    async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let patients = view
            .get_array("patients")
            .ok_or(NodeError::MissingInput { what: "patients" })?;

        let mut counts = serde_json::Map::new();
        for patient in patients {
            let Some(symptoms) = patient.get("symptoms").and_then(Value::as_array) else {
                continue;
            };
            for symptom in symptoms.iter().filter_map(Value::as_str) {
                let entry = counts.entry(symptom.to_string()).or_insert(json!(0));
                if let Some(n) = entry.as_i64() {
                    *entry = json!(n + 1);
                }
            }
        }

        let mut patch = StatePatch::default();
        patch.insert("symptom_counts".into(), Value::Object(counts));
        Ok(patch)
    }
}

/// Turns the frequency table into a report, with an empty-batch sentinel.
struct GenerateReport {
    generator: Arc<dyn TextGenerator>,
}

#[async_trait]
impl Node for GenerateReport {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let patients = view
            .get_array("patients")
            .ok_or(NodeError::MissingInput { what: "patients" })?;
        let counts = view
            .get("symptom_counts")
            .and_then(Value::as_object)
            .ok_or(NodeError::MissingInput { what: "symptom_counts" })?;

        let mut patch = StatePatch::default();
        if patients.is_empty() {
            patch.insert("pattern_report".into(), json!("No patients to analyze."));
            patch.insert("processed_patients".into(), json!([]));
            return Ok(patch);
        }

        let prompt = format!("Report on symptom patterns: {}", json!(counts));
        let report = self
            .generator
            .generate(&prompt, 600)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "textgen",
                message: e.to_string(),
            })?;
        ctx.emit("symptom-patterns", format!("{} distinct symptoms", counts.len()))?;

        let tags: Vec<Value> = patients
            .iter()
            .filter_map(|p| p.get("patient_id").and_then(Value::as_str))
            .map(|id| json!(format!("pattern-analysis-{id}")))
            .collect();
        patch.insert("pattern_report".into(), json!(report));
        patch.insert("processed_patients".into(), Value::Array(tags));
        Ok(patch)
    }
}

fn urgent_case_graph(generator: Arc<dyn TextGenerator>) -> miette::Result<Arc<CompiledGraph>> {
    let schema = Arc::new(
        StateSchema::builder("urgent_case")
            .field(FieldSpec::required("patients", FieldType::List))
            .field(FieldSpec::optional("urgent_cases", FieldType::List))
            .field(FieldSpec::required("urgent_summary", FieldType::Text))
            .field(FieldSpec::optional("processed_patients", FieldType::List).accumulating())
            .input(["patients"])
            .output(["urgent_summary", "processed_patients"])
            .build()?,
    );

    let mut registry = NodeRegistry::new(schema);
    registry.register(
        "identify",
        Arc::new(IdentifyUrgent),
        vec!["patients"],
        vec!["urgent_cases"],
    )?;
    registry.register(
        "summarize",
        Arc::new(SummarizeUrgent { generator }),
        vec!["urgent_cases"],
        vec!["urgent_summary", "processed_patients"],
    )?;

    let definition = GraphBuilder::new()
        .add_node("identify")
        .add_node("summarize")
        .add_edge(NodeId::Start, "identify")
        .add_edge("identify", "summarize")
        .build()?;
    Ok(Arc::new(compile(definition, registry)?))
}

fn symptom_pattern_graph(generator: Arc<dyn TextGenerator>) -> miette::Result<Arc<CompiledGraph>> {
    let schema = Arc::new(
        StateSchema::builder("symptom_pattern")
            .field(FieldSpec::required("patients", FieldType::List))
            .field(FieldSpec::optional("symptom_counts", FieldType::Record))
            .field(FieldSpec::required("pattern_report", FieldType::Text))
            .field(FieldSpec::optional("processed_patients", FieldType::List).accumulating())
            .input(["patients"])
            .output(["pattern_report", "processed_patients"])
            .build()?,
    );

    let mut registry = NodeRegistry::new(schema);
    registry.register(
        "analyze",
        Arc::new(AnalyzePatterns),
        vec!["patients"],
        vec!["symptom_counts"],
    )?;
    registry.register(
        "report",
        Arc::new(GenerateReport { generator }),
        vec!["patients", "symptom_counts"],
        vec!["pattern_report", "processed_patients"],
    )?;

    let definition = GraphBuilder::new()
        .add_node("analyze")
        .add_node("report")
        .add_edge(NodeId::Start, "analyze")
        .add_edge("analyze", "report")
        .build()?;
    Ok(Arc::new(compile(definition, registry)?))
}

fn entry_graph(generator: Arc<dyn TextGenerator>) -> miette::Result<CompiledGraph> {
    let schema = Arc::new(
        StateSchema::builder("patient_triage")
            .field(FieldSpec::required("raw_intake", FieldType::List))
            .field(FieldSpec::required("patients", FieldType::List))
            .field(FieldSpec::optional("urgent_summary", FieldType::Text))
            .field(FieldSpec::optional("pattern_report", FieldType::Text))
            .field(FieldSpec::optional("processed_patients", FieldType::List).accumulating())
            .input(["raw_intake"])
            .output(["urgent_summary", "pattern_report", "processed_patients"])
            .build()?,
    );

    let urgent = SubgraphNode::wrap(
        urgent_case_graph(generator.clone())?,
        [("patients", "patients")],
        [
            ("urgent_summary", "urgent_summary"),
            ("processed_patients", "processed_patients"),
        ],
    );
    let patterns = SubgraphNode::wrap(
        symptom_pattern_graph(generator)?,
        [("patients", "patients")],
        [
            ("pattern_report", "pattern_report"),
            ("processed_patients", "processed_patients"),
        ],
    );

    let mut registry = NodeRegistry::new(schema);
    registry.register(
        "validate",
        Arc::new(ValidateIntake),
        vec!["raw_intake"],
        vec!["patients"],
    )?;
    let (urgent_reads, urgent_writes) = (urgent.reads(), urgent.writes());
    registry.register("urgent_triage", Arc::new(urgent), urgent_reads, urgent_writes)?;
    let (pattern_reads, pattern_writes) = (patterns.reads(), patterns.writes());
    registry.register("symptom_patterns", Arc::new(patterns), pattern_reads, pattern_writes)?;

    let definition = GraphBuilder::new()
        .add_node("validate")
        .add_node("urgent_triage")
        .add_node("symptom_patterns")
        .add_edge(NodeId::Start, "validate")
        .add_edge("validate", "urgent_triage")
        .add_edge("validate", "symptom_patterns")
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

    let generator: Arc<dyn TextGenerator> = Arc::new(MockTextGenerator::with_prefix("triage:"));
    let graph = entry_graph(generator)?;

    // Human-scannable run id so bus diagnostics are easy to grep.
    let run_tag = IdGenerator::new().generate_tag(6);
    let executor = Executor::new()
        .with_config(ExecutorConfig::from_env().with_run_id(format!("patient-triage-{run_tag}")))
        .with_event_bus(EventBus::default());
    let initial = StateInstance::builder()
        .with_field(
            "raw_intake",
            json!([
                {"patient_id": "p-100", "symptoms": ["chest pain", "nausea"]},
                {"patient_id": "p-101", "symptoms": ["headache"]},
                {"patient_id": "p-102", "symptoms": ["shortness of breath"]},
                {"symptoms": ["cough"]},
            ]),
        )
        .build();

    let output = executor.run(&graph, initial).await?;
    println!("urgent summary  : {}", output.get("urgent_summary").unwrap_or(&json!(null)));
    println!("pattern report  : {}", output.get("pattern_report").unwrap_or(&json!(null)));
    println!("processed tags  : {}", output.get("processed_patients").unwrap_or(&json!([])));
    Ok(())
}
