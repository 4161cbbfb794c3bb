//! Grading report types with JSON persistence and text rendering.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::NodeId;
use crate::result::GradingResult;

/// A complete grading report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingReport {
    /// Unique run identifier.
    pub id: Uuid,
    /// When the run started.
    pub created_at: DateTime<Utc>,
    /// Rubric name, if the graph came from a rubric file.
    #[serde(default)]
    pub rubric: Option<String>,
    pub root: NodeId,
    pub final_score: f64,
    pub success: bool,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Evaluated nodes in evaluation order.
    pub nodes: Vec<NodeReport>,
}

/// One evaluated node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    #[serde(default)]
    pub name: Option<String>,
    /// Variant label, e.g. "sum" or "program".
    pub kind: String,
    pub success: bool,
    pub score: f64,
    #[serde(default)]
    pub messages: IndexMap<String, String>,
    #[serde(default)]
    pub operands: Vec<NodeId>,
}

impl NodeReport {
    fn title(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} [{}]", self.kind),
            None => format!("{} [{}]", self.id, self.kind),
        }
    }
}

impl GradingReport {
    /// Build a report from a finished run.
    pub fn from_result(result: &GradingResult, rubric: Option<&str>) -> Self {
        let graph = result.graph();
        let nodes = result
            .iter()
            .map(|(id, outcome)| {
                let (kind, operands) = match graph.kind(id) {
                    Ok(kind) => (kind.label().to_string(), kind.dependencies()),
                    Err(_) => ("undefined".to_string(), Vec::new()),
                };
                NodeReport {
                    id,
                    name: graph.name(id).map(str::to_string),
                    kind,
                    success: outcome.success,
                    score: outcome.score,
                    messages: outcome.messages.clone(),
                    operands,
                }
            })
            .collect();

        let root = result.root_result();
        Self {
            id: result.run_id(),
            created_at: result.created_at(),
            rubric: rubric.map(str::to_string),
            root: result.root(),
            final_score: root.score,
            success: root.success,
            duration_ms: result.duration().as_millis() as u64,
            nodes,
        }
    }

    /// Entry for one node, if it was evaluated.
    pub fn node(&self, id: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Render the evaluated graph as an indented tree from the root.
    ///
    /// A node reached a second time through another parent is printed as a
    /// one-line reference instead of being expanded again.
    pub fn to_text(&self) -> String {
        let by_id: HashMap<NodeId, &NodeReport> = self.nodes.iter().map(|n| (n.id, n)).collect();
        let mut out = String::new();
        if let Some(name) = &self.rubric {
            let _ = writeln!(out, "Rubric: {name}");
        }
        let _ = writeln!(out, "Run:    {}", self.id);
        let _ = writeln!(
            out,
            "Score:  {} ({})",
            format_score(self.final_score),
            if self.success { "all passed" } else { "some failed" }
        );
        out.push('\n');

        let mut shown = HashSet::new();
        render(&by_id, self.root, 0, &mut shown, &mut out);
        out
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: GradingReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }
}

fn render(
    by_id: &HashMap<NodeId, &NodeReport>,
    id: NodeId,
    depth: usize,
    shown: &mut HashSet<NodeId>,
    out: &mut String,
) {
    let indent = "  ".repeat(depth);
    let Some(node) = by_id.get(&id) else {
        let _ = writeln!(out, "{indent}{id} (not evaluated)");
        return;
    };

    if !shown.insert(id) {
        let _ = writeln!(out, "{indent}{} -> see above", node.title());
        return;
    }

    let status = if node.success { "ok" } else { "FAIL" };
    let _ = write!(
        out,
        "{indent}{} {} {status}",
        node.title(),
        format_score(node.score)
    );
    for (key, message) in &node.messages {
        let _ = write!(out, "  {key}: {message}");
    }
    out.push('\n');

    for operand in &node.operands {
        render(by_id, *operand, depth + 1, shown, out);
    }
}

/// Scores without a trailing `.0` for whole numbers.
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{score:.0}")
    } else {
        format!("{score:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::data::DataMap;
    use crate::evaluator::{Evaluator, EvaluatorConfig};
    use crate::node::{AnswerOnlyTest, TestGraph};
    use crate::traits::NoProgramRunner;

    async fn sample() -> GradingReport {
        let mut graph = TestGraph::new();
        let q1 = graph.answer_test(AnswerOnlyTest::equals(3.0, "q1", "b".into()));
        graph.set_name(q1, "q1").unwrap();
        let q2 = graph.answer_test(AnswerOnlyTest::equals(4.0, "q2", "c".into()));
        let best = graph.max([q1, q2]).unwrap();
        graph.set_name(best, "best").unwrap();
        let root = graph.sum([best, q1]).unwrap();
        graph.set_name(root, "total").unwrap();

        let mut data = DataMap::new();
        data.insert_answer("q1", "b");

        let evaluator = Evaluator::new(Arc::new(NoProgramRunner), EvaluatorConfig::default());
        let result = evaluator
            .evaluate(Arc::new(graph), root, Arc::new(data))
            .await
            .unwrap();
        GradingReport::from_result(&result, Some("quiz"))
    }

    #[tokio::test]
    async fn report_from_result() {
        let report = sample().await;
        assert_eq!(report.final_score, 6.0);
        assert!(!report.success);
        assert_eq!(report.nodes.len(), 4);
        assert_eq!(report.nodes.last().unwrap().id, report.root);
        let root = report.node(report.root).unwrap();
        assert_eq!(root.kind, "sum");
        assert_eq!(root.name.as_deref(), Some("total"));
    }

    #[tokio::test]
    async fn text_tree_shows_shared_nodes_once() {
        let text = sample().await.to_text();
        assert!(text.contains("Rubric: quiz"));
        assert!(text.contains("Score:  6 (some failed)"));
        assert!(text.contains("total [sum] 6 FAIL"));
        assert!(text.contains("  best [max] 3 FAIL"));
        assert!(text.contains("lookup_error"));
        assert_eq!(text.matches("q1 [answer] 3 ok").count(), 1);
        assert!(text.contains("q1 [answer] -> see above"));
    }

    #[tokio::test]
    async fn json_round_trip() {
        let report = sample().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        report.save_json(&path).unwrap();

        let loaded = GradingReport::load_json(&path).unwrap();
        assert_eq!(loaded.id, report.id);
        assert_eq!(loaded.final_score, report.final_score);
        assert_eq!(loaded.nodes.len(), report.nodes.len());
    }

    #[test]
    fn score_formatting() {
        assert_eq!(format_score(12.0), "12");
        assert_eq!(format_score(-3.0), "-3");
        assert_eq!(format_score(7.5), "7.50");
    }
}
