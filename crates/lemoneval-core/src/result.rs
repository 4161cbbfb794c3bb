//! Per-node outcomes and the result of one evaluation run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::DataMap;
use crate::node::{NodeId, TestGraph};

/// Message key for a missing program or answer.
pub const LOOKUP_ERROR: &str = "lookup_error";
/// Message key for a program that crashed, failed or timed out.
pub const RUNTIME_ERROR: &str = "runtime_error";
/// Message key for the random sample drawn by a lottery node.
pub const SAMPLE: &str = "sample";
/// Message key for the checker's diagnostic text.
pub const CHECKER: &str = "checker";
/// Message key for the branch taken by a ternary node.
pub const BRANCH: &str = "branch";

/// Outcome of evaluating one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,
    pub score: f64,
    /// Ordered diagnostics keyed by kind.
    #[serde(default)]
    pub messages: IndexMap<String, String>,
}

impl NodeResult {
    pub fn new(success: bool, score: f64) -> Self {
        Self {
            success,
            score,
            messages: IndexMap::new(),
        }
    }

    /// A zero-score failure carrying one diagnostic.
    pub fn failure(key: &str, message: impl Into<String>) -> Self {
        Self::new(false, 0.0).with_message(key, message)
    }

    pub fn with_message(mut self, key: &str, message: impl Into<String>) -> Self {
        self.messages.insert(key.to_string(), message.into());
        self
    }

    pub fn message(&self, key: &str) -> Option<&str> {
        self.messages.get(key).map(String::as_str)
    }

    /// `success` as the 0/1 flag used in reports.
    pub fn success_flag(&self) -> u8 {
        u8::from(self.success)
    }
}

/// The complete, read-only outcome of one evaluation run.
#[derive(Debug)]
pub struct GradingResult {
    pub(crate) run_id: Uuid,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) graph: Arc<TestGraph>,
    pub(crate) root: NodeId,
    pub(crate) data: Arc<DataMap>,
    pub(crate) results: HashMap<NodeId, NodeResult>,
    /// Nodes in the order they were evaluated.
    pub(crate) order: Vec<NodeId>,
    pub(crate) duration: Duration,
}

impl GradingResult {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn graph(&self) -> &TestGraph {
        &self.graph
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn data(&self) -> &DataMap {
        &self.data
    }

    /// Score of the root node.
    pub fn final_score(&self) -> f64 {
        self.root_result().score
    }

    pub fn root_result(&self) -> &NodeResult {
        // The root is always evaluated last, so it is always present.
        &self.results[&self.root]
    }

    /// Outcome of one node, or `None` if the node was not reachable from
    /// the root.
    pub fn get(&self, id: NodeId) -> Option<&NodeResult> {
        self.results.get(&id)
    }

    /// Outcome of the node with the given name.
    pub fn get_named(&self, name: &str) -> Option<&NodeResult> {
        self.graph.find(name).and_then(|id| self.get(id))
    }

    /// Evaluated nodes with their outcomes, in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeResult)> {
        self.order.iter().map(|id| (*id, &self.results[id]))
    }

    /// Number of evaluated nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}
