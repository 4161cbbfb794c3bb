//! Test graph data model.
//!
//! A rubric is a directed acyclic graph of nodes stored in a [`TestGraph`]
//! arena. Nodes are immutable once defined and are referred to by [`NodeId`],
//! so one node can feed several parents and still be evaluated only once per
//! run. Composition helpers live in [`crate::compose`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::traits::Checker;

/// Default wall-clock limit for a single program run.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60);

/// Identity of a node inside one [`TestGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in its graph's arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reduction applied by an operator node to its operand scores.
pub type ScoreFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Predicate deciding whether an external answer is accepted.
pub type AnswerPredicate = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// The function carried by an operator node.
#[derive(Clone)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Neg,
    Abs,
    Sum,
    Max,
    Min,
    /// A caller-supplied reduction.
    Custom { name: String, func: ScoreFn },
}

/// How many operands an [`Op`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Op {
    /// Operator name as used in rubrics and reports.
    pub fn name(&self) -> &str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Rem => "rem",
            Op::Pow => "pow",
            Op::Neg => "neg",
            Op::Abs => "abs",
            Op::Sum => "sum",
            Op::Max => "max",
            Op::Min => "min",
            Op::Custom { name, .. } => name,
        }
    }

    /// Operand count this operator accepts.
    pub fn arity(&self) -> Arity {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem | Op::Pow => Arity::Exactly(2),
            Op::Neg | Op::Abs => Arity::Exactly(1),
            Op::Sum | Op::Max | Op::Min => Arity::AtLeast(1),
            Op::Custom { .. } => Arity::AtLeast(0),
        }
    }

    /// Check an operand count against this operator's arity.
    pub(crate) fn check_arity(&self, actual: usize) -> Result<(), EvalError> {
        match self.arity() {
            Arity::Exactly(expected) if expected != actual => Err(EvalError::Arity {
                op: self.name().to_string(),
                expected,
                actual,
            }),
            Arity::AtLeast(min) if actual < min => Err(EvalError::EmptyOperands {
                op: self.name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Combine resolved operand scores.
    ///
    /// A slice of the wrong length, division by zero and a NaN result are
    /// reported as error messages.
    pub fn apply(&self, scores: &[f64]) -> Result<f64, String> {
        self.check_arity(scores.len()).map_err(|e| e.to_string())?;
        let value = match self {
            Op::Add => scores[0] + scores[1],
            Op::Sub => scores[0] - scores[1],
            Op::Mul => scores[0] * scores[1],
            Op::Div | Op::Rem if scores[1] == 0.0 => {
                return Err(format!("{} by zero", self.name()));
            }
            Op::Div => scores[0] / scores[1],
            Op::Rem => scores[0] % scores[1],
            Op::Pow => scores[0].powf(scores[1]),
            Op::Neg => -scores[0],
            Op::Abs => scores[0].abs(),
            Op::Sum => scores.iter().sum(),
            Op::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Op::Min => scores.iter().copied().fold(f64::INFINITY, f64::min),
            Op::Custom { func, .. } => func(scores),
        };
        if value.is_nan() {
            return Err(format!("`{}` produced NaN", self.name()));
        }
        Ok(value)
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A test whose outcome depends only on an answer in the data map.
#[derive(Clone)]
pub struct AnswerOnlyTest {
    pub full_score: f64,
    pub answer_key: String,
    pub predicate: AnswerPredicate,
}

impl AnswerOnlyTest {
    pub fn new(
        full_score: f64,
        answer_key: impl Into<String>,
        predicate: impl Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            full_score,
            answer_key: answer_key.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Accept exactly one expected value.
    pub fn equals(
        full_score: f64,
        answer_key: impl Into<String>,
        expected: serde_json::Value,
    ) -> Self {
        Self::new(full_score, answer_key, move |answer| *answer == expected)
    }
}

impl fmt::Debug for AnswerOnlyTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerOnlyTest")
            .field("full_score", &self.full_score)
            .field("answer_key", &self.answer_key)
            .finish_non_exhaustive()
    }
}

/// A test that runs a candidate program against a fixed input and checks
/// its output against a fixed solution.
#[derive(Clone)]
pub struct ProgramTest {
    full_score: f64,
    program_key: String,
    checker: Arc<dyn Checker>,
    input: PathBuf,
    solution: PathBuf,
    time_limit: Duration,
}

impl ProgramTest {
    /// Create a program test. Both artifacts must be absolute paths to
    /// existing files.
    pub fn new(
        full_score: f64,
        program_key: impl Into<String>,
        checker: Arc<dyn Checker>,
        input: impl Into<PathBuf>,
        solution: impl Into<PathBuf>,
    ) -> Result<Self, EvalError> {
        let input = validate_artifact(input.into())?;
        let solution = validate_artifact(solution.into())?;
        Ok(Self {
            full_score,
            program_key: program_key.into(),
            checker,
            input,
            solution,
            time_limit: DEFAULT_TIME_LIMIT,
        })
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn full_score(&self) -> f64 {
        self.full_score
    }

    pub fn program_key(&self) -> &str {
        &self.program_key
    }

    pub fn checker(&self) -> &Arc<dyn Checker> {
        &self.checker
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn solution(&self) -> &Path {
        &self.solution
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }
}

impl fmt::Debug for ProgramTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramTest")
            .field("full_score", &self.full_score)
            .field("program_key", &self.program_key)
            .field("checker", &self.checker.name())
            .field("input", &self.input)
            .field("solution", &self.solution)
            .field("time_limit", &self.time_limit)
            .finish()
    }
}

fn validate_artifact(path: PathBuf) -> Result<PathBuf, EvalError> {
    if !path.is_absolute() {
        return Err(EvalError::RelativeArtifact(path));
    }
    if !path.is_file() {
        return Err(EvalError::ArtifactNotFound(path));
    }
    Ok(path)
}

/// The closed set of node variants.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant(f64),
    Operator { op: Op, operands: Vec<NodeId> },
    TernaryIf {
        cond: NodeId,
        then: NodeId,
        otherwise: NodeId,
    },
    Lottery { full_score: f64, threshold: f64 },
    AnswerOnlyTest(AnswerOnlyTest),
    ProgramTest(ProgramTest),
}

impl NodeKind {
    /// Nodes that must be evaluated before this one, in declaration order.
    pub fn dependencies(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Operator { operands, .. } => operands.clone(),
            NodeKind::TernaryIf {
                cond,
                then,
                otherwise,
            } => vec![*cond, *then, *otherwise],
            NodeKind::Constant(_)
            | NodeKind::Lottery { .. }
            | NodeKind::AnswerOnlyTest(_)
            | NodeKind::ProgramTest(_) => Vec::new(),
        }
    }

    /// Short name of the variant, used in reports.
    pub fn label(&self) -> &str {
        match self {
            NodeKind::Constant(_) => "constant",
            NodeKind::Operator { op, .. } => op.name(),
            NodeKind::TernaryIf { .. } => "if",
            NodeKind::Lottery { .. } => "lottery",
            NodeKind::AnswerOnlyTest(_) => "answer",
            NodeKind::ProgramTest(_) => "program",
        }
    }

    /// Whether this node is a leaf test (as opposed to a composition).
    pub fn is_test(&self) -> bool {
        matches!(
            self,
            NodeKind::Lottery { .. } | NodeKind::AnswerOnlyTest(_) | NodeKind::ProgramTest(_)
        )
    }
}

/// A defined node: its variant and an optional human-readable name.
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    name: Option<String>,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Arena holding every node of a rubric.
///
/// Slots can be reserved before they are defined, which lets a rubric refer
/// to a node before declaring it. A reserved slot that is never defined is an
/// error at evaluation time.
#[derive(Debug, Clone, Default)]
pub struct TestGraph {
    slots: Vec<Slot>,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    kind: Option<NodeKind>,
    name: Option<String>,
}

impl TestGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, defined or reserved.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.slots.len()).map(NodeId)
    }

    /// Insert a fully defined node.
    pub fn insert(&mut self, kind: NodeKind) -> Result<NodeId, EvalError> {
        self.check_dependencies(&kind)?;
        Ok(self.push(kind))
    }

    /// Insert a node whose dependencies are already known to be valid.
    pub(crate) fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            kind: Some(kind),
            name: None,
        });
        id
    }

    /// Reserve a slot to be defined later with [`TestGraph::define`].
    pub fn reserve(&mut self) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot::default());
        id
    }

    /// Give a reserved slot its definition.
    pub fn define(&mut self, id: NodeId, kind: NodeKind) -> Result<(), EvalError> {
        self.check_dependencies(&kind)?;
        let description = self.describe(id);
        let slot = self
            .slots
            .get_mut(id.0)
            .ok_or(EvalError::UnknownNode(id))?;
        if slot.kind.is_some() {
            return Err(EvalError::AlreadyDefined { node: description });
        }
        slot.kind = Some(kind);
        Ok(())
    }

    /// Attach a human-readable name to a node.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), EvalError> {
        let slot = self
            .slots
            .get_mut(id.0)
            .ok_or(EvalError::UnknownNode(id))?;
        slot.name = Some(name.into());
        Ok(())
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Result<Node, EvalError> {
        let slot = self.slots.get(id.0).ok_or(EvalError::UnknownNode(id))?;
        let kind = slot.kind.clone().ok_or_else(|| EvalError::UndefinedNode {
            node: self.describe(id),
        })?;
        Ok(Node {
            kind,
            name: slot.name.clone(),
        })
    }

    /// Borrow a node's variant.
    pub fn kind(&self, id: NodeId) -> Result<&NodeKind, EvalError> {
        let slot = self.slots.get(id.0).ok_or(EvalError::UnknownNode(id))?;
        slot.kind.as_ref().ok_or_else(|| EvalError::UndefinedNode {
            node: self.describe(id),
        })
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.slots.get(id.0).and_then(|s| s.name.as_deref())
    }

    /// Find a node by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.slots
            .iter()
            .position(|s| s.name.as_deref() == Some(name))
            .map(NodeId)
    }

    /// `#3` or `#3 (part-b)` when the node is named.
    pub fn describe(&self, id: NodeId) -> String {
        match self.name(id) {
            Some(name) => format!("{id} ({name})"),
            None => id.to_string(),
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        id.0 < self.slots.len()
    }

    fn check_dependencies(&self, kind: &NodeKind) -> Result<(), EvalError> {
        if let NodeKind::Operator { op, operands } = kind {
            op.check_arity(operands.len())?;
        }
        match kind.dependencies().into_iter().find(|dep| !self.contains(*dep)) {
            Some(dep) => Err(EvalError::UnknownNode(dep)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        let mut graph = TestGraph::new();
        let id = graph.insert(NodeKind::Constant(1.0)).unwrap();
        assert_eq!(id.to_string(), "#0");
        graph.set_name(id, "one").unwrap();
        assert_eq!(graph.describe(id), "#0 (one)");
        assert_eq!(graph.find("one"), Some(id));
    }

    #[test]
    fn reserved_slot_is_undefined_until_defined() {
        let mut graph = TestGraph::new();
        let slot = graph.reserve();
        assert!(matches!(
            graph.kind(slot),
            Err(EvalError::UndefinedNode { .. })
        ));
        graph.define(slot, NodeKind::Constant(2.0)).unwrap();
        assert!(matches!(graph.kind(slot), Ok(NodeKind::Constant(v)) if *v == 2.0));
        assert!(matches!(
            graph.define(slot, NodeKind::Constant(3.0)),
            Err(EvalError::AlreadyDefined { .. })
        ));
    }

    #[test]
    fn rejects_foreign_operands() {
        let mut other = TestGraph::new();
        other.insert(NodeKind::Constant(0.0)).unwrap();
        let foreign = other.insert(NodeKind::Constant(1.0)).unwrap();

        let mut graph = TestGraph::new();
        let result = graph.insert(NodeKind::Operator {
            op: Op::Neg,
            operands: vec![foreign],
        });
        assert!(matches!(result, Err(EvalError::UnknownNode(id)) if id == foreign));
    }

    #[test]
    fn op_apply() {
        assert_eq!(Op::Sum.apply(&[5.0, 7.0]).unwrap(), 12.0);
        assert_eq!(Op::Max.apply(&[3.0, 9.0, 1.0]).unwrap(), 9.0);
        assert_eq!(Op::Min.apply(&[3.0, 9.0, 1.0]).unwrap(), 1.0);
        assert_eq!(Op::Pow.apply(&[2.0, 3.0]).unwrap(), 8.0);
        assert_eq!(Op::Neg.apply(&[4.0]).unwrap(), -4.0);
        assert!(Op::Div.apply(&[1.0, 0.0]).is_err());
        assert!(Op::Rem.apply(&[1.0, 0.0]).is_err());
    }

    #[test]
    fn op_arity() {
        assert!(Op::Add.check_arity(2).is_ok());
        assert!(matches!(
            Op::Add.check_arity(3),
            Err(EvalError::Arity { expected: 2, actual: 3, .. })
        ));
        assert!(matches!(
            Op::Sum.check_arity(0),
            Err(EvalError::EmptyOperands { .. })
        ));
    }

    #[test]
    fn program_test_validates_artifacts() {
        use crate::checker::ExactChecker;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("1.in");
        let solution = dir.path().join("1.sol");
        std::fs::write(&input, "1\n").unwrap();
        std::fs::write(&solution, "2\n").unwrap();
        let checker: Arc<dyn Checker> = Arc::new(ExactChecker);

        let test = ProgramTest::new(10.0, "prog", checker.clone(), &input, &solution).unwrap();
        assert_eq!(test.time_limit(), DEFAULT_TIME_LIMIT);

        let missing = ProgramTest::new(
            10.0,
            "prog",
            checker.clone(),
            dir.path().join("2.in"),
            &solution,
        );
        assert!(matches!(missing, Err(EvalError::ArtifactNotFound(_))));

        let relative = ProgramTest::new(10.0, "prog", checker, "1.in", &solution);
        assert!(matches!(relative, Err(EvalError::RelativeArtifact(_))));
    }

    #[test]
    fn insert_checks_operator_arity() {
        let mut graph = TestGraph::new();
        let empty_sum = graph.insert(NodeKind::Operator {
            op: Op::Sum,
            operands: vec![],
        });
        assert!(matches!(empty_sum, Err(EvalError::EmptyOperands { .. })));

        let one = graph.insert(NodeKind::Constant(1.0)).unwrap();
        let lone_add = graph.insert(NodeKind::Operator {
            op: Op::Add,
            operands: vec![one],
        });
        assert!(matches!(
            lone_add,
            Err(EvalError::Arity {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn define_checks_operator_arity() {
        let mut graph = TestGraph::new();
        let slot = graph.reserve();
        let empty_max = graph.define(
            slot,
            NodeKind::Operator {
                op: Op::Max,
                operands: vec![],
            },
        );
        assert!(matches!(empty_max, Err(EvalError::EmptyOperands { .. })));
        assert!(matches!(
            graph.kind(slot),
            Err(EvalError::UndefinedNode { .. })
        ));
    }

    #[test]
    fn apply_rejects_wrong_operand_count() {
        assert!(Op::Add.apply(&[1.0]).is_err());
        assert!(Op::Neg.apply(&[]).is_err());
        assert!(Op::Sum.apply(&[]).is_err());
        assert_eq!(Op::Add.apply(&[1.0, 2.0]), Ok(3.0));
    }
}
