//! TOML rubric parser.
//!
//! Loads a test graph from a rubric file and validates it. Nodes are declared
//! as a flat `[[nodes]]` list and refer to each other by name, so a node may
//! use an operand declared further down the file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::checker::{ExactChecker, ExternalChecker, WordChecker};
use crate::node::{AnswerOnlyTest, NodeId, NodeKind, Op, ProgramTest, TestGraph};
use crate::traits::Checker;

/// Intermediate TOML structure for parsing rubric files.
#[derive(Debug, Deserialize)]
struct TomlRubricFile {
    rubric: TomlRubricHeader,
    #[serde(default)]
    nodes: Vec<TomlNode>,
}

#[derive(Debug, Deserialize)]
struct TomlRubricHeader {
    name: String,
    root: String,
    #[serde(default = "default_time_limit")]
    time_limit_secs: f64,
}

fn default_time_limit() -> f64 {
    crate::node::DEFAULT_TIME_LIMIT.as_secs_f64()
}

#[derive(Debug, Deserialize)]
struct TomlNode {
    name: String,
    kind: String,
    #[serde(default)]
    operands: Vec<TomlOperand>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    equals: Option<serde_json::Value>,
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    checker: Option<TomlChecker>,
    #[serde(default)]
    input: Option<PathBuf>,
    #[serde(default)]
    solution: Option<PathBuf>,
    #[serde(default)]
    time_limit_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlOperand {
    Name(String),
    Value(f64),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlChecker {
    Named(String),
    External { external: PathBuf },
}

/// A parsed rubric: a test graph and its root.
#[derive(Debug, Clone)]
pub struct Rubric {
    pub name: String,
    pub graph: TestGraph,
    pub root: NodeId,
    /// Default time limit applied to program tests.
    pub time_limit: Duration,
    /// Scripts used by external checkers, resolved to absolute paths.
    pub external_checkers: Vec<PathBuf>,
}

/// Parse a rubric file. Artifact paths are resolved against the file's
/// directory.
pub fn parse_rubric(path: &Path) -> Result<Rubric> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rubric file: {}", path.display()))?;

    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    parse_rubric_str(&content, base_dir)
        .with_context(|| format!("invalid rubric: {}", path.display()))
}

/// Parse a rubric from a string, resolving artifact paths against `base_dir`.
pub fn parse_rubric_str(content: &str, base_dir: &Path) -> Result<Rubric> {
    let parsed: TomlRubricFile = toml::from_str(content).context("failed to parse TOML")?;
    let base_dir = std::fs::canonicalize(base_dir)
        .with_context(|| format!("failed to resolve directory: {}", base_dir.display()))?;

    let time_limit = seconds(parsed.rubric.time_limit_secs)
        .context("invalid rubric.time_limit_secs")?;

    let mut builder = Builder {
        graph: TestGraph::new(),
        names: HashMap::new(),
        base_dir,
        time_limit,
        external_checkers: Vec::new(),
    };

    // Reserve every named slot first so operands can refer forward.
    for node in &parsed.nodes {
        if builder.names.contains_key(&node.name) {
            anyhow::bail!("duplicate node name: '{}'", node.name);
        }
        let id = builder.graph.reserve();
        builder.graph.set_name(id, node.name.clone())?;
        builder.names.insert(node.name.clone(), id);
    }

    for node in parsed.nodes {
        let id = builder.names[&node.name];
        let name = node.name.clone();
        let kind = builder
            .build(node)
            .with_context(|| format!("in node '{name}'"))?;
        builder.graph.define(id, kind)?;
    }

    let root = *builder
        .names
        .get(&parsed.rubric.root)
        .with_context(|| format!("root node '{}' is not declared", parsed.rubric.root))?;

    Ok(Rubric {
        name: parsed.rubric.name,
        graph: builder.graph,
        root,
        time_limit,
        external_checkers: builder.external_checkers,
    })
}

struct Builder {
    graph: TestGraph,
    names: HashMap<String, NodeId>,
    base_dir: PathBuf,
    time_limit: Duration,
    external_checkers: Vec<PathBuf>,
}

impl Builder {
    fn build(&mut self, node: TomlNode) -> Result<NodeKind> {
        let kind = match node.kind.as_str() {
            "constant" => NodeKind::Constant(require(node.score, "score")?),
            "sum" => self.operator(Op::Sum, &node.operands)?,
            "max" => self.operator(Op::Max, &node.operands)?,
            "min" => self.operator(Op::Min, &node.operands)?,
            "add" => self.operator(Op::Add, &node.operands)?,
            "sub" => self.operator(Op::Sub, &node.operands)?,
            "mul" => self.operator(Op::Mul, &node.operands)?,
            "div" => self.operator(Op::Div, &node.operands)?,
            "rem" => self.operator(Op::Rem, &node.operands)?,
            "pow" => self.operator(Op::Pow, &node.operands)?,
            "neg" => self.operator(Op::Neg, &node.operands)?,
            "abs" => self.operator(Op::Abs, &node.operands)?,
            "if" => {
                let [cond, then, otherwise] = node.operands.as_slice() else {
                    anyhow::bail!(
                        "`if` takes 3 operands (condition, then, else), got {}",
                        node.operands.len()
                    );
                };
                NodeKind::TernaryIf {
                    cond: self.resolve(cond)?,
                    then: self.resolve(then)?,
                    otherwise: self.resolve(otherwise)?,
                }
            }
            "chains" => self.chains(&node.operands)?,
            "lottery" => NodeKind::Lottery {
                full_score: require(node.score, "score")?,
                threshold: require(node.threshold, "threshold")?,
            },
            "answer" => NodeKind::AnswerOnlyTest(AnswerOnlyTest::equals(
                require(node.score, "score")?,
                require(node.key, "key")?,
                require(node.equals, "equals")?,
            )),
            "program" => {
                let checker = self.checker(node.checker)?;
                let input = self.base_dir.join(require(node.input, "input")?);
                let solution = self.base_dir.join(require(node.solution, "solution")?);
                let time_limit = match node.time_limit_secs {
                    Some(secs) => seconds(secs).context("invalid time_limit_secs")?,
                    None => self.time_limit,
                };
                let test = ProgramTest::new(
                    require(node.score, "score")?,
                    require(node.program, "program")?,
                    checker,
                    input,
                    solution,
                )?
                .with_time_limit(time_limit);
                NodeKind::ProgramTest(test)
            }
            other => anyhow::bail!("unknown node kind: '{other}'"),
        };
        Ok(kind)
    }

    fn operator(&mut self, op: Op, operands: &[TomlOperand]) -> Result<NodeKind> {
        op.check_arity(operands.len())?;
        let operands = operands
            .iter()
            .map(|o| self.resolve(o))
            .collect::<Result<Vec<_>>>()?;
        Ok(NodeKind::Operator { op, operands })
    }

    /// The outermost link of a chain, with the remainder built as helper nodes.
    fn chains(&mut self, operands: &[TomlOperand]) -> Result<NodeKind> {
        let links = operands
            .iter()
            .map(|o| self.resolve(o))
            .collect::<Result<Vec<_>>>()?;
        match links.as_slice() {
            [] => anyhow::bail!("`chains` needs at least one operand"),
            [only] => Ok(NodeKind::Operator {
                op: Op::Sum,
                operands: vec![*only],
            }),
            [first, rest @ ..] => {
                let tail = self.graph.chains(rest.iter().copied())?;
                let both = self.graph.add(*first, tail)?;
                let zero = self.graph.constant(0.0);
                Ok(NodeKind::TernaryIf {
                    cond: *first,
                    then: both,
                    otherwise: zero,
                })
            }
        }
    }

    fn resolve(&mut self, operand: &TomlOperand) -> Result<NodeId> {
        match operand {
            TomlOperand::Name(name) => self
                .names
                .get(name)
                .copied()
                .with_context(|| format!("unknown node name: '{name}'")),
            TomlOperand::Value(value) => Ok(self.graph.constant(*value)),
        }
    }

    fn checker(&mut self, checker: Option<TomlChecker>) -> Result<Arc<dyn Checker>> {
        let checker: Arc<dyn Checker> = match checker {
            None => Arc::new(WordChecker),
            Some(TomlChecker::Named(name)) => match name.as_str() {
                "word" => Arc::new(WordChecker),
                "exact" => Arc::new(ExactChecker),
                other => anyhow::bail!("unknown checker: '{other}'"),
            },
            Some(TomlChecker::External { external }) => {
                let script = self.base_dir.join(external);
                let checker = ExternalChecker::new(&script)?;
                self.external_checkers.push(script);
                Arc::new(checker)
            }
        };
        Ok(checker)
    }
}

fn require<T>(value: Option<T>, field: &str) -> Result<T> {
    value.with_context(|| format!("missing field `{field}`"))
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow::anyhow!("{secs}: {e}"))
}

/// A warning from rubric validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The node name (if applicable).
    pub node: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Validate a rubric for common issues.
pub fn validate_rubric(rubric: &Rubric) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let graph = &rubric.graph;

    // Named nodes the root never reaches are never graded.
    let mut reachable = HashSet::new();
    let mut stack = vec![rubric.root];
    while let Some(id) = stack.pop() {
        if reachable.insert(id) {
            if let Ok(kind) = graph.kind(id) {
                stack.extend(kind.dependencies());
            }
        }
    }
    for id in graph.ids() {
        if let Some(name) = graph.name(id) {
            if !reachable.contains(&id) {
                warnings.push(ValidationWarning {
                    node: Some(name.to_string()),
                    message: "node is not reachable from the root".into(),
                });
            }
        }
    }

    for id in graph.ids() {
        let full_score = match graph.kind(id) {
            Ok(NodeKind::Lottery { full_score, .. }) => *full_score,
            Ok(NodeKind::AnswerOnlyTest(test)) => test.full_score,
            Ok(NodeKind::ProgramTest(test)) => test.full_score(),
            _ => continue,
        };
        if full_score == 0.0 {
            warnings.push(ValidationWarning {
                node: graph.name(id).map(str::to_string),
                message: "test has a full score of zero".into(),
            });
        }
    }

    #[cfg(unix)]
    for script in &rubric.external_checkers {
        use std::os::unix::fs::PermissionsExt;

        let executable = std::fs::metadata(script)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        if !executable {
            warnings.push(ValidationWarning {
                node: None,
                message: format!("checker script is not executable: {}", script.display()),
            });
        }
    }

    warnings
}
