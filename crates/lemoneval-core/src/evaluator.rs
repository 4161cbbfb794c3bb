//! Test graph evaluator.
//!
//! Evaluation runs in two phases. The plan phase walks the graph depth-first
//! from the root with a three-state visit table, rejecting cycles and
//! undefined nodes before anything runs. The evaluation phase then runs every
//! reachable node exactly once, operands before parents, committing each
//! dependency level to the memo table before the next one starts. Nodes of the
//! same level do not depend on each other and run concurrently, bounded by
//! [`EvaluatorConfig::parallelism`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::data::DataMap;
use crate::error::EvalError;
use crate::node::{NodeId, NodeKind, TestGraph};
use crate::result::{GradingResult, NodeResult, BRANCH, LOOKUP_ERROR, SAMPLE};
use crate::traits::ProgramTestRunner;

/// Configuration for the evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Maximum number of independent nodes evaluated concurrently.
    /// With 1, nodes run strictly one after another in dependency order.
    pub parallelism: usize,
    /// Seed for lottery draws. `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            seed: None,
        }
    }
}

/// Evaluates test graphs against data snapshots.
///
/// An evaluator holds no per-run state; every call to
/// [`Evaluator::evaluate`] owns its own memo table, so one graph can be
/// graded against many data maps concurrently.
pub struct Evaluator {
    runner: Arc<dyn ProgramTestRunner>,
    config: EvaluatorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

impl Evaluator {
    pub fn new(runner: Arc<dyn ProgramTestRunner>, config: EvaluatorConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate the graph rooted at `root` against `data`.
    pub async fn evaluate(
        &self,
        graph: Arc<TestGraph>,
        root: NodeId,
        data: Arc<DataMap>,
    ) -> Result<GradingResult, EvalError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, "evaluating {} from root {}", graph.len(), graph.describe(root));

        let order = plan(&graph, root)?;
        let batches: Vec<Vec<NodeId>> = if self.config.parallelism <= 1 {
            order.iter().map(|id| vec![*id]).collect()
        } else {
            dependency_levels(&graph, &order)?
        };

        let mut results: HashMap<NodeId, NodeResult> = HashMap::with_capacity(order.len());
        for batch in batches {
            let done = {
                let memo = &results;
                stream::iter(batch)
                    .map(|id| {
                        let graph = &graph;
                        let data = &data;
                        async move {
                            let result = self.evaluate_node(graph, id, data, memo).await?;
                            Ok::<_, EvalError>((id, result))
                        }
                    })
                    .buffered(self.config.parallelism.max(1))
                    .try_collect::<Vec<_>>()
                    .await?
            };
            results.extend(done);
        }

        let duration = start.elapsed();
        let result = GradingResult {
            run_id,
            created_at: chrono::Utc::now(),
            graph,
            root,
            data,
            results,
            order,
            duration,
        };
        tracing::info!(
            %run_id,
            "final score {} ({} nodes, {}ms)",
            result.final_score(),
            result.len(),
            duration.as_millis()
        );
        Ok(result)
    }

    /// Evaluate one node whose operands are already in `memo`.
    async fn evaluate_node(
        &self,
        graph: &TestGraph,
        id: NodeId,
        data: &DataMap,
        memo: &HashMap<NodeId, NodeResult>,
    ) -> Result<NodeResult, EvalError> {
        let result = match graph.kind(id)? {
            NodeKind::Constant(value) => NodeResult::new(true, *value),

            NodeKind::Operator { op, operands } => {
                let resolved = operands
                    .iter()
                    .map(|dep| operand(graph, memo, *dep))
                    .collect::<Result<Vec<_>, _>>()?;
                let scores: Vec<f64> = resolved.iter().map(|r| r.score).collect();
                let score = op.apply(&scores).map_err(|message| EvalError::Arithmetic {
                    node: graph.describe(id),
                    message,
                })?;
                NodeResult::new(resolved.iter().all(|r| r.success), score)
            }

            NodeKind::TernaryIf {
                cond,
                then,
                otherwise,
            } => {
                let (branch, name) = if operand(graph, memo, *cond)?.score != 0.0 {
                    (*then, "then")
                } else {
                    (*otherwise, "else")
                };
                let chosen = operand(graph, memo, branch)?;
                NodeResult::new(chosen.success, chosen.score).with_message(BRANCH, name)
            }

            NodeKind::Lottery {
                full_score,
                threshold,
            } => {
                let sample: f64 = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(node_seed(seed, id)).random(),
                    None => rand::rng().random(),
                };
                let won = sample < *threshold;
                let score = if won { *full_score } else { 0.0 };
                NodeResult::new(won, score).with_message(SAMPLE, sample.to_string())
            }

            NodeKind::AnswerOnlyTest(test) => match data.answer(&test.answer_key) {
                Some(answer) => {
                    let accepted = (test.predicate)(answer);
                    let score = if accepted { test.full_score } else { 0.0 };
                    NodeResult::new(accepted, score)
                }
                None => {
                    tracing::debug!("no answer for key '{}'", test.answer_key);
                    NodeResult::failure(
                        LOOKUP_ERROR,
                        format!("no answer for key '{}'", test.answer_key),
                    )
                }
            },

            NodeKind::ProgramTest(test) => self.runner.run_program_test(test, data).await?,
        };

        if !result.success {
            tracing::debug!(
                "node {} failed with score {}: {:?}",
                graph.describe(id),
                result.score,
                result.messages
            );
        }
        Ok(result)
    }
}

/// Depth-first post-order of the nodes reachable from `root`.
///
/// Fails on the first cycle or undefined node found. Uses an explicit stack
/// so long chains cannot overflow the call stack.
pub fn plan(graph: &TestGraph, root: NodeId) -> Result<Vec<NodeId>, EvalError> {
    struct Frame {
        id: NodeId,
        deps: Vec<NodeId>,
        next: usize,
    }

    let mut visits: HashMap<NodeId, Visit> = HashMap::new();
    let mut order = Vec::new();
    let mut stack = vec![Frame {
        id: root,
        deps: graph.kind(root)?.dependencies(),
        next: 0,
    }];
    visits.insert(root, Visit::InProgress);

    while let Some(frame) = stack.last_mut() {
        let Some(&dep) = frame.deps.get(frame.next) else {
            let id = frame.id;
            stack.pop();
            visits.insert(id, Visit::Done);
            order.push(id);
            continue;
        };
        frame.next += 1;

        match visits.get(&dep) {
            Some(Visit::Done) => {}
            Some(Visit::InProgress) => {
                return Err(EvalError::Cycle {
                    node: graph.describe(dep),
                });
            }
            None => {
                let deps = graph.kind(dep)?.dependencies();
                visits.insert(dep, Visit::InProgress);
                stack.push(Frame { id: dep, deps, next: 0 });
            }
        }
    }

    Ok(order)
}

/// Group a post-order into levels of mutually independent nodes.
fn dependency_levels(graph: &TestGraph, order: &[NodeId]) -> Result<Vec<Vec<NodeId>>, EvalError> {
    let mut level_of: HashMap<NodeId, usize> = HashMap::with_capacity(order.len());
    let mut levels: Vec<Vec<NodeId>> = Vec::new();

    for &id in order {
        let level = graph
            .kind(id)?
            .dependencies()
            .iter()
            .filter_map(|dep| level_of.get(dep))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(id);
    }

    Ok(levels)
}

fn operand<'a>(
    graph: &TestGraph,
    memo: &'a HashMap<NodeId, NodeResult>,
    id: NodeId,
) -> Result<&'a NodeResult, EvalError> {
    memo.get(&id).ok_or_else(|| EvalError::UndefinedNode {
        node: graph.describe(id),
    })
}

fn node_seed(seed: u64, id: NodeId) -> u64 {
    seed ^ (id.index() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
