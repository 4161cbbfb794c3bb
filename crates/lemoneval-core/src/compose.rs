//! Builders composing nodes into grading policy.
//!
//! Numeric literals passed as operands are wrapped into constant nodes, so
//! `graph.add(a, 5)` and `graph.sum([a.into(), b.into(), 1.0.into()])` work
//! without creating the constants by hand.

use std::sync::Arc;

use crate::error::EvalError;
use crate::node::{AnswerOnlyTest, NodeId, NodeKind, Op, ProgramTest, TestGraph};

/// An operand: an existing node or a literal score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Node(NodeId),
    Value(f64),
}

impl From<NodeId> for Operand {
    fn from(id: NodeId) -> Self {
        Operand::Node(id)
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Value(value)
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Value(f64::from(value))
    }
}

impl From<u32> for Operand {
    fn from(value: u32) -> Self {
        Operand::Value(f64::from(value))
    }
}

impl TestGraph {
    /// A node always scoring `value`.
    pub fn constant(&mut self, value: f64) -> NodeId {
        // Constants have no dependencies, so adding one cannot fail.
        self.push(NodeKind::Constant(value))
    }

    /// Resolve an operand to a node, wrapping literals as constants.
    pub fn operand(&mut self, operand: impl Into<Operand>) -> Result<NodeId, EvalError> {
        match operand.into() {
            Operand::Node(id) if self.contains(id) => Ok(id),
            Operand::Node(id) => Err(EvalError::UnknownNode(id)),
            Operand::Value(value) => Ok(self.constant(value)),
        }
    }

    /// An operator node applying `op` to `operands` in order.
    pub fn operator<I>(&mut self, op: Op, operands: I) -> Result<NodeId, EvalError>
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        let operands: Vec<Operand> = operands.into_iter().map(Into::into).collect();
        op.check_arity(operands.len())?;
        let operands = operands
            .into_iter()
            .map(|o| self.operand(o))
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(NodeKind::Operator { op, operands })
    }

    /// An operator node with a caller-supplied reduction.
    pub fn custom<I>(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
        operands: I,
    ) -> Result<NodeId, EvalError>
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        let op = Op::Custom {
            name: name.into(),
            func: Arc::new(func),
        };
        self.operator(op, operands)
    }

    /// `a + b`.
    pub fn add(
        &mut self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<NodeId, EvalError> {
        self.operator(Op::Add, [a.into(), b.into()])
    }

    /// `a - b`.
    pub fn sub(
        &mut self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<NodeId, EvalError> {
        self.operator(Op::Sub, [a.into(), b.into()])
    }

    /// `a * b`.
    pub fn mul(
        &mut self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<NodeId, EvalError> {
        self.operator(Op::Mul, [a.into(), b.into()])
    }

    /// `a / b`. Division by zero fails the node at evaluation time.
    pub fn div(
        &mut self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<NodeId, EvalError> {
        self.operator(Op::Div, [a.into(), b.into()])
    }

    /// `a % b`. A zero divisor fails the node at evaluation time.
    pub fn rem(
        &mut self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<NodeId, EvalError> {
        self.operator(Op::Rem, [a.into(), b.into()])
    }

    /// `a` raised to the power `b`.
    pub fn pow(
        &mut self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Result<NodeId, EvalError> {
        self.operator(Op::Pow, [a.into(), b.into()])
    }

    /// Negated score of `a`.
    pub fn neg(&mut self, a: impl Into<Operand>) -> Result<NodeId, EvalError> {
        self.operator(Op::Neg, [a.into()])
    }

    /// Absolute score of `a`.
    pub fn abs(&mut self, a: impl Into<Operand>) -> Result<NodeId, EvalError> {
        self.operator(Op::Abs, [a.into()])
    }

    /// Sum of all operands. Fails on an empty list.
    pub fn sum<I>(&mut self, operands: I) -> Result<NodeId, EvalError>
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        self.operator(Op::Sum, operands)
    }

    /// Largest operand score. Fails on an empty list.
    pub fn max<I>(&mut self, operands: I) -> Result<NodeId, EvalError>
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        self.operator(Op::Max, operands)
    }

    /// Smallest operand score. Fails on an empty list.
    pub fn min<I>(&mut self, operands: I) -> Result<NodeId, EvalError>
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        self.operator(Op::Min, operands)
    }

    /// `then` if `cond` scores nonzero, `otherwise` if it scores zero.
    pub fn ternary_if(
        &mut self,
        cond: impl Into<Operand>,
        then: impl Into<Operand>,
        otherwise: impl Into<Operand>,
    ) -> Result<NodeId, EvalError> {
        let cond = self.operand(cond)?;
        let then = self.operand(then)?;
        let otherwise = self.operand(otherwise)?;
        self.insert(NodeKind::TernaryIf {
            cond,
            then,
            otherwise,
        })
    }

    /// Contingent chain: each link only contributes if every earlier link
    /// scored nonzero.
    ///
    /// `chains([a, b, c])` is `if a { a + (if b { b + c } else { 0 }) } else { 0 }`.
    /// Every link stays in the graph and is evaluated; only its contribution
    /// is dropped after the first zero.
    pub fn chains<I>(&mut self, links: I) -> Result<NodeId, EvalError>
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        let links = links
            .into_iter()
            .map(|l| self.operand(l))
            .collect::<Result<Vec<_>, _>>()?;
        let mut links = links.into_iter().rev();
        let mut tail = links.next().ok_or_else(|| EvalError::EmptyOperands {
            op: "chains".to_string(),
        })?;
        for link in links {
            let both = self.add(link, tail)?;
            let zero = self.constant(0.0);
            tail = self.ternary_if(link, both, zero)?;
        }
        Ok(tail)
    }

    /// A node scoring `full_score` with probability `threshold`.
    pub fn lottery(&mut self, full_score: f64, threshold: f64) -> NodeId {
        self.push(NodeKind::Lottery {
            full_score,
            threshold,
        })
    }

    pub fn answer_test(&mut self, test: AnswerOnlyTest) -> NodeId {
        self.push(NodeKind::AnswerOnlyTest(test))
    }

    pub fn program_test(&mut self, test: ProgramTest) -> NodeId {
        self.push(NodeKind::ProgramTest(test))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_become_constants() {
        let mut graph = TestGraph::new();
        let a = graph.constant(1.0);
        let total = graph.add(a, 5).unwrap();
        let NodeKind::Operator { operands, .. } = graph.kind(total).unwrap() else {
            panic!("expected operator");
        };
        assert_eq!(operands[0], a);
        assert!(matches!(graph.kind(operands[1]).unwrap(), NodeKind::Constant(v) if *v == 5.0));
    }

    #[test]
    fn empty_reductions_are_rejected() {
        let mut graph = TestGraph::new();
        let none: Vec<NodeId> = Vec::new();
        assert!(matches!(
            graph.sum(none.clone()),
            Err(EvalError::EmptyOperands { op }) if op == "sum"
        ));
        assert!(graph.max(none.clone()).is_err());
        assert!(graph.min(none.clone()).is_err());
        assert!(graph.chains(none).is_err());
    }

    #[test]
    fn chains_of_one_is_the_link() {
        let mut graph = TestGraph::new();
        let a = graph.constant(3.0);
        assert_eq!(graph.chains([a]).unwrap(), a);
    }

    #[test]
    fn chains_builds_ternary_cascade() {
        let mut graph = TestGraph::new();
        let a = graph.constant(1.0);
        let b = graph.constant(2.0);
        let c = graph.constant(3.0);
        let root = graph.chains([a, b, c]).unwrap();
        let NodeKind::TernaryIf { cond, .. } = graph.kind(root).unwrap() else {
            panic!("expected ternary");
        };
        assert_eq!(*cond, a);
    }

    #[test]
    fn unknown_operand_is_rejected() {
        let mut other = TestGraph::new();
        other.constant(0.0);
        other.constant(0.0);
        let foreign = other.constant(1.0);

        let mut graph = TestGraph::new();
        let result = graph.neg(foreign);
        assert!(matches!(result, Err(EvalError::UnknownNode(_))));
    }

    #[test]
    fn binary_arity_is_enforced() {
        let mut graph = TestGraph::new();
        let result = graph.operator(Op::Sub, [1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(EvalError::Arity { .. })));
    }
}
