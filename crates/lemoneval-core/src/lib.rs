//! lemoneval-core — Test graph model, evaluator, checkers and rubric loading.
//!
//! A grading policy is a [`TestGraph`](node::TestGraph) of leaf tests
//! (constants, lotteries, answer checks and program runs) combined by
//! operators. The [`Evaluator`](evaluator::Evaluator) scores a graph against a
//! [`DataMap`](data::DataMap) of candidate programs and answers, evaluating
//! each node once and recording every intermediate outcome in a
//! [`GradingResult`](result::GradingResult).

pub mod checker;
pub mod compose;
pub mod data;
pub mod error;
pub mod evaluator;
pub mod node;
pub mod parser;
pub mod report;
pub mod result;
pub mod traits;
