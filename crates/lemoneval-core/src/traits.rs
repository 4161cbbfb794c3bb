//! Core trait definitions for checkers, candidate programs and program-test
//! runners.
//!
//! Checkers are implemented in [`crate::checker`]; programs and the
//! sandboxed runner live in the `lemoneval-runner` crate.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::DataMap;
use crate::error::EvalError;
use crate::node::ProgramTest;
use crate::result::NodeResult;

// ---------------------------------------------------------------------------
// Checker trait
// ---------------------------------------------------------------------------

/// Strategy comparing a produced output file against a reference solution.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Short name used in reports (e.g. "word").
    fn name(&self) -> &str;

    /// Compare `output` with `solution`.
    ///
    /// A wrong answer is an `Ok` outcome with `success == false`; `Err` means
    /// the checker itself could not reach a verdict.
    async fn check(
        &self,
        full_score: f64,
        input: &Path,
        output: &Path,
        solution: &Path,
    ) -> anyhow::Result<CheckOutcome>;
}

impl fmt::Debug for dyn Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checker({})", self.name())
    }
}

/// Verdict of a checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub success: bool,
    pub score: f64,
    /// Diagnostic text, e.g. the raw output of an external checker.
    #[serde(default)]
    pub message: Option<String>,
}

impl CheckOutcome {
    /// Full score on success, zero otherwise.
    pub fn from_match(matched: bool, full_score: f64) -> Self {
        if matched {
            Self {
                success: true,
                score: full_score,
                message: Some("correct".into()),
            }
        } else {
            Self {
                success: false,
                score: 0.0,
                message: Some("incorrect".into()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Program trait
// ---------------------------------------------------------------------------

/// A candidate program: reads the input file, writes the output file.
#[async_trait]
pub trait Program: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Run once against `input`, writing to `output`, within `time_limit`.
    async fn run(&self, input: &Path, output: &Path, time_limit: Duration)
        -> Result<(), RunFailure>;
}

/// Why a candidate program run did not complete normally.
#[derive(Debug, Error)]
pub enum RunFailure {
    /// The program did not finish within its time limit.
    #[error("time limit of {0:?} exceeded")]
    Timeout(Duration),

    /// The process exited unsuccessfully or was killed by a signal.
    #[error("program exited abnormally: {0}")]
    Exit(String),

    /// An in-process program returned `false`.
    #[error("program reported failure")]
    Rejected,

    /// The program could not be started or crashed in-process.
    #[error("program error: {0}")]
    Crashed(String),
}

// ---------------------------------------------------------------------------
// Program test runner trait
// ---------------------------------------------------------------------------

/// Runs the sandbox/program/checker pipeline for a [`ProgramTest`] node.
#[async_trait]
pub trait ProgramTestRunner: Send + Sync {
    /// Evaluate one program test against `data`.
    ///
    /// Soft failures (missing program, runtime error, wrong output) are
    /// returned as a failed [`NodeResult`]; `Err` is reserved for resource
    /// and checker failures that must abort the run.
    async fn run_program_test(
        &self,
        test: &ProgramTest,
        data: &DataMap,
    ) -> Result<NodeResult, EvalError>;
}

/// Runner used when a graph is expected to contain no program tests.
///
/// Every program test evaluated with it fails with a `runtime_error`.
pub struct NoProgramRunner;

#[async_trait]
impl ProgramTestRunner for NoProgramRunner {
    async fn run_program_test(
        &self,
        test: &ProgramTest,
        _data: &DataMap,
    ) -> Result<NodeResult, EvalError> {
        tracing::warn!(
            "no program runner configured, failing test for '{}'",
            test.program_key()
        );
        Ok(NodeResult::failure(
            crate::result::RUNTIME_ERROR,
            "no program runner configured",
        ))
    }
}
