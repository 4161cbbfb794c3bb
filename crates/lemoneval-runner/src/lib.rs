//! lemoneval-runner — Sandboxed program execution for program tests.
//!
//! Stages a program test's input in a fresh sandbox, runs the candidate
//! program from the data map, and hands the produced output to the test's
//! checker.

pub mod program;
pub mod sandbox;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use lemoneval_core::checker::DEFAULT_CHECKER_TIMEOUT;
use lemoneval_core::data::DataMap;
use lemoneval_core::error::EvalError;
use lemoneval_core::node::ProgramTest;
use lemoneval_core::result::{NodeResult, CHECKER, LOOKUP_ERROR, RUNTIME_ERROR};
use lemoneval_core::traits::ProgramTestRunner;

pub use program::{CancelFlag, Executable, FnProgram};
pub use sandbox::Sandbox;

/// Name of the staged input inside the sandbox.
pub const INPUT_FILE: &str = "input.txt";
/// Name of the program's output inside the sandbox.
pub const OUTPUT_FILE: &str = "output.txt";
/// Name of the staged solution inside the sandbox.
pub const SOLUTION_FILE: &str = "solution.txt";

/// Local program-test runner using one temporary sandbox per test.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    /// Directory sandboxes are created in. `None` uses the system temp dir.
    sandbox_root: Option<PathBuf>,
    /// Upper bound on a single checker invocation.
    checker_timeout: Duration,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self {
            sandbox_root: None,
            checker_timeout: DEFAULT_CHECKER_TIMEOUT,
        }
    }

    pub fn with_sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sandbox_root = Some(root.into());
        self
    }

    pub fn with_checker_timeout(mut self, timeout: Duration) -> Self {
        self.checker_timeout = timeout;
        self
    }

    async fn run_in_sandbox(
        &self,
        sandbox: &Sandbox,
        test: &ProgramTest,
        data: &DataMap,
    ) -> Result<NodeResult, EvalError> {
        let input = sandbox.stage_copy(test.input(), INPUT_FILE)?;
        let output = sandbox.reserve(OUTPUT_FILE)?;

        let Some(program) = data.program(test.program_key()) else {
            tracing::warn!("no program for key '{}'", test.program_key());
            return Ok(NodeResult::failure(
                LOOKUP_ERROR,
                format!("no program for key '{}'", test.program_key()),
            ));
        };

        tracing::debug!("running {} on {}", program.describe(), test.input().display());
        if let Err(failure) = program.run(&input, &output, test.time_limit()).await {
            tracing::warn!("{} failed: {failure}", program.describe());
            return Ok(NodeResult::failure(RUNTIME_ERROR, failure.to_string()));
        }

        let solution = sandbox.stage_copy(test.solution(), SOLUTION_FILE)?;
        let checker = test.checker();
        let outcome = tokio::time::timeout(
            self.checker_timeout,
            checker.check(test.full_score(), &input, &output, &solution),
        )
        .await
        .map_err(|_| {
            EvalError::Checker(anyhow::anyhow!(
                "{} checker timed out after {:?}",
                checker.name(),
                self.checker_timeout
            ))
        })?
        .map_err(EvalError::Checker)?;

        let mut result = NodeResult::new(outcome.success, outcome.score);
        if let Some(message) = outcome.message {
            result = result.with_message(CHECKER, message);
        }
        Ok(result)
    }
}

#[async_trait]
impl ProgramTestRunner for LocalRunner {
    async fn run_program_test(
        &self,
        test: &ProgramTest,
        data: &DataMap,
    ) -> Result<NodeResult, EvalError> {
        let sandbox = Sandbox::new(self.sandbox_root.as_deref())?;
        let outcome = self.run_in_sandbox(&sandbox, test, data).await;
        let closed = sandbox.close();

        match (outcome, closed) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                tracing::warn!("{cleanup}");
                Err(e)
            }
        }
    }
}
