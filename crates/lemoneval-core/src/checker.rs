//! Output checkers: exact bytes, whitespace-normalized words, or an external
//! check script.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::error::EvalError;
use crate::traits::{CheckOutcome, Checker};

/// Default time limit for an external check script.
pub const DEFAULT_CHECKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte-for-byte comparison of output and solution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactChecker;

#[async_trait]
impl Checker for ExactChecker {
    fn name(&self) -> &str {
        "exact"
    }

    async fn check(
        &self,
        full_score: f64,
        _input: &Path,
        output: &Path,
        solution: &Path,
    ) -> Result<CheckOutcome> {
        let produced = read(output).await?;
        let expected = read(solution).await?;
        Ok(CheckOutcome::from_match(produced == expected, full_score))
    }
}

/// Word-by-word comparison.
///
/// Each line contributes its whitespace-separated words followed by a line
/// break token, so the amount of spacing is ignored but line structure and
/// word order are not.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordChecker;

impl WordChecker {
    /// Compare two outputs under word normalization.
    ///
    /// Works on raw bytes and splits on ASCII whitespace, so output that is
    /// not valid UTF-8 only matches a byte-identical word sequence.
    pub fn matches(produced: impl AsRef<[u8]>, expected: impl AsRef<[u8]>) -> bool {
        word_stream(produced.as_ref()).eq(word_stream(expected.as_ref()))
    }
}

/// Words of each line followed by a line-break token. A final newline does
/// not start another line and a trailing `\r` is dropped.
fn word_stream(text: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = text.strip_suffix(b"\n").unwrap_or(text);
    (!text.is_empty())
        .then(|| body.split(|&b| b == b'\n'))
        .into_iter()
        .flatten()
        .flat_map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            line.split(u8::is_ascii_whitespace)
                .filter(|word| !word.is_empty())
                .chain(std::iter::once(&b"\n"[..]))
        })
}

#[async_trait]
impl Checker for WordChecker {
    fn name(&self) -> &str {
        "word"
    }

    async fn check(
        &self,
        full_score: f64,
        _input: &Path,
        output: &Path,
        solution: &Path,
    ) -> Result<CheckOutcome> {
        let produced = read(output).await?;
        let expected = read(solution).await?;
        Ok(CheckOutcome::from_match(
            Self::matches(&produced, &expected),
            full_score,
        ))
    }
}

/// Delegates the verdict to an external script.
///
/// The script is called as `script <full_score> <input> <output> <solution>`
/// and must print a success flag and a score as its first two
/// whitespace-separated tokens. Anything printed after them is kept as the
/// checker message.
#[derive(Debug, Clone)]
pub struct ExternalChecker {
    script: PathBuf,
    timeout: Duration,
}

impl ExternalChecker {
    pub fn new(script: impl Into<PathBuf>) -> Result<Self, EvalError> {
        let script = script.into();
        if !script.is_file() {
            return Err(EvalError::ArtifactNotFound(script));
        }
        Ok(Self {
            script,
            timeout: DEFAULT_CHECKER_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

#[async_trait]
impl Checker for ExternalChecker {
    fn name(&self) -> &str {
        "external"
    }

    async fn check(
        &self,
        full_score: f64,
        input: &Path,
        output: &Path,
        solution: &Path,
    ) -> Result<CheckOutcome> {
        let mut cmd = Command::new(&self.script);
        cmd.arg(full_score.to_string())
            .arg(input)
            .arg(output)
            .arg(solution)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .with_context(|| format!("checker timed out after {:?}", self.timeout))?
            .with_context(|| format!("failed to run checker {}", self.script.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!(
                "checker {} exited with {}: {}",
                self.script.display(),
                result.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&result.stdout);
        tracing::debug!("checker output: {}", stdout.trim());
        parse_checker_output(&stdout)
    }
}

/// Parse `success score [message...]` printed by an external checker.
pub fn parse_checker_output(stdout: &str) -> Result<CheckOutcome> {
    let mut tokens = stdout.split_whitespace();
    let success_token = tokens.next().context("checker printed no success flag")?;
    let score_token = tokens.next().context("checker printed no score")?;

    let success: f64 = success_token
        .parse()
        .with_context(|| format!("invalid success flag from checker: '{success_token}'"))?;
    let score: f64 = score_token
        .parse()
        .with_context(|| format!("invalid score from checker: '{score_token}'"))?;
    anyhow::ensure!(score.is_finite(), "checker score is not finite: {score}");

    let message = tokens.collect::<Vec<_>>().join(" ");
    Ok(CheckOutcome {
        success: success != 0.0,
        score,
        message: (!message.is_empty()).then_some(message),
    })
}

async fn read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}
