//! The `lemoneval grade` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use lemoneval_core::data::DataMap;
use lemoneval_core::evaluator::{Evaluator, EvaluatorConfig};
use lemoneval_core::parser;
use lemoneval_core::report::{format_score, GradingReport};
use lemoneval_runner::{Executable, LocalRunner};

pub struct GradeArgs {
    pub rubric: PathBuf,
    pub programs: Vec<String>,
    pub answers: Vec<String>,
    pub parallelism: usize,
    pub seed: Option<u64>,
    pub format: String,
    pub output: Option<PathBuf>,
    pub sandbox_root: Option<PathBuf>,
}

pub async fn execute(args: GradeArgs) -> Result<()> {
    anyhow::ensure!(args.parallelism >= 1, "parallelism must be at least 1");
    anyhow::ensure!(
        matches!(args.format.as_str(), "text" | "json" | "table"),
        "unknown format: {} (expected text, json or table)",
        args.format
    );

    let rubric = parser::parse_rubric(&args.rubric)?;
    for warning in parser::validate_rubric(&rubric) {
        match &warning.node {
            Some(node) => tracing::warn!("[{node}] {}", warning.message),
            None => tracing::warn!("{}", warning.message),
        }
    }

    let data = build_data(&args.programs, &args.answers)?;

    let mut runner = LocalRunner::new();
    if let Some(root) = args.sandbox_root {
        runner = runner.with_sandbox_root(root);
    }
    let evaluator = Evaluator::new(
        Arc::new(runner),
        EvaluatorConfig {
            parallelism: args.parallelism,
            seed: args.seed,
        },
    );

    let result = evaluator
        .evaluate(Arc::new(rubric.graph), rubric.root, Arc::new(data))
        .await?;
    let report = GradingReport::from_result(&result, Some(&rubric.name));

    match args.format.as_str() {
        "json" => {
            let json =
                serde_json::to_string_pretty(&report).context("failed to serialize report")?;
            println!("{json}");
        }
        "table" => print_table(&report),
        _ => print!("{}", report.to_text()),
    }

    if let Some(output) = args.output {
        report.save_json(&output)?;
        eprintln!("Report written to {}", output.display());
    }

    Ok(())
}

/// Build the data map from `KEY=PATH` programs and `KEY=JSON` answers.
fn build_data(programs: &[String], answers: &[String]) -> Result<DataMap> {
    let mut data = DataMap::new();

    for entry in programs {
        let (key, path) = split_pair(entry, "--program")?;
        let program = Executable::new(path)
            .with_context(|| format!("invalid program for key '{key}'"))?;
        data.insert_program(key, Arc::new(program));
    }

    for entry in answers {
        let (key, raw) = split_pair(entry, "--answer")?;
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        data.insert_answer(key, value);
    }

    Ok(data)
}

fn split_pair<'a>(entry: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => anyhow::bail!("{flag} expects KEY=VALUE, got '{entry}'"),
    }
}

fn print_table(report: &GradingReport) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec!["Node", "Kind", "Success", "Score", "Messages"]);

    for node in &report.nodes {
        let messages = node
            .messages
            .iter()
            .map(|(key, message)| format!("{key}: {message}"))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            Cell::new(node.name.clone().unwrap_or_else(|| node.id.to_string())),
            Cell::new(&node.kind),
            Cell::new(u8::from(node.success)),
            Cell::new(format_score(node.score)),
            Cell::new(messages),
        ]);
    }

    println!("{table}");
    println!("Final score: {}", format_score(report.final_score));
}
