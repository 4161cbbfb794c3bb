//! lemoneval CLI — grade candidate programs and answers against a rubric.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "lemoneval", version, about = "Test-graph grading engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade programs and answers against a rubric
    Grade {
        /// Path to the rubric .toml file
        #[arg(long)]
        rubric: PathBuf,

        /// Candidate program as KEY=PATH (repeatable)
        #[arg(long = "program", value_name = "KEY=PATH")]
        programs: Vec<String>,

        /// Answer as KEY=JSON; non-JSON values are taken as strings (repeatable)
        #[arg(long = "answer", value_name = "KEY=JSON")]
        answers: Vec<String>,

        /// Max concurrently evaluated nodes
        #[arg(long, default_value = "4")]
        parallelism: usize,

        /// Seed for lottery nodes
        #[arg(long)]
        seed: Option<u64>,

        /// Output format: text, json, table
        #[arg(long, default_value = "text")]
        format: String,

        /// Also write the JSON report to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Directory to create sandboxes in
        #[arg(long)]
        sandbox_root: Option<PathBuf>,
    },

    /// Validate a rubric file
    Validate {
        /// Path to the rubric .toml file
        #[arg(long)]
        rubric: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lemoneval=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Grade {
            rubric,
            programs,
            answers,
            parallelism,
            seed,
            format,
            output,
            sandbox_root,
        } => {
            commands::grade::execute(commands::grade::GradeArgs {
                rubric,
                programs,
                answers,
                parallelism,
                seed,
                format,
                output,
                sandbox_root,
            })
            .await
        }
        Commands::Validate { rubric } => commands::validate::execute(rubric),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
