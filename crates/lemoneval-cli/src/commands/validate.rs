//! The `lemoneval validate` command.

use std::path::PathBuf;

use anyhow::Result;

use lemoneval_core::evaluator;
use lemoneval_core::parser;

pub fn execute(rubric_path: PathBuf) -> Result<()> {
    let rubric = parser::parse_rubric(&rubric_path)?;
    let order = evaluator::plan(&rubric.graph, rubric.root)?;

    println!(
        "Rubric: {} ({} nodes, {} reachable from root)",
        rubric.name,
        rubric.graph.len(),
        order.len()
    );

    let warnings = parser::validate_rubric(&rubric);
    for w in &warnings {
        let prefix = w
            .node
            .as_ref()
            .map(|name| format!("  [{name}]"))
            .unwrap_or_else(|| "  ".to_string());
        println!("{prefix} WARNING: {}", w.message);
    }

    if warnings.is_empty() {
        println!("Rubric valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
