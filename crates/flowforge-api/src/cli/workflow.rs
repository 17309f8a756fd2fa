//! `validate` and `plan`: offline checks of a workflow file.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::json;

use flowforge_core::workflow::graph::DependencyGraph;
use flowforge_core::workflow::validator::validate;
use flowforge_types::workflow::WorkflowDefinition;

pub fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse workflow {}", path.display()))
}

/// Planned position of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub task: String,
    /// 1 for tasks without dependencies, else one more than the deepest
    /// dependency. Tasks of one stage can run in parallel.
    pub stage: usize,
    pub dependencies: Vec<String>,
}

/// Topological plan of a valid definition.
pub fn plan(definition: &WorkflowDefinition) -> Result<Vec<PlanStep>> {
    if let Err(errors) = validate(definition).into_result() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("workflow '{}' is invalid: {}", definition.name, messages.join("; "));
    }

    let graph = DependencyGraph::from_definition(definition);
    let order = graph
        .topological_order()
        .map_err(|task| anyhow::anyhow!("task '{task}' is on a dependency cycle"))?;

    let mut stages: HashMap<&str, usize> = HashMap::new();
    let mut steps = Vec::with_capacity(order.len());
    for task in &order {
        let dependencies = graph.dependencies_of(task).to_vec();
        let stage = dependencies
            .iter()
            .filter_map(|d| stages.get(d.as_str()))
            .max()
            .map_or(1, |deepest| deepest + 1);
        stages.insert(task.as_str(), stage);
        steps.push(PlanStep {
            task: task.clone(),
            stage,
            dependencies,
        });
    }
    steps.sort_by_key(|s| s.stage);
    Ok(steps)
}

pub fn handle_validate(file: &Path, json_output: bool) -> Result<()> {
    let definition = load_definition(file)?;
    let report = validate(&definition);

    if json_output {
        let out = json!({
            "workflow": definition.name,
            "valid": report.is_valid(),
            "errors": report.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if report.is_valid() {
        println!();
        println!(
            "  {} Workflow '{}' is valid ({} tasks)",
            style("✓").green().bold(),
            style(&definition.name).cyan(),
            definition.tasks.len()
        );
        println!();
    } else {
        println!();
        println!(
            "  {} Workflow '{}' has {} problem(s):",
            style("✗").red().bold(),
            style(&definition.name).cyan(),
            report.errors.len()
        );
        println!();
        for error in &report.errors {
            println!("  - {error}");
        }
        println!();
    }

    if !report.is_valid() {
        bail!("validation failed");
    }
    Ok(())
}

pub fn handle_plan(file: &Path, json_output: bool) -> Result<()> {
    let definition = load_definition(file)?;
    let steps = plan(&definition)?;

    if json_output {
        let out: Vec<_> = steps
            .iter()
            .map(|s| json!({ "task": s.task, "stage": s.stage, "dependencies": s.dependencies }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Stage"),
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Depends on"),
            Cell::new("Plugin"),
            Cell::new("Approval"),
        ]);

    for step in &steps {
        let task = definition.task(&step.task);
        let plugin = task.map(|t| t.plugin_ref.to_string()).unwrap_or_default();
        let gated = task.is_some_and(|t| t.requires_approval());
        table.add_row(vec![
            Cell::new(step.stage),
            Cell::new(&step.task),
            Cell::new(if step.dependencies.is_empty() {
                "-".to_string()
            } else {
                step.dependencies.join(", ")
            }),
            Cell::new(plugin),
            Cell::new(if gated { "manual" } else { "" }),
        ]);
    }

    println!();
    println!("  Plan for '{}'", style(&definition.name).cyan());
    println!();
    println!("{table}");
    println!();
    Ok(())
}
