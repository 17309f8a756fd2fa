//! Structural validation of workflow definitions.
//!
//! Validation is exhaustive: every rule runs even after an earlier one has
//! failed, so the caller gets the complete list of problems in one pass.
//! Rules run in a fixed order: duplicate names, missing dependencies, cycles,
//! then per-task field checks.

use std::collections::{HashMap, HashSet};

use flowforge_types::workflow::WorkflowDefinition;
use thiserror::Error;

use super::graph::DependencyGraph;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow has no tasks")]
    Empty,

    #[error("duplicate task names: {}", .0.join(", "))]
    DuplicateTasks(Vec<String>),

    #[error("task '{task}' depends on unknown task(s): {}", .missing.join(", "))]
    MissingDependencies { task: String, missing: Vec<String> },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("task '{task}' references plugin '{plugin}' with invalid version '{version}'")]
    InvalidPluginVersion {
        task: String,
        plugin: String,
        version: String,
    },
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when valid, otherwise the full error list.
    pub fn into_result(self) -> Result<(), Vec<ValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// All messages joined with `"; "`.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Result of a cycle check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleCheck {
    pub cyclic: bool,
    /// Offending chain in visit order; empty when acyclic.
    pub chain: Vec<String>,
}

/// Check the task graph of `definition` for a dependency cycle.
pub fn check_cyclic(definition: &WorkflowDefinition) -> CycleCheck {
    match DependencyGraph::from_definition(definition).find_cycle() {
        Some(chain) => CycleCheck {
            cyclic: true,
            chain,
        },
        None => CycleCheck {
            cyclic: false,
            chain: Vec::new(),
        },
    }
}

/// Validate a workflow definition. Pure.
pub fn validate(definition: &WorkflowDefinition) -> ValidationReport {
    let mut errors = Vec::new();

    if definition.tasks.is_empty() {
        errors.push(ValidationError::Empty);
    }

    // Duplicate names, reported once each in first-seen order.
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut duplicates: Vec<String> = Vec::new();
    for task in &definition.tasks {
        let count = seen.entry(task.name.as_str()).or_insert(0);
        *count += 1;
        if *count == 2 {
            duplicates.push(task.name.clone());
        }
    }
    if !duplicates.is_empty() {
        errors.push(ValidationError::DuplicateTasks(duplicates));
    }

    let names: HashSet<&str> = definition.tasks.iter().map(|t| t.name.as_str()).collect();
    for task in &definition.tasks {
        let missing: Vec<String> = task
            .dependencies
            .iter()
            .filter(|d| !names.contains(d.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            errors.push(ValidationError::MissingDependencies {
                task: task.name.clone(),
                missing,
            });
        }
    }

    let cycle = check_cyclic(definition);
    if cycle.cyclic {
        errors.push(ValidationError::Cycle(cycle.chain));
    }

    for task in &definition.tasks {
        if semver::Version::parse(&task.plugin_ref.version).is_err() {
            errors.push(ValidationError::InvalidPluginVersion {
                task: task.name.clone(),
                plugin: task.plugin_ref.plugin_type(),
                version: task.plugin_ref.version.clone(),
            });
        }
    }

    ValidationReport { errors }
}
