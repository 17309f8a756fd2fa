//! Dependency graph over task names.
//!
//! Tasks are stored as an adjacency map from task name to the names it
//! depends on, plus the reverse map of dependents. Only names are stored, so
//! cycles in a malformed definition cannot produce reference cycles here.

use std::collections::HashMap;

use flowforge_types::workflow::WorkflowDefinition;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Task names in declaration order, duplicates collapsed.
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from a definition.
    ///
    /// Duplicate task names are merged (their dependency lists are unioned)
    /// and references to unknown tasks are kept in `dependencies_of` but never
    /// produce a dependents entry. Validation reports both conditions.
    pub fn from_definition(definition: &WorkflowDefinition) -> Self {
        Self::from_edges(
            definition
                .tasks
                .iter()
                .map(|t| (t.name.as_str(), t.dependencies.iter().map(String::as_str))),
        )
    }

    pub fn from_edges<'a, I, D>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let mut graph = DependencyGraph::default();
        for (name, deps) in edges {
            let entry = graph.dependencies.entry(name.to_string()).or_insert_with(|| {
                graph.order.push(name.to_string());
                Vec::new()
            });
            for dep in deps {
                if !entry.iter().any(|d| d == dep) {
                    entry.push(dep.to_string());
                }
            }
        }

        for name in &graph.order {
            for dep in &graph.dependencies[name] {
                if graph.dependencies.contains_key(dep) {
                    graph
                        .dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(name.clone());
                }
            }
        }
        graph
    }

    pub fn task_names(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Depth-first cycle search with an explicit stack.
    ///
    /// Returns the offending chain in visit order, closed by repeating its
    /// first node (e.g. `a -> b -> a`). Edges to unknown tasks are ignored.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            OnStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.order.len());

        for root in &self.order {
            if marks.contains_key(root.as_str()) {
                continue;
            }

            // (node, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            marks.insert(root.as_str(), Mark::OnStack);

            while let Some(top) = stack.last_mut() {
                let (node, next) = (top.0, top.1);
                top.1 += 1;

                let deps = self.dependencies_of(node);
                let Some(dep) = deps.get(next) else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                };
                if !self.contains(dep) {
                    continue;
                }

                match marks.get(dep.as_str()) {
                    Some(Mark::OnStack) => {
                        let start = stack
                            .iter()
                            .position(|(n, _)| *n == dep.as_str())
                            .unwrap_or(0);
                        let mut chain: Vec<String> =
                            stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                        chain.push(dep.clone());
                        return Some(chain);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dep.as_str(), Mark::OnStack);
                        stack.push((dep.as_str(), 0));
                    }
                }
            }
        }

        None
    }

    /// A dependency-respecting order of all tasks (dependencies first).
    ///
    /// Returns `Err(task)` naming a task on a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, String> {
        let mut graph = DiGraph::<&str, ()>::new();
        let indices: HashMap<&str, _> = self
            .order
            .iter()
            .map(|name| (name.as_str(), graph.add_node(name.as_str())))
            .collect();

        for name in &self.order {
            for dep in self.dependencies_of(name) {
                if let Some(&from) = indices.get(dep.as_str()) {
                    graph.add_edge(from, indices[name.as_str()], ());
                }
            }
        }

        toposort(&graph, None)
            .map(|sorted| sorted.into_iter().map(|i| graph[i].to_string()).collect())
            .map_err(|cycle| graph[cycle.node_id()].to_string())
    }
}
