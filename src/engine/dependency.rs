// ABOUTME: Dependency graph over a run's tasks and readiness resolution
// ABOUTME: Computes eligible tasks, transitive dependents and stall diagnostics for stranded tasks

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use super::task::{Task, TaskStatus};

pub struct DependencyGraph {
    graph: Graph<String, ()>,
    task_indices: HashMap<String, NodeIndex>,
    missing: Vec<(String, String)>,
}

/// Why a task could not make progress when the scheduler ran out of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StallReason {
    Cycle { members: Vec<String> },
    MissingDependency { dependency: String },
    DeadDependency { dependency: String, status: TaskStatus },
    BlockedBy { dependency: String },
    OrphanedDelegation { child: Option<String> },
    Unschedulable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrandedTask {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub reason: StallReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StallReport {
    pub stranded: Vec<StrandedTask>,
}

impl DependencyGraph {
    /// Build the graph with an edge dependency -> dependent for every known dependency
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut graph = Graph::new();
        let mut task_indices = HashMap::new();
        let mut missing = Vec::new();

        for task in tasks {
            let node_index = graph.add_node(task.id.clone());
            task_indices.insert(task.id.clone(), node_index);
        }

        for task in tasks {
            let task_node = task_indices[&task.id];
            for dependency in &task.dependencies {
                match task_indices.get(dependency) {
                    Some(&dep_node) => {
                        graph.add_edge(dep_node, task_node, ());
                    }
                    None => missing.push((task.id.clone(), dependency.clone())),
                }
            }
        }

        Self {
            graph,
            task_indices,
            missing,
        }
    }

    /// `(task, dependency)` pairs whose dependency is not part of the task set
    pub fn missing_dependencies(&self) -> &[(String, String)] {
        &self.missing
    }

    pub fn has_cycle(&self) -> bool {
        toposort(&self.graph, None).is_err()
    }

    /// Every strongly connected component that forms a cycle, members sorted
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map(|&node| self.graph.contains_edge(node, node))
                        .unwrap_or(false)
            })
            .map(|component| {
                let mut members: Vec<String> = component
                    .into_iter()
                    .map(|node| self.graph[node].clone())
                    .collect();
                members.sort();
                members
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Every task reachable through dependent edges, visiting each id once.
    /// Terminates on cyclic graphs; the root itself is never included.
    pub fn transitive_dependents(&self, task_id: &str) -> Vec<String> {
        let Some(&root) = self.task_indices.get(task_id) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut dependents = Vec::new();
        visited.insert(root);
        queue.push_back(root);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(neighbor) {
                    dependents.push(self.graph[neighbor].clone());
                    queue.push_back(neighbor);
                }
            }
        }

        dependents
    }
}

/// Queued tasks whose dependencies are all `Done`, excluding in-flight ids
pub fn ready_tasks<'a>(tasks: &'a [Task], in_flight: &HashSet<String>) -> Vec<&'a Task> {
    let statuses: HashMap<&str, TaskStatus> =
        tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();

    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Queued && !in_flight.contains(&task.id))
        .filter(|task| {
            task.dependencies
                .iter()
                .all(|dep| statuses.get(dep.as_str()) == Some(&TaskStatus::Done))
        })
        .collect()
}

/// Tasks resumed after delegation: `Executing` but without a running step executor
pub fn resumable_tasks<'a>(tasks: &'a [Task], in_flight: &HashSet<String>) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Executing && !in_flight.contains(&task.id))
        .collect()
}

/// Explain every `Queued` or `Delegating` task once nothing can run any more
pub fn analyze_stall(tasks: &[Task]) -> StallReport {
    let graph = DependencyGraph::from_tasks(tasks);
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    let cycle_of: HashMap<String, Vec<String>> = graph
        .cycles()
        .into_iter()
        .flat_map(|members| {
            members
                .clone()
                .into_iter()
                .map(move |member| (member, members.clone()))
        })
        .collect();

    let mut stranded = Vec::new();

    for task in tasks {
        let reason = match task.status {
            TaskStatus::Queued => queued_stall_reason(task, &by_id, &cycle_of),
            TaskStatus::Delegating => {
                let child = tasks
                    .iter()
                    .find(|t| {
                        t.delegator_task_id.as_deref() == Some(task.id.as_str())
                            && !t.status.is_terminal()
                    })
                    .map(|t| t.id.clone());
                StallReason::OrphanedDelegation { child }
            }
            _ => continue,
        };

        stranded.push(StrandedTask {
            task_id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
            reason,
        });
    }

    StallReport { stranded }
}

fn queued_stall_reason(
    task: &Task,
    by_id: &HashMap<&str, &Task>,
    cycle_of: &HashMap<String, Vec<String>>,
) -> StallReason {
    if let Some(members) = cycle_of.get(&task.id) {
        return StallReason::Cycle {
            members: members.clone(),
        };
    }

    for dependency in &task.dependencies {
        match by_id.get(dependency.as_str()) {
            None => {
                return StallReason::MissingDependency {
                    dependency: dependency.clone(),
                }
            }
            Some(dep) if matches!(dep.status, TaskStatus::Error | TaskStatus::Cancelled) => {
                return StallReason::DeadDependency {
                    dependency: dependency.clone(),
                    status: dep.status,
                }
            }
            _ => {}
        }
    }

    task.dependencies
        .iter()
        .find(|dep| {
            by_id
                .get(dep.as_str())
                .map(|d| d.status != TaskStatus::Done)
                .unwrap_or(false)
        })
        .map(|dep| StallReason::BlockedBy {
            dependency: dep.clone(),
        })
        .unwrap_or(StallReason::Unschedulable)
}

impl StallReport {
    pub fn is_empty(&self) -> bool {
        self.stranded.is_empty()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.stranded.iter().map(|s| s.task_id.clone()).collect()
    }
}

impl std::fmt::Display for StallReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StallReason::Cycle { members } => {
                write!(f, "dependency cycle between {}", members.join(", "))
            }
            StallReason::MissingDependency { dependency } => {
                write!(f, "depends on unknown task '{}'", dependency)
            }
            StallReason::DeadDependency { dependency, status } => {
                write!(f, "depends on task '{}' which ended as {}", dependency, status)
            }
            StallReason::BlockedBy { dependency } => {
                write!(f, "blocked by stranded task '{}'", dependency)
            }
            StallReason::OrphanedDelegation { child: Some(child) } => {
                write!(f, "waiting on delegated task '{}' that cannot finish", child)
            }
            StallReason::OrphanedDelegation { child: None } => {
                write!(f, "delegating with no live delegated task")
            }
            StallReason::Unschedulable => write!(f, "could not be scheduled"),
        }
    }
}

impl std::fmt::Display for StallReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stalled: {} task(s) can never become ready",
            self.stranded.len()
        )?;
        for task in &self.stranded {
            write!(f, "; '{}' ({}) {}", task.title, task.task_id, task.reason)?;
        }
        Ok(())
    }
}
