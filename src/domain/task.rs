//! Task graph domain types.
//!
//! Tasks declare their dependencies and the shared resources they will
//! lock. The graph is validated once at load time: duplicate ids, unknown
//! references, and cycles are fatal configuration errors, never discovered
//! mid-run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use crate::error::{Result, WardenError};

/// Scheduling status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on unfinished dependencies.
    Pending,
    /// All dependencies done; eligible for assignment.
    Ready,
    /// Dispatched to an agent, resources locked.
    Assigned,
    /// Completed successfully.
    Done,
    /// Agent reported failure. Dependents stay blocked; no auto-retry.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

/// One unit of work, as declared in the task graph file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Task ids that must be Done before this task becomes Ready.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Resource ids this task locks for its whole execution.
    #[serde(default)]
    pub required_resources: Vec<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            required_resources: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn requires(mut self, resources: &[&str]) -> Self {
        self.required_resources = resources.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Validated task DAG, loaded once at run start.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: BTreeMap<String, Task>,
}

impl TaskGraph {
    /// Load and validate a task graph from a JSON file (a list of tasks).
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let tasks: Vec<Task> = serde_json::from_slice(&bytes)?;
        Self::from_tasks(tasks)
    }

    /// Validate a set of tasks: unique ids, known references, acyclic.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for task in tasks {
            if map.insert(task.id.clone(), task.clone()).is_some() {
                return Err(WardenError::DuplicateTask(task.id));
            }
        }

        for task in map.values() {
            for dep in &task.depends_on {
                if !map.contains_key(dep) {
                    return Err(WardenError::UnknownReference {
                        task: task.id.clone(),
                        reference: dep.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm; anything left over sits on a cycle.
        let mut indegree: HashMap<&str, usize> = map
            .values()
            .map(|t| (t.id.as_str(), t.depends_on.len()))
            .collect();
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut processed = 0usize;
        while let Some(id) = queue.pop_front() {
            processed += 1;
            for task in map.values() {
                if task.depends_on.iter().any(|d| d == id) {
                    let entry = indegree.entry(task.id.as_str()).or_insert(0);
                    *entry = entry.saturating_sub(1);
                    if *entry == 0 {
                        queue.push_back(task.id.as_str());
                    }
                }
            }
        }
        if processed < map.len() {
            let cyclic = map
                .keys()
                .find(|id| indegree.get(id.as_str()).is_some_and(|d| *d > 0))
                .cloned()
                .unwrap_or_default();
            return Err(WardenError::GraphCycle(cyclic));
        }

        Ok(Self { tasks: map })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &BTreeMap<String, Task> {
        &self.tasks
    }

    pub fn into_tasks(self) -> BTreeMap<String, Task> {
        self.tasks
    }
}
