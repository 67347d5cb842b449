//! Task / TaskList data model (spec.md §3), modeled as plain serde structs
//! in the builder/setter style of the teacher's `domain/run.rs`, without the
//! taskstore-backed `Record` trait machinery (that crate has no source in
//! the retrieval pack and this spec's ownership rules don't need it).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A single unit of work. `passes` is mutated only by the Run Coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    pub priority: u32,
    pub passes: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
            priority: 100,
            passes: false,
            notes: String::new(),
            subtasks: Vec::new(),
        }
    }

    /// `id` must match `^T-\d{3}$` per spec.md §6.3.
    pub fn id_is_well_formed(id: &str) -> bool {
        let Some(digits) = id.strip_prefix("T-") else {
            return false;
        };
        digits.len() == 3 && digits.chars().all(|c| c.is_ascii_digit())
    }
}

/// Same shape as `Task`, minus `priority` (subtasks inherit their parent's).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    pub passes: bool,
    #[serde(default)]
    pub notes: String,
}

/// Ordered collection of tasks plus project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    pub project: String,
    #[serde(rename = "branchName", skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub description: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskListError {
    #[error("duplicate task id: {0}")]
    DuplicateId(String),
    #[error("malformed task id: {0}")]
    MalformedId(String),
    #[error("empty acceptance criteria for task {0}")]
    EmptyAcceptanceCriteria(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TaskList {
    pub fn load(path: &Path) -> Result<Self, TaskListError> {
        let content = fs::read_to_string(path)?;
        let list: TaskList = serde_json::from_str(&content)?;
        list.validate()?;
        Ok(list)
    }

    pub fn validate(&self) -> Result<(), TaskListError> {
        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if !Task::id_is_well_formed(&task.id) {
                return Err(TaskListError::MalformedId(task.id.clone()));
            }
            if !seen.insert(task.id.clone()) {
                return Err(TaskListError::DuplicateId(task.id.clone()));
            }
            if task.acceptance_criteria.is_empty() {
                return Err(TaskListError::EmptyAcceptanceCriteria(task.id.clone()));
            }
        }
        Ok(())
    }

    /// Pending tasks ordered by priority ascending, then id — the selection
    /// order the Run Coordinator (C9) must use.
    pub fn pending_in_order(&self) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self.tasks.iter().filter(|t| !t.passes).collect();
        pending.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskList {
        TaskList {
            project: "demo".into(),
            branch_name: None,
            description: "demo project".into(),
            tasks: vec![
                Task {
                    acceptance_criteria: vec!["does the thing".into()],
                    ..Task::new("T-002", "second", "second task")
                },
                Task {
                    acceptance_criteria: vec!["does the other thing".into()],
                    priority: 1,
                    ..Task::new("T-001", "first", "first task")
                },
            ],
        }
    }

    #[test]
    fn id_well_formed() {
        assert!(Task::id_is_well_formed("T-001"));
        assert!(!Task::id_is_well_formed("T-1"));
        assert!(!Task::id_is_well_formed("X-001"));
        assert!(!Task::id_is_well_formed("T-0001"));
    }

    #[test]
    fn pending_in_order_respects_priority_then_id() {
        let list = sample();
        let ordered = list.pending_in_order();
        assert_eq!(ordered[0].id, "T-001");
        assert_eq!(ordered[1].id, "T-002");
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let mut list = sample();
        list.tasks[1].id = "T-002".into();
        assert!(matches!(list.validate(), Err(TaskListError::DuplicateId(_))));
    }

    #[test]
    fn validate_rejects_empty_acceptance_criteria() {
        let mut list = sample();
        list.tasks[0].acceptance_criteria.clear();
        assert!(matches!(
            list.validate(),
            Err(TaskListError::EmptyAcceptanceCriteria(_))
        ));
    }

    #[test]
    fn round_trip_is_byte_stable_after_canonicalization() {
        let list = sample();
        let json = serde_json::to_string(&list).unwrap();
        let reparsed: TaskList = serde_json::from_str(&json).unwrap();
        let json2 = serde_json::to_string(&reparsed).unwrap();
        assert_eq!(json, json2);
    }
}
