//! Lifecycle bookkeeping for sub-tasks spawned under a parent chat turn.
//!
//! One [`TaskLifecycle`] instance owns the `task_id` → [`Task`] map for one
//! batch, so status lookups never degenerate into scanning a list at every
//! call site. Transitions come only from `task_event` records; the final
//! `task_result` summary is authoritative and may override anything inferred
//! from partial events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{TaskResultPayload, TaskSpec};

/// Sentinel error string for a task ended by cancellation. Passed through
/// verbatim, never re-worded.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Sentinel error string for a task that outlived its deadline. Passed
/// through verbatim, never re-worded.
pub const DEADLINE_EXCEEDED_ERROR: &str = "deadline_exceeded";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Started,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "started" => Some(Self::Started),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Progress order. Events may arrive out of order; a transition to a
    /// lower-or-equal rank is stale and ignored, while a jump from `queued`
    /// straight to a terminal rank backfills the skipped states implicitly.
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Started => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed | Self::Cancelled => 3,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub provider: String,
    pub model: String,
    pub deadline_ts: Option<i64>,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub output: Option<String>,
}

impl Task {
    fn from_spec(spec: &TaskSpec, id: String) -> Self {
        Self {
            id,
            prompt: spec.prompt.clone(),
            provider: spec.provider.clone(),
            model: spec.model.clone(),
            deadline_ts: spec.deadline_ts,
            status: TaskStatus::Queued,
            error: None,
            output: None,
        }
    }
}

/// Per-turn task state machine. All tasks of the batch share the parent chat
/// id and one trace id.
pub struct TaskLifecycle {
    parent_chat_id: String,
    trace_id: String,
    tasks: HashMap<String, Task>,
}

impl TaskLifecycle {
    /// Seed the batch. Specs without an id are skipped (the caller assigns
    /// ids before submission, see `TaskSession::start`).
    pub fn new(parent_chat_id: String, trace_id: String, specs: &[TaskSpec]) -> Self {
        let mut tasks = HashMap::new();
        for spec in specs {
            let Some(id) = spec.id.clone() else {
                eprintln!("[TASKS] Spec without id cannot be tracked, skipping");
                continue;
            };
            tasks.insert(id.clone(), Task::from_spec(spec, id));
        }
        Self {
            parent_chat_id,
            trace_id,
            tasks,
        }
    }

    pub fn parent_chat_id(&self) -> &str {
        &self.parent_chat_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Apply one `task_event`. Returns true when the task's state changed.
    ///
    /// Terminal statuses are final: once a task completed, failed or was
    /// cancelled, later events for that id are ignored. Unknown ids are
    /// ignored too.
    pub fn apply_event(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
        trace_id: Option<&str>,
    ) -> bool {
        self.verify_trace(trace_id, "task_event");

        let Some(task) = self.tasks.get_mut(task_id) else {
            eprintln!("[TASKS] Ignoring event for unknown task {}", task_id);
            return false;
        };
        if task.status.is_terminal() {
            eprintln!(
                "[TASKS] Ignoring {} for already-terminal task {}",
                status.as_str(),
                task_id
            );
            return false;
        }
        if status.rank() <= task.status.rank() {
            // Stale or duplicate, e.g. a late "started" after "running".
            return false;
        }

        task.status = status;
        task.error = match status {
            TaskStatus::Failed | TaskStatus::Cancelled => error.map(str::to_string),
            _ => None,
        };
        true
    }

    /// Apply the batch's terminal `task_result` summary. It is authoritative:
    /// final status, output and error overwrite whatever the partial events
    /// left behind, and an id never seen in any event is synthesized from the
    /// summary entry.
    pub fn apply_result(&mut self, result: &TaskResultPayload, trace_id: Option<&str>) {
        self.verify_trace(trace_id, "task_result");

        for outcome in &result.tasks {
            let task = self.tasks.entry(outcome.id.clone()).or_insert_with(|| {
                eprintln!("[TASKS] Synthesizing task {} from result summary", outcome.id);
                Task {
                    id: outcome.id.clone(),
                    prompt: String::new(),
                    provider: String::new(),
                    model: String::new(),
                    deadline_ts: None,
                    status: TaskStatus::Queued,
                    error: None,
                    output: None,
                }
            });
            task.status = outcome.status;
            task.output = outcome.output.clone();
            task.error = outcome.error.clone();
        }
    }

    /// Client-side watchdog: force every overdue non-terminal task to
    /// `failed` with the deadline sentinel. Returns the affected ids.
    pub fn enforce_deadlines(&mut self, now_ts: i64) -> Vec<String> {
        let mut expired = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status.is_terminal() {
                continue;
            }
            if let Some(deadline) = task.deadline_ts {
                if deadline < now_ts {
                    eprintln!("[TASKS] Task {} exceeded its deadline", task.id);
                    task.status = TaskStatus::Failed;
                    task.error = Some(DEADLINE_EXCEEDED_ERROR.to_string());
                    expired.push(task.id.clone());
                }
            }
        }
        expired.sort();
        expired
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks of the batch, ordered by id for stable rendering.
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn verify_trace(&self, trace_id: Option<&str>, record: &str) {
        // A bad trace id is a protocol violation worth logging, but it must
        // not block rendering: the record is still applied.
        match trace_id {
            Some(t) if t == self.trace_id => {}
            Some(t) => eprintln!(
                "[TASKS] Protocol violation: {} trace_id {} does not match batch trace {}",
                record, t, self.trace_id
            ),
            None => eprintln!(
                "[TASKS] Protocol violation: {} missing trace_id (expected {})",
                record, self.trace_id
            ),
        }
    }
}
