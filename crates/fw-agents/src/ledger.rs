use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use fw_core::types::{TaskId, TaskResult, TaskStatus};
use serde::{Deserialize, Serialize};

/// Summary of a finished task, kept in a bounded ring per agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub task_id: TaskId,
    pub ability: String,
    pub status: TaskStatus,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl From<&TaskResult> for TaskHistoryEntry {
    fn from(r: &TaskResult) -> Self {
        Self {
            task_id: r.task_id,
            ability: r.ability.clone(),
            status: r.status,
            ended_at: r.ended_at,
            duration_ms: r.duration_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskLedger
// ---------------------------------------------------------------------------

/// Per-agent map of task id -> tracked record, plus the history ring.
#[derive(Debug, Clone)]
pub struct TaskLedger {
    tasks: HashMap<TaskId, TaskResult>,
    history: VecDeque<TaskHistoryEntry>,
    history_limit: usize,
}

impl TaskLedger {
    pub fn new(history_limit: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            history: VecDeque::with_capacity(history_limit.min(64)),
            history_limit,
        }
    }

    pub fn insert(&mut self, record: TaskResult) {
        self.tasks.insert(record.task_id, record);
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskResult> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskResult> {
        self.tasks.get_mut(id)
    }

    pub fn status(&self, id: &TaskId) -> TaskStatus {
        self.tasks.get(id).map_or(TaskStatus::Unknown, |r| r.status)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskResult> {
        self.tasks.values()
    }

    /// Records sorted by submission time, newest first.
    pub fn list(&self, status: Option<TaskStatus>, limit: Option<usize>) -> Vec<TaskResult> {
        let mut out: Vec<TaskResult> = self
            .tasks
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    /// Append a finished task to the ring, evicting the oldest entry when full.
    pub fn record_history(&mut self, record: &TaskResult) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(TaskHistoryEntry::from(record));
    }

    pub fn history(&self) -> impl Iterator<Item = &TaskHistoryEntry> {
        self.history.iter()
    }

    pub(crate) fn restore_history(&mut self, entries: Vec<TaskHistoryEntry>) {
        for entry in entries {
            while self.history_limit > 0 && self.history.len() >= self.history_limit {
                self.history.pop_front();
            }
            if self.history_limit > 0 {
                self.history.push_back(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fw_core::types::TaskRequest;
    use uuid::Uuid;

    fn record(agent: Uuid, offset_secs: i64) -> TaskResult {
        let mut r = TaskResult::pending(agent, &TaskRequest::new("echo"));
        r.submitted_at = r.submitted_at + Duration::seconds(offset_secs);
        r
    }

    #[test]
    fn unknown_for_missing_ids() {
        let ledger = TaskLedger::new(10);
        assert_eq!(ledger.status(&Uuid::new_v4()), TaskStatus::Unknown);
    }

    #[test]
    fn list_sorts_newest_first_and_filters() {
        let agent = Uuid::new_v4();
        let mut ledger = TaskLedger::new(10);
        let a = record(agent, 0);
        let b = record(agent, 1);
        let mut c = record(agent, 2);
        c.fail("boom");
        let (a_id, b_id, c_id) = (a.task_id, b.task_id, c.task_id);
        ledger.insert(a);
        ledger.insert(b);
        ledger.insert(c);

        let all: Vec<_> = ledger.list(None, None).iter().map(|r| r.task_id).collect();
        assert_eq!(all, vec![c_id, b_id, a_id]);

        let pending = ledger.list(Some(TaskStatus::Pending), Some(1));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, b_id);
    }

    #[test]
    fn history_ring_is_capped() {
        let agent = Uuid::new_v4();
        let mut ledger = TaskLedger::new(2);
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let r = record(agent, i);
                ledger.record_history(&r);
                r.task_id
            })
            .collect();
        let kept: Vec<_> = ledger.history().map(|h| h.task_id).collect();
        assert_eq!(kept, vec![ids[1], ids[2]]);
    }
}
