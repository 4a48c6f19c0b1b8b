use time::OffsetDateTime;

use super::repo_types::{Task, TaskStatus};

/// A task is overdue when it has a due date in the past and is not done.
///
/// Always evaluated against the caller's `now`; the result is never stored.
pub fn is_overdue(due_date: Option<OffsetDateTime>, status: TaskStatus, now: OffsetDateTime) -> bool {
    match due_date {
        Some(due) => status != TaskStatus::Done && now > due,
        None => false,
    }
}

impl Task {
    pub fn is_overdue(&self, now: OffsetDateTime) -> bool {
        is_overdue(self.due_date, self.status, now)
    }
}
