//! In-process `TaskStore` used by the HTTP tests. Mirrors the SQL semantics
//! of `PgTaskStore`, NULL handling included.

use std::{cmp::Ordering, collections::HashSet, sync::Mutex};

use async_trait::async_trait;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use super::filter::{SortField, TaskFilter, TaskOrdering, TaskQuery};
use super::repo_types::{NewTask, Task, TaskChanges, TaskStats, TaskStatus};
use super::store::{OwnerScope, PageWindow, TaskPage, TaskStore};
use crate::timestamps::Timestamped;

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    /// Every other owner id counts as an active account.
    inactive: Mutex<HashSet<Uuid>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a fully specified row, bypassing validation.
    pub fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn deactivate(&self, owner: Uuid) {
        self.inactive.lock().unwrap().insert(owner);
    }
}

fn utc_date(at: OffsetDateTime) -> time::Date {
    at.to_offset(UtcOffset::UTC).date()
}

/// SQL `AND` over nullable booleans.
fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn overdue_predicate(task: &Task, now: OffsetDateTime) -> Option<bool> {
    let past_due = task.due_date.map(|due| due < now);
    let open = Some(TaskStatus::OPEN.contains(&task.status));
    and3(past_due, open)
}

fn contains_ci(task: &Task, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    task.title.to_lowercase().contains(&needle) || task.description.to_lowercase().contains(&needle)
}

pub fn matches(filter: &TaskFilter, task: &Task, now: OffsetDateTime) -> bool {
    if filter.status.is_some_and(|s| s != task.status) {
        return false;
    }
    if !filter.created.contains(utc_date(task.created_at)) {
        return false;
    }
    if !filter.due.is_unbounded() {
        match task.due_date {
            Some(due) if filter.due.contains(utc_date(due)) => {}
            _ => return false,
        }
    }
    if let Some(flag) = filter.overdue {
        let predicate = overdue_predicate(task, now);
        let outcome = match (flag, task.due_date) {
            (true, _) => predicate,
            (false, None) => Some(false),
            (false, Some(_)) => predicate.map(|v| !v),
        };
        if outcome != Some(true) {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        if !contains_ci(task, search) {
            return false;
        }
        if !filter.search_terms().iter().all(|t| contains_ci(task, t)) {
            return false;
        }
    }
    true
}

/// NULLs sort after every value in ascending order, like Postgres.
fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

pub fn compare(ordering: &TaskOrdering, a: &Task, b: &Task) -> Ordering {
    for key in ordering.keys() {
        let ord = match key.field {
            SortField::CreatedAt => a.created_at().cmp(&b.created_at()),
            SortField::UpdatedAt => a.updated_at().cmp(&b.updated_at()),
            SortField::DueDate => nulls_last(a.due_date, b.due_date),
            SortField::Title => a.title.cmp(&b.title),
        };
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn owner_is_active(&self, owner: Uuid) -> anyhow::Result<bool> {
        Ok(!self.inactive.lock().unwrap().contains(&owner))
    }

    async fn create(&self, scope: &OwnerScope, task: NewTask) -> anyhow::Result<Task> {
        let now = OffsetDateTime::now_utc();
        let task = Task {
            id: Uuid::new_v4(),
            user_id: scope.owner(),
            title: task.title,
            description: task.description,
            status: task.status,
            due_date: task.due_date,
            created_at: now,
            updated_at: now,
        };
        self.insert(task.clone());
        Ok(task)
    }

    async fn get(&self, scope: &OwnerScope, id: Uuid) -> anyhow::Result<Option<Task>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks.iter().find(|t| t.id == id && scope.owns(t)).cloned())
    }

    async fn list(
        &self,
        scope: &OwnerScope,
        query: &TaskQuery,
        window: PageWindow,
    ) -> anyhow::Result<TaskPage> {
        let tasks = self.tasks.lock().unwrap();
        let mut selected: Vec<Task> = tasks
            .iter()
            .filter(|t| scope.owns(t) && matches(&query.filter, t, query.now))
            .cloned()
            .collect();
        selected.sort_by(|a, b| compare(&query.ordering, a, b));
        let total = selected.len() as u64;
        let items = selected
            .into_iter()
            .skip(window.offset.max(0) as usize)
            .take(window.limit.max(0) as usize)
            .collect();
        Ok(TaskPage { total, items })
    }

    async fn update(
        &self,
        scope: &OwnerScope,
        id: Uuid,
        changes: TaskChanges,
    ) -> anyhow::Result<Option<Task>> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.iter_mut().find(|t| t.id == id && scope.owns(t)) else {
            return Ok(None);
        };
        changes.apply(task);
        task.updated_at = OffsetDateTime::now_utc();
        Ok(Some(task.clone()))
    }

    async fn delete(&self, scope: &OwnerScope, id: Uuid) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|t| !(t.id == id && scope.owns(t)));
        Ok(tasks.len() < before)
    }

    async fn stats(&self, scope: &OwnerScope, now: OffsetDateTime) -> anyhow::Result<TaskStats> {
        let tasks = self.tasks.lock().unwrap();
        let mut stats = TaskStats::default();
        for task in tasks.iter().filter(|t| scope.owns(t)) {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Archived => stats.archived += 1,
            }
            if overdue_predicate(task, now) == Some(true) {
                stats.overdue += 1;
            }
        }
        Ok(stats)
    }

    async fn bulk_update_status(
        &self,
        scope: &OwnerScope,
        ids: &[Uuid],
        status: TaskStatus,
    ) -> anyhow::Result<u64> {
        let now = OffsetDateTime::now_utc();
        let mut tasks = self.tasks.lock().unwrap();
        let mut updated = 0;
        for task in tasks
            .iter_mut()
            .filter(|t| scope.owns(t) && ids.contains(&t.id))
        {
            task.status = status;
            task.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn bulk_delete(&self, scope: &OwnerScope, ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|t| !(scope.owns(t) && ids.contains(&t.id)));
        Ok((before - tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{macros::datetime, Duration};

    const NOW: OffsetDateTime = datetime!(2024-05-10 12:00 UTC);

    fn task(status: TaskStatus, due_date: Option<OffsetDateTime>) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            title: "t".into(),
            description: String::new(),
            status,
            due_date,
            created_at: NOW - Duration::days(3),
            updated_at: NOW - Duration::days(3),
        }
    }

    fn overdue(flag: bool) -> TaskFilter {
        TaskFilter {
            overdue: Some(flag),
            ..TaskFilter::default()
        }
    }

    #[test]
    fn overdue_true_excludes_done_and_undated() {
        let past = Some(NOW - Duration::days(1));
        assert!(matches(&overdue(true), &task(TaskStatus::Pending, past), NOW));
        assert!(matches(&overdue(true), &task(TaskStatus::Archived, past), NOW));
        assert!(!matches(&overdue(true), &task(TaskStatus::Done, past), NOW));
        assert!(!matches(&overdue(true), &task(TaskStatus::Pending, None), NOW));
    }

    #[test]
    fn undated_tasks_match_neither_overdue_branch() {
        let future = Some(NOW + Duration::days(1));
        let past = Some(NOW - Duration::days(1));
        assert!(matches(&overdue(false), &task(TaskStatus::Pending, future), NOW));
        assert!(matches(&overdue(false), &task(TaskStatus::Done, past), NOW));
        assert!(!matches(&overdue(false), &task(TaskStatus::Pending, past), NOW));
        for status in TaskStatus::ALL {
            assert!(!matches(&overdue(true), &task(status, None), NOW));
            assert!(!matches(&overdue(false), &task(status, None), NOW));
        }
    }

    #[test]
    fn due_bounds_never_match_undated_tasks() {
        let filter = TaskFilter {
            due: crate::tasks::filter::DateBounds {
                to: Some(time::macros::date!(2030 - 01 - 01)),
                ..Default::default()
            },
            ..TaskFilter::default()
        };
        assert!(!matches(&filter, &task(TaskStatus::Pending, None), NOW));
        assert!(matches(&filter, &task(TaskStatus::Pending, Some(NOW)), NOW));
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_description() {
        let mut t = task(TaskStatus::Pending, None);
        t.title = "Buy MILK".into();
        t.description = "from the corner shop".into();
        let search = |s: &str| TaskFilter {
            search: Some(s.into()),
            ..TaskFilter::default()
        };
        assert!(matches(&search("milk"), &t, NOW));
        assert!(matches(&search("CORNER"), &t, NOW));
        assert!(!matches(&search("bread"), &t, NOW));
    }

    #[test]
    fn missing_due_dates_sort_last_ascending_first_descending() {
        let dated = task(TaskStatus::Pending, Some(NOW));
        let undated = task(TaskStatus::Pending, None);
        let asc = TaskOrdering::parse(Some("due_date"));
        let desc = TaskOrdering::parse(Some("-due_date"));
        assert_eq!(compare(&asc, &dated, &undated), Ordering::Less);
        assert_eq!(compare(&desc, &dated, &undated), Ordering::Greater);
    }
}
