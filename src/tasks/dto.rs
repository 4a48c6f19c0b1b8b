use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::tasks::repo_types::{Task, TaskStatus};
use crate::timestamps::Timestamps;

/// Raw list query string. Everything stays textual so validation can name
/// the offending field instead of rejecting the whole request.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListParams {
    pub status: Option<String>,
    pub created_date: Option<String>,
    pub created_date_gte: Option<String>,
    pub created_date_lte: Option<String>,
    pub due_date: Option<String>,
    pub due_date_gte: Option<String>,
    pub due_date_lte: Option<String>,
    pub overdue: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
}

/// Body of `PUT` (title required) and `PATCH` (everything optional).
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    /// Outer `None`: absent. `Some(None)`: explicit `null`, clears the date.
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<String>>,
}

/// Body of the status-only update; no other field is read.
#[derive(Debug, Default, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkStatusRequest {
    #[serde(default)]
    pub task_ids: Vec<Uuid>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(default)]
    pub task_ids: Vec<Uuid>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Compact shape used in listings.
#[derive(Debug, Serialize)]
pub struct TaskListItem {
    pub id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    pub is_overdue: bool,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl TaskListItem {
    pub fn new(task: Task, now: OffsetDateTime) -> Self {
        Self {
            is_overdue: task.is_overdue(now),
            timestamps: Timestamps::of(&task),
            id: task.id,
            title: task.title,
            status: task.status,
            due_date: task.due_date,
        }
    }
}

/// Full task shape returned by create, retrieve and every update.
#[derive(Debug, Serialize)]
pub struct TaskDetail {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub user: Uuid,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    pub is_overdue: bool,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl TaskDetail {
    pub fn new(task: Task, now: OffsetDateTime) -> Self {
        Self {
            is_overdue: task.is_overdue(now),
            timestamps: Timestamps::of(&task),
            id: task.id,
            title: task.title,
            description: task.description,
            status: task.status,
            user: task.user_id,
            due_date: task.due_date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct BulkUpdateResponse {
    pub message: String,
    pub updated_count: u64,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteResponse {
    pub message: String,
    pub deleted_count: u64,
}
