use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::filter::TaskQuery;
use super::repo_types::{NewTask, Task, TaskChanges, TaskStats, TaskStatus};

/// The set of tasks an authenticated caller may see and mutate.
///
/// Only constructible from a verified identity, so every store call carries
/// the owner predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerScope {
    owner: Uuid,
}

impl OwnerScope {
    pub(crate) fn for_user(owner: Uuid) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    #[cfg(test)]
    pub fn owns(&self, task: &Task) -> bool {
        task.user_id == self.owner
    }

    /// Starts a `WHERE` clause restricted to this owner.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE user_id = ").push_bind(self.owner);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: i64,
    pub offset: i64,
}

/// One page of results plus the size of the whole filtered set.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub total: u64,
    pub items: Vec<Task>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Whether `owner` names an existing, active account.
    async fn owner_is_active(&self, owner: Uuid) -> anyhow::Result<bool>;

    async fn create(&self, scope: &OwnerScope, task: NewTask) -> anyhow::Result<Task>;

    async fn get(&self, scope: &OwnerScope, id: Uuid) -> anyhow::Result<Option<Task>>;

    async fn list(
        &self,
        scope: &OwnerScope,
        query: &TaskQuery,
        window: PageWindow,
    ) -> anyhow::Result<TaskPage>;

    /// `None` when the task does not exist inside the scope.
    async fn update(
        &self,
        scope: &OwnerScope,
        id: Uuid,
        changes: TaskChanges,
    ) -> anyhow::Result<Option<Task>>;

    async fn delete(&self, scope: &OwnerScope, id: Uuid) -> anyhow::Result<bool>;

    async fn stats(&self, scope: &OwnerScope, now: OffsetDateTime) -> anyhow::Result<TaskStats>;

    /// Ids outside the scope are skipped; returns the number of rows changed.
    async fn bulk_update_status(
        &self,
        scope: &OwnerScope,
        ids: &[Uuid],
        status: TaskStatus,
    ) -> anyhow::Result<u64>;

    async fn bulk_delete(&self, scope: &OwnerScope, ids: &[Uuid]) -> anyhow::Result<u64>;
}
