use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::filter::{push_overdue_predicate, TaskQuery};
use super::repo_types::{NewTask, Task, TaskChanges, TaskRow, TaskStats, TaskStatus};
use super::store::{OwnerScope, PageWindow, TaskPage, TaskStore};

const TASK_COLUMNS: &str =
    "id, user_id, title, description, status, due_date, created_at, updated_at";

/// `TaskStore` backed by the `tasks` table.
#[derive(Clone)]
pub struct PgTaskStore {
    db: PgPool,
}

impl PgTaskStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_tasks(rows: Vec<TaskRow>) -> anyhow::Result<Vec<Task>> {
    rows.into_iter().map(Task::try_from).collect()
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn owner_is_active(&self, owner: Uuid) -> anyhow::Result<bool> {
        let active = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND is_active)",
        )
        .bind(owner)
        .fetch_one(&self.db)
        .await
        .context("check task owner")?;
        Ok(active)
    }

    async fn create(&self, scope: &OwnerScope, task: NewTask) -> anyhow::Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (id, user_id, title, description, status, due_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, title, description, status, due_date, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scope.owner())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.due_date)
        .fetch_one(&self.db)
        .await
        .context("insert task")?;
        row.try_into()
    }

    async fn get(&self, scope: &OwnerScope, id: Uuid) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, user_id, title, description, status, due_date, created_at, updated_at
              FROM tasks
             WHERE user_id = $1 AND id = $2
            "#,
        )
        .bind(scope.owner())
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get task")?;
        row.map(Task::try_from).transpose()
    }

    async fn list(
        &self,
        scope: &OwnerScope,
        query: &TaskQuery,
        window: PageWindow,
    ) -> anyhow::Result<TaskPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        scope.push_where(&mut count);
        query.filter.push_sql(&mut count, query.now);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.db)
            .await
            .context("count tasks")?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        scope.push_where(&mut select);
        query.filter.push_sql(&mut select, query.now);
        query.ordering.push_sql(&mut select);
        select
            .push(" LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);
        let rows = select
            .build_query_as::<TaskRow>()
            .fetch_all(&self.db)
            .await
            .context("list tasks")?;

        Ok(TaskPage {
            total: total.max(0) as u64,
            items: into_tasks(rows)?,
        })
    }

    async fn update(
        &self,
        scope: &OwnerScope,
        id: Uuid,
        changes: TaskChanges,
    ) -> anyhow::Result<Option<Task>> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE tasks SET updated_at = now()");
        if let Some(title) = changes.title {
            qb.push(", title = ").push_bind(title);
        }
        if let Some(description) = changes.description {
            qb.push(", description = ").push_bind(description);
        }
        if let Some(status) = changes.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(due_date) = changes.due_date {
            qb.push(", due_date = ").push_bind(due_date);
        }
        scope.push_where(&mut qb);
        qb.push(" AND id = ")
            .push_bind(id)
            .push(format!(" RETURNING {TASK_COLUMNS}"));

        let row = qb
            .build_query_as::<TaskRow>()
            .fetch_optional(&self.db)
            .await
            .context("update task")?;
        row.map(Task::try_from).transpose()
    }

    async fn delete(&self, scope: &OwnerScope, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE user_id = $1 AND id = $2")
            .bind(scope.owner())
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete task")?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self, scope: &OwnerScope, now: OffsetDateTime) -> anyhow::Result<TaskStats> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total");
        for status in TaskStatus::ALL {
            qb.push(", COUNT(*) FILTER (WHERE status = ")
                .push_bind(status.as_str())
                .push(format!(") AS {}", status.as_str()));
        }
        qb.push(", COUNT(*) FILTER (WHERE ");
        push_overdue_predicate(&mut qb, now);
        qb.push(") AS overdue FROM tasks");
        scope.push_where(&mut qb);

        let stats = qb
            .build_query_as::<TaskStats>()
            .fetch_one(&self.db)
            .await
            .context("task stats")?;
        Ok(stats)
    }

    async fn bulk_update_status(
        &self,
        scope: &OwnerScope,
        ids: &[Uuid],
        status: TaskStatus,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
               SET status = $1, updated_at = now()
             WHERE user_id = $2 AND id = ANY($3)
            "#,
        )
        .bind(status.as_str())
        .bind(scope.owner())
        .bind(ids)
        .execute(&self.db)
        .await
        .context("bulk update task status")?;
        Ok(result.rows_affected())
    }

    async fn bulk_delete(&self, scope: &OwnerScope, ids: &[Uuid]) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE user_id = $1 AND id = ANY($2)")
            .bind(scope.owner())
            .bind(ids)
            .execute(&self.db)
            .await
            .context("bulk delete tasks")?;
        Ok(result.rows_affected())
    }
}
