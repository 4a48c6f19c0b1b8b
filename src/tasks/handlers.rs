use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, OriginalUri, Path, Query, State},
    http::{request::Parts, StatusCode, Uri},
    routing::{delete, get, patch, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    BulkDeleteRequest, BulkDeleteResponse, BulkStatusRequest, BulkUpdateResponse,
    CreateTaskRequest, Paginated, StatusUpdateRequest, TaskDetail, TaskListItem, TaskListParams,
    UpdateTaskRequest,
};
use super::filter::{TaskFilter, TaskOrdering, TaskQuery};
use super::repo_types::{TaskChanges, TaskStats};
use super::store::{OwnerScope, PageWindow};
use crate::{auth::services::AuthUser, error::ApiError, state::AppState};

// --- public routers ---

pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/stats", get(task_stats))
        .route("/tasks/bulk_update_status", post(bulk_update_status))
        .route("/tasks/bulk_delete", delete(bulk_delete))
}

pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tasks/:id",
            get(get_task)
                .put(replace_task)
                .patch(patch_task)
                .delete(delete_task),
        )
        .route("/tasks/:id/update_status", patch(update_status))
}

// --- caller ---

/// Authenticated caller whose account still exists and is active.
#[derive(Debug, Clone, Copy)]
pub struct TaskOwner(pub Uuid);

impl TaskOwner {
    fn scope(&self) -> OwnerScope {
        OwnerScope::for_user(self.0)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for TaskOwner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        if !state.tasks.owner_is_active(user_id).await? {
            warn!(user_id = %user_id, "task access by missing or disabled account");
            return Err(ApiError::Unauthorized("User not found or inactive".into()));
        }
        Ok(TaskOwner(user_id))
    }
}

// --- helpers ---

/// A malformed id can never name a visible task.
fn task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

fn requested_page(raw: Option<&str>) -> Result<u64, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(1),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|page| *page >= 1)
            .ok_or(ApiError::InvalidPage),
    }
}

/// Same path and query, with `page` replaced. Page 1 drops the parameter.
fn page_link(uri: &Uri, page: u64) -> String {
    let mut pairs: Vec<String> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && *pair != "page" && !pair.starts_with("page="))
        .map(str::to_string)
        .collect();
    if page > 1 {
        pairs.push(format!("page={page}"));
    }
    if pairs.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), pairs.join("&"))
    }
}

async fn apply_changes(
    state: &AppState,
    user: TaskOwner,
    id: Uuid,
    changes: TaskChanges,
) -> Result<Json<TaskDetail>, ApiError> {
    let task = state
        .tasks
        .update(&user.scope(), id, changes)
        .await?
        .ok_or(ApiError::NotFound)?;
    info!(user_id = %user.0, task_id = %task.id, "task updated");
    Ok(Json(TaskDetail::new(task, OffsetDateTime::now_utc())))
}

// --- handlers ---

#[instrument(skip(state, uri))]
pub async fn list_tasks(
    State(state): State<AppState>,
    user: TaskOwner,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<TaskListParams>,
) -> Result<Json<Paginated<TaskListItem>>, ApiError> {
    let filter = TaskFilter::from_params(&params).map_err(ApiError::Validation)?;
    let page = requested_page(params.page.as_deref())?;
    let page_size = u64::from(state.config.page_size);
    let now = OffsetDateTime::now_utc();
    let query = TaskQuery {
        filter,
        ordering: TaskOrdering::parse(params.ordering.as_deref()),
        now,
    };

    let offset = page
        .checked_sub(1)
        .and_then(|p| p.checked_mul(page_size))
        .and_then(|o| i64::try_from(o).ok())
        .ok_or(ApiError::InvalidPage)?;
    let window = PageWindow {
        limit: i64::from(state.config.page_size),
        offset,
    };
    let result = state.tasks.list(&user.scope(), &query, window).await?;

    let pages = result.total.div_ceil(page_size).max(1);
    if page > pages {
        return Err(ApiError::InvalidPage);
    }

    Ok(Json(Paginated {
        count: result.total,
        next: (page < pages).then(|| page_link(&uri, page + 1)),
        previous: (page > 1).then(|| page_link(&uri, page - 1)),
        results: result
            .items
            .into_iter()
            .map(|task| TaskListItem::new(task, now))
            .collect(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn create_task(
    State(state): State<AppState>,
    user: TaskOwner,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskDetail>), ApiError> {
    let Json(payload) = payload?;
    let new_task = payload.validate()?;
    let task = state.tasks.create(&user.scope(), new_task).await?;
    info!(user_id = %user.0, task_id = %task.id, "task created");
    Ok((
        StatusCode::CREATED,
        Json(TaskDetail::new(task, OffsetDateTime::now_utc())),
    ))
}

#[instrument(skip(state))]
pub async fn get_task(
    State(state): State<AppState>,
    user: TaskOwner,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>, ApiError> {
    let id = task_id(&id)?;
    let task = state
        .tasks
        .get(&user.scope(), id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(TaskDetail::new(task, OffsetDateTime::now_utc())))
}

#[instrument(skip(state, payload))]
pub async fn replace_task(
    State(state): State<AppState>,
    user: TaskOwner,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<Json<TaskDetail>, ApiError> {
    let id = task_id(&id)?;
    let Json(payload) = payload?;
    let changes = payload.validate(false)?;
    apply_changes(&state, user, id, changes).await
}

#[instrument(skip(state, payload))]
pub async fn patch_task(
    State(state): State<AppState>,
    user: TaskOwner,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<Json<TaskDetail>, ApiError> {
    let id = task_id(&id)?;
    let Json(payload) = payload?;
    let changes = payload.validate(true)?;
    apply_changes(&state, user, id, changes).await
}

#[instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<AppState>,
    user: TaskOwner,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<TaskDetail>, ApiError> {
    let id = task_id(&id)?;
    let Json(payload) = payload?;
    let changes = payload.validate()?;
    apply_changes(&state, user, id, changes).await
}

#[instrument(skip(state))]
pub async fn delete_task(
    State(state): State<AppState>,
    user: TaskOwner,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = task_id(&id)?;
    if !state.tasks.delete(&user.scope(), id).await? {
        return Err(ApiError::NotFound);
    }
    info!(user_id = %user.0, task_id = %id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn task_stats(
    State(state): State<AppState>,
    user: TaskOwner,
) -> Result<Json<TaskStats>, ApiError> {
    let stats = state
        .tasks
        .stats(&user.scope(), OffsetDateTime::now_utc())
        .await?;
    Ok(Json(stats))
}

#[instrument(skip(state, payload))]
pub async fn bulk_update_status(
    State(state): State<AppState>,
    user: TaskOwner,
    payload: Result<Json<BulkStatusRequest>, JsonRejection>,
) -> Result<Json<BulkUpdateResponse>, ApiError> {
    let Json(payload) = payload?;
    let (ids, status) = payload.validate()?;
    let updated_count = state
        .tasks
        .bulk_update_status(&user.scope(), &ids, status)
        .await?;
    info!(user_id = %user.0, requested = ids.len(), updated_count, %status, "bulk status update");
    Ok(Json(BulkUpdateResponse {
        message: format!("Updated {updated_count} tasks"),
        updated_count,
    }))
}

#[instrument(skip(state, payload))]
pub async fn bulk_delete(
    State(state): State<AppState>,
    user: TaskOwner,
    payload: Result<Json<BulkDeleteRequest>, JsonRejection>,
) -> Result<Json<BulkDeleteResponse>, ApiError> {
    let Json(payload) = payload?;
    let ids = payload.validate()?;
    let deleted_count = state.tasks.bulk_delete(&user.scope(), &ids).await?;
    info!(user_id = %user.0, requested = ids.len(), deleted_count, "bulk delete");
    Ok(Json(BulkDeleteResponse {
        message: format!("Deleted {deleted_count} tasks"),
        deleted_count,
    }))
}
