//! Task route handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tasklive_core::{DeleteResult, Document, InsertOneResult, OwnerFilter, TaskId, UpdateResult};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Fields the name/description patch may touch.
const DETAIL_FIELDS: [&str; 2] = ["name", "description"];

#[derive(Deserialize)]
pub struct ListTasksQuery {
    pub email: Option<String>,
}

/// POST /tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<Document>,
) -> Result<Json<InsertOneResult>, ApiError> {
    let committed = state.store.insert(body).await?;
    info!(task_id = %committed.result.inserted_id, "Task created");
    state.announce(&committed);
    Ok(Json(committed.result))
}

/// GET /tasks?email=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let owner = OwnerFilter::from_query(query.email);
    let tasks = state.store.find_by_owner(&owner).await?;
    Ok(Json(tasks))
}

/// DELETE /tasks/{id}
///
/// Announced by the change feed only.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResult>, ApiError> {
    let id = TaskId::parse(&id)?;
    let committed = state.store.delete(&id).await?;
    info!(task_id = %id, deleted = committed.result.deleted_count, "Task delete");
    Ok(Json(committed.result))
}

/// PUT /tasks/{id}
///
/// Sets `category` only; an absent category is stored as null.
pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Document>,
) -> Result<Json<UpdateResult>, ApiError> {
    let id = TaskId::parse(&id)?;
    let mut changes = Document::new();
    changes.insert(
        "category".to_string(),
        body.get("category").cloned().unwrap_or(Value::Null),
    );

    let committed = state.store.update_fields(&id, changes).await?;
    if committed.result.matched_count > 0 {
        state.announce(&committed);
    }
    Ok(Json(committed.result))
}

/// PUT /task/{id}
///
/// Sets whichever of `name` and `description` the body carries. Unknown ids
/// are a 404. Announced by the change feed only.
pub async fn update_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Document>,
) -> Result<Json<UpdateResult>, ApiError> {
    let id = TaskId::parse(&id)?;
    let changes: Document = body
        .into_iter()
        .filter(|(field, _)| DETAIL_FIELDS.contains(&field.as_str()))
        .collect();

    let committed = state.store.update_fields(&id, changes).await?;
    if committed.result.matched_count == 0 {
        return Err(ApiError::NotFound(id.to_string()));
    }
    Ok(Json(committed.result))
}
