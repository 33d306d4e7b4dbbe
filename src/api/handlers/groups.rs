//! Group handlers: list, create, get, delete.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{GroupDetailResponse, GroupListResponse, GroupSummaryDto};
use crate::app_state::AppState;
use crate::domain::GroupId;
use crate::error::{ErrorResponse, HubError};

/// `GET /groups` — List all groups.
#[utoipa::path(
    get,
    path = "/api/v1/groups",
    tag = "Groups",
    summary = "List groups",
    description = "Returns every group with its capacity and fill state, accepting groups first.",
    responses(
        (status = 200, description = "Group list", body = GroupListResponse),
    )
)]
pub async fn list_groups(State(state): State<AppState>) -> impl IntoResponse {
    let manager = state.hub.groups();
    let data: Vec<GroupSummaryDto> = manager
        .groups()
        .await
        .iter()
        .map(|g| GroupSummaryDto::from(g.as_ref()))
        .collect();

    Json(GroupListResponse {
        data,
        accepting: manager.accepting_count().await,
        full: manager.full_count().await,
    })
}

/// `POST /groups` — Create an empty group.
#[utoipa::path(
    post,
    path = "/api/v1/groups",
    tag = "Groups",
    summary = "Create a group",
    description = "Creates an empty group with the configured capacity. Sessions join it by ID.",
    responses(
        (status = 201, description = "Group created", body = GroupSummaryDto),
    )
)]
pub async fn create_group(State(state): State<AppState>) -> impl IntoResponse {
    let group = state.hub.groups().new_group().await;
    (StatusCode::CREATED, Json(GroupSummaryDto::from(group.as_ref())))
}

/// `GET /groups/{id}` — Group details including members.
///
/// # Errors
///
/// Returns [`HubError::GroupNotFound`] if the group does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/groups/{id}",
    tag = "Groups",
    summary = "Get group details",
    params(
        ("id" = String, Path, description = "Group ID"),
    ),
    responses(
        (status = 200, description = "Group details", body = GroupDetailResponse),
        (status = 404, description = "Group not found", body = ErrorResponse),
    )
)]
pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    let id = GroupId::from(id);
    let group = state
        .hub
        .groups()
        .get(&id)
        .await
        .ok_or(HubError::GroupNotFound(id))?;

    let members = group
        .member_ids()
        .await
        .into_iter()
        .map(String::from)
        .collect();

    Ok(Json(GroupDetailResponse {
        group: GroupSummaryDto::from(group.as_ref()),
        members,
    }))
}

/// `DELETE /groups/{id}` — Remove a group.
///
/// # Errors
///
/// Returns [`HubError::GroupNotFound`] if the group does not exist.
#[utoipa::path(
    delete,
    path = "/api/v1/groups/{id}",
    tag = "Groups",
    summary = "Delete a group",
    description = "Removes the group and detaches its members. Sessions stay connected.",
    params(
        ("id" = String, Path, description = "Group ID"),
    ),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 404, description = "Group not found", body = ErrorResponse),
    )
)]
pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    let _ = state.hub.groups().remove_group(&GroupId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Group management routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/{id}", get(get_group).delete(delete_group))
}
