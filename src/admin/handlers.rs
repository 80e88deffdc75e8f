use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    admin::services,
    auth::{
        dto::{CreateUserRequest, MessageResponse, PublicUser, UpdateRoleRequest, UpdateStatusRequest},
        extractors::{AuthUser, JsonBody},
        repo_types::User,
    },
    error::AuthResult,
    state::AppState,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route("/admin/pending-registrations", get(pending_registrations))
        .route("/admin/users/:id", delete(delete_user))
        .route("/admin/users/:id/status", put(update_status))
        .route("/admin/users/:id/role", put(update_role))
        .route("/users/:id", get(get_user))
}

fn public(users: Vec<User>) -> Json<Vec<PublicUser>> {
    Json(users.iter().map(PublicUser::from).collect())
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> AuthResult<Json<Vec<PublicUser>>> {
    Ok(public(services::list_users(&state, &principal).await?))
}

#[instrument(skip(state))]
pub async fn pending_registrations(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> AuthResult<Json<Vec<PublicUser>>> {
    Ok(public(services::pending_registrations(&state, &principal).await?))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AuthResult<Json<PublicUser>> {
    let user = services::get_user(&state, &principal, id).await?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    JsonBody(payload): JsonBody<CreateUserRequest>,
) -> AuthResult<(StatusCode, Json<PublicUser>)> {
    let user = services::create_user(&state, &principal, payload).await?;
    Ok((StatusCode::CREATED, Json(PublicUser::from(&user))))
}

#[instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdateStatusRequest>,
) -> AuthResult<Json<PublicUser>> {
    let user = services::update_status(&state, &principal, id, payload).await?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn update_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdateRoleRequest>,
) -> AuthResult<Json<PublicUser>> {
    let user = services::update_role(&state, &principal, id, payload.role).await?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AuthResult<Json<MessageResponse>> {
    services::delete_user(&state, &principal, id).await?;
    Ok(Json(MessageResponse {
        message: "User deleted successfully".into(),
    }))
}
