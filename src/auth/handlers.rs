use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, PublicUser, RefreshRequest,
            RegisterRequest, RegisterResponse,
        },
        extractors::{AuthUser, JsonBody},
        services,
    },
    error::AuthResult,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(get_me))
        .route("/auth/password", put(change_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<RegisterResponse>)> {
    let user = services::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful. Please wait for admin approval.".into(),
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AuthResult<Json<AuthResponse>> {
    Ok(Json(services::login(&state, payload).await?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> AuthResult<Json<AuthResponse>> {
    Ok(Json(services::refresh(&state, &payload.refresh_token).await?))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> AuthResult<Json<PublicUser>> {
    let user = services::current_user(&state, &principal).await?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> AuthResult<Json<AuthResponse>> {
    Ok(Json(
        services::change_password(&state, &principal, payload).await?,
    ))
}
