use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, GoogleAuthRequest, PublicUser, SigninRequest, SignupRequest},
        jwt::AuthUser,
        services,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/google-auth", post(google_auth))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    services::signup(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn signin(
    State(state): State<AppState>,
    Json(payload): Json<SigninRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    services::signin(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn google_auth(
    State(state): State<AppState>,
    Json(payload): Json<GoogleAuthRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    services::google_auth(&state, &payload.access_token)
        .await
        .map(Json)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    let user = services::current_user(&state, user_id).await?;
    Ok(Json(PublicUser {
        profile_img: user.profile_img,
        username: user.username,
        fullname: user.fullname,
    }))
}
