use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AccessResponse, ChangePasswordRequest, LoginRequest, LoginResponse, LogoutRequest,
            MessageResponse, ProfileUpdateRequest, RefreshRequest, RegisterRequest,
            RegisterResponse, UserProfile,
        },
        repo::{blacklist_token, duplicate_field, is_blacklisted},
        repo_types::{NewUser, User},
        services::{hash_password, verify_password, AuthUser, JwtKeys},
    },
    error::{ApiError, FieldErrors, NON_FIELD_ERRORS},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/auth/profile",
            get(get_profile).put(replace_profile).patch(patch_profile),
        )
        .route(
            "/auth/change-password",
            put(change_password).patch(change_password),
        )
}

const USERNAME_TAKEN: &str = "A user with that username already exists.";
const EMAIL_TAKEN: &str = "User with this email already exists.";

/// A unique violation that slipped past the pre-checks is still a field error.
fn conflict_or_internal(err: anyhow::Error) -> ApiError {
    match duplicate_field(&err) {
        Some("username") => ApiError::field("username", USERNAME_TAKEN),
        Some(field) => ApiError::field(field, EMAIL_TAKEN),
        None => ApiError::Internal(err),
    }
}

/// Loads the caller's account; a token for a vanished user is treated as
/// unauthenticated.
async fn current_user(state: &AppState, user_id: uuid::Uuid) -> Result<User, ApiError> {
    User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(payload) = payload?;
    let reg = payload.validate()?;

    let mut errors = FieldErrors::new();
    if User::username_taken(&state.db, &reg.username).await? {
        errors.add("username", USERNAME_TAKEN);
    }
    if User::email_taken(&state.db, &reg.email, None).await? {
        errors.add("email", EMAIL_TAKEN);
    }
    if !errors.is_empty() {
        warn!(username = %reg.username, "registration rejected: duplicate account");
        return Err(ApiError::Validation(errors));
    }

    let password_hash = hash_password(&reg.password)?;
    let user = User::create(
        &state.db,
        &NewUser {
            username: reg.username,
            email: reg.email,
            password_hash,
            first_name: reg.first_name,
            last_name: reg.last_name,
        },
    )
    .await
    .map_err(conflict_or_internal)?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user: user.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(payload) = payload?;
    let username = payload.username.trim();
    if username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::field(
            NON_FIELD_ERRORS,
            "Username and password are required.",
        ));
    }

    let invalid = || ApiError::field(NON_FIELD_ERRORS, "Invalid credentials.");
    let Some(user) = User::find_by_username(&state.db, username).await? else {
        warn!(username = %username, "login unknown username");
        return Err(invalid());
    };
    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(invalid());
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login for disabled account");
        return Err(ApiError::field(NON_FIELD_ERRORS, "User account is disabled."));
    }

    let keys = JwtKeys::from_ref(&state);
    let access = keys.sign_access(user.id)?;
    let refresh = keys.sign_refresh(user.id)?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(LoginResponse {
        access,
        refresh,
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(payload) = payload?;
    if let Some(token) = payload.refresh.as_deref() {
        let keys = JwtKeys::from_ref(&state);
        let claims = keys
            .verify_refresh(token)
            .ok()
            .filter(|c| c.sub == user_id)
            .ok_or_else(|| ApiError::BadRequest("Invalid token".into()))?;
        blacklist_token(&state.db, claims.jti, user_id, claims.expires_at()?).await?;
        info!(user_id = %user_id, jti = %claims.jti, "refresh token blacklisted");
    }
    Ok(Json(MessageResponse::new("Successfully logged out")))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<AccessResponse>, ApiError> {
    let Json(payload) = payload?;
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh)
        .map_err(|_| ApiError::Unauthorized("Token is invalid or expired".into()))?;

    if is_blacklisted(&state.db, claims.jti).await? {
        warn!(user_id = %claims.sub, jti = %claims.jti, "blacklisted refresh token used");
        return Err(ApiError::Unauthorized("Token is blacklisted".into()));
    }

    let access = keys.sign_access(claims.sub)?;
    Ok(Json(AccessResponse { access }))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserProfile>, ApiError> {
    let user = current_user(&state, user_id).await?;
    Ok(Json(user.into()))
}

async fn update_profile(
    state: &AppState,
    user_id: uuid::Uuid,
    payload: ProfileUpdateRequest,
    partial: bool,
) -> Result<Json<UserProfile>, ApiError> {
    let user = current_user(state, user_id).await?;
    let changes = payload.validate(partial)?;
    if let Some(email) = changes.email.as_deref() {
        if User::email_taken(&state.db, email, Some(user.id)).await? {
            return Err(ApiError::field("email", EMAIL_TAKEN));
        }
    }
    let user = User::update_profile(&state.db, user.id, &changes)
        .await
        .map_err(conflict_or_internal)?;
    info!(user_id = %user.id, "profile updated");
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn replace_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ProfileUpdateRequest>, JsonRejection>,
) -> Result<Json<UserProfile>, ApiError> {
    let Json(payload) = payload?;
    update_profile(&state, user_id, payload, false).await
}

#[instrument(skip(state, payload))]
pub async fn patch_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ProfileUpdateRequest>, JsonRejection>,
) -> Result<Json<UserProfile>, ApiError> {
    let Json(payload) = payload?;
    update_profile(&state, user_id, payload, true).await
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(payload) = payload?;
    let user = current_user(&state, user_id).await?;
    payload.validate(&user.username)?;

    if !verify_password(&payload.old_password, &user.password_hash)? {
        warn!(user_id = %user.id, "password change with wrong old password");
        return Err(ApiError::field("old_password", "Old password is incorrect."));
    }

    let hash = hash_password(&payload.new_password)?;
    User::set_password(&state.db, user.id, &hash).await?;
    info!(user_id = %user.id, "password changed");
    Ok(Json(MessageResponse::new("Password updated successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn app() -> Router {
        crate::auth::router().with_state(AppState::fake())
    }

    #[test]
    fn non_conflict_errors_stay_internal() {
        let err = conflict_or_internal(anyhow::anyhow!("connection reset"));
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn profile_requires_credentials() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/auth/profile")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_rejects_refresh_token_as_bearer() {
        let state = AppState::fake();
        let token = JwtKeys::from_ref(&state)
            .sign_refresh(uuid::Uuid::new_v4())
            .unwrap();
        let response = crate::auth::router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .uri("/auth/profile")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_before_touching_storage() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/refresh")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"refresh":"not-a-jwt"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_validates_before_touching_storage() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/register")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        r#"{"username":"ada","email":"nope","password":"x","password_confirm":"x"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["email"].is_array());
        assert!(body["password"].is_array());
    }

    #[tokio::test]
    async fn logout_with_foreign_refresh_token_is_rejected() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let caller = uuid::Uuid::new_v4();
        let access = keys.sign_access(caller).unwrap();
        let someone_elses = keys.sign_refresh(uuid::Uuid::new_v4()).unwrap();
        let response = crate::auth::router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/logout")
                    .header("Authorization", format!("Bearer {access}"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(format!(r#"{{"refresh":"{someone_elses}"}}"#)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_without_token_is_a_no_op() {
        let state = AppState::fake();
        let access = JwtKeys::from_ref(&state)
            .sign_access(uuid::Uuid::new_v4())
            .unwrap();
        let response = crate::auth::router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/logout")
                    .header("Authorization", format!("Bearer {access}"))
                    .header("Content-Type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
