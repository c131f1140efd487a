use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest, RoleRequest},
        extractors::{require_auth, AuthUser},
        password::{hash_password, verify_password},
    },
    db::{NewUser, User},
    error::AppError,
    extract::ApiJson,
    state::AppState,
    validation::{normalize_email, validate_registration},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

pub fn user_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/user", get(get_me))
        .route("/user/role", put(set_role))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
}

fn issue_tokens(state: &AppState, user: User) -> Result<AuthResponse, AppError> {
    let token = state.keys.sign_access(user.id)?;
    let refresh_token = state.keys.sign_refresh(user.id)?;
    Ok(AuthResponse {
        token,
        refresh_token,
        user: user.into(),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    let email = normalize_email(&payload.email);
    validate_registration(&payload.username, &email, &payload.password).map_err(|e| {
        warn!(email = %email, error = %e, "registration rejected");
        e
    })?;

    // fast path only; the store's unique constraint is what actually prevents duplicates
    if state.db.count_users_with_email(&email).await? > 0 {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let password_hash = hash_password(&payload.password)?;
    let user = state
        .db
        .create_user(NewUser {
            username: payload.username.trim().to_string(),
            email,
            password_hash,
            role: payload.role,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = normalize_email(&payload.email);

    let user = match state.db.get_user_by_email(&email).await {
        Ok(u) => u,
        Err(AppError::NotFound(_)) => {
            warn!(email = %email, "login unknown email");
            return Err(AppError::Authentication);
        }
        Err(e) => return Err(e),
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AppError::Authentication);
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(issue_tokens(&state, user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let claims = state.keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::Authorization
    })?;

    let user = state.db.get_user(claims.sub).await.map_err(|e| match e {
        AppError::NotFound(_) => AppError::Authorization,
        other => other,
    })?;

    Ok(Json(issue_tokens(&state, user)?))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.db.get_user(user_id).await.map_err(|e| match e {
        AppError::NotFound(_) => {
            warn!(user_id = %user_id, "token for unknown user");
            AppError::Authorization
        }
        other => other,
    })?;
    Ok(Json(user.into()))
}

/// Changes the caller's default role.
#[instrument(skip(state, payload))]
pub async fn set_role(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<RoleRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state
        .db
        .set_user_role(user_id, payload.role)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => {
                warn!(user_id = %user_id, "token for unknown user");
                AppError::Authorization
            }
            other => other,
        })?;
    info!(user_id = %user.id, role = ?user.role, "role changed");
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_serialization() {
        let response = PublicUser {
            id: uuid::Uuid::new_v4(),
            username: "rose".to_string(),
            email: "test@example.com".to_string(),
            role: crate::db::Role::Retailer,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("_id"));
        assert!(!json.contains("password"));
        assert!(json.contains(r#""role":"retailer""#));
    }
}
