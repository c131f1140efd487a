use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get},
    Json, Router,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::dto::CreateFlowerRequest;
use crate::{
    auth::{require_auth, AuthUser},
    db::{Flower, NewFlower},
    error::AppError,
    extract::ApiJson,
    sites::handlers::ensure_visible,
    state::AppState,
    validation::parse_id,
};

/// Flower routes are always behind the token gate.
pub fn flower_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/flowers", get(list_flowers).post(create_flower))
        .route("/flowers/user", get(list_user_flowers))
        .route("/flowers/:id", delete(delete_flower))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
}

/// Only the grower may remove a flower; to anyone else it does not exist.
pub(crate) fn ensure_grower(flower: &Flower, caller: Uuid) -> Result<(), AppError> {
    if flower.grower == Some(caller) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("flower {}", flower.id)))
    }
}

#[instrument(skip(state, payload))]
pub async fn create_flower(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<CreateFlowerRequest>,
) -> Result<(StatusCode, Json<Flower>), AppError> {
    let grower = state.db.get_user(user_id).await.map_err(|e| match e {
        AppError::NotFound(_) => {
            warn!(user_id = %user_id, "token for unknown user");
            AppError::Authorization
        }
        other => other,
    })?;

    let site_name = match payload.site {
        Some(site_id) => {
            let unknown = || AppError::Validation(format!("site {site_id} does not exist"));
            let site = state.db.get_site(site_id).await.map_err(|e| match e {
                AppError::NotFound(_) => unknown(),
                other => other,
            })?;
            ensure_visible(&site, Some(user_id)).map_err(|_| unknown())?;
            Some(site.name)
        }
        None => None,
    };

    let flower = state
        .db
        .add_flower(NewFlower {
            name: payload.name.trim().to_string(),
            latin_name: payload.latin_name.trim().to_string(),
            grower: Some(grower.id),
            grower_email: Some(grower.email),
            site: payload.site,
            site_name,
        })
        .await?;

    info!(flower_id = %flower.id, user_id = %user_id, "flower added");
    Ok((StatusCode::CREATED, Json(flower)))
}

#[instrument(skip(state))]
pub async fn list_flowers(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Flower>>, AppError> {
    let flowers = state.db.get_flowers().await?;
    debug!(user_id = %user_id, count = flowers.len(), "flowers listed");
    Ok(Json(flowers))
}

/// Flowers grown by the caller.
#[instrument(skip(state))]
pub async fn list_user_flowers(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Flower>>, AppError> {
    Ok(Json(state.db.get_user_flowers(user_id).await?))
}

#[instrument(skip(state))]
pub async fn delete_flower(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    let flower = state.db.get_flower(id).await?;
    ensure_grower(&flower, user_id)?;

    if !state.db.delete_flower(id).await? {
        return Err(AppError::NotFound(format!("flower {id}")));
    }
    info!(flower_id = %id, user_id = %user_id, "flower deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn flower(grower: Option<Uuid>) -> Flower {
        Flower {
            id: Uuid::new_v4(),
            name: "Aster".into(),
            latin_name: "Aster amellus".into(),
            added_time: OffsetDateTime::now_utc(),
            grower,
            grower_email: None,
            site: None,
            site_name: None,
        }
    }

    #[test]
    fn only_the_grower_passes() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(ensure_grower(&flower(Some(a)), a).is_ok());
        assert!(matches!(ensure_grower(&flower(Some(a)), b), Err(AppError::NotFound(_))));
        assert!(matches!(ensure_grower(&flower(None), b), Err(AppError::NotFound(_))));
    }
}
