use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::CreateSiteRequest;
use crate::{
    auth::{require_auth, MaybeAuthUser},
    db::{NewSite, Site},
    error::AppError,
    extract::ApiJson,
    state::AppState,
    validation::parse_id,
};

/// Site routes. They sit behind the token gate only when `protect_sites` is set.
pub fn site_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/sites", get(list_root_sites).post(create_site))
        .route("/sites/:id", get(get_site).delete(delete_site));

    if state.config.protect_sites {
        router.route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
    } else {
        router
    }
}

/// An owned site exists only for its owner, with or without a token. Sites
/// created anonymously are shared.
pub(crate) fn ensure_visible(site: &Site, caller: Option<Uuid>) -> Result<(), AppError> {
    match site.owner {
        Some(owner) if caller != Some(owner) => Err(AppError::NotFound(format!("site {}", site.id))),
        _ => Ok(()),
    }
}

#[instrument(skip(state, payload))]
pub async fn create_site(
    State(state): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    ApiJson(payload): ApiJson<CreateSiteRequest>,
) -> Result<(StatusCode, Json<Site>), AppError> {
    if let Some(parent_id) = payload.parent {
        let parent = state.db.get_site(parent_id).await.map_err(|e| match e {
            AppError::NotFound(_) => AppError::Validation(format!("parent site {parent_id} does not exist")),
            other => other,
        })?;
        ensure_visible(&parent, caller).map_err(|_| {
            AppError::Validation(format!("parent site {parent_id} does not exist"))
        })?;
    }

    let site = state
        .db
        .add_site(NewSite {
            name: payload.name.trim().to_string(),
            note: payload.note,
            parent: payload.parent,
            owner: caller,
        })
        .await?;

    info!(site_id = %site.id, parent = ?site.parent, "site added");
    Ok((StatusCode::CREATED, Json(site)))
}

/// Root sites. An authenticated caller sees their own, anonymous callers see
/// the unowned ones.
#[instrument(skip(state))]
pub async fn list_root_sites(
    State(state): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
) -> Result<Json<Vec<Site>>, AppError> {
    let sites = match caller {
        Some(user_id) => state.db.get_user_root_sites(user_id).await?,
        None => state
            .db
            .get_root_sites()
            .await?
            .into_iter()
            .filter(|s| s.owner.is_none())
            .collect(),
    };
    Ok(Json(sites))
}

#[instrument(skip(state))]
pub async fn get_site(
    State(state): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    Path(id): Path<String>,
) -> Result<Json<Site>, AppError> {
    let id = parse_id(&id)?;
    let site = state.db.get_site(id).await?;
    ensure_visible(&site, caller)?;
    Ok(Json(site))
}

/// Removes one site. Children and flowers keep their reference to it.
#[instrument(skip(state))]
pub async fn delete_site(
    State(state): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    let site = state.db.get_site(id).await?;
    ensure_visible(&site, caller)?;

    if !state.db.delete_site(id).await? {
        return Err(AppError::NotFound(format!("site {id}")));
    }
    info!(site_id = %id, "site deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn site(owner: Option<Uuid>) -> Site {
        Site {
            id: Uuid::new_v4(),
            name: "Garden".into(),
            added_time: OffsetDateTime::now_utc(),
            note: String::new(),
            parent: None,
            flowers: Vec::new(),
            owner,
        }
    }

    #[test]
    fn visibility_rules() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(ensure_visible(&site(Some(a)), Some(a)).is_ok());
        assert!(matches!(
            ensure_visible(&site(Some(a)), None),
            Err(AppError::NotFound(_))
        ));
        assert!(ensure_visible(&site(None), None).is_ok());
        assert!(ensure_visible(&site(None), Some(b)).is_ok());
        assert!(matches!(
            ensure_visible(&site(Some(a)), Some(b)),
            Err(AppError::NotFound(_))
        ));
    }
}
