use std::time::Duration;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::ImageResponse;
use crate::{
    auth::{require_auth, AuthUser},
    db::{Flower, Image, NewImage, Site},
    error::AppError,
    flowers::handlers::ensure_grower,
    sites::handlers::ensure_visible,
    state::AppState,
    validation::parse_id,
};

const URL_TTL: Duration = Duration::from_secs(30 * 60);

/// Image routes are always behind the token gate.
pub fn image_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/images", post(upload_image))
        .route("/images/entity/:id", get(list_entity_images))
        .route("/images/:image", get(get_image_file).delete(delete_image))
        .route("/images/:image/favorite", put(favorite_image))
        .layer(DefaultBodyLimit::max(state.config.max_image_bytes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
}

/// What an image can illustrate.
enum Entity {
    Flower(Flower),
    Site(Site),
}

impl Entity {
    /// Flowers are listed to every signed-in user, so their pictures are too.
    fn ensure_viewable(&self, caller: Uuid) -> Result<(), AppError> {
        match self {
            Entity::Flower(_) => Ok(()),
            Entity::Site(site) => ensure_visible(site, Some(caller)),
        }
    }

    fn ensure_attachable(&self, caller: Uuid) -> Result<(), AppError> {
        match self {
            Entity::Flower(flower) => ensure_grower(flower, caller),
            Entity::Site(site) => ensure_visible(site, Some(caller)),
        }
    }
}

async fn find_entity(state: &AppState, id: Uuid) -> Result<Option<Entity>, AppError> {
    match state.db.get_flower(id).await {
        Ok(flower) => return Ok(Some(Entity::Flower(flower))),
        Err(AppError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    match state.db.get_site(id).await {
        Ok(site) => Ok(Some(Entity::Site(site))),
        Err(AppError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// The uploader always sees their own images, even after the entity is gone.
async fn ensure_image_viewable(state: &AppState, image: &Image, caller: Uuid) -> Result<(), AppError> {
    if image.owner == caller {
        return Ok(());
    }
    let not_found = || AppError::NotFound(format!("image {}", image.id));
    let entity = find_entity(state, image.entity).await?.ok_or_else(not_found)?;
    entity.ensure_viewable(caller).map_err(|_| not_found())
}

fn ensure_uploader(image: &Image, caller: Uuid) -> Result<(), AppError> {
    if image.owner == caller {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("image {}", image.id)))
    }
}

pub(crate) fn ext_from_mime(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

struct Upload {
    entity: Uuid,
    note: String,
    content_type: String,
    body: Bytes,
}

/// Reads the `entity`, `note` and `image` form fields. Unknown fields are skipped.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut entity = None;
    let mut note = String::new();
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "entity" => entity = Some(parse_id(&field.text().await?)?),
            "note" => note = field.text().await?.trim().to_string(),
            "image" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                file = Some((content_type, field.bytes().await?));
            }
            _ => {}
        }
    }

    let entity = entity.ok_or_else(|| AppError::Validation("entity is required".into()))?;
    let (content_type, body) =
        file.ok_or_else(|| AppError::Validation("image is required".into()))?;
    if body.is_empty() {
        return Err(AppError::Validation("image is empty".into()));
    }
    Ok(Upload {
        entity,
        note,
        content_type,
        body,
    })
}

async fn with_url(state: &AppState, image: Image) -> Result<ImageResponse, AppError> {
    let url = state.storage.presign_get(&image.file_name, URL_TTL).await?;
    Ok(ImageResponse { image, url })
}

/// Multipart upload attaching one picture to a flower or site the caller may edit.
#[instrument(skip(state, multipart))]
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ImageResponse>), AppError> {
    let upload = read_upload(multipart?).await?;

    let ext = ext_from_mime(&upload.content_type).ok_or_else(|| {
        AppError::Validation(format!("unsupported image type: {}", upload.content_type))
    })?;

    let unknown = || AppError::Validation(format!("entity {} does not exist", upload.entity));
    let entity = find_entity(&state, upload.entity).await?.ok_or_else(unknown)?;
    entity.ensure_attachable(user_id).map_err(|_| unknown())?;

    let id = Uuid::new_v4();
    let file_name = format!("{id}.{ext}");
    let size = upload.body.len();
    state
        .storage
        .put_object(&file_name, upload.body, &upload.content_type)
        .await?;

    let image = match state
        .db
        .add_image(NewImage {
            id,
            entity: upload.entity,
            file_name: file_name.clone(),
            content_type: upload.content_type,
            note: upload.note,
            owner: user_id,
        })
        .await
    {
        Ok(image) => image,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete_object(&file_name).await {
                warn!(file_name = %file_name, error = %cleanup, "orphaned object after failed insert");
            }
            return Err(e);
        }
    };

    info!(image_id = %image.id, entity = %image.entity, size, "image uploaded");
    Ok((StatusCode::CREATED, Json(with_url(&state, image).await?)))
}

#[instrument(skip(state))]
pub async fn list_entity_images(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<ImageResponse>>, AppError> {
    let id = parse_id(&id)?;
    let entity = find_entity(&state, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("entity {id}")))?;
    entity.ensure_viewable(user_id)?;

    let images = state.db.get_entity_images(id).await?;
    let mut out = Vec::with_capacity(images.len());
    for image in images {
        out.push(with_url(&state, image).await?);
    }
    Ok(Json(out))
}

/// Raw image bytes by stored file name.
#[instrument(skip(state))]
pub async fn get_image_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let image = state.db.get_image_by_file_name(&file_name).await?;
    ensure_image_viewable(&state, &image, user_id).await?;

    let body = state.storage.get_object(&image.file_name).await?;
    Ok(([(header::CONTENT_TYPE, image.content_type)], body).into_response())
}

#[instrument(skip(state))]
pub async fn delete_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    let image = state.db.get_image(id).await?;
    ensure_uploader(&image, user_id)?;

    if !state.db.delete_image(id).await? {
        return Err(AppError::NotFound(format!("image {id}")));
    }
    if let Err(e) = state.storage.delete_object(&image.file_name).await {
        warn!(file_name = %image.file_name, error = %e, "failed to remove stored object");
    }
    info!(image_id = %id, user_id = %user_id, "image deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Makes this image the one shown first for its entity.
#[instrument(skip(state))]
pub async fn favorite_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ImageResponse>, AppError> {
    let id = parse_id(&id)?;
    let image = state.db.get_image(id).await?;
    ensure_uploader(&image, user_id)?;

    let image = state.db.set_favorite_image(id).await?;
    info!(image_id = %id, entity = %image.entity, "favorite image set");
    Ok(Json(with_url(&state, image).await?))
}
