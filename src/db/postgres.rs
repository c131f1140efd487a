use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{Flower, Image, NewFlower, NewImage, NewSite, NewUser, Role, Site, User};
use super::Database;
use crate::config::DatabaseConfig;
use crate::error::AppError;
use crate::validation::{validate_new_flower, validate_new_site};

const FLOWER_COLUMNS: &str =
    "id, name, latin_name, added_time, grower, grower_email, site, site_name";

const SITE_SELECT: &str = r#"
    SELECT s.id, s.name, s.added_time, s.note, s.parent, s.owner,
           ARRAY(SELECT f.id FROM flowers f WHERE f.site = s.id ORDER BY f.added_time, f.id) AS flowers
    FROM sites s
"#;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, created_at";

const IMAGE_COLUMNS: &str =
    "id, entity, file_name, content_type, note, favorite, owner, added_time";

/// PostgreSQL unique_violation
const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

/// Production store backed by a sqlx connection pool.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Opens the pool and checks that the server answers.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url)
            .await?;
        let db = Self { pool };
        db.ping().await?;
        info!(max_connections = config.max_connections, "connected to database");
        Ok(db)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AppError> {
        self.pool.close().await;
        info!("database pool closed");
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        sqlx::query("TRUNCATE images, flowers, sites, users")
            .execute(&self.pool)
            .await?;
        debug!("all collections truncated");
        Ok(())
    }

    async fn add_flower(&self, flower: NewFlower) -> Result<Flower, AppError> {
        validate_new_flower(&flower)?;
        let created = sqlx::query_as::<_, Flower>(&format!(
            r#"
            INSERT INTO flowers (name, latin_name, grower, grower_email, site, site_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {FLOWER_COLUMNS}
            "#
        ))
        .bind(&flower.name)
        .bind(&flower.latin_name)
        .bind(flower.grower)
        .bind(&flower.grower_email)
        .bind(flower.site)
        .bind(&flower.site_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_flowers(&self) -> Result<Vec<Flower>, AppError> {
        let rows = sqlx::query_as::<_, Flower>(&format!(
            "SELECT {FLOWER_COLUMNS} FROM flowers ORDER BY added_time, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_user_flowers(&self, user_id: Uuid) -> Result<Vec<Flower>, AppError> {
        let rows = sqlx::query_as::<_, Flower>(&format!(
            "SELECT {FLOWER_COLUMNS} FROM flowers WHERE grower = $1 ORDER BY added_time, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_flower(&self, id: Uuid) -> Result<Flower, AppError> {
        sqlx::query_as::<_, Flower>(&format!("SELECT {FLOWER_COLUMNS} FROM flowers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flower {id}")))
    }

    async fn delete_flower(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM flowers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_site(&self, site: NewSite) -> Result<Site, AppError> {
        validate_new_site(&site)?;
        let created = sqlx::query_as::<_, Site>(
            r#"
            INSERT INTO sites (name, note, parent, owner)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, added_time, note, parent, owner, '{}'::uuid[] AS flowers
            "#,
        )
        .bind(&site.name)
        .bind(&site.note)
        .bind(site.parent)
        .bind(site.owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_site(&self, id: Uuid) -> Result<Site, AppError> {
        sqlx::query_as::<_, Site>(&format!("{SITE_SELECT} WHERE s.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("site {id}")))
    }

    async fn get_root_sites(&self) -> Result<Vec<Site>, AppError> {
        let rows = sqlx::query_as::<_, Site>(&format!(
            "{SITE_SELECT} WHERE s.parent IS NULL ORDER BY s.added_time, s.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_user_root_sites(&self, user_id: Uuid) -> Result<Vec<Site>, AppError> {
        let rows = sqlx::query_as::<_, Site>(&format!(
            "{SITE_SELECT} WHERE s.parent IS NULL AND s.owner = $1 ORDER BY s.added_time, s.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_site(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, AppError> {
        // the unique index on users.email decides races between concurrent registrations
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Email already registered".into())
            } else {
                AppError::Connection(e)
            }
        })
    }

    async fn count_users_with_email(&self, email: &str) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = $1")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("user".into()))
    }

    async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {id}")))
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id}")))
    }

    async fn add_image(&self, image: NewImage) -> Result<Image, AppError> {
        sqlx::query_as::<_, Image>(&format!(
            r#"
            INSERT INTO images (id, entity, file_name, content_type, note, owner)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {IMAGE_COLUMNS}
            "#
        ))
        .bind(image.id)
        .bind(image.entity)
        .bind(&image.file_name)
        .bind(&image.content_type)
        .bind(&image.note)
        .bind(image.owner)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("image {} exists", image.file_name))
            } else {
                AppError::Connection(e)
            }
        })
    }

    async fn get_image(&self, id: Uuid) -> Result<Image, AppError> {
        sqlx::query_as::<_, Image>(&format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("image {id}")))
    }

    async fn get_image_by_file_name(&self, file_name: &str) -> Result<Image, AppError> {
        sqlx::query_as::<_, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE file_name = $1"
        ))
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("image {file_name}")))
    }

    async fn get_entity_images(&self, entity: Uuid) -> Result<Vec<Image>, AppError> {
        let rows = sqlx::query_as::<_, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE entity = $1 ORDER BY added_time, id"
        ))
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_image(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_favorite_image(&self, id: Uuid) -> Result<Image, AppError> {
        let mut tx = self.pool.begin().await?;

        // clear first: the partial unique index is checked row by row
        let cleared = sqlx::query(
            r#"
            UPDATE images SET favorite = false
            WHERE favorite AND id <> $1
              AND entity = (SELECT entity FROM images WHERE id = $1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let image = sqlx::query_as::<_, Image>(&format!(
            "UPDATE images SET favorite = true WHERE id = $1 RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("favorite changed concurrently".into())
            } else {
                AppError::Connection(e)
            }
        })?
        .ok_or_else(|| AppError::NotFound(format!("image {id}")))?;

        tx.commit().await?;
        debug!(image_id = %id, cleared = cleared.rows_affected(), "favorite image set");
        Ok(image)
    }
}
