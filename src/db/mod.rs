//! Persistence layer. Handlers talk to the [`Database`] trait only, so the
//! Postgres store and the in-memory store are interchangeable.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryDatabase;
pub use models::{Flower, Image, NewFlower, NewImage, NewSite, NewUser, Role, Site, User};
pub use postgres::PgDatabase;

/// Storage operations for users, sites, flowers and image metadata.
///
/// Connecting is the concrete store's constructor (see [`PgDatabase::connect`]);
/// the resulting handle is shared for the whole process and never reconnected.
#[async_trait]
pub trait Database: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), AppError>;
    /// Releases the underlying connection. Called once at shutdown.
    async fn disconnect(&self) -> Result<(), AppError>;
    /// Removes every user, site, flower and image row. Test and setup use only.
    async fn clear(&self) -> Result<(), AppError>;

    /// Stores a flower with a fresh id and server-side `added_time`.
    async fn add_flower(&self, flower: NewFlower) -> Result<Flower, AppError>;
    async fn get_flowers(&self) -> Result<Vec<Flower>, AppError>;
    /// Flowers whose grower is `user_id`.
    async fn get_user_flowers(&self, user_id: Uuid) -> Result<Vec<Flower>, AppError>;
    /// Fails with [`AppError::NotFound`] when no flower has this id.
    async fn get_flower(&self, id: Uuid) -> Result<Flower, AppError>;
    /// `Ok(true)` iff a flower was removed.
    async fn delete_flower(&self, id: Uuid) -> Result<bool, AppError>;

    async fn add_site(&self, site: NewSite) -> Result<Site, AppError>;
    /// Fails with [`AppError::NotFound`] when no site has this id.
    async fn get_site(&self, id: Uuid) -> Result<Site, AppError>;
    /// Sites without a parent.
    async fn get_root_sites(&self) -> Result<Vec<Site>, AppError>;
    async fn get_user_root_sites(&self, user_id: Uuid) -> Result<Vec<Site>, AppError>;
    /// Removes one site. Child sites and flowers keep their (now dangling) reference.
    async fn delete_site(&self, id: Uuid) -> Result<bool, AppError>;

    /// Fails with [`AppError::Conflict`] when the e-mail is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, AppError>;
    async fn count_users_with_email(&self, email: &str) -> Result<i64, AppError>;
    async fn get_user_by_email(&self, email: &str) -> Result<User, AppError>;
    async fn get_user(&self, id: Uuid) -> Result<User, AppError>;
    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<User, AppError>;

    async fn add_image(&self, image: NewImage) -> Result<Image, AppError>;
    async fn get_image(&self, id: Uuid) -> Result<Image, AppError>;
    async fn get_image_by_file_name(&self, file_name: &str) -> Result<Image, AppError>;
    /// Images attached to a flower or site, oldest first.
    async fn get_entity_images(&self, entity: Uuid) -> Result<Vec<Image>, AppError>;
    async fn delete_image(&self, id: Uuid) -> Result<bool, AppError>;
    /// Marks this image as its entity's favorite and clears the flag on the
    /// entity's other images, atomically.
    async fn set_favorite_image(&self, id: Uuid) -> Result<Image, AppError>;
}
