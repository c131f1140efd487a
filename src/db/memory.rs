use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::models::{Flower, Image, NewFlower, NewImage, NewSite, NewUser, Role, Site, User};
use super::Database;
use crate::error::AppError;
use crate::validation::{validate_new_flower, validate_new_site};

#[derive(Default)]
struct Collections {
    users: Vec<User>,
    sites: Vec<Site>,
    flowers: Vec<Flower>,
    images: Vec<Image>,
}

impl Collections {
    /// Fills `Site::flowers` from the flowers that currently point at the site.
    fn hydrate(&self, site: &Site) -> Site {
        let mut site = site.clone();
        site.flowers = self
            .flowers
            .iter()
            .filter(|f| f.site == Some(site.id))
            .map(|f| f.id)
            .collect();
        site
    }
}

/// Process-local store. Keeps insertion order and needs no running database.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: RwLock<Collections>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        *inner = Collections::default();
        debug!("memory store cleared");
        Ok(())
    }

    async fn add_flower(&self, flower: NewFlower) -> Result<Flower, AppError> {
        validate_new_flower(&flower)?;
        let stored = Flower {
            id: Uuid::new_v4(),
            name: flower.name,
            latin_name: flower.latin_name,
            added_time: OffsetDateTime::now_utc(),
            grower: flower.grower,
            grower_email: flower.grower_email,
            site: flower.site,
            site_name: flower.site_name,
        };
        self.inner.write().await.flowers.push(stored.clone());
        Ok(stored)
    }

    async fn get_flowers(&self) -> Result<Vec<Flower>, AppError> {
        Ok(self.inner.read().await.flowers.clone())
    }

    async fn get_user_flowers(&self, user_id: Uuid) -> Result<Vec<Flower>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .flowers
            .iter()
            .filter(|f| f.grower == Some(user_id))
            .cloned()
            .collect())
    }

    async fn get_flower(&self, id: Uuid) -> Result<Flower, AppError> {
        self.inner
            .read()
            .await
            .flowers
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("flower {id}")))
    }

    async fn delete_flower(&self, id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let before = inner.flowers.len();
        inner.flowers.retain(|f| f.id != id);
        Ok(inner.flowers.len() < before)
    }

    async fn add_site(&self, site: NewSite) -> Result<Site, AppError> {
        validate_new_site(&site)?;
        let stored = Site {
            id: Uuid::new_v4(),
            name: site.name,
            added_time: OffsetDateTime::now_utc(),
            note: site.note,
            parent: site.parent,
            flowers: Vec::new(),
            owner: site.owner,
        };
        self.inner.write().await.sites.push(stored.clone());
        Ok(stored)
    }

    async fn get_site(&self, id: Uuid) -> Result<Site, AppError> {
        let inner = self.inner.read().await;
        inner
            .sites
            .iter()
            .find(|s| s.id == id)
            .map(|s| inner.hydrate(s))
            .ok_or_else(|| AppError::NotFound(format!("site {id}")))
    }

    async fn get_root_sites(&self) -> Result<Vec<Site>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sites
            .iter()
            .filter(|s| s.is_root())
            .map(|s| inner.hydrate(s))
            .collect())
    }

    async fn get_user_root_sites(&self, user_id: Uuid) -> Result<Vec<Site>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sites
            .iter()
            .filter(|s| s.is_root() && s.owner == Some(user_id))
            .map(|s| inner.hydrate(s))
            .collect())
    }

    async fn delete_site(&self, id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let before = inner.sites.len();
        inner.sites.retain(|s| s.id != id);
        Ok(inner.sites.len() < before)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, AppError> {
        // check and insert under one guard so concurrent registrations cannot both pass
        let mut inner = self.inner.write().await;
        if inner.users.iter().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email already registered".into()));
        }
        let stored = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.push(stored.clone());
        Ok(stored)
    }

    async fn count_users_with_email(&self, email: &str) -> Result<i64, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.users.iter().filter(|u| u.email == email).count() as i64)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, AppError> {
        self.inner
            .read()
            .await
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| AppError::NotFound("user".into()))
    }

    async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        self.inner
            .read()
            .await
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("user {id}")))
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<User, AppError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AppError::NotFound(format!("user {id}")))?;
        user.role = role;
        Ok(user.clone())
    }

    async fn add_image(&self, image: NewImage) -> Result<Image, AppError> {
        let mut inner = self.inner.write().await;
        if inner
            .images
            .iter()
            .any(|i| i.id == image.id || i.file_name == image.file_name)
        {
            return Err(AppError::Conflict(format!("image {} exists", image.file_name)));
        }
        let stored = Image {
            id: image.id,
            entity: image.entity,
            file_name: image.file_name,
            content_type: image.content_type,
            note: image.note,
            favorite: false,
            owner: image.owner,
            added_time: OffsetDateTime::now_utc(),
        };
        inner.images.push(stored.clone());
        Ok(stored)
    }

    async fn get_image(&self, id: Uuid) -> Result<Image, AppError> {
        self.inner
            .read()
            .await
            .images
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("image {id}")))
    }

    async fn get_image_by_file_name(&self, file_name: &str) -> Result<Image, AppError> {
        self.inner
            .read()
            .await
            .images
            .iter()
            .find(|i| i.file_name == file_name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("image {file_name}")))
    }

    async fn get_entity_images(&self, entity: Uuid) -> Result<Vec<Image>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .images
            .iter()
            .filter(|i| i.entity == entity)
            .cloned()
            .collect())
    }

    async fn delete_image(&self, id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let before = inner.images.len();
        inner.images.retain(|i| i.id != id);
        Ok(inner.images.len() < before)
    }

    async fn set_favorite_image(&self, id: Uuid) -> Result<Image, AppError> {
        let mut inner = self.inner.write().await;
        let entity = inner
            .images
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.entity)
            .ok_or_else(|| AppError::NotFound(format!("image {id}")))?;

        let mut chosen = None;
        for image in inner.images.iter_mut().filter(|i| i.entity == entity) {
            image.favorite = image.id == id;
            if image.favorite {
                chosen = Some(image.clone());
            }
        }
        chosen.ok_or_else(|| AppError::NotFound(format!("image {id}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn flower(name: &str, grower: Option<Uuid>) -> NewFlower {
        NewFlower {
            name: name.into(),
            latin_name: format!("{name}us latinus"),
            grower,
            ..Default::default()
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: "grower".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::Grower,
        }
    }

    fn new_image(entity: Uuid, owner: Uuid) -> NewImage {
        let id = Uuid::new_v4();
        NewImage {
            id,
            entity,
            file_name: format!("{id}.png"),
            content_type: "image/png".into(),
            note: String::new(),
            owner,
        }
    }

    #[tokio::test]
    async fn add_then_get_flower_keeps_fields() {
        let db = MemoryDatabase::new();
        let created = db.add_flower(flower("Rose", None)).await.unwrap();
        assert!(!created.id.is_nil());

        let fetched = db.get_flowers().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, created.id);
        assert_eq!(fetched[0].name, "Rose");
        assert_eq!(fetched[0].latin_name, "Roseus latinus");
        assert_eq!(fetched[0].added_time, created.added_time);
    }

    #[tokio::test]
    async fn empty_name_is_rejected_without_mutation() {
        let db = MemoryDatabase::new();
        db.add_flower(flower("Rose", None)).await.unwrap();

        let err = db.add_flower(flower("", None)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(db.get_flowers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_flower_is_idempotent() {
        let db = MemoryDatabase::new();
        let created = db.add_flower(flower("Rose", None)).await.unwrap();

        assert!(db.delete_flower(created.id).await.unwrap());
        assert!(!db.delete_flower(created.id).await.unwrap());
        assert!(db.get_flowers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn user_flowers_are_isolated() {
        let db = MemoryDatabase::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        db.add_flower(flower("Rose", Some(a))).await.unwrap();
        db.add_flower(flower("Lily", Some(b))).await.unwrap();
        db.add_flower(flower("Iris", Some(a))).await.unwrap();
        db.add_flower(flower("Weed", None)).await.unwrap();

        let of_a = db.get_user_flowers(a).await.unwrap();
        assert_eq!(of_a.len(), 2);
        assert!(of_a.iter().all(|f| f.grower == Some(a)));

        let of_b = db.get_user_flowers(b).await.unwrap();
        assert_eq!(of_b.len(), 1);
        assert_eq!(of_b[0].name, "Lily");

        assert!(db.get_user_flowers(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn root_sites_exclude_children() {
        let db = MemoryDatabase::new();
        let owner = Uuid::new_v4();
        let root = db
            .add_site(NewSite {
                name: "Garden".into(),
                owner: Some(owner),
                ..Default::default()
            })
            .await
            .unwrap();
        db.add_site(NewSite {
            name: "Greenhouse".into(),
            parent: Some(root.id),
            owner: Some(owner),
            ..Default::default()
        })
        .await
        .unwrap();
        db.add_site(NewSite {
            name: "Balcony".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let roots = db.get_root_sites().await.unwrap();
        assert_eq!(roots.len(), 2);
        assert!(roots.iter().all(|s| s.parent.is_none()));

        let mine = db.get_user_root_sites(owner).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, root.id);
    }

    #[tokio::test]
    async fn site_round_trip_and_flower_listing() {
        let db = MemoryDatabase::new();
        let parent = db
            .add_site(NewSite {
                name: "Garden".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let child = db
            .add_site(NewSite {
                name: "Bed 1".into(),
                note: "sunny".into(),
                parent: Some(parent.id),
                owner: None,
            })
            .await
            .unwrap();
        let planted = db
            .add_flower(NewFlower {
                name: "Tulip".into(),
                site: Some(child.id),
                site_name: Some(child.name.clone()),
                ..Default::default()
            })
            .await
            .unwrap();

        let fetched = db.get_site(child.id).await.unwrap();
        assert_eq!(fetched.name, "Bed 1");
        assert_eq!(fetched.note, "sunny");
        assert_eq!(fetched.parent, Some(parent.id));
        assert_eq!(fetched.flowers, vec![planted.id]);
    }

    #[tokio::test]
    async fn missing_site_is_not_found() {
        let db = MemoryDatabase::new();
        let err = db.get_site(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!db.delete_site(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_site_orphans_children_and_flowers() {
        let db = MemoryDatabase::new();
        let parent = db
            .add_site(NewSite {
                name: "Garden".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let child = db
            .add_site(NewSite {
                name: "Bed".into(),
                parent: Some(parent.id),
                ..Default::default()
            })
            .await
            .unwrap();
        let planted = db
            .add_flower(NewFlower {
                name: "Tulip".into(),
                site: Some(parent.id),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(db.delete_site(parent.id).await.unwrap());

        let child = db.get_site(child.id).await.unwrap();
        assert_eq!(child.parent, Some(parent.id));
        let flowers = db.get_flowers().await.unwrap();
        assert_eq!(flowers[0].id, planted.id);
        assert_eq!(flowers[0].site, Some(parent.id));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let db = MemoryDatabase::new();
        db.create_user(new_user("rose@example.com")).await.unwrap();
        let err = db.create_user(new_user("rose@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(db.count_users_with_email("rose@example.com").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_admits_one_user() {
        let db = Arc::new(MemoryDatabase::new());
        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.create_user(new_user("race@example.com")).await })
            })
            .collect();

        let mut created = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AppError::Conflict(_))),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(db.count_users_with_email("race@example.com").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn user_lookups() {
        let db = MemoryDatabase::new();
        let user = db.create_user(new_user("iris@example.com")).await.unwrap();
        assert_eq!(db.get_user_by_email("iris@example.com").await.unwrap().id, user.id);
        assert_eq!(db.get_user(user.id).await.unwrap().email, "iris@example.com");
        assert!(matches!(
            db.get_user_by_email("nobody@example.com").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let db = MemoryDatabase::new();
        db.create_user(new_user("iris@example.com")).await.unwrap();
        db.add_flower(flower("Rose", None)).await.unwrap();
        db.add_site(NewSite {
            name: "Garden".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        db.clear().await.unwrap();
        assert!(db.get_flowers().await.unwrap().is_empty());
        assert!(db.get_root_sites().await.unwrap().is_empty());
        assert_eq!(db.count_users_with_email("iris@example.com").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_flower_by_id() {
        let db = MemoryDatabase::new();
        let created = db.add_flower(flower("Rose", None)).await.unwrap();
        assert_eq!(db.get_flower(created.id).await.unwrap(), created);
        assert!(matches!(
            db.get_flower(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn role_can_be_changed() {
        let db = MemoryDatabase::new();
        let user = db.create_user(new_user("dahlia@example.com")).await.unwrap();
        assert_eq!(user.role, Role::Grower);

        let updated = db.set_user_role(user.id, Role::Retailer).await.unwrap();
        assert_eq!(updated.role, Role::Retailer);
        assert_eq!(db.get_user(user.id).await.unwrap().role, Role::Retailer);
        assert!(matches!(
            db.set_user_role(Uuid::new_v4(), Role::Retailer).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn one_favorite_image_per_entity() {
        let db = MemoryDatabase::new();
        let (entity, other, owner) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let first = db.add_image(new_image(entity, owner)).await.unwrap();
        let second = db.add_image(new_image(entity, owner)).await.unwrap();
        let elsewhere = db.add_image(new_image(other, owner)).await.unwrap();
        db.set_favorite_image(elsewhere.id).await.unwrap();

        assert!(db.set_favorite_image(first.id).await.unwrap().favorite);
        let fav = db.set_favorite_image(second.id).await.unwrap();
        assert!(fav.favorite);

        let images = db.get_entity_images(entity).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images.iter().filter(|i| i.favorite).count(), 1);
        assert!(images.iter().find(|i| i.id == second.id).unwrap().favorite);
        assert!(db.get_image(elsewhere.id).await.unwrap().favorite);
    }

    #[tokio::test]
    async fn image_lookup_and_delete() {
        let db = MemoryDatabase::new();
        let image = db.add_image(new_image(Uuid::new_v4(), Uuid::new_v4())).await.unwrap();
        assert!(!image.favorite);
        assert_eq!(db.get_image_by_file_name(&image.file_name).await.unwrap().id, image.id);

        let dup = NewImage {
            file_name: image.file_name.clone(),
            ..new_image(image.entity, image.owner)
        };
        assert!(matches!(db.add_image(dup).await, Err(AppError::Conflict(_))));

        assert!(db.delete_image(image.id).await.unwrap());
        assert!(!db.delete_image(image.id).await.unwrap());
        assert!(matches!(db.get_image(image.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            db.set_favorite_image(image.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
