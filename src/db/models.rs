use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Which side of the trade a user works on by default. The client picks its
/// landing view from this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    #[default]
    Grower,
    Retailer,
}

/// Registered account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Fields supplied when registering a user; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// A place where flowers grow. Sites nest through `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Site {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub added_time: OffsetDateTime,
    pub note: String,
    pub parent: Option<Uuid>,
    /// Ids of flowers currently referencing this site.
    pub flowers: Vec<Uuid>,
    pub owner: Option<Uuid>,
}

impl Site {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewSite {
    pub name: String,
    pub note: String,
    pub parent: Option<Uuid>,
    pub owner: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Flower {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub latin_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub added_time: OffsetDateTime,
    pub grower: Option<Uuid>,
    pub grower_email: Option<String>, // denormalized from users.email
    pub site: Option<Uuid>,
    pub site_name: Option<String>, // denormalized from sites.name
}

#[derive(Debug, Clone, Default)]
pub struct NewFlower {
    pub name: String,
    pub latin_name: String,
    pub grower: Option<Uuid>,
    pub grower_email: Option<String>,
    pub site: Option<Uuid>,
    pub site_name: Option<String>,
}

/// Metadata of an uploaded picture. The bytes live in object storage under
/// `file_name`; `entity` is the flower or site it illustrates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Image {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub entity: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub note: String,
    pub favorite: bool,
    pub owner: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub added_time: OffsetDateTime,
}

/// The id is chosen by the caller because it is also part of the storage key.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: Uuid,
    pub entity: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub note: String,
    pub owner: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serialization_hides_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "rose".into(),
            email: "rose@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Retailer,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["_id"], user.id.to_string());
        assert_eq!(json["email"], "rose@example.com");
        assert_eq!(json["role"], "retailer");
    }

    #[test]
    fn role_parses_lowercase_only() {
        assert_eq!(serde_json::from_str::<Role>("\"grower\"").unwrap(), Role::Grower);
        assert!(serde_json::from_str::<Role>("\"admin\"").is_err());
        assert_eq!(Role::default(), Role::Grower);
    }

    #[test]
    fn flower_uses_wire_field_names() {
        let flower = Flower {
            id: Uuid::new_v4(),
            name: "Tulip".into(),
            latin_name: "Tulipa".into(),
            added_time: OffsetDateTime::UNIX_EPOCH,
            grower: None,
            grower_email: None,
            site: None,
            site_name: None,
        };
        let json = serde_json::to_value(&flower).unwrap();
        assert_eq!(json["latin_name"], "Tulipa");
        assert_eq!(json["added_time"], "1970-01-01T00:00:00Z");
        assert!(json["_id"].is_string());
    }
}
