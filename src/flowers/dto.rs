use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateFlowerRequest {
    pub name: String,
    #[serde(default)]
    pub latin_name: String,
    /// Site the flower grows at, if any.
    #[serde(default)]
    pub site: Option<Uuid>,
}
