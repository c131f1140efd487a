use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub parent: Option<Uuid>,
}
