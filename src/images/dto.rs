use serde::Serialize;

use crate::db::Image;

/// Image metadata plus a short-lived download link.
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    #[serde(flatten)]
    pub image: Image,
    pub url: String,
}
