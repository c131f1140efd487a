mod dto;
pub mod handlers;

use crate::state::AppState;
use axum::Router;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::image_routes(state)
}
