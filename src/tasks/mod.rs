pub mod dto;
pub mod filter;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod overdue;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod store;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::collection_routes())
        .merge(handlers::item_routes())
}
