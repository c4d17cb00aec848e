use axum::{Router, routing::get};

use crate::state::AppState;

pub mod admin;
pub mod analytics;
pub mod cart;
pub mod categories;
pub mod combos;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod products;
pub mod users;
pub mod wishlist;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::api_health))
        .nest("/users", users::router())
        .nest("/products", products::router())
        .nest("/categories", categories::router())
        .nest("/combos", combos::router())
        .nest("/cart", cart::router())
        .nest("/wishlist", wishlist::router())
        .nest("/orders", orders::route())
        .nest("/admin", admin::router())
        .nest("/analytics", analytics::router())
}
