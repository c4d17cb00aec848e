pub mod admin;
pub mod analytics;
pub mod auth;
pub mod cart;
pub mod categories;
pub mod combos;
pub mod orders;
pub mod products;
pub mod wishlist;
