use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, Serialize, ToSchema, Clone)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Clone)]
pub struct SetQuantityRequest {
    pub quantity: i32,
}

/// Full cart snapshot; replaces whatever the server holds.
#[derive(Debug, Deserialize, Serialize, ToSchema, Clone, Default)]
pub struct ReplaceCartRequest {
    pub items: Vec<AddToCartRequest>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct CartLine {
    pub id: Uuid,
    pub product: Product,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Default)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub total_quantity: i64,
    pub subtotal: i64,
}

impl CartView {
    pub fn from_lines(items: Vec<CartLine>) -> Self {
        let total_quantity = items.iter().map(|l| i64::from(l.quantity)).sum();
        let subtotal = items.iter().map(|l| l.line_total).sum();
        Self {
            items,
            total_quantity,
            subtotal,
        }
    }
}
