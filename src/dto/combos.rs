use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Combo, Product};

#[derive(Debug, Deserialize, Serialize, ToSchema, Clone)]
pub struct ComboItemRequest {
    pub product_id: Uuid,
    pub quantity: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateComboRequest {
    pub name: String,
    pub description: Option<String>,
    pub discount_percent: i32,
    pub is_active: Option<bool>,
    pub items: Vec<ComboItemRequest>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Default)]
pub struct UpdateComboRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_percent: Option<i32>,
    pub is_active: Option<bool>,
    /// When present, replaces all combo items.
    pub items: Option<Vec<ComboItemRequest>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct ComboLine {
    pub product: Product,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct ComboDetail {
    pub combo: Combo,
    pub items: Vec<ComboLine>,
    pub original_price: i64,
    pub discounted_price: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ComboList {
    #[schema(value_type = Vec<ComboDetail>)]
    pub items: Vec<ComboDetail>,
}
