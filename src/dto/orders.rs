use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{GuestInfo, Order, OrderItem, ShippingAddress};

#[derive(Debug, Deserialize, Serialize, ToSchema, Clone)]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Clone)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLineRequest>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
    /// Required when the caller is not signed in.
    pub guest: Option<GuestInfo>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Clone)]
pub struct CheckoutRequest {
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct PayOrderRequest {
    pub invoice_number: String,
    /// Payment provider reference, kept in the audit trail.
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GuestOrderQuery {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
