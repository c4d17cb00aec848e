use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, CartLine, CartView, ReplaceCartRequest},
    entity::{
        cart_items::{ActiveModel as CartActive, Column as CartCol, Entity as CartItems},
        combo_items::{Column as ComboItemCol, Entity as ComboItems},
        combos::Entity as Combos,
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Product,
    pricing::clamp_quantity,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub async fn load_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<CartView> {
    let rows = CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .order_by_asc(CartCol::CreatedAt)
        .find_also_related(Products)
        .all(conn)
        .await?;

    let lines = rows
        .into_iter()
        .filter_map(|(item, product)| {
            let product = Product::from(product?);
            Some(CartLine {
                id: item.id,
                line_total: product.price * i64::from(item.quantity),
                quantity: item.quantity,
                product,
            })
        })
        .collect();
    Ok(CartView::from_lines(lines))
}

/// Write an absolute quantity for one product, clamped to stock.
async fn upsert_line<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product: &ProductModel,
    requested: i32,
) -> AppResult<i32> {
    let quantity = clamp_quantity(requested, product.stock)
        .ok_or_else(|| AppError::BadRequest(format!("{} is out of stock", product.name)))?;

    let existing = CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .filter(CartCol::ProductId.eq(product.id))
        .one(conn)
        .await?;

    match existing {
        Some(item) => {
            let mut active: CartActive = item.into();
            active.quantity = Set(quantity);
            active.update(conn).await?;
        }
        None => {
            CartActive {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                product_id: Set(product.id),
                quantity: Set(quantity),
                created_at: Set(Utc::now().into()),
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(quantity)
}

async fn find_product<C: ConnectionTrait>(conn: &C, product_id: Uuid) -> AppResult<ProductModel> {
    Products::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::BadRequest("product not found".to_string()))
}

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let cart = load_cart(&state.orm, user.user_id).await?;
    let total = cart.items.len() as i64;
    Ok(ApiResponse::success("OK", cart, Some(Meta::new(1, total, total))))
}

/// Adds to whatever is already in the cart.
pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartView>> {
    let product = find_product(&state.orm, payload.product_id).await?;
    let current = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(product.id))
        .one(&state.orm)
        .await?
        .map(|item| item.quantity)
        .unwrap_or(0);
    let increment = payload.quantity.max(1);
    let quantity =
        upsert_line(&state.orm, user.user_id, &product, current.saturating_add(increment)).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "product_id": product.id, "quantity": quantity }),
    )
    .await;

    let cart = load_cart(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success("OK", cart, None))
}

/// Idempotent: repeating the call leaves the same quantity.
pub async fn set_quantity(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<ApiResponse<CartView>> {
    let product = find_product(&state.orm, product_id).await?;
    let quantity = upsert_line(&state.orm, user.user_id, &product, quantity).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "product_id": product_id, "quantity": quantity }),
    )
    .await;

    let cart = load_cart(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success("OK", cart, None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<CartView>> {
    let result = CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(product_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    let cart = load_cart(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success("Removed from cart", cart, Some(Meta::empty())))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&state.orm)
        .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        "cart_items",
        serde_json::json!({}),
    )
    .await;

    Ok(ApiResponse::success("Cart cleared", CartView::default(), Some(Meta::empty())))
}

/// Replace the whole cart with a client snapshot. Duplicate lines are summed,
/// quantities clamped to stock, and unknown or sold-out products dropped.
pub async fn replace_cart(
    state: &AppState,
    user: &AuthUser,
    payload: ReplaceCartRequest,
) -> AppResult<ApiResponse<CartView>> {
    let wanted = merge_lines(&payload.items);
    let ids: Vec<Uuid> = wanted.keys().copied().collect();

    let txn = state.orm.begin().await?;
    let products: HashMap<Uuid, ProductModel> = Products::find()
        .filter(ProdCol::Id.is_in(ids))
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    let mut dropped = Vec::new();
    for (product_id, quantity) in &wanted {
        match products.get(product_id) {
            Some(product) if product.stock > 0 => {
                upsert_line(&txn, user.user_id, product, *quantity).await?;
            }
            _ => dropped.push(*product_id),
        }
    }
    let cart = load_cart(&txn, user.user_id).await?;
    txn.commit().await?;

    if !dropped.is_empty() {
        tracing::info!(user_id = %user.user_id, dropped = dropped.len(), "cart sync dropped unavailable products");
    }
    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_replace",
        "cart_items",
        serde_json::json!({ "lines": cart.items.len(), "dropped": dropped }),
    )
    .await;

    Ok(ApiResponse::success("Cart synchronized", cart, None))
}

fn merge_lines(items: &[AddToCartRequest]) -> BTreeMap<Uuid, i32> {
    let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in items.iter().filter(|i| i.quantity > 0) {
        let entry = merged.entry(item.product_id).or_default();
        *entry = entry.saturating_add(item.quantity);
    }
    merged
}

/// Adds every line of an active combo, clamped per product.
pub async fn add_combo_to_cart(
    state: &AppState,
    user: &AuthUser,
    combo_id: Uuid,
) -> AppResult<ApiResponse<CartView>> {
    let combo = Combos::find_by_id(combo_id)
        .one(&state.orm)
        .await?
        .filter(|c| c.is_active)
        .ok_or(AppError::NotFound)?;

    let lines = ComboItems::find()
        .filter(ComboItemCol::ComboId.eq(combo.id))
        .find_also_related(Products)
        .all(&state.orm)
        .await?;

    let txn = state.orm.begin().await?;
    for (line, product) in lines {
        let Some(product) = product else { continue };
        if product.stock <= 0 {
            return Err(AppError::BadRequest(format!("{} is out of stock", product.name)));
        }
        let current = CartItems::find()
            .filter(CartCol::UserId.eq(user.user_id))
            .filter(CartCol::ProductId.eq(product.id))
            .one(&txn)
            .await?
            .map(|item| item.quantity)
            .unwrap_or(0);
        upsert_line(&txn, user.user_id, &product, current.saturating_add(line.quantity)).await?;
    }
    let cart = load_cart(&txn, user.user_id).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_add_combo",
        "cart_items",
        serde_json::json!({ "combo_id": combo_id }),
    )
    .await;

    Ok(ApiResponse::success("Combo added to cart", cart, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_duplicates_and_drops_non_positive() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let merged = merge_lines(&[
            AddToCartRequest { product_id: a, quantity: 2 },
            AddToCartRequest { product_id: b, quantity: 0 },
            AddToCartRequest { product_id: a, quantity: 3 },
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[&a], 5);
    }
}
