use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::combos::{ComboDetail, ComboItemRequest, ComboLine, ComboList, CreateComboRequest, UpdateComboRequest},
    entity::{
        combo_items::{ActiveModel as ComboItemActive, Column as ComboItemCol, Entity as ComboItems},
        combos::{ActiveModel as ComboActive, Column as ComboCol, Entity as Combos, Model as ComboModel},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Combo, Product},
    pricing::discounted_total,
    response::{ApiResponse, Meta},
    state::AppState,
};

async fn load_detail<C: ConnectionTrait>(conn: &C, combo: ComboModel) -> AppResult<ComboDetail> {
    let rows = ComboItems::find()
        .filter(ComboItemCol::ComboId.eq(combo.id))
        .find_also_related(Products)
        .all(conn)
        .await?;

    let items: Vec<ComboLine> = rows
        .into_iter()
        .filter_map(|(line, product)| {
            Some(ComboLine {
                product: Product::from(product?),
                quantity: line.quantity,
            })
        })
        .collect();
    let priced: Vec<(i64, i32)> = items.iter().map(|l| (l.product.price, l.quantity)).collect();
    let (original_price, discounted_price) = discounted_total(&priced, combo.discount_percent);

    Ok(ComboDetail {
        combo: Combo::from(combo),
        items,
        original_price,
        discounted_price,
    })
}

fn validate_discount(discount_percent: i32) -> AppResult<()> {
    if !(0..=100).contains(&discount_percent) {
        return Err(AppError::BadRequest(
            "discount_percent must be between 0 and 100".into(),
        ));
    }
    Ok(())
}

/// Checks the lines reference existing products and folds duplicates.
async fn normalize_items<C: ConnectionTrait>(
    conn: &C,
    items: &[ComboItemRequest],
) -> AppResult<Vec<(Uuid, i32)>> {
    if items.len() < 2 {
        return Err(AppError::BadRequest("a combo needs at least two products".into()));
    }
    let mut merged: HashMap<Uuid, i32> = HashMap::new();
    for item in items {
        let quantity = item.quantity.unwrap_or(1);
        if quantity <= 0 {
            return Err(AppError::BadRequest("combo quantity must be greater than 0".into()));
        }
        *merged.entry(item.product_id).or_default() += quantity;
    }
    let ids: Vec<Uuid> = merged.keys().copied().collect();
    let found = Products::find()
        .filter(ProdCol::Id.is_in(ids.clone()))
        .all(conn)
        .await?;
    if found.len() != ids.len() {
        return Err(AppError::BadRequest("combo references an unknown product".into()));
    }
    Ok(merged.into_iter().collect())
}

async fn write_items<C: ConnectionTrait>(
    conn: &C,
    combo_id: Uuid,
    items: &[(Uuid, i32)],
) -> AppResult<()> {
    ComboItems::delete_many()
        .filter(ComboItemCol::ComboId.eq(combo_id))
        .exec(conn)
        .await?;
    for (product_id, quantity) in items {
        ComboItemActive {
            id: Set(Uuid::new_v4()),
            combo_id: Set(combo_id),
            product_id: Set(*product_id),
            quantity: Set(*quantity),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

pub async fn list_combos(state: &AppState, include_inactive: bool) -> AppResult<ApiResponse<ComboList>> {
    let mut finder = Combos::find().order_by_desc(ComboCol::CreatedAt);
    if !include_inactive {
        finder = finder.filter(ComboCol::IsActive.eq(true));
    }
    let combos = finder.all(&state.orm).await?;

    let mut items = Vec::with_capacity(combos.len());
    for combo in combos {
        items.push(load_detail(&state.orm, combo).await?);
    }
    let total = items.len() as i64;
    Ok(ApiResponse::success("Combos", ComboList { items }, Some(Meta::new(1, total, total))))
}

pub async fn get_combo(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ComboDetail>> {
    let combo = Combos::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let detail = load_detail(&state.orm, combo).await?;
    Ok(ApiResponse::success("Combo", detail, None))
}

pub async fn create_combo(
    state: &AppState,
    user: &AuthUser,
    payload: CreateComboRequest,
) -> AppResult<ApiResponse<ComboDetail>> {
    ensure_admin(user)?;
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("combo name is required".into()));
    }
    validate_discount(payload.discount_percent)?;

    let txn = state.orm.begin().await?;
    let items = normalize_items(&txn, &payload.items).await?;
    let combo = ComboActive {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        description: Set(payload.description),
        discount_percent: Set(payload.discount_percent),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_at: Set(Utc::now().into()),
    }
    .insert(&txn)
    .await?;
    write_items(&txn, combo.id, &items).await?;
    let detail = load_detail(&txn, combo).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "combo_create",
        "combos",
        serde_json::json!({ "combo_id": detail.combo.id }),
    )
    .await;

    Ok(ApiResponse::success("Combo created", detail, Some(Meta::empty())))
}

pub async fn update_combo(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateComboRequest,
) -> AppResult<ApiResponse<ComboDetail>> {
    ensure_admin(user)?;
    let txn = state.orm.begin().await?;
    let existing = Combos::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: ComboActive = existing.into();
    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest("combo name must not be empty".into()));
        }
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(discount) = payload.discount_percent {
        validate_discount(discount)?;
        active.discount_percent = Set(discount);
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    let combo = active.update(&txn).await?;

    if let Some(items) = payload.items.as_deref() {
        let items = normalize_items(&txn, items).await?;
        write_items(&txn, combo.id, &items).await?;
    }
    let detail = load_detail(&txn, combo).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "combo_update",
        "combos",
        serde_json::json!({ "combo_id": id }),
    )
    .await;

    Ok(ApiResponse::success("Combo updated", detail, Some(Meta::empty())))
}

pub async fn delete_combo(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let existing = Combos::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    existing.delete(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "combo_delete",
        "combos",
        serde_json::json!({ "combo_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
