use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    config::PricingConfig,
    dto::orders::{CheckoutRequest, CreateOrderRequest, OrderList, OrderWithItems, PayOrderRequest},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{GuestInfo, Order, OrderItem, OrderStatus, PAYMENT_PAID, PAYMENT_UNPAID, ShippingAddress},
    pricing::order_prices,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::auth_service::normalize_email,
    state::AppState,
};

/// Who an order belongs to.
enum OrderOwner {
    User(Uuid),
    Guest(GuestInfo),
}

fn validate_shipping(address: &ShippingAddress) -> AppResult<()> {
    let required = [
        ("full_name", &address.full_name),
        ("address", &address.address),
        ("city", &address.city),
        ("postal_code", &address.postal_code),
        ("country", &address.country),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(AppError::BadRequest(format!("shipping {field} is required")));
        }
    }
    Ok(())
}

fn validate_payment_method(method: &str) -> AppResult<()> {
    if method.trim().is_empty() {
        return Err(AppError::BadRequest("payment_method is required".into()));
    }
    Ok(())
}

fn merge_order_lines(lines: impl IntoIterator<Item = (Uuid, i32)>) -> AppResult<BTreeMap<Uuid, i32>> {
    let mut merged = BTreeMap::new();
    for (product_id, quantity) in lines {
        if quantity <= 0 {
            return Err(AppError::BadRequest("quantity must be greater than 0".into()));
        }
        let entry: &mut i32 = merged.entry(product_id).or_default();
        *entry = entry.saturating_add(quantity);
    }
    if merged.is_empty() {
        return Err(AppError::BadRequest("Order has no items".into()));
    }
    Ok(merged)
}

/// Locks the ordered products, checks stock, writes the order with price
/// snapshots and decrements stock. Runs inside the caller's transaction.
async fn place_order(
    txn: &DatabaseTransaction,
    pricing: &PricingConfig,
    owner: OrderOwner,
    lines: BTreeMap<Uuid, i32>,
    shipping: ShippingAddress,
    payment_method: String,
) -> AppResult<(OrderModel, Vec<OrderItem>)> {
    let ids: Vec<Uuid> = lines.keys().copied().collect();
    let products: HashMap<Uuid, ProductModel> = Products::find()
        .filter(ProdCol::Id.is_in(ids))
        .order_by_asc(ProdCol::Id)
        .lock(LockType::Update)
        .all(txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut priced = Vec::with_capacity(lines.len());
    for (product_id, quantity) in &lines {
        let product = products
            .get(product_id)
            .ok_or_else(|| AppError::BadRequest(format!("product {product_id} not found")))?;
        if product.stock < *quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for {} ({} left)",
                product.name, product.stock
            )));
        }
        priced.push((product, *quantity));
    }

    let price_lines: Vec<(i64, i32)> = priced.iter().map(|(p, q)| (p.price, *q)).collect();
    let prices = order_prices(&price_lines, pricing);

    let (user_id, guest_name, guest_email) = match owner {
        OrderOwner::User(id) => (Some(id), None, None),
        OrderOwner::Guest(guest) => (None, Some(guest.name), Some(guest.email)),
    };

    let order_id = Uuid::new_v4();
    let now = Utc::now();
    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user_id),
        guest_name: Set(guest_name),
        guest_email: Set(guest_email),
        shipping_full_name: Set(shipping.full_name),
        shipping_address: Set(shipping.address),
        shipping_city: Set(shipping.city),
        shipping_postal_code: Set(shipping.postal_code),
        shipping_country: Set(shipping.country),
        shipping_phone: Set(shipping.phone),
        payment_method: Set(payment_method),
        items_price: Set(prices.items_price),
        shipping_price: Set(prices.shipping_price),
        tax_price: Set(prices.tax_price),
        total_price: Set(prices.total_price),
        status: Set(OrderStatus::Pending.as_str().into()),
        payment_status: Set(PAYMENT_UNPAID.into()),
        invoice_number: Set(build_invoice_number(order_id)),
        paid_at: Set(None),
        delivered_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(txn)
    .await?;

    let mut items = Vec::with_capacity(priced.len());
    for (product, quantity) in priced {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            name: Set(product.name.clone()),
            quantity: Set(quantity),
            price: Set(product.price),
            created_at: Set(now.into()),
        }
        .insert(txn)
        .await?;
        items.push(OrderItem::from(item));

        // reduce stock
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
            .filter(ProdCol::Id.eq(product.id))
            .exec(txn)
            .await?;
    }

    Ok((order, items))
}

pub async fn create_order(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    validate_shipping(&payload.shipping_address)?;
    validate_payment_method(&payload.payment_method)?;
    let owner = match (user, payload.guest) {
        (Some(user), _) => OrderOwner::User(user.user_id),
        (None, Some(guest)) => {
            if guest.name.trim().is_empty() {
                return Err(AppError::BadRequest("guest name is required".into()));
            }
            OrderOwner::Guest(GuestInfo {
                name: guest.name.trim().to_string(),
                email: normalize_email(&guest.email)?,
            })
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "guest details are required when not signed in".into(),
            ));
        }
    };
    let lines = merge_order_lines(payload.items.iter().map(|i| (i.product_id, i.quantity)))?;

    let txn = state.orm.begin().await?;
    let (order, items) = place_order(
        &txn,
        &state.config.pricing,
        owner,
        lines,
        payload.shipping_address,
        payload.payment_method,
    )
    .await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        order.user_id,
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "guest": order.user_id.is_none() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Turns the server-side cart into an order and empties it.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    validate_shipping(&payload.shipping_address)?;
    validate_payment_method(&payload.payment_method)?;

    let txn = state.orm.begin().await?;
    let cart = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .all(&txn)
        .await?;
    if cart.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }
    let lines = merge_order_lines(cart.iter().map(|c| (c.product_id, c.quantity)))?;

    let (order, items) = place_order(
        &txn,
        &state.config.pricing,
        OrderOwner::User(user.user_id),
        lines,
        payload.shipping_address,
        payload.payment_method,
    )
    .await?;

    // clear cart
    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "checkout",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or_default() {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items: orders }, Some(meta)))
}

pub(crate) async fn load_items<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItem>> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect())
}

/// Owners see their own orders, admins see all.
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .filter(|o| user.is_admin() || o.user_id == Some(user.user_id))
        .ok_or(AppError::NotFound)?;

    let items = load_items(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Guest order tracking: the order id plus the email it was placed with.
pub async fn get_guest_order(
    state: &AppState,
    id: Uuid,
    email: &str,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let email = email.trim().to_lowercase();
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .filter(|o| o.user_id.is_none() && o.guest_email.as_deref() == Some(email.as_str()))
        .ok_or(AppError::NotFound)?;

    let items = load_items(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Records payment. Signed-in callers must own the order; guest orders are
/// authorised by the invoice number alone.
pub async fn pay_order(
    state: &AppState,
    user: Option<&AuthUser>,
    id: Uuid,
    payload: PayOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(OrderCol::Id.eq(id))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let allowed = match (user, order.user_id) {
        (Some(user), Some(owner)) => owner == user.user_id || user.is_admin(),
        (_, None) => true,
        (None, Some(_)) => false,
    };
    if !allowed {
        return Err(AppError::NotFound);
    }
    if order.invoice_number != payload.invoice_number {
        return Err(AppError::BadRequest("Invoice number does not match".into()));
    }
    if order.payment_status == PAYMENT_PAID {
        return Err(AppError::BadRequest("Order already paid".into()));
    }
    if order.status == OrderStatus::Cancelled.as_str() {
        return Err(AppError::BadRequest("Order is cancelled".into()));
    }

    let now = Utc::now();
    let mut active: OrderActive = order.into();
    active.payment_status = Set(PAYMENT_PAID.into());
    active.status = Set(OrderStatus::Paid.as_str().into());
    active.paid_at = Set(Some(now.into()));
    active.updated_at = Set(now.into());
    let order = active.update(&txn).await?;

    let items = load_items(&txn, order.id).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.map(|u| u.user_id),
        "order_paid",
        "orders",
        serde_json::json!({ "order_id": order.id, "transaction_id": payload.transaction_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment recorded",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Owners may cancel unpaid orders; stock is returned.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;
    let order = Orders::find()
        .filter(OrderCol::Id.eq(id))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .filter(|o| o.user_id == Some(user.user_id) || user.is_admin())
        .ok_or(AppError::NotFound)?;

    if order.status != OrderStatus::Pending.as_str() || order.payment_status == PAYMENT_PAID {
        return Err(AppError::BadRequest("Only unpaid pending orders can be cancelled".into()));
    }

    let order = restock_and_cancel(&txn, order).await?;
    let items = load_items(&txn, order.id).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order cancelled",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub(crate) async fn restock_and_cancel(
    txn: &DatabaseTransaction,
    order: OrderModel,
) -> AppResult<OrderModel> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(txn)
        .await?;
    for item in items {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(item.quantity))
            .filter(ProdCol::Id.eq(item.product_id))
            .exec(txn)
            .await?;
    }

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().into());
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(txn).await?)
}

fn build_invoice_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    format!("INV-{}-{}", date, &suffix[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_number_has_date_and_short_id() {
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        let invoice = build_invoice_number(id);
        assert!(invoice.starts_with("INV-"));
        assert!(invoice.ends_with("-A1B2C3D4"));
        assert_eq!(invoice.len(), "INV-20260101-A1B2C3D4".len());
    }

    #[test]
    fn merges_repeated_lines_and_rejects_bad_quantities() {
        let a = Uuid::from_u128(7);
        let merged = merge_order_lines([(a, 1), (a, 2)]).unwrap();
        assert_eq!(merged[&a], 3);
        assert!(merge_order_lines([(a, 0)]).is_err());
        assert!(merge_order_lines(Vec::<(Uuid, i32)>::new()).is_err());
    }

    #[test]
    fn shipping_requires_core_fields() {
        let mut address = ShippingAddress {
            full_name: "Ada Lovelace".into(),
            address: "12 St James's Square".into(),
            city: "London".into(),
            postal_code: "SW1Y 4JH".into(),
            country: "UK".into(),
            phone: None,
        };
        assert!(validate_shipping(&address).is_ok());
        address.city = "  ".into();
        assert!(validate_shipping(&address).is_err());
    }
}
