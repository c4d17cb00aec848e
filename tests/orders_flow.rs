use std::sync::Arc;

use retail_store_api::{
    config::{AppConfig, OtpConfig, PricingConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        admin::{LowStockQuery, UpdateOrderStatusRequest},
        orders::{CheckoutRequest, CreateOrderRequest, OrderLineRequest, PayOrderRequest},
    },
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    error::AppError,
    mailer::LogMailer,
    middleware::auth::AuthUser,
    models::{GuestInfo, OrderStatus, ShippingAddress},
    services::{admin_service, cart_service, order_service, product_service},
    state::AppState,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

// Rows use fresh ids and emails so the tests can share a database and run in parallel.
async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run order flow tests.");
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&pool);
    run_migrations(&orm).await?;

    let config = AppConfig {
        database_url,
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        jwt_ttl_hours: 1,
        otp: OtpConfig::default(),
        pricing: PricingConfig::default(),
        cors_origin: None,
        smtp: None,
    };
    Ok(Some(AppState {
        pool,
        orm,
        config: Arc::new(config),
        mailer: Arc::new(LogMailer),
    }))
}

async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        name: Set(format!("Test {role}")),
        email: Set(format!("{role}-{}@example.com", Uuid::new_v4())),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        is_verified: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        role: user.role,
    })
}

async fn create_product(state: &AppState, price: i64, stock: i32) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(format!("Widget {}", Uuid::new_v4())),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        stock: Set(stock),
        category_id: Set(None),
        image_url: Set(None),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}

async fn stock_of(state: &AppState, id: Uuid) -> anyhow::Result<i32> {
    let product = product_service::get_product(state, id).await?;
    Ok(product.data.expect("product").stock)
}

fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ada Buyer".into(),
        address: "1 Test Street".into(),
        city: "Testville".into(),
        postal_code: "12345".into(),
        country: "NL".into(),
        phone: None,
    }
}

// User fills the cart, checks out and pays; admin ships, delivers and sees low stock.
#[tokio::test]
async fn checkout_pay_and_fulfil_flow() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let product_id = create_product(&state, 1000, 10).await?;

    // quantities above stock are capped
    let cart = cart_service::set_quantity(&state, &user, product_id, 50).await?;
    assert_eq!(cart.data.unwrap().items[0].quantity, 10);
    let cart = cart_service::set_quantity(&state, &user, product_id, 2).await?;
    assert_eq!(cart.data.unwrap().subtotal, 2000);

    let placed = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            shipping_address: address(),
            payment_method: "card".into(),
        },
    )
    .await?
    .data
    .expect("order");
    let order = placed.order;
    assert_eq!(placed.items.len(), 1);
    assert_eq!(order.items_price, 2000);
    // below the free-shipping threshold: flat fee plus 15% tax
    assert_eq!(order.total_price, 2000 + 1000 + 300);
    assert!(order.invoice_number.starts_with("INV-"));
    assert_eq!(stock_of(&state, product_id).await?, 8);

    let cart = cart_service::get_cart(&state, &user).await?;
    assert!(cart.data.unwrap().items.is_empty());

    let wrong_invoice = order_service::pay_order(
        &state,
        Some(&user),
        order.id,
        PayOrderRequest {
            invoice_number: "INV-00000000-NOPE".into(),
            transaction_id: None,
        },
    )
    .await;
    assert!(matches!(wrong_invoice, Err(AppError::BadRequest(_))));

    let paid = order_service::pay_order(
        &state,
        Some(&user),
        order.id,
        PayOrderRequest {
            invoice_number: order.invoice_number.clone(),
            transaction_id: Some("txn-1".into()),
        },
    )
    .await?
    .data
    .expect("paid order");
    assert_eq!(paid.order.status, "paid");
    assert!(paid.order.paid_at.is_some());

    // a paid order can no longer be cancelled by its owner
    let cancel = order_service::cancel_order(&state, &user, order.id).await;
    assert!(matches!(cancel, Err(AppError::BadRequest(_))));

    // skipping straight back to pending is not a valid transition
    let backwards = admin_service::update_order_status(
        &state,
        &admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Pending,
        },
    )
    .await;
    assert!(matches!(backwards, Err(AppError::BadRequest(_))));

    let shipped = admin_service::update_order_status(
        &state,
        &admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
        },
    )
    .await?;
    assert_eq!(shipped.data.unwrap().status, "shipped");

    let delivered = admin_service::mark_delivered(&state, &admin, order.id).await?;
    let delivered = delivered.data.unwrap();
    assert!(delivered.is_delivered);
    assert!(delivered.delivered_at.is_some());

    let low = admin_service::list_low_stock(
        &state,
        &admin,
        LowStockQuery {
            page: Some(1),
            per_page: Some(100),
            threshold: Some(8),
        },
    )
    .await?;
    assert!(
        low.data.unwrap().items.iter().any(|p| p.id == product_id),
        "expected product to appear in low-stock list"
    );

    Ok(())
}

#[tokio::test]
async fn guest_order_is_visible_by_email_and_cancel_restocks() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let product_id = create_product(&state, 6000, 3).await?;
    let email = format!("guest-{}@example.com", Uuid::new_v4());

    let too_many = order_service::create_order(
        &state,
        None,
        CreateOrderRequest {
            items: vec![OrderLineRequest {
                product_id,
                quantity: 4,
            }],
            shipping_address: address(),
            payment_method: "cash".into(),
            guest: Some(GuestInfo {
                name: "Guest".into(),
                email: email.clone(),
            }),
        },
    )
    .await;
    assert!(matches!(too_many, Err(AppError::BadRequest(_))));
    assert_eq!(stock_of(&state, product_id).await?, 3);

    let placed = order_service::create_order(
        &state,
        None,
        CreateOrderRequest {
            items: vec![OrderLineRequest {
                product_id,
                quantity: 2,
            }],
            shipping_address: address(),
            payment_method: "cash".into(),
            guest: Some(GuestInfo {
                name: "Guest".into(),
                email: email.to_uppercase(),
            }),
        },
    )
    .await?
    .data
    .expect("guest order");
    let order = placed.order;
    assert_eq!(order.user_id, None);
    // over the threshold: no shipping fee
    assert_eq!(order.shipping_price, 0);
    assert_eq!(stock_of(&state, product_id).await?, 1);

    let found = order_service::get_guest_order(&state, order.id, &email).await?;
    assert_eq!(found.data.unwrap().order.id, order.id);
    let other = order_service::get_guest_order(&state, order.id, "someone@example.com").await;
    assert!(matches!(other, Err(AppError::NotFound)));

    let cancelled = admin_service::update_order_status(
        &state,
        &admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Cancelled,
        },
    )
    .await?;
    assert_eq!(cancelled.data.unwrap().status, "cancelled");
    assert_eq!(stock_of(&state, product_id).await?, 3);

    Ok(())
}
