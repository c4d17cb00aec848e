use retail_store_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    services::{auth_service::hash_secret, category_service::slugify},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&create_orm_conn(&pool)).await?;

    let admin_id = ensure_user(&pool, "Store Admin", "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user(&pool, "Sample Shopper", "user@example.com", "user123", "user").await?;
    seed_catalog(&pool).await?;
    seed_combo(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let password_hash = hash_secret(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Seeded accounts skip OTP verification.
    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, role, is_verified)
        VALUES ($1, $2, $3, $4, $5, TRUE)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role, is_verified = TRUE
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn ensure_category(pool: &sqlx::PgPool, name: &str) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO categories (id, name, slug)
        VALUES ($1, $2, $3)
        ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(slugify(name))
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn seed_catalog(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let electronics = ensure_category(pool, "Electronics").await?;
    let accessories = ensure_category(pool, "Accessories").await?;
    let home = ensure_category(pool, "Home & Kitchen").await?;

    // Prices are in cents.
    let products = vec![
        ("Wireless Mouse", "Ergonomic 2.4 GHz mouse", 2499_i64, 40_i32, electronics),
        ("Mechanical Keyboard", "Tenkeyless, hot-swappable switches", 8999, 15, electronics),
        ("USB-C Hub", "7-in-1 hub with HDMI and card reader", 3499, 25, electronics),
        ("Mouse Pad XL", "Stitched edges, 90x40 cm", 1599, 60, accessories),
        ("Laptop Sleeve", "Padded 14 inch sleeve", 2299, 3, accessories),
        ("Pour-over Kettle", "Gooseneck kettle, 1 L", 4599, 12, home),
        ("Ceramic Mug", "350 ml stoneware mug", 1299, 0, home),
    ];

    for (name, desc, price, stock, category_id) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, stock, category_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .bind(category_id)
        .execute(pool)
        .await?;
    }

    println!("Seeded catalog");
    Ok(())
}

async fn seed_combo(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    const NAME: &str = "Desk Setup Bundle";
    let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM combos WHERE name = $1")
        .bind(NAME)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let combo_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO combos (id, name, description, discount_percent) VALUES ($1, $2, $3, $4)",
    )
    .bind(combo_id)
    .bind(NAME)
    .bind("Mouse, keyboard and pad at 10% off")
    .bind(10_i32)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO combo_items (id, combo_id, product_id, quantity)
        SELECT gen_random_uuid(), $1, id, 1
        FROM products
        WHERE name IN ('Wireless Mouse', 'Mechanical Keyboard', 'Mouse Pad XL')
        "#,
    )
    .bind(combo_id)
    .execute(pool)
    .await?;

    println!("Seeded combo {NAME}");
    Ok(())
}
