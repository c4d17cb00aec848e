use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    dto::analytics::{
        FrequentItemsetQuery, FrequentlyBoughtTogether, ItemsetProduct, ItemsetReport,
        RevenuePeriod, RevenuePoint, RevenueQuery, RevenueSeries, SalesSummary, TopProduct,
        TopProductList, TopProductsQuery,
    },
    error::{AppError, AppResult},
    itemsets::frequent_itemsets,
    middleware::auth::{AuthUser, ensure_admin},
    models::ROLE_USER,
    response::{ApiResponse, Meta},
    state::AppState,
};

const LOW_STOCK_THRESHOLD: i32 = 5;
const DEFAULT_MIN_SUPPORT: f64 = 0.01;
const DEFAULT_MAX_SIZE: usize = 3;
const MAX_ITEMSET_SIZE: usize = 5;
const DEFAULT_ITEMSET_LIMIT: usize = 20;

#[derive(sqlx::FromRow)]
struct OrderTotals {
    total_revenue: i64,
    total_orders: i64,
    paid_orders: i64,
    delivered_orders: i64,
}

pub async fn sales_summary(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<SalesSummary>> {
    ensure_admin(user)?;

    let totals = sqlx::query_as::<_, OrderTotals>(
        r#"
        SELECT
            COALESCE(SUM(total_price) FILTER (WHERE payment_status = 'paid'), 0)::BIGINT AS total_revenue,
            COUNT(*)::BIGINT AS total_orders,
            COUNT(*) FILTER (WHERE payment_status = 'paid')::BIGINT AS paid_orders,
            COUNT(*) FILTER (WHERE status = 'delivered')::BIGINT AS delivered_orders
        FROM orders
        WHERE status <> 'cancelled'
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let (total_customers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = $1")
        .bind(ROLE_USER)
        .fetch_one(&state.pool)
        .await?;

    let (total_products, low_stock_products): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE stock <= $1) FROM products",
    )
    .bind(LOW_STOCK_THRESHOLD)
    .fetch_one(&state.pool)
    .await?;

    let average_order_value = if totals.paid_orders > 0 {
        totals.total_revenue / totals.paid_orders
    } else {
        0
    };

    let summary = SalesSummary {
        total_revenue: totals.total_revenue,
        total_orders: totals.total_orders,
        paid_orders: totals.paid_orders,
        delivered_orders: totals.delivered_orders,
        average_order_value,
        total_customers,
        total_products,
        low_stock_products,
    };
    Ok(ApiResponse::success("Summary", summary, Some(Meta::empty())))
}

/// Paid revenue bucketed by day, week or month over the last `days` days.
pub async fn revenue_series(
    state: &AppState,
    user: &AuthUser,
    query: RevenueQuery,
) -> AppResult<ApiResponse<RevenueSeries>> {
    ensure_admin(user)?;
    let period = query.period.unwrap_or(RevenuePeriod::Day);
    let days = query.days.unwrap_or(30).clamp(1, 366) as i32;

    let rows: Vec<(DateTime<Utc>, i64, i64)> = sqlx::query_as(
        r#"
        SELECT date_trunc($1, paid_at) AS bucket,
               COALESCE(SUM(total_price), 0)::BIGINT AS revenue,
               COUNT(*)::BIGINT AS orders
        FROM orders
        WHERE payment_status = 'paid'
          AND status <> 'cancelled'
          AND paid_at >= NOW() - make_interval(days => $2)
        GROUP BY bucket
        ORDER BY bucket
        "#,
    )
    .bind(period.as_sql())
    .bind(days)
    .fetch_all(&state.pool)
    .await?;

    let points = rows
        .into_iter()
        .map(|(bucket, revenue, orders)| RevenuePoint {
            bucket,
            revenue,
            orders,
        })
        .collect();

    Ok(ApiResponse::success(
        "Revenue",
        RevenueSeries {
            period: period.as_sql().to_string(),
            points,
        },
        Some(Meta::empty()),
    ))
}

pub async fn top_products(
    state: &AppState,
    user: &AuthUser,
    query: TopProductsQuery,
) -> AppResult<ApiResponse<TopProductList>> {
    ensure_admin(user)?;
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let rows: Vec<(Uuid, String, i64, i64)> = sqlx::query_as(
        r#"
        SELECT oi.product_id,
               MAX(oi.name) AS name,
               SUM(oi.quantity)::BIGINT AS units_sold,
               SUM(oi.quantity::BIGINT * oi.price)::BIGINT AS revenue
        FROM order_items oi
        JOIN orders o ON o.id = oi.order_id
        WHERE o.status <> 'cancelled'
        GROUP BY oi.product_id
        ORDER BY units_sold DESC, revenue DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    let items: Vec<TopProduct> = rows
        .into_iter()
        .map(|(product_id, name, units_sold, revenue)| TopProduct {
            product_id,
            name,
            units_sold,
            revenue,
        })
        .collect();
    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "Top products",
        TopProductList { items },
        Some(Meta::new(1, limit, total)),
    ))
}

/// Parameters after defaults and bounds are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ItemsetParams {
    min_support: f64,
    max_size: usize,
    limit: usize,
}

fn itemset_params(query: &FrequentItemsetQuery) -> AppResult<ItemsetParams> {
    let min_support = query.min_support.unwrap_or(DEFAULT_MIN_SUPPORT);
    if !(min_support > 0.0 && min_support <= 1.0) {
        return Err(AppError::BadRequest(
            "min_support must be greater than 0 and at most 1".into(),
        ));
    }
    Ok(ItemsetParams {
        min_support,
        max_size: query
            .max_size
            .unwrap_or(DEFAULT_MAX_SIZE)
            .clamp(2, MAX_ITEMSET_SIZE),
        limit: query.limit.unwrap_or(DEFAULT_ITEMSET_LIMIT).clamp(1, 100),
    })
}

/// Groups `(order_id, product_id)` rows into one basket per order.
fn group_baskets(rows: &[(Uuid, Uuid, String)]) -> Vec<Vec<Uuid>> {
    let mut baskets: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    for (order_id, product_id, _) in rows {
        baskets.entry(*order_id).or_default().push(*product_id);
    }
    baskets.into_values().collect()
}

/// Apriori over the baskets of every non-cancelled order.
pub async fn frequently_bought_together(
    state: &AppState,
    user: &AuthUser,
    query: FrequentItemsetQuery,
) -> AppResult<ApiResponse<FrequentlyBoughtTogether>> {
    ensure_admin(user)?;
    let params = itemset_params(&query)?;

    let rows: Vec<(Uuid, Uuid, String)> = sqlx::query_as(
        r#"
        SELECT oi.order_id, oi.product_id, oi.name
        FROM order_items oi
        JOIN orders o ON o.id = oi.order_id
        WHERE o.status <> 'cancelled'
        ORDER BY oi.order_id
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let names: HashMap<Uuid, String> = rows
        .iter()
        .map(|(_, product_id, name)| (*product_id, name.clone()))
        .collect();
    let baskets = group_baskets(&rows);
    let total_orders = baskets.len() as i64;

    let started = std::time::Instant::now();
    let itemsets = frequent_itemsets(&baskets, params.min_support, params.max_size);
    tracing::debug!(
        baskets = baskets.len(),
        found = itemsets.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "frequent itemsets computed"
    );

    let frequent_itemsets = itemsets
        .into_iter()
        .take(params.limit)
        .map(|set| ItemsetReport {
            items: set
                .items
                .iter()
                .map(|id| ItemsetProduct {
                    product_id: *id,
                    name: names.get(id).cloned().unwrap_or_default(),
                })
                .collect(),
            support: set.support,
            frequency: set.frequency as i64,
        })
        .collect();

    Ok(ApiResponse::success(
        "Frequently bought together",
        FrequentlyBoughtTogether {
            min_support: params.min_support,
            total_orders,
            frequent_itemsets,
        },
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(min_support: Option<f64>, max_size: Option<usize>, limit: Option<usize>) -> FrequentItemsetQuery {
        FrequentItemsetQuery {
            min_support,
            max_size,
            limit,
        }
    }

    #[test]
    fn itemset_params_apply_defaults_and_bounds() {
        let params = itemset_params(&query(None, None, None)).unwrap();
        assert_eq!(
            params,
            ItemsetParams {
                min_support: DEFAULT_MIN_SUPPORT,
                max_size: DEFAULT_MAX_SIZE,
                limit: DEFAULT_ITEMSET_LIMIT,
            }
        );

        let params = itemset_params(&query(Some(0.5), Some(50), Some(0))).unwrap();
        assert_eq!(params.max_size, MAX_ITEMSET_SIZE);
        assert_eq!(params.limit, 1);

        assert!(itemset_params(&query(Some(0.0), None, None)).is_err());
        assert!(itemset_params(&query(Some(1.5), None, None)).is_err());
    }

    #[test]
    fn rows_group_into_one_basket_per_order() {
        let (o1, o2) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let (a, b) = (Uuid::from_u128(10), Uuid::from_u128(11));
        let rows = vec![
            (o1, a, "Mouse".to_string()),
            (o1, b, "Pad".to_string()),
            (o2, a, "Mouse".to_string()),
        ];
        let baskets = group_baskets(&rows);
        assert_eq!(baskets, vec![vec![a, b], vec![a]]);
    }
}
