use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dto::analytics::{
        FrequentItemsetQuery, FrequentlyBoughtTogether, RevenueQuery, RevenueSeries, SalesSummary,
        TopProductList, TopProductsQuery,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::analytics_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/summary", get(summary))
        .route("/revenue", get(revenue))
        .route("/top-products", get(top_products))
        .route("/frequently-bought-together", get(frequently_bought_together))
}

#[utoipa::path(
    get,
    path = "/api/analytics/summary",
    responses(
        (status = 200, description = "Store totals", body = ApiResponse<SalesSummary>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Analytics"
)]
pub async fn summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<SalesSummary>>> {
    let resp = analytics_service::sales_summary(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/analytics/revenue",
    params(
        ("period" = Option<String>, Query, description = "day, week or month; default day"),
        ("days" = Option<i64>, Query, description = "Look-back window in days, default 30")
    ),
    responses(
        (status = 200, description = "Paid revenue per period", body = ApiResponse<RevenueSeries>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Analytics"
)]
pub async fn revenue(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<RevenueQuery>,
) -> AppResult<Json<ApiResponse<RevenueSeries>>> {
    let resp = analytics_service::revenue_series(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/analytics/top-products",
    params(
        ("limit" = Option<i64>, Query, description = "Number of products, default 10")
    ),
    responses(
        (status = 200, description = "Best sellers by units", body = ApiResponse<TopProductList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Analytics"
)]
pub async fn top_products(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TopProductsQuery>,
) -> AppResult<Json<ApiResponse<TopProductList>>> {
    let resp = analytics_service::top_products(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/analytics/frequently-bought-together",
    params(
        ("min_support" = Option<f64>, Query, description = "Minimum support in (0, 1], default 0.01"),
        ("max_size" = Option<usize>, Query, description = "Largest itemset size, default 3"),
        ("limit" = Option<usize>, Query, description = "Number of itemsets, default 20")
    ),
    responses(
        (status = 200, description = "Frequent itemsets over order baskets", body = ApiResponse<FrequentlyBoughtTogether>),
        (status = 400, description = "Invalid min_support"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Analytics"
)]
pub async fn frequently_bought_together(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<FrequentItemsetQuery>,
) -> AppResult<Json<ApiResponse<FrequentlyBoughtTogether>>> {
    let resp = analytics_service::frequently_bought_together(&state, &user, query).await?;
    Ok(Json(resp))
}
