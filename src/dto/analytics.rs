use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct SalesSummary {
    pub total_revenue: i64,
    pub total_orders: i64,
    pub paid_orders: i64,
    pub delivered_orders: i64,
    pub average_order_value: i64,
    pub total_customers: i64,
    pub total_products: i64,
    pub low_stock_products: i64,
}

#[derive(Debug, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevenuePeriod {
    Day,
    Week,
    Month,
}

impl RevenuePeriod {
    pub fn as_sql(&self) -> &'static str {
        match self {
            RevenuePeriod::Day => "day",
            RevenuePeriod::Week => "week",
            RevenuePeriod::Month => "month",
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevenueQuery {
    pub period: Option<RevenuePeriod>,
    pub days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct RevenuePoint {
    pub bucket: chrono::DateTime<chrono::Utc>,
    pub revenue: i64,
    pub orders: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevenueSeries {
    pub period: String,
    pub points: Vec<RevenuePoint>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TopProductsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct TopProduct {
    pub product_id: Uuid,
    pub name: String,
    pub units_sold: i64,
    pub revenue: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TopProductList {
    pub items: Vec<TopProduct>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FrequentItemsetQuery {
    pub min_support: Option<f64>,
    pub max_size: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct ItemsetProduct {
    pub product_id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct ItemsetReport {
    pub items: Vec<ItemsetProduct>,
    pub support: f64,
    pub frequency: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FrequentlyBoughtTogether {
    pub min_support: f64,
    pub total_orders: i64,
    pub frequent_itemsets: Vec<ItemsetReport>,
}
