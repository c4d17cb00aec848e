//! Cart and order arithmetic shared by the API services and the client cart.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::PricingConfig;

/// Clamp a requested quantity into `1..=stock`.
///
/// Returns `None` when nothing can be bought (no stock left). Out of range
/// requests are corrected rather than rejected.
pub fn clamp_quantity(requested: i32, stock: i32) -> Option<i32> {
    if stock <= 0 {
        return None;
    }
    Some(requested.clamp(1, stock))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct OrderPrices {
    pub items_price: i64,
    pub shipping_price: i64,
    pub tax_price: i64,
    pub total_price: i64,
}

/// `lines` are `(unit_price, quantity)` pairs.
pub fn order_prices(lines: &[(i64, i32)], config: &PricingConfig) -> OrderPrices {
    let items_price: i64 = lines
        .iter()
        .map(|(price, qty)| price * i64::from(*qty))
        .sum();
    let shipping_price = if items_price == 0 || items_price >= config.free_shipping_threshold {
        0
    } else {
        config.shipping_fee
    };
    // round half up
    let tax_price = (items_price * config.tax_rate_bps + 5_000) / 10_000;

    OrderPrices {
        items_price,
        shipping_price,
        tax_price,
        total_price: items_price + shipping_price + tax_price,
    }
}

/// Bundle price after a percentage discount, rounded down to the minor unit.
pub fn discounted_total(lines: &[(i64, i32)], discount_percent: i32) -> (i64, i64) {
    let original: i64 = lines
        .iter()
        .map(|(price, qty)| price * i64::from(*qty))
        .sum();
    let pct = i64::from(discount_percent.clamp(0, 100));
    let discounted = original * (100 - pct) / 100;
    (original, discounted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_caps_at_stock() {
        let mut qty = 0;
        for _ in 0..6 {
            qty = clamp_quantity(qty + 1, 5).unwrap();
        }
        assert_eq!(qty, 5);
    }

    #[test]
    fn clamp_corrects_non_positive_requests() {
        assert_eq!(clamp_quantity(0, 3), Some(1));
        assert_eq!(clamp_quantity(-4, 3), Some(1));
        assert_eq!(clamp_quantity(2, 0), None);
    }

    #[test]
    fn charges_shipping_below_threshold() {
        let config = PricingConfig::default();
        let prices = order_prices(&[(2_000, 2)], &config);
        assert_eq!(prices.items_price, 4_000);
        assert_eq!(prices.shipping_price, 1_000);
        assert_eq!(prices.tax_price, 600);
        assert_eq!(prices.total_price, 5_600);
    }

    #[test]
    fn free_shipping_at_threshold() {
        let config = PricingConfig::default();
        let prices = order_prices(&[(5_000, 2)], &config);
        assert_eq!(prices.shipping_price, 0);
        assert_eq!(prices.total_price, 10_000 + 1_500);
    }

    #[test]
    fn tax_rounds_half_up() {
        let config = PricingConfig {
            shipping_fee: 0,
            free_shipping_threshold: 0,
            tax_rate_bps: 1_500,
        };
        // 333 * 0.15 = 49.95
        assert_eq!(order_prices(&[(333, 1)], &config).tax_price, 50);
    }

    #[test]
    fn discount_floors_and_clamps_percent() {
        assert_eq!(discounted_total(&[(999, 1), (1_000, 2)], 10), (2_999, 2_699));
        assert_eq!(discounted_total(&[(1_000, 1)], 150), (1_000, 0));
    }
}
