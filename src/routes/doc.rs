use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{admin, analytics, auth, cart, categories as category_dto, combos as combo_dto, orders as order_dto, products, wishlist as wishlist_dto},
    models::{AuditLog, Category, Combo, GuestInfo, Order, OrderItem, OrderStatus, Product, ShippingAddress, User, WishlistItem},
    pricing::OrderPrices,
    response::{ApiResponse, Meta},
    routes::{
        admin as admin_routes, analytics as analytics_routes, cart as cart_routes, categories,
        combos, health, orders, params, products as product_routes, users, wishlist,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::api_health,
        users::register,
        users::verify_otp,
        users::resend_otp,
        users::login,
        users::forgot_password,
        users::reset_password,
        users::get_profile,
        users::update_profile,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::update_product,
        product_routes::delete_product,
        categories::list_categories,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        combos::list_combos,
        combos::get_combo,
        combos::create_combo,
        combos::update_combo,
        combos::delete_combo,
        cart_routes::cart_list,
        cart_routes::add_to_cart,
        cart_routes::replace_cart,
        cart_routes::clear_cart,
        cart_routes::set_quantity,
        cart_routes::remove_from_cart,
        cart_routes::add_combo,
        wishlist::list_wishlist,
        wishlist::add_to_wishlist,
        wishlist::remove_from_wishlist,
        orders::create_order,
        orders::checkout,
        orders::list_order,
        orders::get_order,
        orders::get_guest_order,
        orders::pay_order,
        orders::cancel_order,
        admin_routes::list_all_orders,
        admin_routes::get_order_admin,
        admin_routes::update_order_status,
        admin_routes::mark_delivered,
        admin_routes::list_low_stock,
        admin_routes::adjust_inventory,
        admin_routes::list_users,
        admin_routes::update_role,
        admin_routes::delete_user,
        admin_routes::list_audit_logs,
        analytics_routes::summary,
        analytics_routes::revenue,
        analytics_routes::top_products,
        analytics_routes::frequently_bought_together
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            WishlistItem,
            ShippingAddress,
            GuestInfo,
            Order,
            OrderItem,
            OrderStatus,
            Combo,
            AuditLog,
            OrderPrices,
            auth::RegisterRequest,
            auth::RegisterResponse,
            auth::LoginRequest,
            auth::LoginResponse,
            auth::VerifyOtpRequest,
            auth::OtpPurpose,
            auth::ResendOtpRequest,
            auth::OtpSent,
            auth::ForgotPasswordRequest,
            auth::ResetPasswordRequest,
            auth::UpdateProfileRequest,
            products::CreateProductRequest,
            products::UpdateProductRequest,
            products::ProductList,
            category_dto::CategoryRequest,
            category_dto::CategoryList,
            combo_dto::ComboItemRequest,
            combo_dto::CreateComboRequest,
            combo_dto::UpdateComboRequest,
            combo_dto::ComboLine,
            combo_dto::ComboDetail,
            combo_dto::ComboList,
            cart::AddToCartRequest,
            cart::SetQuantityRequest,
            cart::ReplaceCartRequest,
            cart::CartLine,
            cart::CartView,
            wishlist_dto::AddWishlistRequest,
            wishlist_dto::WishlistProductList,
            order_dto::OrderLineRequest,
            order_dto::CreateOrderRequest,
            order_dto::CheckoutRequest,
            order_dto::PayOrderRequest,
            order_dto::OrderList,
            order_dto::OrderWithItems,
            admin::LowStockList,
            admin::UpdateOrderStatusRequest,
            admin::InventoryAdjustRequest,
            admin::UpdateRoleRequest,
            admin::UserList,
            admin::AuditLogList,
            analytics::SalesSummary,
            analytics::RevenuePeriod,
            analytics::RevenuePoint,
            analytics::RevenueSeries,
            analytics::TopProduct,
            analytics::TopProductList,
            analytics::ItemsetProduct,
            analytics::ItemsetReport,
            analytics::FrequentlyBoughtTogether,
            params::SortOrder,
            params::ProductSortBy,
            Meta,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<cart::CartView>,
            ApiResponse<order_dto::OrderWithItems>,
            ApiResponse<order_dto::OrderList>,
            ApiResponse<admin::LowStockList>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Users", description = "Registration, OTP verification, login and profile"),
        (name = "Products", description = "Product catalog"),
        (name = "Categories", description = "Product categories"),
        (name = "Combos", description = "Discounted product bundles"),
        (name = "Cart", description = "Server-side cart"),
        (name = "Wishlist", description = "Saved products"),
        (name = "Orders", description = "Order placement, payment and tracking"),
        (name = "Admin", description = "Admin endpoints"),
        (name = "Analytics", description = "Admin dashboard analytics"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_core_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/users/register",
            "/api/cart/{product_id}",
            "/api/orders/checkout",
            "/api/analytics/frequently-bought-together",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = doc.components.expect("components").security_schemes;
        assert!(schemes.contains_key("bearer_auth"));
    }
}
