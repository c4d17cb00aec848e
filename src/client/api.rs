use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, VerifyOtpRequest},
        cart::{AddToCartRequest, CartView, ReplaceCartRequest, SetQuantityRequest},
        orders::{CheckoutRequest, CreateOrderRequest, OrderList, OrderWithItems},
        products::ProductList,
        wishlist::{AddWishlistRequest, WishlistProductList},
    },
    models::{Product, WishlistItem},
    response::ApiResponse,
    routes::params::{OrderListQuery, Pagination, ProductQuery},
};

use super::{
    ClientConfig, ClientError, ClientResult, cart_store::CartBackend, health::HealthCheck,
    session::AuthSession,
};

/// HTTP client for the store API. Attaches the session token to every call
/// and signs the session out when the server rejects it.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Arc<AuthSession>) -> ClientResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}/api{}", self.base_url, path));
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            if self.session.is_signed_in() {
                tracing::info!("session rejected by server, signing out");
            }
            self.session.clear().await;
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(error_from(status, response).await);
        }

        let body: ApiResponse<T> = response.json().await?;
        body.data
            .ok_or_else(|| ClientError::api(status, format!("empty response: {}", body.message)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn with_body<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.send(self.request(method, path).json(body)).await
    }

    // ----- account -----

    pub async fn register(&self, req: &RegisterRequest) -> ClientResult<RegisterResponse> {
        self.with_body(Method::POST, "/users/register", req).await
    }

    /// Confirms the emailed code and signs the user in.
    pub async fn verify_otp(&self, req: &VerifyOtpRequest) -> ClientResult<LoginResponse> {
        let login: LoginResponse = self.with_body(Method::POST, "/users/verify-otp", req).await?;
        self.session.set(login.clone()).await?;
        Ok(login)
    }

    pub async fn login(&self, req: &LoginRequest) -> ClientResult<LoginResponse> {
        let login: LoginResponse = self.with_body(Method::POST, "/users/login", req).await?;
        self.session.set(login.clone()).await?;
        Ok(login)
    }

    pub async fn logout(&self) {
        self.session.clear().await;
    }

    // ----- catalog -----

    pub async fn list_products(&self, query: &ProductQuery) -> ClientResult<ProductList> {
        self.send(self.request(Method::GET, "/products").query(query))
            .await
    }

    pub async fn get_product(&self, id: Uuid) -> ClientResult<Product> {
        self.get(&format!("/products/{id}")).await
    }

    // ----- cart -----

    pub async fn get_cart(&self) -> ClientResult<CartView> {
        self.get("/cart").await
    }

    pub async fn add_to_cart(&self, product_id: Uuid, quantity: i32) -> ClientResult<CartView> {
        let req = AddToCartRequest {
            product_id,
            quantity,
        };
        self.with_body(Method::POST, "/cart", &req).await
    }

    pub async fn set_cart_quantity(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> ClientResult<CartView> {
        let req = SetQuantityRequest { quantity };
        self.with_body(Method::PUT, &format!("/cart/{product_id}"), &req)
            .await
    }

    pub async fn remove_from_cart(&self, product_id: Uuid) -> ClientResult<CartView> {
        self.send(self.request(Method::DELETE, &format!("/cart/{product_id}")))
            .await
    }

    pub async fn clear_cart(&self) -> ClientResult<CartView> {
        self.send(self.request(Method::DELETE, "/cart")).await
    }

    pub async fn replace_cart(&self, items: Vec<AddToCartRequest>) -> ClientResult<CartView> {
        let req = ReplaceCartRequest { items };
        self.with_body(Method::PUT, "/cart", &req).await
    }

    pub async fn add_combo_to_cart(&self, combo_id: Uuid) -> ClientResult<CartView> {
        self.send(self.request(Method::POST, &format!("/cart/combos/{combo_id}")))
            .await
    }

    // ----- orders -----

    pub async fn checkout(&self, req: &CheckoutRequest) -> ClientResult<OrderWithItems> {
        self.with_body(Method::POST, "/orders/checkout", req).await
    }

    /// Places an order from explicit lines; works without signing in when
    /// `guest` is set.
    pub async fn create_order(&self, req: &CreateOrderRequest) -> ClientResult<OrderWithItems> {
        self.with_body(Method::POST, "/orders", req).await
    }

    pub async fn my_orders(&self, query: &OrderListQuery) -> ClientResult<OrderList> {
        self.send(self.request(Method::GET, "/orders/mine").query(query))
            .await
    }

    pub async fn get_order(&self, id: Uuid) -> ClientResult<OrderWithItems> {
        self.get(&format!("/orders/{id}")).await
    }

    // ----- wishlist -----

    pub async fn wishlist(&self, page: &Pagination) -> ClientResult<WishlistProductList> {
        self.send(self.request(Method::GET, "/wishlist").query(page))
            .await
    }

    pub async fn add_to_wishlist(&self, product_id: Uuid) -> ClientResult<WishlistItem> {
        let req = AddWishlistRequest { product_id };
        self.with_body(Method::POST, "/wishlist", &req).await
    }

    pub async fn remove_from_wishlist(&self, product_id: Uuid) -> ClientResult<()> {
        let _: serde_json::Value = self
            .send(self.request(Method::DELETE, &format!("/wishlist/{product_id}")))
            .await?;
        Ok(())
    }

    /// Hits the API health endpoint, which also checks the database.
    pub async fn ping(&self) -> ClientResult<()> {
        let response = self
            .http
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(error_from(status, response).await)
        }
    }
}

/// Pulls the most specific message out of an error envelope.
async fn error_from(status: StatusCode, response: Response) -> ClientError {
    let body: Option<serde_json::Value> = response.json().await.ok();
    let message = body
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    ClientError::api(status, message)
}

fn error_message(body: &serde_json::Value) -> Option<String> {
    body.pointer("/data/error")
        .or_else(|| body.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[async_trait]
impl CartBackend for ApiClient {
    async fn fetch_cart(&self) -> ClientResult<CartView> {
        self.get_cart().await
    }

    async fn set_quantity(&self, product_id: Uuid, quantity: i32) -> ClientResult<CartView> {
        self.set_cart_quantity(product_id, quantity).await
    }

    async fn remove_item(&self, product_id: Uuid) -> ClientResult<CartView> {
        self.remove_from_cart(product_id).await
    }

    async fn clear_cart(&self) -> ClientResult<CartView> {
        ApiClient::clear_cart(self).await
    }

    async fn replace_cart(&self, items: Vec<AddToCartRequest>) -> ClientResult<CartView> {
        ApiClient::replace_cart(self, items).await
    }
}

#[async_trait]
impl HealthCheck for ApiClient {
    async fn ping(&self) -> ClientResult<()> {
        ApiClient::ping(self).await
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::HeaderMap, routing::get};
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::{
        client::storage::{MemoryStorage, Storage},
        models::User,
    };

    fn signed_in(token: &str) -> LoginResponse {
        LoginResponse {
            token: token.into(),
            token_type: "Bearer".into(),
            expires_at: Utc::now().timestamp() + 3600,
            user: User {
                id: Uuid::new_v4(),
                name: "Lin".into(),
                email: "lin@example.com".into(),
                role: "user".into(),
                is_admin: false,
                is_verified: true,
                created_at: Utc::now(),
            },
        }
    }

    /// Serves `router` on an ephemeral local port and returns its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn rejected_token_signs_the_session_out() {
        // answers 401 only when the stored token was actually sent
        let router = Router::new().route(
            "/api/cart",
            get(|headers: HeaderMap| async move {
                let sent = headers
                    .get(reqwest::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer stale-token");
                let status = if sent {
                    axum::http::StatusCode::UNAUTHORIZED
                } else {
                    axum::http::StatusCode::BAD_REQUEST
                };
                let body = json!({
                    "message": "Unauthorized Invalid or expired token",
                    "data": { "error": "Invalid or expired token" },
                    "meta": null
                });
                (status, Json(body))
            }),
        );
        let config = ClientConfig {
            base_url: serve(router).await,
            ..ClientConfig::default()
        };

        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let session = Arc::new(AuthSession::new(storage.clone()));
        session.set(signed_in("stale-token")).await.unwrap();
        assert!(storage.get("session").await.unwrap().is_some());
        let client = ApiClient::new(&config, session.clone()).unwrap();

        let err = client.get_cart().await.unwrap_err();

        assert!(matches!(err, ClientError::Unauthorized), "got {err:?}");
        assert!(!session.is_signed_in());
        assert!(storage.get("session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn api_errors_carry_status_and_detail() {
        let router = Router::new().route(
            "/api/cart",
            get(|| async {
                let body = json!({
                    "message": "Bad Request Only 2 left",
                    "data": { "error": "Only 2 left" },
                    "meta": null
                });
                (axum::http::StatusCode::BAD_REQUEST, Json(body))
            }),
        );
        let config = ClientConfig {
            base_url: serve(router).await,
            ..ClientConfig::default()
        };
        let session = Arc::new(AuthSession::new(Arc::new(MemoryStorage::new())));
        let client = ApiClient::new(&config, session).unwrap();

        let err = client.get_cart().await.unwrap_err();
        assert!(
            matches!(&err, ClientError::Api { status: 400, message } if message == "Only 2 left"),
            "got {err:?}"
        );
        assert!(!err.is_offline());
    }

    #[test]
    fn error_message_prefers_detail_over_summary() {
        let body = json!({
            "message": "Bad Request",
            "data": { "error": "Only 2 left of Mouse" },
            "meta": null
        });
        assert_eq!(error_message(&body).as_deref(), Some("Only 2 left of Mouse"));

        let body = json!({ "message": "Too Many Requests", "data": null, "meta": null });
        assert_eq!(error_message(&body).as_deref(), Some("Too Many Requests"));

        assert_eq!(error_message(&json!({ "unexpected": true })), None);
    }

    #[test]
    fn base_url_is_normalized() {
        let config = ClientConfig {
            base_url: "http://shop.test/".into(),
            ..ClientConfig::default()
        };
        let session = Arc::new(AuthSession::new(Arc::new(MemoryStorage::new())));
        let client = ApiClient::new(&config, session).unwrap();
        assert_eq!(client.base_url, "http://shop.test");
    }
}
