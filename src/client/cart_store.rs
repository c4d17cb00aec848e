//! Cart with optimistic updates and a local shadow copy.
//!
//! The server cart is the source of truth while it is reachable. When a write
//! fails because the server is down, the same change is applied to a shadow
//! cart persisted in [`Storage`] and the store keeps working from it. On
//! reconnect a dirty shadow is pushed as a full snapshot; a clean one is
//! replaced by whatever the server holds.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dto::cart::{AddToCartRequest, CartView},
    models::Product,
    pricing::clamp_quantity,
};

use super::{
    ClientError, ClientResult,
    storage::{Storage, load_json, save_json},
};

const SHADOW_KEY: &str = "cart_shadow";

pub const LOCAL_CART_WARNING: &str =
    "The store is unreachable. Cart changes are kept on this device and will sync once it is back.";

/// Server-side cart operations the store depends on. Writes carry absolute
/// quantities so retrying one never double-adds.
#[async_trait]
pub trait CartBackend: Send + Sync {
    async fn fetch_cart(&self) -> ClientResult<CartView>;
    async fn set_quantity(&self, product_id: Uuid, quantity: i32) -> ClientResult<CartView>;
    async fn remove_item(&self, product_id: Uuid) -> ClientResult<CartView>;
    async fn clear_cart(&self) -> ClientResult<CartView>;
    async fn replace_cart(&self, items: Vec<AddToCartRequest>) -> ClientResult<CartView>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartEntry {
    pub product: Product,
    pub quantity: i32,
}

impl CartEntry {
    pub fn line_total(&self) -> i64 {
        self.product.price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CartSnapshot {
    pub items: Vec<CartEntry>,
    pub total_quantity: i64,
    pub subtotal: i64,
    pub is_using_local_cart: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct ShadowCart {
    items: Vec<CartEntry>,
    /// Holds changes the server has not seen.
    dirty: bool,
}

#[derive(Debug, Clone)]
enum CartOp {
    Set { product: Product, quantity: i32 },
    Remove(Uuid),
    Clear,
}

fn apply(items: &mut Vec<CartEntry>, op: &CartOp) {
    match op {
        CartOp::Set { product, quantity } => {
            match items.iter_mut().find(|e| e.product.id == product.id) {
                Some(entry) => {
                    entry.product = product.clone();
                    entry.quantity = *quantity;
                }
                None => items.push(CartEntry {
                    product: product.clone(),
                    quantity: *quantity,
                }),
            }
        }
        CartOp::Remove(product_id) => items.retain(|e| e.product.id != *product_id),
        CartOp::Clear => items.clear(),
    }
}

fn entries_from(view: CartView) -> Vec<CartEntry> {
    view.items
        .into_iter()
        .map(|line| CartEntry {
            product: line.product,
            quantity: line.quantity,
        })
        .collect()
}

pub struct CartStore<B> {
    backend: B,
    storage: Arc<dyn Storage>,
    items: Vec<CartEntry>,
    shadow: ShadowCart,
    using_local: bool,
}

impl<B: CartBackend> CartStore<B> {
    /// Loads the server cart and the saved shadow concurrently, then
    /// reconciles them.
    pub async fn init(backend: B, storage: Arc<dyn Storage>) -> ClientResult<Self> {
        let (remote, saved) = tokio::join!(
            backend.fetch_cart(),
            load_json::<ShadowCart>(storage.as_ref(), SHADOW_KEY)
        );
        let shadow = saved
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "ignoring unreadable local cart");
                None
            })
            .unwrap_or_default();

        let mut store = Self {
            backend,
            storage,
            items: shadow.items.clone(),
            shadow,
            using_local: false,
        };

        match remote {
            Ok(view) if store.shadow.dirty => {
                tracing::info!(
                    server_lines = view.items.len(),
                    local_lines = store.shadow.items.len(),
                    "found unsynced local cart, pushing it to the server"
                );
                store.push_shadow().await?;
            }
            Ok(view) => store.adopt(view).await,
            Err(err) if err.is_offline() => {
                tracing::warn!(error = %err, "cart server unreachable at start-up, using local cart");
                store.using_local = true;
            }
            Err(err) => return Err(err),
        }
        Ok(store)
    }

    pub fn items(&self) -> &[CartEntry] {
        &self.items
    }

    pub fn quantity_of(&self, product_id: Uuid) -> Option<i32> {
        self.items
            .iter()
            .find(|e| e.product.id == product_id)
            .map(|e| e.quantity)
    }

    pub fn is_using_local_cart(&self) -> bool {
        self.using_local
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            items: self.items.clone(),
            total_quantity: self.items.iter().map(|e| i64::from(e.quantity)).sum(),
            subtotal: self.items.iter().map(CartEntry::line_total).sum(),
            is_using_local_cart: self.using_local,
            warning: self.using_local.then(|| LOCAL_CART_WARNING.to_string()),
        }
    }

    /// Adds `quantity` on top of what is already in the cart, capped at the
    /// product's stock.
    pub async fn add_item(&mut self, product: &Product, quantity: i32) -> ClientResult<()> {
        let current = self.quantity_of(product.id).unwrap_or(0);
        let requested = current.saturating_add(quantity.max(1));
        let quantity = clamp_quantity(requested, product.stock)
            .ok_or_else(|| ClientError::OutOfStock(product.name.clone()))?;
        self.mutate(CartOp::Set {
            product: product.clone(),
            quantity,
        })
        .await
    }

    /// Sets an absolute quantity, silently corrected into `1..=stock`.
    /// Products not in the cart are ignored.
    pub async fn update_quantity(&mut self, product_id: Uuid, quantity: i32) -> ClientResult<()> {
        let Some(entry) = self.items.iter().find(|e| e.product.id == product_id) else {
            return Ok(());
        };
        let product = entry.product.clone();
        let quantity = clamp_quantity(quantity, product.stock)
            .ok_or_else(|| ClientError::OutOfStock(product.name.clone()))?;
        self.mutate(CartOp::Set { product, quantity }).await
    }

    pub async fn remove_item(&mut self, product_id: Uuid) -> ClientResult<()> {
        if self.quantity_of(product_id).is_none() {
            return Ok(());
        }
        self.mutate(CartOp::Remove(product_id)).await
    }

    pub async fn clear(&mut self) -> ClientResult<()> {
        self.mutate(CartOp::Clear).await
    }

    /// Tries to get back in sync with the server. Returns whether the store
    /// is now using the server cart.
    ///
    /// Offline edits are pushed as one snapshot. Without any, the server cart
    /// replaces the local copy.
    pub async fn retry_sync(&mut self) -> ClientResult<bool> {
        if self.using_local && self.shadow.dirty {
            self.push_shadow().await?;
        } else {
            self.refresh().await?;
        }
        Ok(!self.using_local)
    }

    async fn mutate(&mut self, op: CartOp) -> ClientResult<()> {
        let previous = self.items.clone();
        apply(&mut self.items, &op);

        if self.using_local {
            // retry_sync pushes these once the server is back
            self.record_locally(&op).await;
            return Ok(());
        }

        let result = match &op {
            CartOp::Set { product, quantity } => {
                self.backend.set_quantity(product.id, *quantity).await
            }
            CartOp::Remove(product_id) => self.backend.remove_item(*product_id).await,
            CartOp::Clear => self.backend.clear_cart().await,
        };

        match result {
            Ok(view) => {
                self.adopt(view).await;
                Ok(())
            }
            Err(err) if err.is_offline() => {
                tracing::warn!(error = %err, "cart server unreachable, switching to local cart");
                self.using_local = true;
                self.record_locally(&op).await;
                Ok(())
            }
            Err(ClientError::Api { status: 404, .. }) if matches!(op, CartOp::Remove(_)) => {
                // already gone on the server; take whatever else changed there
                match self.backend.fetch_cart().await {
                    Ok(view) => {
                        self.adopt(view).await;
                        Ok(())
                    }
                    Err(err) if err.is_offline() => {
                        tracing::warn!(error = %err, "cart refresh failed, switching to local cart");
                        self.using_local = true;
                        self.record_locally(&op).await;
                        Ok(())
                    }
                    Err(err) => {
                        self.items = previous;
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.items = previous;
                Err(err)
            }
        }
    }

    async fn record_locally(&mut self, op: &CartOp) {
        apply(&mut self.shadow.items, op);
        self.shadow.dirty = true;
        self.items = self.shadow.items.clone();
        self.persist_shadow().await;
    }

    async fn refresh(&mut self) -> ClientResult<()> {
        match self.backend.fetch_cart().await {
            Ok(view) => {
                self.adopt(view).await;
                Ok(())
            }
            Err(err) if err.is_offline() => {
                tracing::warn!(error = %err, "cart refresh failed, using local cart");
                self.using_local = true;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Sends the whole shadow cart; the server reply becomes authoritative.
    async fn push_shadow(&mut self) -> ClientResult<()> {
        let lines: Vec<AddToCartRequest> = self
            .shadow
            .items
            .iter()
            .map(|e| AddToCartRequest {
                product_id: e.product.id,
                quantity: e.quantity,
            })
            .collect();

        match self.backend.replace_cart(lines).await {
            Ok(view) => {
                tracing::info!(lines = view.items.len(), "local cart synchronized with server");
                self.adopt(view).await;
                Ok(())
            }
            Err(err) if err.is_offline() => {
                tracing::warn!(error = %err, "cart sync failed, staying on local cart");
                self.using_local = true;
                self.items = self.shadow.items.clone();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn adopt(&mut self, view: CartView) {
        self.items = entries_from(view);
        self.shadow = ShadowCart {
            items: self.items.clone(),
            dirty: false,
        };
        self.using_local = false;
        self.persist_shadow().await;
    }

    async fn persist_shadow(&self) {
        if let Err(err) = save_json(self.storage.as_ref(), SHADOW_KEY, &self.shadow).await {
            tracing::warn!(error = %err, "failed to persist local cart");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use chrono::Utc;
    use reqwest::StatusCode;

    use super::*;
    use crate::{client::storage::MemoryStorage, dto::cart::CartLine};

    #[derive(Default)]
    struct FakeServer {
        offline: bool,
        unauthorized: bool,
        products: HashMap<Uuid, Product>,
        cart: BTreeMap<Uuid, i32>,
        replace_calls: usize,
        write_calls: usize,
    }

    impl FakeServer {
        fn check(&self) -> ClientResult<()> {
            if self.unauthorized {
                return Err(ClientError::Unauthorized);
            }
            if self.offline {
                return Err(ClientError::api(StatusCode::SERVICE_UNAVAILABLE, "down"));
            }
            Ok(())
        }

        fn view(&self) -> CartView {
            let lines = self
                .cart
                .iter()
                .map(|(id, quantity)| {
                    let product = self.products[id].clone();
                    CartLine {
                        id: Uuid::new_v4(),
                        line_total: product.price * i64::from(*quantity),
                        quantity: *quantity,
                        product,
                    }
                })
                .collect();
            CartView::from_lines(lines)
        }

        fn set(&mut self, product_id: Uuid, quantity: i32) -> ClientResult<()> {
            let stock = self.products[&product_id].stock;
            let quantity = clamp_quantity(quantity, stock)
                .ok_or_else(|| ClientError::api(StatusCode::BAD_REQUEST, "out of stock"))?;
            self.cart.insert(product_id, quantity);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeBackend(Arc<Mutex<FakeServer>>);

    impl FakeBackend {
        fn server(&self) -> std::sync::MutexGuard<'_, FakeServer> {
            self.0.lock().unwrap()
        }
    }

    #[async_trait]
    impl CartBackend for FakeBackend {
        async fn fetch_cart(&self) -> ClientResult<CartView> {
            let server = self.server();
            server.check()?;
            Ok(server.view())
        }

        async fn set_quantity(&self, product_id: Uuid, quantity: i32) -> ClientResult<CartView> {
            let mut server = self.server();
            server.check()?;
            server.write_calls += 1;
            server.set(product_id, quantity)?;
            Ok(server.view())
        }

        async fn remove_item(&self, product_id: Uuid) -> ClientResult<CartView> {
            let mut server = self.server();
            server.check()?;
            server.write_calls += 1;
            if server.cart.remove(&product_id).is_none() {
                return Err(ClientError::api(StatusCode::NOT_FOUND, "Not Found"));
            }
            Ok(server.view())
        }

        async fn clear_cart(&self) -> ClientResult<CartView> {
            let mut server = self.server();
            server.check()?;
            server.write_calls += 1;
            server.cart.clear();
            Ok(server.view())
        }

        async fn replace_cart(&self, items: Vec<AddToCartRequest>) -> ClientResult<CartView> {
            let mut server = self.server();
            server.check()?;
            server.replace_calls += 1;
            server.cart.clear();
            for item in items {
                server.set(item.product_id, item.quantity)?;
            }
            Ok(server.view())
        }
    }

    fn product(name: &str, price: i64, stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            price,
            stock,
            category_id: None,
            image_url: None,
            created_at: Utc::now(),
        }
    }

    fn setup(products: &[&Product]) -> (FakeBackend, Arc<dyn Storage>) {
        let backend = FakeBackend::default();
        for p in products {
            backend.server().products.insert(p.id, (*p).clone());
        }
        (backend, Arc::new(MemoryStorage::new()))
    }

    async fn saved_shadow(storage: &Arc<dyn Storage>) -> ShadowCart {
        load_json::<ShadowCart>(storage.as_ref(), SHADOW_KEY)
            .await
            .unwrap()
            .expect("shadow cart persisted")
    }

    #[tokio::test]
    async fn increments_cap_at_stock() {
        let mouse = product("Mouse", 2_500, 5);
        let (backend, storage) = setup(&[&mouse]);
        let mut cart = CartStore::init(backend.clone(), storage).await.unwrap();

        for _ in 0..6 {
            cart.add_item(&mouse, 1).await.unwrap();
        }

        assert_eq!(cart.quantity_of(mouse.id), Some(5));
        assert_eq!(backend.server().cart[&mouse.id], 5);
        assert!(!cart.is_using_local_cart());
    }

    #[tokio::test]
    async fn failed_add_falls_back_to_dirty_local_cart() {
        let mouse = product("Mouse", 2_500, 5);
        let (backend, storage) = setup(&[&mouse]);
        let mut cart = CartStore::init(backend.clone(), storage.clone()).await.unwrap();

        backend.server().offline = true;
        cart.add_item(&mouse, 2).await.unwrap();

        assert_eq!(cart.quantity_of(mouse.id), Some(2));
        assert!(cart.is_using_local_cart());
        let snapshot = cart.snapshot();
        assert_eq!(snapshot.subtotal, 5_000);
        assert_eq!(snapshot.warning.as_deref(), Some(LOCAL_CART_WARNING));

        let shadow = saved_shadow(&storage).await;
        assert!(shadow.dirty);
        assert_eq!(shadow.items.len(), 1);
        assert_eq!(shadow.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn reconnect_pushes_offline_changes_as_one_snapshot() {
        let mouse = product("Mouse", 2_500, 5);
        let pad = product("Pad", 1_000, 10);
        let (backend, storage) = setup(&[&mouse, &pad]);
        backend.server().cart.insert(pad.id, 1);
        let mut cart = CartStore::init(backend.clone(), storage.clone()).await.unwrap();

        backend.server().offline = true;
        cart.add_item(&mouse, 3).await.unwrap();
        cart.remove_item(pad.id).await.unwrap();
        assert_eq!(backend.server().cart.get(&pad.id), Some(&1));

        // still down: stays local
        assert!(!cart.retry_sync().await.unwrap());

        backend.server().offline = false;
        assert!(cart.retry_sync().await.unwrap());

        let server = backend.server();
        assert_eq!(server.replace_calls, 1);
        assert_eq!(server.cart.get(&mouse.id), Some(&3));
        assert!(!server.cart.contains_key(&pad.id));
        drop(server);

        assert!(!cart.is_using_local_cart());
        assert!(cart.snapshot().warning.is_none());
        assert!(!saved_shadow(&storage).await.dirty);
    }

    #[tokio::test]
    async fn init_pushes_dirty_shadow_and_overwrites_clean_one() {
        let mug = product("Mug", 1_200, 4);
        let (backend, storage) = setup(&[&mug]);

        let dirty = ShadowCart {
            items: vec![CartEntry {
                product: mug.clone(),
                quantity: 2,
            }],
            dirty: true,
        };
        save_json(storage.as_ref(), SHADOW_KEY, &dirty).await.unwrap();
        let cart = CartStore::init(backend.clone(), storage.clone()).await.unwrap();
        assert_eq!(backend.server().cart.get(&mug.id), Some(&2));
        assert_eq!(cart.quantity_of(mug.id), Some(2));

        // a clean shadow loses to the server
        backend.server().cart.clear();
        let clean = ShadowCart {
            dirty: false,
            ..dirty
        };
        save_json(storage.as_ref(), SHADOW_KEY, &clean).await.unwrap();
        let cart = CartStore::init(backend.clone(), storage).await.unwrap();
        assert!(cart.items().is_empty());
        assert_eq!(backend.server().replace_calls, 1);
    }

    #[tokio::test]
    async fn init_offline_uses_saved_shadow() {
        let mug = product("Mug", 1_200, 4);
        let (backend, storage) = setup(&[&mug]);
        let saved = ShadowCart {
            items: vec![CartEntry {
                product: mug.clone(),
                quantity: 1,
            }],
            dirty: false,
        };
        save_json(storage.as_ref(), SHADOW_KEY, &saved).await.unwrap();
        backend.server().offline = true;

        let cart = CartStore::init(backend, storage).await.unwrap();
        assert!(cart.is_using_local_cart());
        assert_eq!(cart.quantity_of(mug.id), Some(1));
    }

    #[tokio::test]
    async fn clean_local_cart_gives_way_to_server_on_retry() {
        let mug = product("Mug", 1_200, 4);
        let (backend, storage) = setup(&[&mug]);
        let saved = ShadowCart {
            items: vec![CartEntry {
                product: mug.clone(),
                quantity: 1,
            }],
            dirty: false,
        };
        save_json(storage.as_ref(), SHADOW_KEY, &saved).await.unwrap();
        backend.server().offline = true;
        let mut cart = CartStore::init(backend.clone(), storage.clone()).await.unwrap();
        assert!(cart.is_using_local_cart());

        // the cart was checked out elsewhere while this client was offline
        backend.server().offline = false;
        assert!(cart.retry_sync().await.unwrap());

        let server = backend.server();
        assert!(server.cart.is_empty());
        assert_eq!(server.replace_calls, 0);
        drop(server);
        assert!(cart.items().is_empty());
        assert!(saved_shadow(&storage).await.items.is_empty());
    }

    #[tokio::test]
    async fn remove_of_line_already_gone_adopts_server_cart() {
        let mug = product("Mug", 1_200, 4);
        let pad = product("Pad", 1_000, 10);
        let (backend, storage) = setup(&[&mug, &pad]);
        backend.server().cart.insert(mug.id, 1);
        backend.server().cart.insert(pad.id, 2);
        let mut cart = CartStore::init(backend.clone(), storage.clone()).await.unwrap();

        // another device removed the mug and bumped the pad
        backend.server().cart.remove(&mug.id);
        backend.server().cart.insert(pad.id, 3);

        cart.remove_item(mug.id).await.unwrap();
        assert_eq!(cart.quantity_of(mug.id), None);
        assert_eq!(cart.quantity_of(pad.id), Some(3));
        assert!(!cart.is_using_local_cart());

        let shadow = saved_shadow(&storage).await;
        assert!(!shadow.dirty);
        assert_eq!(shadow.items.len(), 1);
        assert_eq!(shadow.items[0].quantity, 3);
    }

    #[tokio::test]
    async fn repeated_quantity_update_is_idempotent_and_clamped() {
        let kettle = product("Kettle", 4_500, 6);
        let (backend, storage) = setup(&[&kettle]);
        let mut cart = CartStore::init(backend.clone(), storage).await.unwrap();
        cart.add_item(&kettle, 1).await.unwrap();

        cart.update_quantity(kettle.id, 3).await.unwrap();
        cart.update_quantity(kettle.id, 3).await.unwrap();
        assert_eq!(backend.server().cart[&kettle.id], 3);

        cart.update_quantity(kettle.id, 0).await.unwrap();
        assert_eq!(cart.quantity_of(kettle.id), Some(1));
        cart.update_quantity(kettle.id, 99).await.unwrap();
        assert_eq!(cart.quantity_of(kettle.id), Some(6));
    }

    #[tokio::test]
    async fn unauthorized_is_not_offline_and_rolls_back() {
        let mouse = product("Mouse", 2_500, 5);
        let (backend, storage) = setup(&[&mouse]);
        let mut cart = CartStore::init(backend.clone(), storage).await.unwrap();

        backend.server().unauthorized = true;
        let err = cart.add_item(&mouse, 1).await.unwrap_err();

        assert!(matches!(err, ClientError::Unauthorized));
        assert!(!cart.is_using_local_cart());
        assert!(cart.items().is_empty());
    }

    #[tokio::test]
    async fn sold_out_products_cannot_be_added() {
        let mug = product("Mug", 1_200, 0);
        let (backend, storage) = setup(&[&mug]);
        let mut cart = CartStore::init(backend.clone(), storage).await.unwrap();

        let err = cart.add_item(&mug, 1).await.unwrap_err();
        assert!(matches!(err, ClientError::OutOfStock(name) if name == "Mug"));
        assert_eq!(backend.server().write_calls, 0);
    }
}
