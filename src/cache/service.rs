//! Cache Service Module
//!
//! Application-facing caching: domain key builders, per-entity TTL policy and
//! the invalidation sets each write must trigger.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{BackendStats, CacheBackend, CacheHelper};
use crate::context::CacheContext;
use crate::error::{CacheError, Result};

// == Key Builders ==
/// Domain key builders. Every key produced here is a logical key; the backend
/// adds its own prefix.
pub mod keys {
    pub fn user(id: &str) -> String {
        format!("user:{}", id)
    }

    pub fn users_page(page: u32, limit: u32) -> String {
        format!("users:page:{}:limit:{}", page, limit)
    }

    /// Matches every cached user list.
    pub const USERS_PATTERN: &str = "users:*";

    pub fn product(id: &str) -> String {
        format!("product:{}", id)
    }

    pub fn product_price(id: &str) -> String {
        format!("product_price:{}", id)
    }

    pub fn products_page(page: u32, limit: u32) -> String {
        format!("products:page:{}:limit:{}", page, limit)
    }

    pub fn products_by_category(category: &str) -> String {
        format!("products:category:{}", category)
    }

    /// Matches every cached product list.
    pub const PRODUCTS_PATTERN: &str = "products:*";

    pub fn session(id: &str) -> String {
        format!("session:{}", id)
    }
}

// == TTL Policy ==
/// Per-entity TTLs: short for volatile data, long for near-static data.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub user: Duration,
    pub user_list: Duration,
    pub product: Duration,
    pub product_price: Duration,
    pub product_list: Duration,
    pub session: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            user: Duration::from_secs(10 * 60),
            user_list: Duration::from_secs(5 * 60),
            product: Duration::from_secs(60 * 60),
            product_price: Duration::from_secs(60),
            product_list: Duration::from_secs(5 * 60),
            session: Duration::from_secs(30 * 60),
        }
    }
}

// == Cache Service ==
/// Binds one backend and one helper to the domain's keys and TTLs.
///
/// Loaders passed to the `get_*` operations are the source of truth; they run
/// only on a miss and their result is cached under the entity's TTL.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    helper: CacheHelper,
    ttl: TtlPolicy,
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_policy(backend, TtlPolicy::default())
    }

    pub fn with_policy(backend: Arc<dyn CacheBackend>, ttl: TtlPolicy) -> Self {
        let helper = CacheHelper::new(backend.clone());
        Self {
            backend,
            helper,
            ttl,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn helper(&self) -> &CacheHelper {
        &self.helper
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    // == Users ==
    pub async fn get_user<T, F, Fut>(&self, ctx: &CacheContext, id: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.cached(ctx, &keys::user(id), self.ttl.user, load).await
    }

    pub async fn get_users_page<T, F, Fut>(
        &self,
        ctx: &CacheContext,
        page: u32,
        limit: u32,
        load: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.cached(ctx, &keys::users_page(page, limit), self.ttl.user_list, load)
            .await
    }

    /// Drops the user entry and every cached user list.
    pub async fn invalidate_user(&self, ctx: &CacheContext, id: &str) -> Result<()> {
        self.invalidate(ctx, &[keys::user(id)], &[keys::USERS_PATTERN])
            .await
    }

    // == Products ==
    pub async fn get_product<T, F, Fut>(&self, ctx: &CacheContext, id: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.cached(ctx, &keys::product(id), self.ttl.product, load)
            .await
    }

    pub async fn get_product_price<T, F, Fut>(
        &self,
        ctx: &CacheContext,
        id: &str,
        load: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.cached(ctx, &keys::product_price(id), self.ttl.product_price, load)
            .await
    }

    pub async fn get_products_page<T, F, Fut>(
        &self,
        ctx: &CacheContext,
        page: u32,
        limit: u32,
        load: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.cached(
            ctx,
            &keys::products_page(page, limit),
            self.ttl.product_list,
            load,
        )
        .await
    }

    /// Drops the product, its price and every cached product list.
    pub async fn invalidate_product(&self, ctx: &CacheContext, id: &str) -> Result<()> {
        self.invalidate(
            ctx,
            &[keys::product(id), keys::product_price(id)],
            &[keys::PRODUCTS_PATTERN],
        )
        .await
    }

    // == Sessions ==
    pub async fn put_session<T>(&self, ctx: &CacheContext, id: &str, session: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.helper
            .set_json(ctx, &keys::session(id), session, self.ttl.session)
            .await
    }

    pub async fn get_session<T>(&self, ctx: &CacheContext, id: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.helper.get_json(ctx, &keys::session(id)).await
    }

    pub async fn drop_session(&self, ctx: &CacheContext, id: &str) -> Result<()> {
        self.backend.delete(ctx, &keys::session(id)).await
    }

    // == Management ==
    pub async fn stats(&self, ctx: &CacheContext) -> Result<BackendStats> {
        self.backend.stats(ctx).await
    }

    pub async fn flush(&self, ctx: &CacheContext) -> Result<()> {
        self.backend.flush(ctx).await
    }

    pub async fn invalidate_pattern(&self, ctx: &CacheContext, pattern: &str) -> Result<usize> {
        self.helper.invalidate_pattern(ctx, pattern).await
    }

    /// Stores an arbitrary JSON value. A zero TTL takes the backend default.
    pub async fn set_value(
        &self,
        ctx: &CacheContext,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        self.helper.set_json(ctx, key, value, ttl).await
    }

    pub async fn get_value(&self, ctx: &CacheContext, key: &str) -> Result<serde_json::Value> {
        self.helper.get_json(ctx, key).await
    }

    pub async fn delete_value(&self, ctx: &CacheContext, key: &str) -> Result<()> {
        self.backend.delete(ctx, key).await
    }

    // == Internals ==
    async fn cached<T, F, Fut>(
        &self,
        ctx: &CacheContext,
        key: &str,
        ttl: Duration,
        load: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.helper
            .get_or_set_json(ctx, key, move || async move { Ok((load().await?, ttl)) })
            .await
    }

    /// Deletes every key and invalidates every pattern, even after a failure.
    /// Returns the first error encountered.
    async fn invalidate(
        &self,
        ctx: &CacheContext,
        keys: &[String],
        patterns: &[&str],
    ) -> Result<()> {
        let mut first_error: Option<CacheError> = None;

        for key in keys {
            if let Err(e) = self.backend.delete(ctx, key).await {
                warn!(key = %key, error = %e, "Failed to delete cache key");
                first_error.get_or_insert(e);
            }
        }

        for pattern in patterns {
            match self.backend.invalidate_pattern(ctx, pattern).await {
                Ok(removed) => debug!(pattern, removed, "Invalidated cache pattern"),
                Err(e) => {
                    warn!(pattern, error = %e, "Failed to invalidate cache pattern");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, LocalBackend};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        name: String,
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: format!("user {}", id),
        }
    }

    fn service() -> CacheService {
        CacheService::new(Arc::new(LocalBackend::new(CacheOptions::default())))
    }

    fn ctx() -> CacheContext {
        CacheContext::background()
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::user("42"), "user:42");
        assert_eq!(keys::users_page(2, 20), "users:page:2:limit:20");
        assert_eq!(keys::product("7"), "product:7");
        assert_eq!(keys::product_price("7"), "product_price:7");
        assert_eq!(keys::products_page(1, 10), "products:page:1:limit:10");
        assert_eq!(keys::products_by_category("books"), "products:category:books");
        assert_eq!(keys::session("abc"), "session:abc");
    }

    #[test]
    fn test_default_ttl_policy() {
        let policy = TtlPolicy::default();
        assert!(policy.product_price < policy.session);
        assert!(policy.session < policy.product);
        assert_eq!(policy.user, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_get_user_loads_once() {
        let service = service();
        let loads = AtomicUsize::new(0);

        for _ in 0..2 {
            let loaded: User = service
                .get_user(&ctx(), "1", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(user("1"))
                })
                .await
                .unwrap();
            assert_eq!(loaded, user("1"));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_user_loader_error_propagates() {
        let result: Result<User> = service()
            .get_user(&ctx(), "1", || async { Err(anyhow::anyhow!("no such user")) })
            .await;
        assert!(matches!(result, Err(CacheError::Compute(_))));
    }

    #[tokio::test]
    async fn test_invalidate_user_drops_entity_and_lists() {
        let service = service();
        let backend = service.backend().clone();

        let _: User = service
            .get_user(&ctx(), "1", || async { Ok(user("1")) })
            .await
            .unwrap();
        let _: Vec<User> = service
            .get_users_page(&ctx(), 1, 10, || async { Ok(vec![user("1")]) })
            .await
            .unwrap();
        let _: User = service
            .get_user(&ctx(), "2", || async { Ok(user("2")) })
            .await
            .unwrap();

        service.invalidate_user(&ctx(), "1").await.unwrap();

        assert!(!backend.exists(&ctx(), "user:1").await.unwrap());
        assert!(!backend.exists(&ctx(), "users:page:1:limit:10").await.unwrap());
        assert!(backend.exists(&ctx(), "user:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_product_drops_price_and_lists() {
        let service = service();
        let backend = service.backend().clone();

        let _: String = service
            .get_product(&ctx(), "9", || async { Ok("widget".to_string()) })
            .await
            .unwrap();
        let _: f64 = service
            .get_product_price(&ctx(), "9", || async { Ok(9.99) })
            .await
            .unwrap();
        let _: Vec<String> = service
            .get_products_page(&ctx(), 1, 10, || async { Ok(vec!["widget".to_string()]) })
            .await
            .unwrap();
        let _: String = service
            .get_product(&ctx(), "10", || async { Ok("gadget".to_string()) })
            .await
            .unwrap();

        service.invalidate_product(&ctx(), "9").await.unwrap();

        assert!(!backend.exists(&ctx(), "product:9").await.unwrap());
        assert!(!backend.exists(&ctx(), "product_price:9").await.unwrap());
        assert!(!backend.exists(&ctx(), "products:page:1:limit:10").await.unwrap());
        assert!(backend.exists(&ctx(), "product:10").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let service = service();
        service.put_session(&ctx(), "s1", &user("1")).await.unwrap();

        let loaded: User = service.get_session(&ctx(), "s1").await.unwrap();
        assert_eq!(loaded, user("1"));

        service.drop_session(&ctx(), "s1").await.unwrap();
        let result: Result<User> = service.get_session(&ctx(), "s1").await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalidate_reports_error_after_close() {
        let service = service();
        service.backend().close().await.unwrap();

        let result = service.invalidate_user(&ctx(), "1").await;
        assert!(matches!(result, Err(CacheError::Closed)));
    }

    #[tokio::test]
    async fn test_value_management() {
        let service = service();
        let value = serde_json::json!({"a": [1, 2, 3], "b": {}});

        service
            .set_value(&ctx(), "raw", &value, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(service.get_value(&ctx(), "raw").await.unwrap(), value);

        service.delete_value(&ctx(), "raw").await.unwrap();
        assert!(service.get_value(&ctx(), "raw").await.unwrap_err().is_not_found());
    }
}
