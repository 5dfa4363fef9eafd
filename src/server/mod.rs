//! Server initialization and routing

use crate::api;
use crate::cache::{
    CacheKey, CacheTier, InvalidationBroadcaster, InvalidationListener, LocalCacheTier,
    RedisCacheTier, TieredCache,
};
use crate::config::{CacheConfig, Config, ResolutionConfig};
use crate::domain::StringUuid;
use crate::middleware::ObservabilityLayer;
use crate::openapi::ApiDoc;
use crate::repository::{MySqlPermissionStore, PermissionStore};
use crate::service::{
    InvalidationCoordinator, PermissionResolver, ProvisioningService, RoleManagementService,
};
use crate::state::HasAuthz;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
pub struct AppState<St: PermissionStore> {
    pub store: Arc<St>,
    pub cache: Arc<TieredCache>,
    pub resolver: Arc<PermissionResolver<St>>,
    pub coordinator: Arc<InvalidationCoordinator<St>>,
    pub role_service: Arc<RoleManagementService<St>>,
    pub provisioning_service: Arc<ProvisioningService<St>>,
}

impl<St: PermissionStore> Clone for AppState<St> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            resolver: self.resolver.clone(),
            coordinator: self.coordinator.clone(),
            role_service: self.role_service.clone(),
            provisioning_service: self.provisioning_service.clone(),
        }
    }
}

impl<St: PermissionStore> AppState<St> {
    /// Wire every service around one store and one cache
    pub fn new(
        store: Arc<St>,
        cache: Arc<TieredCache>,
        keys: CacheKey,
        broadcaster: Option<InvalidationBroadcaster>,
        resolution: &ResolutionConfig,
    ) -> Self {
        let super_admin_role_id = StringUuid::from(resolution.super_admin_role_id);
        let coordinator = Arc::new(InvalidationCoordinator::new(
            store.clone(),
            cache.clone(),
            keys.clone(),
            broadcaster,
            resolution.role_fanout_limit,
        ));
        let resolver = Arc::new(PermissionResolver::new(
            store.clone(),
            cache.clone(),
            keys,
            resolution,
        ));
        let role_service = Arc::new(RoleManagementService::new(
            store.clone(),
            coordinator.clone(),
            super_admin_role_id,
        ));
        let provisioning_service = Arc::new(ProvisioningService::new(
            store.clone(),
            coordinator.clone(),
            resolution.default_role_name.clone(),
        ));

        Self {
            store,
            cache,
            resolver,
            coordinator,
            role_service,
            provisioning_service,
        }
    }
}

impl<St: PermissionStore + 'static> HasAuthz for AppState<St> {
    type Store = St;

    fn resolver(&self) -> &PermissionResolver<St> {
        &self.resolver
    }

    fn coordinator(&self) -> &InvalidationCoordinator<St> {
        &self.coordinator
    }

    fn role_service(&self) -> &RoleManagementService<St> {
        &self.role_service
    }

    fn provisioning_service(&self) -> &ProvisioningService<St> {
        &self.provisioning_service
    }

    async fn check_ready(&self) -> (bool, bool) {
        let store_ok = self.store.ping().await.is_ok();
        let cache_ok = self.cache.ping().await.is_ok();
        (store_ok, cache_ok)
    }
}

/// Production components built from configuration
pub struct Components {
    pub state: AppState<MySqlPermissionStore>,
    /// Present when a shared tier is configured
    pub listener: Option<InvalidationListener>,
}

/// Connect to MySQL and (optionally) Redis and wire the services
pub async fn build_components(config: &Config) -> Result<Components> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_millis(config.database.acquire_timeout_ms))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    let store = Arc::new(MySqlPermissionStore::new(pool));
    let keys = CacheKey::new(config.cache.key_namespace.clone());
    let CacheWiring {
        cache,
        broadcaster,
        listener,
    } = build_cache(&config.cache, config.redis.url.as_deref()).await;

    let state = AppState::new(store, cache, keys, broadcaster, &config.resolution);
    Ok(Components { state, listener })
}

/// Cache tiers plus the pub/sub endpoints that keep peers in step
pub struct CacheWiring {
    pub cache: Arc<TieredCache>,
    pub broadcaster: Option<InvalidationBroadcaster>,
    pub listener: Option<InvalidationListener>,
}

/// Build the cache. An unreachable Redis degrades to the local tier alone
/// instead of failing startup.
pub async fn build_cache(config: &CacheConfig, redis_url: Option<&str>) -> CacheWiring {
    let local: Arc<dyn CacheTier> = Arc::new(LocalCacheTier::new(
        config.local_max_entries,
        config.local_ttl(),
    ));

    let Some(url) = redis_url else {
        tracing::warn!("REDIS_URL not set, running with the local cache tier only");
        return local_only(local, config);
    };

    let (shared, client, publisher) = match connect_shared_tier(url, &config.key_namespace).await {
        Ok(connected) => connected,
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, running with the local cache tier only");
            metrics::counter!(
                "gatekeeper_cache_tier_errors_total",
                "tier" => "redis",
                "operation" => "connect"
            )
            .increment(1);
            return local_only(local, config);
        }
    };
    info!("Connected to Redis");

    let cache = Arc::new(TieredCache::new(
        local,
        Some(Arc::new(shared)),
        config.local_ttl(),
        config.shared_ttl(),
    ));
    // Identifies this instance's own broadcasts
    let origin = uuid::Uuid::new_v4().to_string();
    let broadcaster = InvalidationBroadcaster::new(
        publisher,
        config.invalidation_channel.clone(),
        origin.clone(),
    );
    let listener = InvalidationListener::new(
        client,
        config.invalidation_channel.clone(),
        origin,
        cache.clone(),
    );

    CacheWiring {
        cache,
        broadcaster: Some(broadcaster),
        listener: Some(listener),
    }
}

fn local_only(local: Arc<dyn CacheTier>, config: &CacheConfig) -> CacheWiring {
    CacheWiring {
        cache: Arc::new(TieredCache::local_only(local, config.local_ttl())),
        broadcaster: None,
        listener: None,
    }
}

async fn connect_shared_tier(
    url: &str,
    namespace: &str,
) -> crate::error::Result<(RedisCacheTier, redis::Client, redis::aio::ConnectionManager)> {
    let shared = RedisCacheTier::connect(url, namespace.to_string()).await?;
    let client = redis::Client::open(url)?;
    let publisher = redis::aio::ConnectionManager::new(client.clone()).await?;
    Ok((shared, client, publisher))
}

pub async fn run(config: Config, metrics: Option<PrometheusHandle>) -> Result<()> {
    let Components { state, listener } = build_components(&config).await?;
    let listener_task = listener.map(InvalidationListener::spawn);

    if config.cache.warm_on_startup {
        let resolver = state.resolver.clone();
        let limit = config.cache.warm_limit;
        tokio::spawn(async move {
            if let Err(e) = resolver.warm_from_store(limit).await {
                tracing::warn!(error = %e, "Cache warm-up failed");
            }
        });
    }

    let app = build_router(state).merge(metrics_router(metrics));

    let http_addr = config.http_addr();
    let tcp = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", http_addr))?;
    info!("HTTP server started on {}", http_addr);

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = listener_task {
        task.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Build the HTTP router
///
/// Generic over the state type so tests can drive the same routes over an
/// in-memory store.
pub fn build_router<S: HasAuthz>(state: S) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health::health))
        .route("/ready", get(api::health::ready::<S>))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::build()) }),
        )
        // Authorization
        .route("/api/v1/authz/check", post(api::authz::check::<S>))
        .route(
            "/api/v1/authz/tenants/{tenant_id}/principals/{principal_id}/permissions",
            get(api::authz::effective_permissions::<S>),
        )
        .route(
            "/api/v1/authz/tenants/{tenant_id}/principals/{principal_id}/invalidate",
            post(api::authz::invalidate::<S>),
        )
        // Role management
        .route(
            "/api/v1/tenants/{tenant_id}/roles",
            post(api::roles::create_role::<S>),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/permissions",
            post(api::roles::create_permission::<S>),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/roles/{role_id}/permissions/{permission_id}",
            post(api::roles::assign_permission::<S>).delete(api::roles::remove_permission::<S>),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/role-assignments",
            post(api::roles::assign_role::<S>),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/principals/{principal_id}/roles/{role_id}",
            axum::routing::delete(api::roles::revoke_role::<S>),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/grants",
            post(api::roles::grant_permission::<S>),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/grants/{grant_id}",
            axum::routing::delete(api::roles::revoke_grant::<S>),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/principals/{principal_id}/provision",
            post(api::roles::provision::<S>),
        )
        .layer(ObservabilityLayer)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `/metrics`, served from its own state
pub fn metrics_router(handle: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/metrics", get(api::health::metrics))
        .with_state(Arc::new(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedValue;

    #[tokio::test]
    async fn test_cache_without_redis_is_local_only() {
        let wiring = build_cache(&CacheConfig::default(), None).await;
        assert!(!wiring.cache.has_shared_tier());
        assert!(wiring.broadcaster.is_none());
        assert!(wiring.listener.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_redis_degrades_to_local_tier() {
        let wiring = build_cache(&CacheConfig::default(), Some("not-a-redis-url")).await;
        assert!(!wiring.cache.has_shared_tier());
        assert!(wiring.broadcaster.is_none());
        assert!(wiring.listener.is_none());

        wiring.cache.set("gk:k", CachedValue::Decision(true), None).await;
        assert_eq!(wiring.cache.get("gk:k").await, Some(CachedValue::Decision(true)));
        assert!(wiring.cache.ping().await.is_ok());
    }
}
