//! Application State
//!
//! Owns every process-wide component and wires them together. Built once at
//! startup and shared behind an `Arc`; tests build a fresh one each.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::ServerConfig;
use crate::application::ports::{BarSource, CLOSE_GOING_AWAY, MarketPlugin, PluginError};
use crate::application::services::{
    ConnectionRegistry, DataSourceChain, KeyLockManager, PluginRegistry, SubscriptionManager,
};
use crate::infrastructure::alpaca::{self, alpaca_factory};
use crate::infrastructure::cache::MemoryBarCache;
use crate::infrastructure::kraken::{self, KrakenPlugin};
use crate::infrastructure::live::LiveSource;

/// Process-wide state container.
pub struct AppState {
    config: ServerConfig,
    plugins: Arc<PluginRegistry>,
    cache: Arc<MemoryBarCache>,
    chain: Arc<DataSourceChain>,
    locks: Arc<KeyLockManager>,
    connections: Arc<ConnectionRegistry>,
    subscriptions: SubscriptionManager,
    cancel: CancellationToken,
    started_at: Instant,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("plugins", &self.plugins.list())
            .field("tiers", &self.chain.tier_names())
            .field("connections", &self.connections.len())
            .field("subscriptions", &self.subscriptions.stats())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build the production wiring: Kraken for `crypto` (eager), Alpaca for
    /// `alpaca` (lazy, credential-gated), and a cache → live chain.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::InitFailed` if an eager plugin cannot be built.
    pub fn init(config: ServerConfig) -> Result<Self, PluginError> {
        let plugins = Arc::new(PluginRegistry::new());

        let kraken: Arc<dyn MarketPlugin> =
            Arc::new(KrakenPlugin::new(config.sources.kraken_base_url.clone())?);
        plugins.register_instance(kraken::MARKET, kraken);
        plugins.register_factory(alpaca::MARKET, alpaca_factory(config.sources.clone()));

        Ok(Self::with_plugins(config, plugins))
    }

    /// Build the state around an existing plugin registry.
    #[must_use]
    pub fn with_plugins(config: ServerConfig, plugins: Arc<PluginRegistry>) -> Self {
        let cache = Arc::new(MemoryBarCache::new(&config.cache));
        let live: Arc<dyn BarSource> = Arc::new(LiveSource::new(Arc::clone(&plugins)));
        let memory: Arc<dyn BarSource> = Arc::clone(&cache) as Arc<dyn BarSource>;
        let chain = Arc::new(DataSourceChain::new(vec![memory, live]));

        Self::assemble(config, plugins, cache, chain)
    }

    /// Build the state around an explicit chain. The cache is still owned so
    /// that shutdown can release it, but it is only consulted if `chain`
    /// includes it.
    #[must_use]
    pub fn with_chain(config: ServerConfig, plugins: Arc<PluginRegistry>, chain: DataSourceChain) -> Self {
        let cache = Arc::new(MemoryBarCache::new(&config.cache));
        Self::assemble(config, plugins, cache, Arc::new(chain))
    }

    fn assemble(
        config: ServerConfig,
        plugins: Arc<PluginRegistry>,
        cache: Arc<MemoryBarCache>,
        chain: Arc<DataSourceChain>,
    ) -> Self {
        let locks = Arc::new(KeyLockManager::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&chain),
            Arc::clone(&locks),
            Arc::clone(&connections),
            config.poll_settings(),
        );

        tracing::info!(
            plugins = ?plugins.list(),
            tiers = ?chain.tier_names(),
            "Application state initialized"
        );

        Self {
            config,
            plugins,
            cache,
            chain,
            locks,
            connections,
            subscriptions,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Market plugin registry.
    #[must_use]
    pub const fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// In-memory cache tier.
    #[must_use]
    pub const fn cache(&self) -> &Arc<MemoryBarCache> {
        &self.cache
    }

    /// Data source chain used by the poll loops.
    #[must_use]
    pub const fn chain(&self) -> &Arc<DataSourceChain> {
        &self.chain
    }

    /// Per-key lock table.
    #[must_use]
    pub const fn locks(&self) -> &Arc<KeyLockManager> {
        &self.locks
    }

    /// Live connection registry.
    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Subscription manager.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Root cancellation token; cancelled when shutdown starts.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time since the state was built.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether `shutdown` has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Tear everything down: stop the poll loops, close every connection with
    /// 1001, then drop cached bars. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Application shutdown started");

        self.cancel.cancel();
        self.subscriptions.shutdown().await;
        let closed = self.connections.close_all(CLOSE_GOING_AWAY).await;
        self.cache.clear();

        tracing::info!(closed_connections = closed, "Application shutdown complete");
    }
}

// =============================================================================
// Tests
// =============================================================================
