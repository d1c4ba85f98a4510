//! Driver lifecycle registry (one per process).
//!
//! Maps `source id -> driver instance` plus `url suffix -> http-post
//! source`. Construction is factory-driven per `(category, type)`;
//! reload swaps the registry pointer under the write lock and stops the
//! old instance outside of it, so in-flight fetches on the old instance
//! run to completion.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use hubd_catalog::model::{DataSource, ResourceStatus, SourceCategory};
use hubd_catalog::PgCatalog;
use hubd_core::{HubError, HubResult};
use tokio::sync::RwLock;

use crate::config::HttpPushConfig;
use crate::driver::{Driver, DriverStats, HealthProbe};
use crate::file::FileDriver;
use crate::http_pull::HttpPullDriver;
use crate::http_push::{HttpPushDriver, DEFAULT_BUFFER_CAPACITY};
use crate::relational::RelationalDriver;
use crate::stream::StreamDriver;

/// How a data-source row is read back when instances are (re)built.
#[async_trait]
pub trait SourceLoader: Send + Sync {
    async fn load_source(&self, id: &str) -> HubResult<DataSource>;
    async fn resident_sources(&self) -> HubResult<Vec<DataSource>>;
}

#[async_trait]
impl SourceLoader for PgCatalog {
    async fn load_source(&self, id: &str) -> HubResult<DataSource> {
        self.get_data_source(id).await
    }

    async fn resident_sources(&self) -> HubResult<Vec<DataSource>> {
        self.list_resident_sources().await
    }
}

/// Construction-time knobs shared by the builtin factories.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub push_buffer_capacity: usize,
    pub health_check_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            push_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

pub type DriverFactory =
    Arc<dyn Fn(&DataSource, &DriverSettings) -> HubResult<Arc<dyn Driver>> + Send + Sync>;

/// `(category, type) -> factory` registry, per the pluggable-variant
/// design. Custom factories can shadow builtins (tests do).
pub struct FactoryRegistry {
    factories: HashMap<(SourceCategory, String), DriverFactory>,
}

impl FactoryRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let relational: DriverFactory =
            Arc::new(|source, _| Ok(Arc::new(RelationalDriver::new(source)?) as Arc<dyn Driver>));
        registry.register(SourceCategory::Db, "postgres", relational.clone());
        registry.register(SourceCategory::Db, "mysql", relational);
        registry.register(
            SourceCategory::Http,
            "http_pull",
            Arc::new(|source, _| Ok(Arc::new(HttpPullDriver::new(source)?) as Arc<dyn Driver>)),
        );
        registry.register(
            SourceCategory::Http,
            "http_post",
            Arc::new(|source, settings| {
                Ok(Arc::new(HttpPushDriver::new(source, settings.push_buffer_capacity)?)
                    as Arc<dyn Driver>)
            }),
        );
        registry.register(
            SourceCategory::Stream,
            "amqp",
            Arc::new(|source, _| Ok(Arc::new(StreamDriver::new(source)?) as Arc<dyn Driver>)),
        );
        registry.register(
            SourceCategory::File,
            "file",
            Arc::new(|source, _| Ok(Arc::new(FileDriver::new(source)?) as Arc<dyn Driver>)),
        );
        registry
    }

    pub fn register(
        &mut self,
        category: SourceCategory,
        source_type: &str,
        factory: DriverFactory,
    ) {
        self.factories
            .insert((category, source_type.to_string()), factory);
    }

    pub fn build(
        &self,
        source: &DataSource,
        settings: &DriverSettings,
    ) -> HubResult<Arc<dyn Driver>> {
        let factory = self
            .factories
            .get(&(source.category, source.source_type.clone()))
            .ok_or_else(|| {
                HubError::invalid_input(
                    "source_type",
                    format!(
                        "no driver for category {:?} type {:?}",
                        source.category.as_str(),
                        source.source_type
                    ),
                )
            })?;
        factory(source, settings)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub type_name: String,
    pub probe: HealthProbe,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ManagerStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub online: usize,
    pub offline: usize,
    pub with_errors: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PushSourceInfo {
    pub source_id: String,
    pub data_count: usize,
}

pub struct DriverManager {
    loader: Arc<dyn SourceLoader>,
    registry: FactoryRegistry,
    settings: DriverSettings,
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
    /// `url suffix -> source id` for webhook routing.
    push_routes: RwLock<HashMap<String, String>>,
}

impl DriverManager {
    pub fn new(
        loader: Arc<dyn SourceLoader>,
        registry: FactoryRegistry,
        settings: DriverSettings,
    ) -> Self {
        Self {
            loader,
            registry,
            settings,
            drivers: RwLock::new(HashMap::new()),
            push_routes: RwLock::new(HashMap::new()),
        }
    }

    /// Lazy construction from the catalog row; concurrent callers get the
    /// same instance.
    pub async fn get_or_create(&self, id: &str) -> HubResult<Arc<dyn Driver>> {
        if let Some(driver) = self.drivers.read().await.get(id) {
            return Ok(driver.clone());
        }
        let source = self.loader.load_source(id).await?;
        if source.status != ResourceStatus::Active {
            return Err(HubError::Conflict(format!("data source {id} is inactive")));
        }
        let driver = self.registry.build(&source, &self.settings)?;
        let driver = {
            let mut map = self.drivers.write().await;
            match map.get(id) {
                Some(existing) => existing.clone(),
                None => {
                    map.insert(id.to_string(), driver.clone());
                    driver
                }
            }
        };
        self.register_push_route(&source).await?;
        Ok(driver)
    }

    async fn register_push_route(&self, source: &DataSource) -> HubResult<()> {
        if source.source_type != "http_post" {
            return Ok(());
        }
        let config = HttpPushConfig::from_config(&source.connection_config)?;
        let mut routes = self.push_routes.write().await;
        routes.retain(|_, source_id| *source_id != source.id);
        routes.insert(config.url_suffix, source.id.clone());
        Ok(())
    }

    /// Stop the existing instance (in-flight work runs to completion),
    /// re-read the config and swap in a fresh instance. The write lock is
    /// held only for the pointer swap.
    pub async fn reload(&self, id: &str) -> HubResult<Arc<dyn Driver>> {
        let source = self.loader.load_source(id).await?;
        let fresh = self.registry.build(&source, &self.settings)?;
        let old = {
            let mut map = self.drivers.write().await;
            map.insert(id.to_string(), fresh.clone())
        };
        self.register_push_route(&source).await?;
        let was_running = match old {
            Some(old) => {
                let running = old.stats().running;
                if let Err(e) = old.stop().await {
                    tracing::warn!(source = id, error = %e, "stopping old driver failed");
                }
                running
            }
            None => false,
        };
        if was_running || source.is_resident {
            fresh.start().await?;
        }
        tracing::info!(source = id, "driver reloaded");
        Ok(fresh)
    }

    /// Stop + start the existing instance without re-reading config.
    pub async fn restart(&self, id: &str) -> HubResult<()> {
        let driver = self.get_or_create(id).await?;
        driver.stop().await?;
        driver.start().await?;
        tracing::info!(source = id, "driver restarted");
        Ok(())
    }

    /// Drop the instance (e.g. after source delete).
    pub async fn remove(&self, id: &str) -> HubResult<()> {
        let removed = self.drivers.write().await.remove(id);
        self.push_routes
            .write()
            .await
            .retain(|_, source_id| source_id.as_str() != id);
        if let Some(driver) = removed {
            driver.stop().await?;
        }
        Ok(())
    }

    /// Eagerly build and start every resident source.
    pub async fn start_residents(&self) -> HubResult<usize> {
        let sources = self.loader.resident_sources().await?;
        let mut started = 0usize;
        for source in sources {
            match self.get_or_create(&source.id).await {
                Ok(driver) => match driver.start().await {
                    Ok(()) => started += 1,
                    Err(e) => {
                        tracing::warn!(source = %source.id, error = %e, "resident driver start failed")
                    }
                },
                Err(e) => {
                    tracing::warn!(source = %source.id, error = %e, "resident driver build failed")
                }
            }
        }
        tracing::info!(count = started, "resident drivers started");
        Ok(started)
    }

    /// Parallel health scan with the per-driver timeout.
    pub async fn health_check_all(&self) -> Vec<SourceHealth> {
        let snapshot: Vec<(String, Arc<dyn Driver>)> = self
            .drivers
            .read()
            .await
            .iter()
            .map(|(id, driver)| (id.clone(), driver.clone()))
            .collect();
        let timeout = self.settings.health_check_timeout;
        let probes = snapshot.into_iter().map(|(id, driver)| async move {
            let type_name = driver.type_name().to_string();
            let probe = match tokio::time::timeout(timeout, driver.health_check()).await {
                Ok(probe) => probe,
                Err(_) => HealthProbe::down(timeout.as_millis() as u64, "health check timed out"),
            };
            SourceHealth {
                source_id: id,
                type_name,
                probe,
            }
        });
        join_all(probes).await
    }

    pub async fn statistics(&self) -> ManagerStats {
        let map = self.drivers.read().await;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut online = 0usize;
        let mut with_errors = 0usize;
        for driver in map.values() {
            *by_type.entry(driver.type_name().to_string()).or_default() += 1;
            let stats = driver.stats();
            if stats.running {
                online += 1;
            }
            if stats.error_count > 0 {
                with_errors += 1;
            }
        }
        ManagerStats {
            total: map.len(),
            by_type,
            online,
            offline: map.len() - online,
            with_errors,
        }
    }

    /// Suffix-keyed listing of http-post sources and their buffer depth.
    pub async fn list_push_sources(&self) -> BTreeMap<String, PushSourceInfo> {
        let routes = self.push_routes.read().await.clone();
        let drivers = self.drivers.read().await;
        routes
            .into_iter()
            .map(|(suffix, source_id)| {
                let data_count = drivers
                    .get(&source_id)
                    .map(|d| d.stats().buffer_size.unwrap_or(0))
                    .unwrap_or(0);
                (
                    suffix,
                    PushSourceInfo {
                        source_id,
                        data_count,
                    },
                )
            })
            .collect()
    }

    /// Webhook routing: suffix to the live driver, if any.
    pub async fn resolve_push(&self, suffix: &str) -> Option<Arc<dyn Driver>> {
        let source_id = self.push_routes.read().await.get(suffix).cloned()?;
        self.drivers.read().await.get(&source_id).cloned()
    }

    pub async fn get_stats(&self, id: &str) -> HubResult<DriverStats> {
        let driver = self
            .drivers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("no driver instance for source {id}")))?;
        Ok(driver.stats())
    }

    /// Stop everything; used on shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.drivers.write().await.drain().collect();
        for (id, driver) in drained {
            if let Err(e) = driver.stop().await {
                tracing::warn!(source = %id, error = %e, "driver stop failed during shutdown");
            }
        }
        self.push_routes.write().await.clear();
    }
}
