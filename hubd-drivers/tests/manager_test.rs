use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hubd_catalog::model::{DataSource, ResourceStatus, SourceCategory};
use hubd_core::{HubError, HubResult};
use hubd_drivers::{
    Capability, Driver, DriverManager, DriverSettings, DriverStats, FactoryRegistry, HealthProbe,
    SourceLoader,
};

// ── Fixtures ───────────────────────────────────────────────────────────────

fn mock_source(id: &str, source_type: &str, category: SourceCategory) -> DataSource {
    DataSource {
        id: id.into(),
        library_id: "lib".into(),
        name: format!("source {id}"),
        category,
        source_type: source_type.into(),
        connection_config: serde_json::json!({"url_suffix": "sensor1"}),
        params_config: serde_json::json!({}),
        script: None,
        script_enabled: false,
        status: ResourceStatus::Active,
        is_resident: false,
        created_at: chrono::Utc::now(),
    }
}

struct MapLoader {
    sources: tokio::sync::RwLock<HashMap<String, DataSource>>,
}

impl MapLoader {
    fn new(sources: Vec<DataSource>) -> Arc<Self> {
        Arc::new(Self {
            sources: tokio::sync::RwLock::new(
                sources.into_iter().map(|s| (s.id.clone(), s)).collect(),
            ),
        })
    }
}

#[async_trait]
impl SourceLoader for MapLoader {
    async fn load_source(&self, id: &str) -> HubResult<DataSource> {
        self.sources
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("data source {id}")))
    }

    async fn resident_sources(&self) -> HubResult<Vec<DataSource>> {
        Ok(self
            .sources
            .read()
            .await
            .values()
            .filter(|s| s.is_resident)
            .cloned()
            .collect())
    }
}

struct MockDriver {
    source_id: String,
    generation: usize,
    stopped: Arc<AtomicBool>,
    health_delay: Duration,
}

#[async_trait]
impl Driver for MockDriver {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn type_name(&self) -> &str {
        "mock"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Fetch)
    }

    async fn stop(&self) -> HubResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> HealthProbe {
        tokio::time::sleep(self.health_delay).await;
        HealthProbe::up(self.health_delay.as_millis() as u64)
    }

    fn stats(&self) -> DriverStats {
        DriverStats {
            fetch_count: self.generation as u64,
            ..DriverStats::default()
        }
    }
}

struct MockFleet {
    generations: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

fn manager_with_mock(
    loader: Arc<MapLoader>,
    health_delay: Duration,
) -> (DriverManager, MockFleet) {
    let generations = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicBool::new(false));
    let fleet = MockFleet {
        generations: generations.clone(),
        stopped: stopped.clone(),
    };
    let mut registry = FactoryRegistry::builtin();
    registry.register(
        SourceCategory::Db,
        "mock",
        Arc::new(move |source, _| {
            let generation = generations.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(MockDriver {
                source_id: source.id.clone(),
                generation,
                stopped: stopped.clone(),
                health_delay,
            }) as Arc<dyn Driver>)
        }),
    );
    let settings = DriverSettings {
        health_check_timeout: Duration::from_millis(200),
        ..DriverSettings::default()
    };
    (DriverManager::new(loader, registry, settings), fleet)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_or_create_is_lazy_and_cached() {
    let loader = MapLoader::new(vec![mock_source("s1", "mock", SourceCategory::Db)]);
    let (manager, fleet) = manager_with_mock(loader, Duration::ZERO);

    assert_eq!(fleet.generations.load(Ordering::SeqCst), 0);
    let first = manager.get_or_create("s1").await.unwrap();
    let second = manager.get_or_create("s1").await.unwrap();
    assert_eq!(fleet.generations.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn inactive_sources_are_refused() {
    let mut source = mock_source("s1", "mock", SourceCategory::Db);
    source.status = ResourceStatus::Inactive;
    let loader = MapLoader::new(vec![source]);
    let (manager, _) = manager_with_mock(loader, Duration::ZERO);
    let err = manager.get_or_create("s1").await.err().expect("expected error");
    assert_eq!(err.business_status(), 409);
}

#[tokio::test]
async fn reload_swaps_instance_and_stops_old() {
    let loader = MapLoader::new(vec![mock_source("s1", "mock", SourceCategory::Db)]);
    let (manager, fleet) = manager_with_mock(loader, Duration::ZERO);

    let old = manager.get_or_create("s1").await.unwrap();
    let fresh = manager.reload("s1").await.unwrap();
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(fleet.generations.load(Ordering::SeqCst), 2);
    assert!(fleet.stopped.load(Ordering::SeqCst), "old instance not stopped");

    // The registry now hands out the fresh instance.
    let current = manager.get_or_create("s1").await.unwrap();
    assert!(Arc::ptr_eq(&fresh, &current));
}

#[tokio::test]
async fn unknown_variant_fails_with_field_path() {
    let loader = MapLoader::new(vec![mock_source("s1", "exotic", SourceCategory::Db)]);
    let (manager, _) = manager_with_mock(loader, Duration::ZERO);
    let err = manager.get_or_create("s1").await.err().expect("expected error");
    assert!(err.to_string().contains("source_type"));
}

#[tokio::test]
async fn push_routes_register_and_resolve() {
    let loader = MapLoader::new(vec![mock_source(
        "push1",
        "http_post",
        SourceCategory::Http,
    )]);
    let (manager, _) = manager_with_mock(loader, Duration::ZERO);

    assert!(manager.resolve_push("sensor1").await.is_none());
    let driver = manager.get_or_create("push1").await.unwrap();
    driver.start().await.unwrap();

    let routed = manager.resolve_push("sensor1").await.unwrap();
    assert_eq!(routed.source_id(), "push1");

    routed
        .receive_push(&http::HeaderMap::new(), bytes::Bytes::from_static(b"{\"v\":1}"))
        .await
        .unwrap();
    let listing = manager.list_push_sources().await;
    assert_eq!(listing["sensor1"].source_id, "push1");
    assert_eq!(listing["sensor1"].data_count, 1);

    manager.remove("push1").await.unwrap();
    assert!(manager.resolve_push("sensor1").await.is_none());
}

#[tokio::test]
async fn health_scan_times_out_slow_drivers() {
    let loader = MapLoader::new(vec![
        mock_source("a", "mock", SourceCategory::Db),
        mock_source("b", "mock", SourceCategory::Db),
    ]);
    // Every mock probe sleeps far past the 200ms scan timeout.
    let (manager, _) = manager_with_mock(loader, Duration::from_secs(5));
    manager.get_or_create("a").await.unwrap();
    manager.get_or_create("b").await.unwrap();

    let started = std::time::Instant::now();
    let report = manager.health_check_all().await;
    assert!(started.elapsed() < Duration::from_secs(2), "timeout not applied");
    assert_eq!(report.len(), 2);
    for entry in report {
        assert!(!entry.probe.ok);
        assert!(entry.probe.detail.unwrap().contains("timed out"));
    }
}

#[tokio::test]
async fn statistics_aggregate_by_type() {
    let loader = MapLoader::new(vec![
        mock_source("a", "mock", SourceCategory::Db),
        mock_source("b", "mock", SourceCategory::Db),
        mock_source("push1", "http_post", SourceCategory::Http),
    ]);
    let (manager, _) = manager_with_mock(loader, Duration::ZERO);
    manager.get_or_create("a").await.unwrap();
    manager.get_or_create("b").await.unwrap();
    let push = manager.get_or_create("push1").await.unwrap();
    push.start().await.unwrap();

    let stats = manager.statistics().await;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_type["mock"], 2);
    assert_eq!(stats.by_type["http_post"], 1);
    assert_eq!(stats.online, 1);
    assert_eq!(stats.offline, 2);
}
