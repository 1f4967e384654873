//! End-to-end dispatcher behavior against an in-memory provider:
//! lifecycle transitions, retry/backoff, idempotent create and
//! cross-provider fan-out.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use skyfleet_cloud::{
    CostGranularity, CostRecord, Dispatcher, ErrorKind, Instance, InstanceSpec, InstanceState,
    MetricKind, MetricSample, MetricUnit, ProviderClient, ProviderError, ProviderKind, Result,
    TimeRange, IDEMPOTENCY_TAG,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory cloud with scriptable failures
struct InMemoryCloud {
    kind: ProviderKind,
    instances: Mutex<HashMap<String, Instance>>,
    next_id: AtomicU32,
    /// Creates that provision but report a transient failure
    flaky_creates: AtomicU32,
    /// Listings that fail with RateLimited before succeeding
    throttled_lists: AtomicU32,
    list_calls: AtomicU32,
}

impl InMemoryCloud {
    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            flaky_creates: AtomicU32::new(0),
            throttled_lists: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
        }
    }

    fn with_flaky_creates(self, n: u32) -> Self {
        self.flaky_creates.store(n, Ordering::SeqCst);
        self
    }

    fn with_throttled_lists(self, n: u32) -> Self {
        self.throttled_lists.store(n, Ordering::SeqCst);
        self
    }

    /// Late re-arm for tests that break a provider mid-test
    fn throttle_lists(&self, n: u32) {
        self.throttled_lists.store(n, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }

    fn require<'a>(
        &self,
        guard: &'a HashMap<String, Instance>,
        operation: &'static str,
        id: &str,
    ) -> Result<&'a Instance> {
        guard.get(id).ok_or_else(|| {
            ProviderError::not_found(self.kind, operation, format!("instance {}", id))
        })
    }
}

#[async_trait]
impl ProviderClient for InMemoryCloud {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn name(&self) -> &str {
        "in-memory"
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let throttled = self.throttled_lists.load(Ordering::SeqCst);
        if throttled > 0 {
            self.throttled_lists.store(throttled - 1, Ordering::SeqCst);
            return Err(ProviderError::rate_limited(
                self.kind,
                "list_instances",
                "throttled",
            ));
        }
        Ok(self.instances.lock().unwrap().values().cloned().collect())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let id = format!("vm-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let instance = Instance {
            id: id.clone(),
            provider: self.kind,
            state: InstanceState::Pending,
            location: spec.location.clone(),
            machine_type: spec.machine_type.clone(),
            tags: spec.tags.clone(),
        };
        self.instances.lock().unwrap().insert(id, instance.clone());

        let flaky = self.flaky_creates.load(Ordering::SeqCst);
        if flaky > 0 {
            self.flaky_creates.store(flaky - 1, Ordering::SeqCst);
            // provisioned, but the caller never hears about it
            return Err(ProviderError::unavailable(
                self.kind,
                "create_instance",
                "response lost",
            ));
        }
        Ok(instance)
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        let mut guard = self.instances.lock().unwrap();
        self.require(&guard, "start_instance", id)?;
        guard.get_mut(id).unwrap().state = InstanceState::Running;
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<()> {
        let mut guard = self.instances.lock().unwrap();
        self.require(&guard, "stop_instance", id)?;
        guard.get_mut(id).unwrap().state = InstanceState::Stopped;
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        let mut guard = self.instances.lock().unwrap();
        self.require(&guard, "delete_instance", id)?;
        guard.remove(id);
        Ok(())
    }

    async fn get_status(&self, id: &str) -> Result<InstanceState> {
        let guard = self.instances.lock().unwrap();
        Ok(self.require(&guard, "get_status", id)?.state)
    }

    async fn get_metric(
        &self,
        id: &str,
        kind: MetricKind,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>> {
        if kind != MetricKind::Cpu {
            return Err(ProviderError::unsupported(self.kind, "get_metric", "CPU only"));
        }
        let guard = self.instances.lock().unwrap();
        self.require(&guard, "get_metric", id)?;

        // data exists only for the first half of any requested range
        let half = range.start + (range.end - range.start) / 2;
        let mut samples = Vec::new();
        let mut at = range.start;
        while at < half {
            samples.push(MetricSample {
                timestamp: at,
                kind,
                value: 25.0,
                unit: MetricUnit::Percent,
            });
            at = at + chrono::Duration::seconds(300);
        }
        Ok(samples)
    }

    async fn get_storage_usage(&self, id: &str) -> Result<BTreeMap<String, u64>> {
        let guard = self.instances.lock().unwrap();
        self.require(&guard, "get_storage_usage", id)?;
        Ok(BTreeMap::from([("root".to_string(), 40u64)]))
    }

    async fn get_cost(
        &self,
        range: &TimeRange,
        granularity: CostGranularity,
    ) -> Result<Vec<CostRecord>> {
        Ok(vec![CostRecord {
            period_start: range.start,
            period_end: range.end,
            amount: 12.5,
            currency: "USD".to_string(),
            granularity,
        }])
    }

    async fn find_instance_by_tag(&self, key: &str, value: &str) -> Result<Option<Instance>> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .find(|i| i.tags.get(key).map(String::as_str) == Some(value))
            .cloned())
    }
}

fn spec() -> InstanceSpec {
    InstanceSpec::new("web-01", "small", "img-1", "zone-1")
}

fn hour_range() -> TimeRange {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    TimeRange::new(start, start + chrono::Duration::hours(1))
}

#[tokio::test]
async fn full_lifecycle_round_trip() {
    let cloud = Arc::new(InMemoryCloud::new(ProviderKind::Aws));
    let dispatcher = Dispatcher::builder().register(cloud.clone()).build();

    let created = dispatcher
        .create_instance(ProviderKind::Aws, &spec(), None)
        .await
        .unwrap();
    assert_eq!(created.state, InstanceState::Pending);

    dispatcher
        .start_instance(ProviderKind::Aws, &created.id)
        .await
        .unwrap();
    assert_eq!(
        dispatcher.get_status(ProviderKind::Aws, &created.id).await.unwrap(),
        InstanceState::Running
    );

    dispatcher
        .stop_instance(ProviderKind::Aws, &created.id)
        .await
        .unwrap();
    assert_eq!(
        dispatcher.get_status(ProviderKind::Aws, &created.id).await.unwrap(),
        InstanceState::Stopped
    );

    dispatcher
        .delete_instance(ProviderKind::Aws, &created.id)
        .await
        .unwrap();
    let err = dispatcher
        .get_status(ProviderKind::Aws, &created.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn throttled_listing_is_retried_to_success() {
    let cloud = Arc::new(InMemoryCloud::new(ProviderKind::Gcp).with_throttled_lists(2));
    let dispatcher = Dispatcher::builder().register(cloud.clone()).build();

    dispatcher
        .create_instance(ProviderKind::Gcp, &spec(), None)
        .await
        .unwrap();
    let listed = dispatcher.list_instances(ProviderKind::Gcp).await.unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(cloud.list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn flaky_create_with_token_makes_one_instance() {
    let cloud = Arc::new(InMemoryCloud::new(ProviderKind::Azure).with_flaky_creates(1));
    let dispatcher = Dispatcher::builder().register(cloud.clone()).build();

    let created = dispatcher
        .create_instance(ProviderKind::Azure, &spec(), Some("tok-1".to_string()))
        .await
        .unwrap();

    assert_eq!(cloud.count(), 1);
    assert_eq!(created.tags.get(IDEMPOTENCY_TAG).map(String::as_str), Some("tok-1"));
}

#[tokio::test(start_paused = true)]
async fn fleet_snapshot_mixes_results_and_annotations() {
    let healthy = Arc::new(InMemoryCloud::new(ProviderKind::Aws));
    let broken = Arc::new(InMemoryCloud::new(ProviderKind::Gcp));
    let dispatcher = Dispatcher::builder()
        .register(healthy.clone())
        .register(broken.clone())
        .build();

    dispatcher
        .create_instance(ProviderKind::Aws, &spec(), None)
        .await
        .unwrap();
    let started = dispatcher
        .create_instance(ProviderKind::Gcp, &spec(), None)
        .await
        .unwrap();
    dispatcher
        .start_instance(ProviderKind::Gcp, &started.id)
        .await
        .unwrap();

    // break GCP after the fact: every retry attempt gets throttled
    broken.throttle_lists(u32::MAX);

    let snapshot = dispatcher.list_all_instances().await;
    assert_eq!(snapshot.instances.len(), 1);
    assert_eq!(snapshot.instances[0].provider, ProviderKind::Aws);
    assert_eq!(snapshot.failures.len(), 1);
    assert_eq!(snapshot.failures[0].provider, ProviderKind::Gcp);
    assert_eq!(snapshot.failures[0].error.kind, ErrorKind::RateLimited);
}

#[tokio::test]
async fn half_populated_metric_range_is_partial() {
    let cloud = Arc::new(InMemoryCloud::new(ProviderKind::Aws));
    let dispatcher = Dispatcher::builder().register(cloud.clone()).build();

    let created = dispatcher
        .create_instance(ProviderKind::Aws, &spec(), None)
        .await
        .unwrap();
    let series = dispatcher
        .get_metric(ProviderKind::Aws, &created.id, MetricKind::Cpu, &hour_range())
        .await
        .unwrap();

    assert_eq!(series.samples.len(), 6);
    assert!(series.partial);
    assert_eq!(series.unit, MetricUnit::Percent);
}

#[tokio::test]
async fn unsupported_metric_kind_propagates() {
    let cloud = Arc::new(InMemoryCloud::new(ProviderKind::Aws));
    let dispatcher = Dispatcher::builder().register(cloud.clone()).build();

    let created = dispatcher
        .create_instance(ProviderKind::Aws, &spec(), None)
        .await
        .unwrap();
    let err = dispatcher
        .get_metric(ProviderKind::Aws, &created.id, MetricKind::Ram, &hour_range())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);
}
