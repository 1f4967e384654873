//! Operation dispatch across configured providers
//!
//! The [`Dispatcher`] resolves a provider name to its adapter, applies
//! the resilience wrapper to every call, and routes telemetry results
//! through the aggregator. It is stateless beyond the adapter map:
//! adapters are shared `Arc`s, safe for concurrent use, so calls to
//! different providers or instances can run in parallel freely.

use crate::error::{ProviderError, Result};
use crate::model::{
    CostGranularity, CostRecord, Instance, InstanceSpec, InstanceState, MetricKind, ProviderKind,
    TimeRange,
};
use crate::provider::ProviderClient;
use crate::retry::{self, RetryPolicy, IDEMPOTENCY_TAG};
use crate::telemetry::{self, MetricSeries};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-call knobs; the timeout bounds each attempt, not the whole
/// retry chain.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// One provider's failure inside a fan-out operation
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub error: ProviderError,
}

/// Result of a cross-provider listing: whatever the healthy providers
/// returned, plus an annotation per provider that failed. Never
/// all-or-nothing.
#[derive(Debug, Default)]
pub struct FleetSnapshot {
    pub instances: Vec<Instance>,
    pub failures: Vec<ProviderFailure>,
}

impl FleetSnapshot {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Builds a [`Dispatcher`] from the adapters configured at startup
#[derive(Default)]
pub struct DispatcherBuilder {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    policy: Option<RetryPolicy>,
    options: Option<CallOptions>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter; the last registration per provider wins
    pub fn register(mut self, client: Arc<dyn ProviderClient>) -> Self {
        debug!(provider = %client.kind(), name = client.name(), "registering adapter");
        self.clients.insert(client.kind(), client);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn default_options(mut self, options: CallOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            clients: self.clients,
            policy: self.policy.unwrap_or_default(),
            options: self.options.unwrap_or_default(),
        }
    }
}

/// Routes `(provider, operation, args)` to the right adapter with
/// retries, timeouts and telemetry normalization applied.
pub struct Dispatcher {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    policy: RetryPolicy,
    options: CallOptions,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Providers that were configured at startup
    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.clients.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    fn client(&self, provider: ProviderKind, operation: &'static str) -> Result<&dyn ProviderClient> {
        self.clients
            .get(&provider)
            .map(|c| c.as_ref())
            .ok_or_else(|| {
                ProviderError::invalid_argument(
                    provider,
                    operation,
                    "provider not configured; no credentials were found for it at startup",
                )
            })
    }

    fn check_range(
        &self,
        provider: ProviderKind,
        operation: &'static str,
        range: &TimeRange,
    ) -> Result<()> {
        if range.is_valid() {
            Ok(())
        } else {
            Err(ProviderError::invalid_argument(
                provider,
                operation,
                format!("time range start {} must precede end {}", range.start, range.end),
            ))
        }
    }

    pub async fn list_instances(&self, provider: ProviderKind) -> Result<Vec<Instance>> {
        let client = self.client(provider, "list_instances")?;
        retry::call(&self.policy, self.options.timeout, provider, "list_instances", || {
            client.list_instances()
        })
        .await
    }

    /// Create an instance idempotently.
    ///
    /// The token (caller-supplied, or a fresh UUID) is attached as the
    /// `skyfleet-token` tag so a retried create can find an instance a
    /// partially-failed attempt already provisioned.
    pub async fn create_instance(
        &self,
        provider: ProviderKind,
        spec: &InstanceSpec,
        token: Option<String>,
    ) -> Result<Instance> {
        let client = self.client(provider, "create_instance")?;
        let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut spec = spec.clone();
        spec.tags.insert(IDEMPOTENCY_TAG.to_string(), token.clone());

        let instance =
            retry::call_create(&self.policy, self.options.timeout, client, &spec, &token).await?;
        info!(provider = %provider, id = %instance.id, "instance created");
        Ok(instance)
    }

    pub async fn start_instance(&self, provider: ProviderKind, id: &str) -> Result<()> {
        let client = self.client(provider, "start_instance")?;
        retry::call(&self.policy, self.options.timeout, provider, "start_instance", || {
            client.start_instance(id)
        })
        .await?;
        info!(provider = %provider, id, "instance started");
        Ok(())
    }

    pub async fn stop_instance(&self, provider: ProviderKind, id: &str) -> Result<()> {
        let client = self.client(provider, "stop_instance")?;
        retry::call(&self.policy, self.options.timeout, provider, "stop_instance", || {
            client.stop_instance(id)
        })
        .await?;
        info!(provider = %provider, id, "instance stopped");
        Ok(())
    }

    pub async fn delete_instance(&self, provider: ProviderKind, id: &str) -> Result<()> {
        let client = self.client(provider, "delete_instance")?;
        retry::call(&self.policy, self.options.timeout, provider, "delete_instance", || {
            client.delete_instance(id)
        })
        .await?;
        info!(provider = %provider, id, "instance deleted");
        Ok(())
    }

    pub async fn get_status(&self, provider: ProviderKind, id: &str) -> Result<InstanceState> {
        let client = self.client(provider, "get_status")?;
        retry::call(&self.policy, self.options.timeout, provider, "get_status", || {
            client.get_status(id)
        })
        .await
    }

    /// Telemetry query, normalized through the aggregator into fixed
    /// 5-minute average buckets. The range is validated before any
    /// remote call is made.
    pub async fn get_metric(
        &self,
        provider: ProviderKind,
        id: &str,
        kind: MetricKind,
        range: &TimeRange,
    ) -> Result<MetricSeries> {
        self.check_range(provider, "get_metric", range)?;
        let client = self.client(provider, "get_metric")?;
        let raw = retry::call(&self.policy, self.options.timeout, provider, "get_metric", || {
            client.get_metric(id, kind, range)
        })
        .await?;
        Ok(telemetry::aggregate(kind, range, raw))
    }

    pub async fn get_storage_usage(
        &self,
        provider: ProviderKind,
        id: &str,
    ) -> Result<BTreeMap<String, u64>> {
        let client = self.client(provider, "get_storage_usage")?;
        retry::call(&self.policy, self.options.timeout, provider, "get_storage_usage", || {
            client.get_storage_usage(id)
        })
        .await
    }

    pub async fn get_cost(
        &self,
        provider: ProviderKind,
        range: &TimeRange,
        granularity: CostGranularity,
    ) -> Result<Vec<CostRecord>> {
        self.check_range(provider, "get_cost", range)?;
        let client = self.client(provider, "get_cost")?;
        retry::call(&self.policy, self.options.timeout, provider, "get_cost", || {
            client.get_cost(range, granularity)
        })
        .await
    }

    /// List instances across every configured provider concurrently.
    ///
    /// One provider failing does not abort the others: its error is
    /// attached as an annotation and the healthy results are returned.
    pub async fn list_all_instances(&self) -> FleetSnapshot {
        let calls = self.clients.iter().map(|(kind, client)| {
            let kind = *kind;
            async move {
                let outcome = retry::call(
                    &self.policy,
                    self.options.timeout,
                    kind,
                    "list_instances",
                    || client.list_instances(),
                )
                .await;
                (kind, outcome)
            }
        });

        let mut snapshot = FleetSnapshot::default();
        for (kind, outcome) in join_all(calls).await {
            match outcome {
                Ok(instances) => snapshot.instances.extend(instances),
                Err(error) => {
                    debug!(provider = %kind, %error, "provider failed during fleet listing");
                    snapshot.failures.push(ProviderFailure { provider: kind, error });
                }
            }
        }

        snapshot.instances.sort_by_key(|i| i.key());
        snapshot.failures.sort_by_key(|f| f.provider.as_str());
        snapshot
    }
}
