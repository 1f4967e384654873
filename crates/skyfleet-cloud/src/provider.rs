//! Cloud provider client contract
//!
//! All provider adapters (AWS, GCP, Azure) implement this trait to
//! expose one capability set. Implementations own exactly one
//! authenticated client per provider SDK/API, constructed once and
//! reused; after construction they are safe for concurrent use.

use crate::error::Result;
use crate::model::{
    CostGranularity, CostRecord, Instance, InstanceSpec, InstanceState, MetricKind, MetricSample,
    ProviderKind, TimeRange,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Unified capability contract for one cloud provider
///
/// Every method fails with a typed [`crate::ProviderError`]; a
/// capability the provider cannot serve fails with `Unsupported`
/// rather than succeeding with empty data.
///
/// Mutating calls (create/start/stop/delete) are not idempotent at
/// this level. Idempotent create is provided by the dispatcher, which
/// correlates attempts through a tag and probes
/// [`find_instance_by_tag`](ProviderClient::find_instance_by_tag)
/// before re-issuing.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Human-readable adapter name for logs and error annotations
    fn name(&self) -> &str;

    /// List all instances visible in the adapter's configured scope,
    /// native pagination flattened into one result
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// Create an instance. Spec fields the provider cannot honor are
    /// rejected with `InvalidArgument`, never silently dropped.
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance>;

    async fn start_instance(&self, id: &str) -> Result<()>;

    async fn stop_instance(&self, id: &str) -> Result<()>;

    async fn delete_instance(&self, id: &str) -> Result<()>;

    async fn get_status(&self, id: &str) -> Result<InstanceState>;

    /// Raw samples for one metric over `range`, in whatever unit and
    /// granularity the provider reports. An empty vec means the
    /// provider genuinely has no data for the range; a missing
    /// capability is an `Unsupported` error instead.
    async fn get_metric(
        &self,
        id: &str,
        kind: MetricKind,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>>;

    /// Provisioned storage per attached disk, in GB
    async fn get_storage_usage(&self, id: &str) -> Result<BTreeMap<String, u64>>;

    /// Billed cost for the account scope over `range`
    async fn get_cost(
        &self,
        range: &TimeRange,
        granularity: CostGranularity,
    ) -> Result<Vec<CostRecord>>;

    /// Look up an instance by exact tag match. Used as the
    /// correlation probe for idempotent create; `Ok(None)` means no
    /// instance carries the tag.
    async fn find_instance_by_tag(&self, key: &str, value: &str) -> Result<Option<Instance>>;
}
