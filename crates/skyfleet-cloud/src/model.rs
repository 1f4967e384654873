//! Provider-agnostic data model
//!
//! Everything here is owned by the caller: the control plane holds no
//! persistent copy of any instance or sample, only transient query
//! results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Cloud provider identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Aws,
    Gcp,
    Azure,
}

impl ProviderKind {
    /// All providers the control plane knows about
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Aws, ProviderKind::Gcp, ProviderKind::Azure];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Gcp => "gcp",
            ProviderKind::Azure => "azure",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(ProviderKind::Aws),
            "gcp" | "google" => Ok(ProviderKind::Gcp),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Unified instance lifecycle state
///
/// Adapters map native state strings into this enum. Anything they do
/// not recognize maps to `Unknown`, never an error, so a provider
/// adding a new state cannot break listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopped,
    Terminated,
    Unknown,
}

impl InstanceState {
    /// Whether the instance can run workloads (or is about to)
    pub fn is_active(&self) -> bool {
        matches!(self, InstanceState::Running | InstanceState::Pending)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
            InstanceState::Terminated => "terminated",
            InstanceState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A compute instance as seen through the unified contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-native identifier (EC2 instance id, GCP instance name, ...)
    pub id: String,

    /// Owning provider. Always part of the identity: ids are never
    /// compared across providers
    pub provider: ProviderKind,

    /// Current lifecycle state
    pub state: InstanceState,

    /// Region or zone the instance lives in
    pub location: String,

    /// Provider-native machine type (e.g. "t3.micro", "e2-medium")
    pub machine_type: String,

    /// Tags / labels attached to the instance
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Instance {
    /// Unique key within the whole fleet: provider is always included
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.provider, self.location, self.id)
    }
}

/// Input for creating an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Display name (some providers use it as the identifier)
    pub name: String,

    /// Provider-native machine type
    pub machine_type: String,

    /// Boot image or disk reference (AMI id, image family URL, image reference)
    pub image: String,

    /// Boot disk size in GB, when the provider allows choosing it
    pub disk_size_gb: Option<u32>,

    /// Region or zone to create in
    pub location: String,

    /// Tags to attach at creation
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl InstanceSpec {
    pub fn new(
        name: impl Into<String>,
        machine_type: impl Into<String>,
        image: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            machine_type: machine_type.into(),
            image: image.into(),
            disk_size_gb: None,
            location: location.into(),
            tags: HashMap::new(),
        }
    }

    pub fn with_disk_size(mut self, gb: u32) -> Self {
        self.disk_size_gb = Some(gb);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Kind of telemetry being queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Ram,
    Storage,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Ram => "ram",
            MetricKind::Storage => "storage",
        };
        f.write_str(s)
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(MetricKind::Cpu),
            "ram" | "memory" => Ok(MetricKind::Ram),
            "storage" | "disk" => Ok(MetricKind::Storage),
            other => Err(format!("unknown metric kind: {}", other)),
        }
    }
}

/// Unit a metric value is expressed in
///
/// Adapters emit whatever the provider hands back (`Ratio` from GCP,
/// `Bytes` from Azure Monitor); the telemetry aggregator converts to
/// the canonical `Percent` / `Gigabytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Percent,
    /// 0.0 to 1.0 fraction
    Ratio,
    Bytes,
    Gigabytes,
}

/// One telemetry data point, immutable once produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub kind: MetricKind,
    pub value: f64,
    pub unit: MetricUnit,
}

/// Half-open time range `[start, end)` for telemetry and cost queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Granularity of a cost query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostGranularity {
    Daily,
    Monthly,
}

impl std::fmt::Display for CostGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CostGranularity::Daily => "daily",
            CostGranularity::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

impl FromStr for CostGranularity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(CostGranularity::Daily),
            "monthly" => Ok(CostGranularity::Monthly),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

/// One billing period as reported by the provider, read-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
    pub granularity: CostGranularity,
}
