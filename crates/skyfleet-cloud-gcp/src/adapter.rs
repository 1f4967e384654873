//! `ProviderClient` implementation over the Compute Engine and Cloud
//! Monitoring REST APIs

use crate::error::{check, map_transport};
use crate::token::TokenSource;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfleet_cloud::{
    CostGranularity, CostRecord, Instance, InstanceSpec, InstanceState, MetricKind, MetricSample,
    MetricUnit, ProviderClient, ProviderError, ProviderKind, Result, TimeRange,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";
const MONITORING_BASE: &str = "https://monitoring.googleapis.com/v3";
const CPU_METRIC_TYPE: &str = "compute.googleapis.com/instance/cpu/utilization";

/// Project/zone scope the adapter operates in
#[derive(Debug, Clone)]
pub struct GcpConfig {
    pub project: String,
    pub zone: String,
}

impl GcpConfig {
    /// Read the scope from `GCP_PROJECT` / `GCP_ZONE`. `None` means
    /// the provider is simply not configured for this process.
    pub fn from_env() -> Option<Self> {
        let project = std::env::var("GCP_PROJECT").ok()?.trim().to_string();
        let zone = std::env::var("GCP_ZONE").ok()?.trim().to_string();
        if project.is_empty() || zone.is_empty() {
            return None;
        }
        Some(Self { project, zone })
    }
}

/// Google Cloud adapter: one HTTP client, one token source, one
/// project/zone scope. Instances are addressed by name.
pub struct GcpAdapter {
    client: reqwest::Client,
    config: GcpConfig,
    token: TokenSource,
}

// Wire shapes for the slices of the Compute/Monitoring responses we
// actually read.

#[derive(Deserialize)]
struct InstanceList {
    #[serde(default)]
    items: Vec<GceInstance>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct GceInstance {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "machineType", default)]
    machine_type: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    disks: Vec<GceDisk>,
}

#[derive(Deserialize)]
struct GceDisk {
    #[serde(rename = "deviceName", default)]
    device_name: String,
    #[serde(rename = "diskSizeGb", default)]
    disk_size_gb: Option<String>,
}

#[derive(Deserialize)]
struct TimeSeriesList {
    #[serde(rename = "timeSeries", default)]
    time_series: Vec<TimeSeries>,
}

#[derive(Deserialize)]
struct TimeSeries {
    #[serde(default)]
    points: Vec<TimeSeriesPoint>,
}

#[derive(Deserialize)]
struct TimeSeriesPoint {
    interval: PointInterval,
    value: PointValue,
}

#[derive(Deserialize)]
struct PointInterval {
    #[serde(rename = "endTime")]
    end_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PointValue {
    #[serde(rename = "doubleValue", default)]
    double_value: Option<f64>,
}

/// Compute Engine status strings fold into the unified enum. GCP's
/// `TERMINATED` means "stopped"; a deleted instance is a 404 instead.
fn map_status(status: &str) -> InstanceState {
    match status {
        "PROVISIONING" | "STAGING" => InstanceState::Pending,
        "RUNNING" => InstanceState::Running,
        "STOPPING" | "SUSPENDING" | "SUSPENDED" | "TERMINATED" => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

fn short_machine_type(machine_type_url: &str) -> String {
    machine_type_url
        .rsplit('/')
        .next()
        .unwrap_or(machine_type_url)
        .to_string()
}

fn validate_spec(spec: &InstanceSpec, zone: &str) -> Result<()> {
    if !spec.image.contains('/') {
        return Err(ProviderError::invalid_argument(
            ProviderKind::Gcp,
            "create_instance",
            format!(
                "image must be a source image or family path, got {:?}",
                spec.image
            ),
        ));
    }
    if !spec.location.is_empty() && spec.location != zone {
        return Err(ProviderError::invalid_argument(
            ProviderKind::Gcp,
            "create_instance",
            format!("adapter is bound to zone {}, cannot create in {}", zone, spec.location),
        ));
    }
    Ok(())
}

fn build_create_body(spec: &InstanceSpec, zone: &str) -> serde_json::Value {
    let mut initialize_params = json!({ "sourceImage": spec.image });
    if let Some(size) = spec.disk_size_gb {
        initialize_params["diskSizeGb"] = json!(size.to_string());
    }
    json!({
        "name": spec.name,
        "machineType": format!("zones/{}/machineTypes/{}", zone, spec.machine_type),
        "disks": [{
            "boot": true,
            "autoDelete": true,
            "initializeParams": initialize_params,
        }],
        "networkInterfaces": [{ "network": "global/networks/default" }],
        "labels": spec.tags,
    })
}

impl GcpAdapter {
    pub fn connect(config: GcpConfig) -> Result<Self> {
        // No overall timeout would let a stalled API hang a call forever.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| {
                ProviderError::unavailable(ProviderKind::Gcp, "connect", "cannot build HTTP client")
                    .with_cause(e)
            })?;
        debug!(project = %config.project, zone = %config.zone, "GCP adapter ready");
        Ok(Self {
            client,
            config,
            token: TokenSource::from_env(),
        })
    }

    fn instances_url(&self) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances",
            COMPUTE_BASE, self.config.project, self.config.zone
        )
    }

    fn instance_url(&self, name: &str) -> String {
        format!("{}/{}", self.instances_url(), name)
    }

    fn convert_instance(&self, native: GceInstance) -> Instance {
        Instance {
            id: native.name,
            provider: ProviderKind::Gcp,
            state: map_status(&native.status),
            location: self.config.zone.clone(),
            machine_type: short_machine_type(&native.machine_type),
            tags: native.labels,
        }
    }

    async fn list_page(
        &self,
        operation: &'static str,
        filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<InstanceList> {
        let bearer = self.token.bearer(&self.client).await?;
        let mut req = self.client.get(self.instances_url()).bearer_auth(bearer);
        if let Some(filter) = filter {
            req = req.query(&[("filter", filter)]);
        }
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }
        let resp = req.send().await.map_err(|e| map_transport(operation, e))?;
        let resp = check(operation, resp).await?;
        resp.json::<InstanceList>().await.map_err(|e| {
            ProviderError::unavailable(ProviderKind::Gcp, operation, "malformed instance list")
                .with_cause(e)
        })
    }

    async fn fetch_instance(&self, operation: &'static str, name: &str) -> Result<GceInstance> {
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .get(self.instance_url(name))
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| map_transport(operation, e))?;
        let resp = check(operation, resp).await?;
        resp.json::<GceInstance>().await.map_err(|e| {
            ProviderError::unavailable(ProviderKind::Gcp, operation, "malformed instance body")
                .with_cause(e)
        })
    }

    async fn post_lifecycle(&self, operation: &'static str, name: &str, verb: &str) -> Result<()> {
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .post(format!("{}/{}", self.instance_url(name), verb))
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| map_transport(operation, e))?;
        check(operation, resp).await?;
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for GcpAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gcp
    }

    fn name(&self) -> &str {
        "gcp-compute"
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_page("list_instances", None, page_token.as_deref())
                .await?;
            instances.extend(page.items.into_iter().map(|i| self.convert_instance(i)));
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        debug!(count = instances.len(), "listed GCE instances");
        Ok(instances)
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        validate_spec(spec, &self.config.zone)?;
        info!(name = %spec.name, machine_type = %spec.machine_type, "inserting GCE instance");

        let bearer = self.token.bearer(&self.client).await?;
        let body = build_create_body(spec, &self.config.zone);
        let resp = self
            .client
            .post(self.instances_url())
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport("create_instance", e))?;
        check("create_instance", resp).await?;

        // insert returns a zonal operation; the instance resource is
        // addressable by name right away (in PROVISIONING)
        let native = self.fetch_instance("create_instance", &spec.name).await?;
        Ok(self.convert_instance(native))
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        self.post_lifecycle("start_instance", id, "start").await?;
        info!(id, "start requested");
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<()> {
        self.post_lifecycle("stop_instance", id, "stop").await?;
        info!(id, "stop requested");
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .delete(self.instance_url(id))
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| map_transport("delete_instance", e))?;
        check("delete_instance", resp).await?;
        info!(id, "deletion requested");
        Ok(())
    }

    async fn get_status(&self, id: &str) -> Result<InstanceState> {
        let native = self.fetch_instance("get_status", id).await?;
        Ok(map_status(&native.status))
    }

    async fn get_metric(
        &self,
        id: &str,
        kind: MetricKind,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>> {
        match kind {
            MetricKind::Cpu => {}
            MetricKind::Ram => {
                return Err(ProviderError::unsupported(
                    ProviderKind::Gcp,
                    "get_metric",
                    "memory telemetry requires the ops agent, which is not assumed",
                ));
            }
            MetricKind::Storage => {
                return Err(ProviderError::unsupported(
                    ProviderKind::Gcp,
                    "get_metric",
                    "storage has no time series; query storage usage instead",
                ));
            }
        }

        let filter = format!(
            "metric.type = \"{}\" AND metric.labels.instance_name = \"{}\"",
            CPU_METRIC_TYPE, id
        );
        let start = range.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = range.end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .get(format!(
                "{}/projects/{}/timeSeries",
                MONITORING_BASE, self.config.project
            ))
            .bearer_auth(bearer)
            .query(&[
                ("filter", filter.as_str()),
                ("interval.startTime", start.as_str()),
                ("interval.endTime", end.as_str()),
            ])
            .send()
            .await
            .map_err(|e| map_transport("get_metric", e))?;
        let resp = check("get_metric", resp).await?;
        let list: TimeSeriesList = resp.json().await.map_err(|e| {
            ProviderError::unavailable(ProviderKind::Gcp, "get_metric", "malformed time series")
                .with_cause(e)
        })?;

        let samples = list
            .time_series
            .into_iter()
            .flat_map(|series| series.points)
            .filter_map(|point| {
                Some(MetricSample {
                    timestamp: point.interval.end_time,
                    kind: MetricKind::Cpu,
                    value: point.value.double_value?,
                    unit: MetricUnit::Ratio,
                })
            })
            .collect();
        Ok(samples)
    }

    async fn get_storage_usage(&self, id: &str) -> Result<BTreeMap<String, u64>> {
        let native = self.fetch_instance("get_storage_usage", id).await?;
        let mut usage = BTreeMap::new();
        for disk in native.disks {
            let size = disk
                .disk_size_gb
                .as_deref()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            usage.insert(disk.device_name, size);
        }
        Ok(usage)
    }

    async fn get_cost(
        &self,
        _range: &TimeRange,
        _granularity: CostGranularity,
    ) -> Result<Vec<CostRecord>> {
        Err(ProviderError::unsupported(
            ProviderKind::Gcp,
            "get_cost",
            "billing requires a BigQuery export, which is out of scope",
        ))
    }

    async fn find_instance_by_tag(&self, key: &str, value: &str) -> Result<Option<Instance>> {
        let filter = format!("labels.{} = \"{}\"", key, value);
        let page = self
            .list_page("find_instance_by_tag", Some(&filter), None)
            .await?;
        Ok(page
            .items
            .into_iter()
            .next()
            .map(|i| self.convert_instance(i)))
    }
}
