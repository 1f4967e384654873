//! `ProviderClient` implementation over the ARM and Azure Monitor
//! REST APIs

use crate::error::{check, map_transport};
use crate::token::TokenCache;
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

const ARM_BASE: &str = "https://management.azure.com";
const COMPUTE_API_VERSION: &str = "2024-03-01";
const METRICS_API_VERSION: &str = "2018-01-01";

/// Subscription/resource-group scope the adapter operates in
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub subscription_id: String,
    pub resource_group: String,
}

impl AzureConfig {
    /// Read the scope from `AZURE_SUBSCRIPTION_ID` /
    /// `AZURE_RESOURCE_GROUP`. `None` means the provider is not
    /// configured for this process.
    pub fn from_env() -> Option<Self> {
        let subscription_id = std::env::var("AZURE_SUBSCRIPTION_ID").ok()?.trim().to_string();
        let resource_group = std::env::var("AZURE_RESOURCE_GROUP").ok()?.trim().to_string();
        if subscription_id.is_empty() || resource_group.is_empty() {
            return None;
        }
        Some(Self {
            subscription_id,
            resource_group,
        })
    }
}

/// Extra environment needed only for VM creation: ARM cannot build a
/// VM without a pre-existing NIC and an admin login.
#[derive(Debug, Clone, Default)]
struct CreateDefaults {
    nic_id: Option<String>,
    admin_username: Option<String>,
    ssh_public_key: Option<String>,
}

impl CreateDefaults {
    fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            nic_id: read("AZURE_NIC_ID"),
            admin_username: read("AZURE_ADMIN_USERNAME"),
            ssh_public_key: read("AZURE_SSH_PUBLIC_KEY"),
        }
    }
}

/// Azure adapter: one HTTP client, one cached ARM token, one
/// subscription/resource-group scope. Instances are addressed by VM
/// name.
pub struct AzureAdapter {
    client: reqwest::Client,
    config: AzureConfig,
    token: TokenCache,
    create_defaults: CreateDefaults,
}

// Wire shapes for the slices of the ARM responses we actually read.

#[derive(Deserialize)]
struct VmList {
    #[serde(default)]
    value: Vec<AzureVm>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct AzureVm {
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    properties: VmProperties,
}

#[derive(Deserialize, Default)]
struct VmProperties {
    #[serde(rename = "provisioningState")]
    provisioning_state: Option<String>,
    #[serde(rename = "hardwareProfile")]
    hardware_profile: Option<HardwareProfile>,
    #[serde(rename = "storageProfile")]
    storage_profile: Option<StorageProfile>,
    #[serde(rename = "instanceView")]
    instance_view: Option<InstanceView>,
}

#[derive(Deserialize)]
struct HardwareProfile {
    #[serde(rename = "vmSize")]
    vm_size: Option<String>,
}

#[derive(Deserialize)]
struct StorageProfile {
    #[serde(rename = "osDisk")]
    os_disk: Option<AzureDisk>,
    #[serde(rename = "dataDisks", default)]
    data_disks: Vec<AzureDisk>,
}

#[derive(Deserialize)]
struct AzureDisk {
    name: Option<String>,
    #[serde(rename = "diskSizeGB")]
    disk_size_gb: Option<i64>,
}

#[derive(Deserialize, Default)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<ViewStatus>,
}

#[derive(Deserialize)]
struct ViewStatus {
    #[serde(default)]
    code: String,
}

#[derive(Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    value: Vec<AzureMetric>,
}

#[derive(Deserialize)]
struct AzureMetric {
    #[serde(default)]
    timeseries: Vec<AzureTimeseries>,
}

#[derive(Deserialize)]
struct AzureTimeseries {
    #[serde(default)]
    data: Vec<AzurePoint>,
}

#[derive(Deserialize)]
struct AzurePoint {
    #[serde(rename = "timeStamp")]
    time_stamp: DateTime<Utc>,
    #[serde(default)]
    average: Option<f64>,
}

/// Power state from the instance view, with provisioning state as the
/// fallback for VMs mid-create or mid-delete.
fn map_vm_state(properties: &VmProperties) -> InstanceState {
    if let Some(view) = &properties.instance_view {
        if let Some(state) = power_state(&view.statuses) {
            return state;
        }
    }
    match properties.provisioning_state.as_deref() {
        Some("Creating") | Some("Updating") => InstanceState::Pending,
        Some("Deleting") => InstanceState::Terminated,
        _ => InstanceState::Unknown,
    }
}

fn power_state(statuses: &[ViewStatus]) -> Option<InstanceState> {
    let code = statuses
        .iter()
        .find_map(|s| s.code.strip_prefix("PowerState/"))?;
    Some(match code {
        "starting" => InstanceState::Pending,
        "running" => InstanceState::Running,
        "stopping" | "stopped" | "deallocating" | "deallocated" => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    })
}

/// Marketplace image reference in `publisher:offer:sku:version` form
fn parse_image_reference(image: &str) -> Result<serde_json::Value> {
    let parts: Vec<&str> = image.split(':').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return Err(ProviderError::invalid_argument(
            ProviderKind::Azure,
            "create_instance",
            format!("image must be publisher:offer:sku:version, got {:?}", image),
        ));
    }
    Ok(json!({
        "publisher": parts[0],
        "offer": parts[1],
        "sku": parts[2],
        "version": parts[3],
    }))
}

impl AzureAdapter {
    pub fn connect(config: AzureConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| {
                ProviderError::unavailable(
                    ProviderKind::Azure,
                    "connect",
                    "cannot build HTTP client",
                )
                .with_cause(e)
            })?;
        debug!(
            subscription = %config.subscription_id,
            resource_group = %config.resource_group,
            "Azure adapter ready"
        );
        Ok(Self {
            client,
            config,
            token: TokenCache::from_env(),
            create_defaults: CreateDefaults::from_env(),
        })
    }

    fn vm_collection_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines",
            ARM_BASE, self.config.subscription_id, self.config.resource_group
        )
    }

    fn vm_url(&self, name: &str) -> String {
        format!("{}/{}", self.vm_collection_url(), name)
    }

    fn convert_vm(&self, native: AzureVm) -> Instance {
        let machine_type = native
            .properties
            .hardware_profile
            .as_ref()
            .and_then(|h| h.vm_size.clone())
            .unwrap_or_default();
        Instance {
            id: native.name,
            provider: ProviderKind::Azure,
            state: map_vm_state(&native.properties),
            location: native.location,
            machine_type,
            tags: native.tags,
        }
    }

    async fn fetch_vm(&self, operation: &'static str, name: &str) -> Result<AzureVm> {
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .get(self.vm_url(name))
            .bearer_auth(bearer)
            .query(&[("api-version", COMPUTE_API_VERSION)])
            .send()
            .await
            .map_err(|e| map_transport(operation, e))?;
        let resp = check(operation, resp).await?;
        resp.json::<AzureVm>().await.map_err(|e| {
            ProviderError::unavailable(ProviderKind::Azure, operation, "malformed VM body")
                .with_cause(e)
        })
    }

    async fn post_lifecycle(&self, operation: &'static str, name: &str, verb: &str) -> Result<()> {
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .post(format!("{}/{}", self.vm_url(name), verb))
            .bearer_auth(bearer)
            .query(&[("api-version", COMPUTE_API_VERSION)])
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| map_transport(operation, e))?;
        check(operation, resp).await?;
        Ok(())
    }

    fn build_create_body(&self, spec: &InstanceSpec) -> Result<serde_json::Value> {
        let image_reference = parse_image_reference(&spec.image)?;
        let missing_create_env = || {
            ProviderError::invalid_argument(
                ProviderKind::Azure,
                "create_instance",
                "VM creation needs AZURE_NIC_ID, AZURE_ADMIN_USERNAME and AZURE_SSH_PUBLIC_KEY",
            )
        };
        let nic_id = self.create_defaults.nic_id.as_ref().ok_or_else(missing_create_env)?;
        let admin = self
            .create_defaults
            .admin_username
            .as_ref()
            .ok_or_else(missing_create_env)?;
        let ssh_key = self
            .create_defaults
            .ssh_public_key
            .as_ref()
            .ok_or_else(missing_create_env)?;

        let mut os_disk = json!({ "createOption": "FromImage" });
        if let Some(size) = spec.disk_size_gb {
            os_disk["diskSizeGB"] = json!(size);
        }

        Ok(json!({
            "location": spec.location,
            "tags": spec.tags,
            "properties": {
                "hardwareProfile": { "vmSize": spec.machine_type },
                "storageProfile": {
                    "imageReference": image_reference,
                    "osDisk": os_disk,
                },
                "osProfile": {
                    "computerName": spec.name,
                    "adminUsername": admin,
                    "linuxConfiguration": {
                        "disablePasswordAuthentication": true,
                        "ssh": {
                            "publicKeys": [{
                                "path": format!("/home/{}/.ssh/authorized_keys", admin),
                                "keyData": ssh_key,
                            }]
                        }
                    }
                },
                "networkProfile": {
                    "networkInterfaces": [{ "id": nic_id }]
                }
            }
        }))
    }
}

#[async_trait]
impl ProviderClient for AzureAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn name(&self) -> &str {
        "azure-compute"
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut url = Some(self.vm_collection_url());
        let mut first_page = true;
        while let Some(page_url) = url.take() {
            let bearer = self.token.bearer(&self.client).await?;
            let mut req = self.client.get(&page_url).bearer_auth(bearer);
            if first_page {
                // nextLink already carries every query parameter
                req = req.query(&[
                    ("api-version", COMPUTE_API_VERSION),
                    ("$expand", "instanceView"),
                ]);
                first_page = false;
            }
            let resp = req
                .send()
                .await
                .map_err(|e| map_transport("list_instances", e))?;
            let resp = check("list_instances", resp).await?;
            let page: VmList = resp.json().await.map_err(|e| {
                ProviderError::unavailable(
                    ProviderKind::Azure,
                    "list_instances",
                    "malformed VM list",
                )
                .with_cause(e)
            })?;
            instances.extend(page.value.into_iter().map(|vm| self.convert_vm(vm)));
            url = page.next_link;
        }
        debug!(count = instances.len(), "listed Azure VMs");
        Ok(instances)
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        if spec.location.is_empty() {
            return Err(ProviderError::invalid_argument(
                ProviderKind::Azure,
                "create_instance",
                "a location (e.g. \"eastus\") is required",
            ));
        }
        let body = self.build_create_body(spec)?;
        info!(name = %spec.name, vm_size = %spec.machine_type, "creating Azure VM");

        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .put(self.vm_url(&spec.name))
            .bearer_auth(bearer)
            .query(&[("api-version", COMPUTE_API_VERSION)])
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport("create_instance", e))?;
        let resp = check("create_instance", resp).await?;
        let native: AzureVm = resp.json().await.map_err(|e| {
            ProviderError::unavailable(
                ProviderKind::Azure,
                "create_instance",
                "malformed VM body",
            )
            .with_cause(e)
        })?;
        Ok(self.convert_vm(native))
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        self.post_lifecycle("start_instance", id, "start").await?;
        info!(id, "start requested");
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<()> {
        self.post_lifecycle("stop_instance", id, "powerOff").await?;
        info!(id, "power off requested");
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .delete(self.vm_url(id))
            .bearer_auth(bearer)
            .query(&[("api-version", COMPUTE_API_VERSION)])
            .send()
            .await
            .map_err(|e| map_transport("delete_instance", e))?;
        check("delete_instance", resp).await?;
        info!(id, "deletion requested");
        Ok(())
    }

    async fn get_status(&self, id: &str) -> Result<InstanceState> {
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .get(format!("{}/instanceView", self.vm_url(id)))
            .bearer_auth(bearer)
            .query(&[("api-version", COMPUTE_API_VERSION)])
            .send()
            .await
            .map_err(|e| map_transport("get_status", e))?;
        let resp = check("get_status", resp).await?;
        let view: InstanceView = resp.json().await.map_err(|e| {
            ProviderError::unavailable(ProviderKind::Azure, "get_status", "malformed instance view")
                .with_cause(e)
        })?;
        Ok(power_state(&view.statuses).unwrap_or(InstanceState::Unknown))
    }

    async fn get_metric(
        &self,
        id: &str,
        kind: MetricKind,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>> {
        let (metric_name, unit) = match kind {
            MetricKind::Cpu => ("Percentage CPU", MetricUnit::Percent),
            MetricKind::Ram => ("Available Memory Bytes", MetricUnit::Bytes),
            MetricKind::Storage => {
                return Err(ProviderError::unsupported(
                    ProviderKind::Azure,
                    "get_metric",
                    "storage has no time series; query storage usage instead",
                ));
            }
        };

        let timespan = format!(
            "{}/{}",
            range.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            range.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let bearer = self.token.bearer(&self.client).await?;
        let resp = self
            .client
            .get(format!(
                "{}/providers/microsoft.insights/metrics",
                self.vm_url(id)
            ))
            .bearer_auth(bearer)
            .query(&[
                ("api-version", METRICS_API_VERSION),
                ("metricnames", metric_name),
                ("timespan", timespan.as_str()),
                ("interval", "PT5M"),
                ("aggregation", "Average"),
            ])
            .send()
            .await
            .map_err(|e| map_transport("get_metric", e))?;
        let resp = check("get_metric", resp).await?;
        let metrics: MetricsResponse = resp.json().await.map_err(|e| {
            ProviderError::unavailable(ProviderKind::Azure, "get_metric", "malformed metrics body")
                .with_cause(e)
        })?;

        let samples = metrics
            .value
            .into_iter()
            .flat_map(|m| m.timeseries)
            .flat_map(|ts| ts.data)
            .filter_map(|point| {
                Some(MetricSample {
                    timestamp: point.time_stamp,
                    kind,
                    value: point.average?,
                    unit,
                })
            })
            .collect();
        Ok(samples)
    }

    async fn get_storage_usage(&self, id: &str) -> Result<BTreeMap<String, u64>> {
        let native = self.fetch_vm("get_storage_usage", id).await?;
        let mut usage = BTreeMap::new();
        if let Some(profile) = native.properties.storage_profile {
            let disks = profile.os_disk.into_iter().chain(profile.data_disks);
            for disk in disks {
                let name = disk.name.unwrap_or_else(|| "osdisk".to_string());
                usage.insert(name, disk.disk_size_gb.unwrap_or(0).max(0) as u64);
            }
        }
        Ok(usage)
    }

    async fn get_cost(
        &self,
        _range: &TimeRange,
        _granularity: CostGranularity,
    ) -> Result<Vec<CostRecord>> {
        Err(ProviderError::unsupported(
            ProviderKind::Azure,
            "get_cost",
            "Cost Management queries are out of scope",
        ))
    }

    async fn find_instance_by_tag(&self, key: &str, value: &str) -> Result<Option<Instance>> {
        // ARM list has no tag filter worth relying on; filter client-side
        let instances = self.list_instances().await?;
        Ok(instances
            .into_iter()
            .find(|i| i.tags.get(key).map(String::as_str) == Some(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: &str) -> ViewStatus {
        ViewStatus {
            code: code.to_string(),
        }
    }

    #[test]
    fn power_states_map_to_unified_enum() {
        let cases = [
            ("PowerState/starting", InstanceState::Pending),
            ("PowerState/running", InstanceState::Running),
            ("PowerState/stopping", InstanceState::Stopped),
            ("PowerState/stopped", InstanceState::Stopped),
            ("PowerState/deallocated", InstanceState::Stopped),
            ("PowerState/hibernated", InstanceState::Unknown),
        ];
        for (code, expected) in cases {
            let statuses = [status("ProvisioningState/succeeded"), status(code)];
            assert_eq!(power_state(&statuses), Some(expected), "{}", code);
        }
        assert_eq!(power_state(&[status("ProvisioningState/succeeded")]), None);
    }

    #[test]
    fn provisioning_state_is_the_fallback() {
        let properties = VmProperties {
            provisioning_state: Some("Creating".to_string()),
            ..Default::default()
        };
        assert_eq!(map_vm_state(&properties), InstanceState::Pending);

        let properties = VmProperties {
            provisioning_state: Some("Deleting".to_string()),
            ..Default::default()
        };
        assert_eq!(map_vm_state(&properties), InstanceState::Terminated);

        assert_eq!(map_vm_state(&VmProperties::default()), InstanceState::Unknown);
    }

    #[test]
    fn image_reference_parsing() {
        let parsed = parse_image_reference("Canonical:ubuntu-24_04-lts:server:latest").unwrap();
        assert_eq!(parsed["publisher"], "Canonical");
        assert_eq!(parsed["offer"], "ubuntu-24_04-lts");
        assert_eq!(parsed["sku"], "server");
        assert_eq!(parsed["version"], "latest");

        let err = parse_image_reference("ubuntu-24.04").unwrap_err();
        assert_eq!(err.kind, skyfleet_cloud::ErrorKind::InvalidArgument);
    }
}
