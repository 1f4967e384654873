//! `ProviderClient` implementation over the AWS SDK

use crate::error::{map_cloudwatch, map_cost_explorer, map_ec2};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatch::types::{Dimension, Statistic};
use aws_sdk_costexplorer::types::{DateInterval, Granularity};
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, InstanceStateName, InstanceType, ResourceType,
    Tag, TagSpecification, VolumeType,
};
use chrono::{DateTime, NaiveDate, Utc};
use skyfleet_cloud::{
    CostGranularity, CostRecord, Instance, InstanceSpec, InstanceState, MetricKind, MetricSample,
    MetricUnit, ProviderClient, ProviderError, ProviderKind, Result, TimeRange,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Default AWS region when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

const COST_METRIC: &str = "BlendedCost";

/// AWS adapter: one EC2, CloudWatch and Cost Explorer client each,
/// built once from the default credential chain and reused.
pub struct AwsAdapter {
    ec2: aws_sdk_ec2::Client,
    cloudwatch: aws_sdk_cloudwatch::Client,
    cost_explorer: aws_sdk_costexplorer::Client,
    region: String,
}

impl AwsAdapter {
    /// Build the adapter for one region. Credentials are resolved
    /// through the standard chain and validated lazily on first use.
    pub async fn connect(region: impl Into<String>) -> Self {
        let region = region.into();
        debug!(%region, "building AWS clients");
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        Self {
            ec2: aws_sdk_ec2::Client::new(&config),
            cloudwatch: aws_sdk_cloudwatch::Client::new(&config),
            cost_explorer: aws_sdk_costexplorer::Client::new(&config),
            region,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn convert_instance(&self, native: &aws_sdk_ec2::types::Instance) -> Instance {
        let tags: HashMap<String, String> = native
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
            .collect();
        Instance {
            id: native.instance_id().unwrap_or_default().to_string(),
            provider: ProviderKind::Aws,
            state: map_state(native.state().and_then(|s| s.name())),
            location: native
                .placement()
                .and_then(|p| p.availability_zone())
                .unwrap_or(&self.region)
                .to_string(),
            machine_type: native
                .instance_type()
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            tags,
        }
    }

    async fn describe_one(
        &self,
        operation: &'static str,
        id: &str,
    ) -> Result<aws_sdk_ec2::types::Instance> {
        let resp = self
            .ec2
            .describe_instances()
            .instance_ids(id)
            .send()
            .await
            .map_err(|e| map_ec2(operation, e))?;
        resp.reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .cloned()
            .ok_or_else(|| {
                ProviderError::not_found(ProviderKind::Aws, operation, format!("instance {}", id))
            })
    }
}

/// EC2 state names fold into the unified lifecycle enum; transitional
/// states map to the state they are heading for, anything the SDK
/// does not model maps to `Unknown`.
fn map_state(name: Option<&InstanceStateName>) -> InstanceState {
    match name {
        Some(InstanceStateName::Pending) => InstanceState::Pending,
        Some(InstanceStateName::Running) => InstanceState::Running,
        Some(InstanceStateName::Stopping) | Some(InstanceStateName::Stopped) => {
            InstanceState::Stopped
        }
        Some(InstanceStateName::ShuttingDown) | Some(InstanceStateName::Terminated) => {
            InstanceState::Terminated
        }
        _ => InstanceState::Unknown,
    }
}

/// EC2 can only honor a spec that names an AMI and stays inside the
/// adapter's region.
fn validate_spec(spec: &InstanceSpec, region: &str) -> Result<()> {
    if !spec.image.starts_with("ami-") {
        return Err(ProviderError::invalid_argument(
            ProviderKind::Aws,
            "create_instance",
            format!("image must be an AMI id, got {:?}", spec.image),
        ));
    }
    if !spec.location.is_empty() && spec.location != region {
        return Err(ProviderError::invalid_argument(
            ProviderKind::Aws,
            "create_instance",
            format!(
                "adapter is bound to region {}, cannot create in {}",
                region, spec.location
            ),
        ));
    }
    Ok(())
}

fn date_str(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

fn parse_period(s: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
        .unwrap_or_default()
}

#[async_trait]
impl ProviderClient for AwsAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    fn name(&self) -> &str {
        "aws-ec2"
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut req = self.ec2.describe_instances();
            if let Some(token) = &next_token {
                req = req.next_token(token);
            }
            let resp = req.send().await.map_err(|e| map_ec2("list_instances", e))?;
            for reservation in resp.reservations() {
                for native in reservation.instances() {
                    instances.push(self.convert_instance(native));
                }
            }
            next_token = resp.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        debug!(count = instances.len(), "listed EC2 instances");
        Ok(instances)
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        validate_spec(spec, &self.region)?;
        info!(name = %spec.name, machine_type = %spec.machine_type, "launching EC2 instance");

        let mut tags: Vec<Tag> = spec
            .tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        tags.push(Tag::builder().key("Name").value(&spec.name).build());
        let tag_spec = TagSpecification::builder()
            .resource_type(ResourceType::Instance)
            .set_tags(Some(tags))
            .build();

        let mut req = self
            .ec2
            .run_instances()
            .image_id(&spec.image)
            .instance_type(InstanceType::from(spec.machine_type.as_str()))
            .min_count(1)
            .max_count(1)
            .tag_specifications(tag_spec);

        if let Some(size) = spec.disk_size_gb {
            let root_device = BlockDeviceMapping::builder()
                .device_name("/dev/xvda")
                .ebs(
                    EbsBlockDevice::builder()
                        .volume_size(size as i32)
                        .volume_type(VolumeType::Gp3)
                        .delete_on_termination(true)
                        .build(),
                )
                .build();
            req = req.block_device_mappings(root_device);
        }

        let resp = req.send().await.map_err(|e| map_ec2("create_instance", e))?;
        let native = resp.instances().first().ok_or_else(|| {
            ProviderError::unavailable(
                ProviderKind::Aws,
                "create_instance",
                "RunInstances returned no instance",
            )
        })?;
        Ok(self.convert_instance(native))
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        self.ec2
            .start_instances()
            .instance_ids(id)
            .send()
            .await
            .map_err(|e| map_ec2("start_instance", e))?;
        info!(id, "start requested");
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<()> {
        self.ec2
            .stop_instances()
            .instance_ids(id)
            .send()
            .await
            .map_err(|e| map_ec2("stop_instance", e))?;
        info!(id, "stop requested");
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        self.ec2
            .terminate_instances()
            .instance_ids(id)
            .send()
            .await
            .map_err(|e| map_ec2("delete_instance", e))?;
        info!(id, "termination requested");
        Ok(())
    }

    async fn get_status(&self, id: &str) -> Result<InstanceState> {
        let native = self.describe_one("get_status", id).await?;
        Ok(map_state(native.state().and_then(|s| s.name())))
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
                    ProviderKind::Aws,
                    "get_metric",
                    "EC2 publishes no memory metric without the CloudWatch agent",
                ));
            }
            MetricKind::Storage => {
                return Err(ProviderError::unsupported(
                    ProviderKind::Aws,
                    "get_metric",
                    "storage has no time series; query storage usage instead",
                ));
            }
        }

        let resp = self
            .cloudwatch
            .get_metric_statistics()
            .namespace("AWS/EC2")
            .metric_name("CPUUtilization")
            .dimensions(Dimension::builder().name("InstanceId").value(id).build())
            .start_time(aws_smithy_types::DateTime::from_secs(range.start.timestamp()))
            .end_time(aws_smithy_types::DateTime::from_secs(range.end.timestamp()))
            .period(300)
            .statistics(Statistic::Average)
            .send()
            .await
            .map_err(|e| map_cloudwatch("get_metric", e))?;

        let samples = resp
            .datapoints()
            .iter()
            .filter_map(|dp| {
                let ts = dp.timestamp()?;
                let value = dp.average()?;
                let timestamp = DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())?;
                Some(MetricSample {
                    timestamp,
                    kind: MetricKind::Cpu,
                    value,
                    unit: MetricUnit::Percent,
                })
            })
            .collect();
        Ok(samples)
    }

    async fn get_storage_usage(&self, id: &str) -> Result<BTreeMap<String, u64>> {
        let native = self.describe_one("get_storage_usage", id).await?;
        let volume_ids: Vec<String> = native
            .block_device_mappings()
            .iter()
            .filter_map(|m| m.ebs())
            .filter_map(|ebs| ebs.volume_id())
            .map(str::to_string)
            .collect();

        let mut usage = BTreeMap::new();
        if volume_ids.is_empty() {
            return Ok(usage);
        }

        let resp = self
            .ec2
            .describe_volumes()
            .set_volume_ids(Some(volume_ids))
            .send()
            .await
            .map_err(|e| map_ec2("get_storage_usage", e))?;
        for volume in resp.volumes() {
            if let (Some(volume_id), Some(size)) = (volume.volume_id(), volume.size()) {
                usage.insert(volume_id.to_string(), size.max(0) as u64);
            }
        }
        Ok(usage)
    }

    async fn get_cost(
        &self,
        range: &TimeRange,
        granularity: CostGranularity,
    ) -> Result<Vec<CostRecord>> {
        let period = DateInterval::builder()
            .start(date_str(range.start))
            .end(date_str(range.end))
            .build()
            .map_err(|e| {
                ProviderError::invalid_argument(ProviderKind::Aws, "get_cost", e.to_string())
            })?;
        let native_granularity = match granularity {
            CostGranularity::Daily => Granularity::Daily,
            CostGranularity::Monthly => Granularity::Monthly,
        };

        let resp = self
            .cost_explorer
            .get_cost_and_usage()
            .time_period(period)
            .granularity(native_granularity)
            .metrics(COST_METRIC)
            .send()
            .await
            .map_err(|e| map_cost_explorer("get_cost", e))?;

        let mut records = Vec::new();
        for result in resp.results_by_time() {
            let Some(interval) = result.time_period() else {
                continue;
            };
            let Some(value) = result.total().and_then(|t| t.get(COST_METRIC)) else {
                continue;
            };
            let amount = value
                .amount()
                .unwrap_or("0")
                .parse::<f64>()
                .map_err(|e| {
                    ProviderError::unavailable(
                        ProviderKind::Aws,
                        "get_cost",
                        format!("unparseable cost amount: {}", e),
                    )
                })?;
            records.push(CostRecord {
                period_start: parse_period(interval.start()),
                period_end: parse_period(interval.end()),
                amount,
                currency: value.unit().unwrap_or("USD").to_string(),
                granularity,
            });
        }
        Ok(records)
    }

    async fn find_instance_by_tag(&self, key: &str, value: &str) -> Result<Option<Instance>> {
        let resp = self
            .ec2
            .describe_instances()
            .filters(
                Filter::builder()
                    .name(format!("tag:{}", key))
                    .values(value)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_ec2("find_instance_by_tag", e))?;

        let found = resp
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .map(|native| self.convert_instance(native))
            .find(|i| i.state != InstanceState::Terminated);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec2_states_map_to_unified_enum() {
        assert_eq!(map_state(Some(&InstanceStateName::Pending)), InstanceState::Pending);
        assert_eq!(map_state(Some(&InstanceStateName::Running)), InstanceState::Running);
        assert_eq!(map_state(Some(&InstanceStateName::Stopping)), InstanceState::Stopped);
        assert_eq!(map_state(Some(&InstanceStateName::Stopped)), InstanceState::Stopped);
        assert_eq!(
            map_state(Some(&InstanceStateName::ShuttingDown)),
            InstanceState::Terminated
        );
        assert_eq!(
            map_state(Some(&InstanceStateName::Terminated)),
            InstanceState::Terminated
        );
        assert_eq!(map_state(None), InstanceState::Unknown);
        // states the SDK has not modeled yet stay in-enum
        assert_eq!(
            map_state(Some(&InstanceStateName::from("hibernating"))),
            InstanceState::Unknown
        );
    }

    #[test]
    fn spec_must_reference_an_ami() {
        let spec = InstanceSpec::new("web", "t3.micro", "ubuntu-22.04", "us-east-1");
        let err = validate_spec(&spec, "us-east-1").unwrap_err();
        assert_eq!(err.kind, skyfleet_cloud::ErrorKind::InvalidArgument);
    }

    #[test]
    fn spec_must_match_adapter_region() {
        let spec = InstanceSpec::new("web", "t3.micro", "ami-123", "eu-west-1");
        let err = validate_spec(&spec, "us-east-1").unwrap_err();
        assert_eq!(err.kind, skyfleet_cloud::ErrorKind::InvalidArgument);
        assert!(validate_spec(
            &InstanceSpec::new("web", "t3.micro", "ami-123", "us-east-1"),
            "us-east-1"
        )
        .is_ok());
    }

    #[test]
    fn cost_period_parsing() {
        let parsed = parse_period("2024-05-01");
        assert_eq!(date_str(parsed), "2024-05-01");
    }
}
