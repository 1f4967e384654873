//! AWS provider adapter for Skyfleet
//!
//! Implements the `ProviderClient` trait on top of the official AWS
//! SDK: EC2 for instance lifecycle and volumes, CloudWatch for CPU
//! telemetry, Cost Explorer for billing.
//!
//! # Capabilities
//!
//! - Instance lifecycle (list, create, start, stop, terminate, status)
//! - CPU utilization via CloudWatch (`AWS/EC2 CPUUtilization`)
//! - Provisioned storage per EBS volume
//! - Account cost via Cost Explorer (`BlendedCost`)
//! - RAM telemetry is **unsupported**: EC2 publishes no memory metric
//!   without a guest agent, and that absence is reported as an
//!   explicit error rather than an empty series
//!
//! # Requirements
//!
//! Credentials come from the standard AWS credential chain (env vars,
//! shared config, instance profile). Missing credentials surface as
//! `AuthFailed` on the first call, not at construction.
//!
//! # Example
//!
//! ```ignore
//! use skyfleet_cloud_aws::AwsAdapter;
//! use skyfleet_cloud::ProviderClient;
//!
//! let adapter = AwsAdapter::connect("us-east-1".to_string()).await;
//! let instances = adapter.list_instances().await?;
//! ```

pub mod adapter;
pub mod error;

pub use adapter::AwsAdapter;
