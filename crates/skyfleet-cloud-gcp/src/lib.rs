//! Google Cloud provider adapter for Skyfleet
//!
//! Implements the `ProviderClient` trait against the Compute Engine
//! v1 and Cloud Monitoring v3 REST APIs. Instances are addressed by
//! name within one project/zone, matching how the Compute API itself
//! addresses them.
//!
//! # Capabilities
//!
//! - Instance lifecycle (list, create, start, stop, delete, status)
//! - CPU utilization via Cloud Monitoring
//!   (`compute.googleapis.com/instance/cpu/utilization`)
//! - Provisioned storage per attached disk
//! - RAM telemetry and cost are **unsupported**: RAM needs the ops
//!   agent and billing needs a BigQuery export; both absences are
//!   explicit errors, never empty data
//!
//! # Requirements
//!
//! - `GCP_PROJECT` and `GCP_ZONE` select the scope
//! - A bearer token from `GCP_ACCESS_TOKEN`, `GCP_ACCESS_TOKEN_FILE`,
//!   or (on GCE) the metadata server. Missing/expired tokens surface
//!   as `AuthFailed` on first use.
//!
//! # Example
//!
//! ```ignore
//! use skyfleet_cloud_gcp::{GcpAdapter, GcpConfig};
//! use skyfleet_cloud::ProviderClient;
//!
//! let adapter = GcpAdapter::connect(GcpConfig::from_env()?)?;
//! let instances = adapter.list_instances().await?;
//! ```

pub mod adapter;
pub mod error;
pub mod token;

pub use adapter::{GcpAdapter, GcpConfig};
pub use token::TokenSource;
