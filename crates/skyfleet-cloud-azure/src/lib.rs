//! Azure provider adapter for Skyfleet
//!
//! Implements the `ProviderClient` trait against the Azure Resource
//! Manager (Microsoft.Compute) and Azure Monitor REST APIs. Instances
//! are addressed by VM name within one subscription/resource group.
//!
//! # Capabilities
//!
//! - VM lifecycle (list, create, start, power off, delete, status)
//! - CPU telemetry via Azure Monitor (`Percentage CPU`)
//! - RAM telemetry via Azure Monitor (`Available Memory Bytes`);
//!   Azure is the one provider with a platform memory metric
//! - Provisioned storage per OS and data disk
//! - Cost is **unsupported** (Cost Management queries are out of
//!   scope) and reported as an explicit error
//!
//! # Requirements
//!
//! - `AZURE_SUBSCRIPTION_ID` and `AZURE_RESOURCE_GROUP` select the scope
//! - `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET` for
//!   the client-credentials token flow; missing credentials surface as
//!   `AuthFailed` on first use
//! - Creating VMs additionally needs `AZURE_NIC_ID`,
//!   `AZURE_ADMIN_USERNAME` and `AZURE_SSH_PUBLIC_KEY`
//!
//! # Example
//!
//! ```ignore
//! use skyfleet_cloud_azure::{AzureAdapter, AzureConfig};
//! use skyfleet_cloud::ProviderClient;
//!
//! let adapter = AzureAdapter::connect(AzureConfig::from_env()?)?;
//! let instances = adapter.list_instances().await?;
//! ```

pub mod adapter;
pub mod error;
pub mod token;

pub use adapter::{AzureAdapter, AzureConfig};
pub use token::TokenCache;
