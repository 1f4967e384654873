//! Skyfleet Cloud Abstraction
//!
//! This crate provides the provider abstraction for Skyfleet, enabling
//! lifecycle, telemetry and cost operations against multiple cloud
//! providers through one contract.
//!
//! # Supported Providers
//!
//! - **AWS**: EC2, CloudWatch, Cost Explorer (via the official SDK)
//! - **Google Cloud**: Compute Engine, Cloud Monitoring (REST)
//! - **Azure**: Virtual Machines, Azure Monitor (REST)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Skyfleet CLI                    │
//! │              (skyfleet list/create)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               skyfleet-cloud                     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │              Dispatcher                   │   │
//! │  │  provider → adapter, fan-out, routing     │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────────────┐    │
//! │  │ Retry/Timeout│  │ Telemetry Aggregator │    │
//! │  └──────────────┘  └──────────────────────┘    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait ProviderClient { ... }             │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬───────────────┬───────────────┬─────────┘
//!         │               │               │
//! ┌───────▼──────┐ ┌──────▼───────┐ ┌─────▼────────┐
//! │ aws adapter  │ │ gcp adapter  │ │azure adapter │
//! └──────────────┘ └──────────────┘ └──────────────┘
//! ```

pub mod dispatch;
pub mod error;
pub mod model;
pub mod provider;
pub mod retry;
pub mod telemetry;

// Re-exports
pub use dispatch::{CallOptions, Dispatcher, DispatcherBuilder, FleetSnapshot, ProviderFailure};
pub use error::{ErrorKind, ProviderError, Result};
pub use model::{
    CostGranularity, CostRecord, Instance, InstanceSpec, InstanceState, MetricKind, MetricSample,
    MetricUnit, ProviderKind, TimeRange,
};
pub use provider::ProviderClient;
pub use retry::{RetryPolicy, IDEMPOTENCY_TAG};
pub use telemetry::MetricSeries;
