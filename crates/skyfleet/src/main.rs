//! Skyfleet CLI: thin glue over the dispatcher.
//!
//! Every subcommand maps 1:1 onto a dispatcher operation. Exit codes:
//! 0 success, 1 provider error, 2 invalid input.

mod output;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use skyfleet_cloud::{
    CallOptions, CostGranularity, Dispatcher, ErrorKind, InstanceSpec, MetricKind, ProviderError,
    ProviderKind, TimeRange,
};
use skyfleet_cloud_aws::AwsAdapter;
use skyfleet_cloud_azure::{AzureAdapter, AzureConfig};
use skyfleet_cloud_gcp::{GcpAdapter, GcpConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "skyfleet")]
#[command(about = "One control plane for compute instances across AWS, GCP and Azure", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Per-call timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List instances for one provider, or the whole fleet
    List {
        /// Provider (aws, gcp, azure); omit to query all configured providers
        #[arg(short, long)]
        provider: Option<ProviderKind>,
    },
    /// Create an instance
    Create {
        #[arg(short, long)]
        provider: ProviderKind,
        /// Instance name
        name: String,
        /// Provider-native machine type (t3.micro, e2-medium, Standard_B1s)
        #[arg(short, long)]
        machine_type: String,
        /// Boot image (AMI id, image family path, or publisher:offer:sku:version)
        #[arg(short, long)]
        image: String,
        /// Region or zone
        #[arg(short, long)]
        location: String,
        /// Boot disk size in GB
        #[arg(long)]
        disk_size_gb: Option<u32>,
        /// Tags as key=value, repeatable
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Idempotency token; a retried command with the same token
        /// never creates a second instance
        #[arg(long)]
        token: Option<String>,
    },
    /// Start an instance
    Start {
        #[arg(short, long)]
        provider: ProviderKind,
        id: String,
    },
    /// Stop an instance
    Stop {
        #[arg(short, long)]
        provider: ProviderKind,
        id: String,
    },
    /// Delete (terminate) an instance
    Delete {
        #[arg(short, long)]
        provider: ProviderKind,
        id: String,
    },
    /// Show the current lifecycle state of an instance
    Status {
        #[arg(short, long)]
        provider: ProviderKind,
        id: String,
    },
    /// Query CPU/RAM telemetry as 5-minute average buckets
    Metric {
        #[arg(short, long)]
        provider: ProviderKind,
        id: String,
        /// cpu, ram or storage
        #[arg(short, long)]
        kind: MetricKind,
        /// Range start, RFC 3339 (default: one hour ago)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Range end, RFC 3339 (default: now)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// Show provisioned storage per disk
    Storage {
        #[arg(short, long)]
        provider: ProviderKind,
        id: String,
    },
    /// Show billed cost for the account scope
    Cost {
        #[arg(short, long)]
        provider: ProviderKind,
        /// Range start, RFC 3339
        #[arg(long)]
        start: DateTime<Utc>,
        /// Range end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(short, long, default_value = "monthly")]
        granularity: CostGranularity,
    },
}

/// Register an adapter for every provider with configuration present.
/// Credential validity is checked lazily, on first use.
async fn build_dispatcher(timeout: Duration) -> Dispatcher {
    let mut builder = Dispatcher::builder().default_options(CallOptions::with_timeout(timeout));

    if let Ok(region) = std::env::var("AWS_REGION").or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
    {
        builder = builder.register(Arc::new(AwsAdapter::connect(region.trim()).await));
    }
    if let Some(config) = GcpConfig::from_env() {
        match GcpAdapter::connect(config) {
            Ok(adapter) => builder = builder.register(Arc::new(adapter)),
            Err(err) => tracing::warn!(%err, "skipping GCP adapter"),
        }
    }
    if let Some(config) = AzureConfig::from_env() {
        match AzureAdapter::connect(config) {
            Ok(adapter) => builder = builder.register(Arc::new(adapter)),
            Err(err) => tracing::warn!(%err, "skipping Azure adapter"),
        }
    }

    builder.build()
}

fn parse_tags(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("tag {:?} is not key=value", entry))
        })
        .collect()
}

fn metric_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> TimeRange {
    let end = end.unwrap_or_else(Utc::now);
    let start = start.unwrap_or(end - chrono::Duration::hours(1));
    TimeRange::new(start, end)
}

async fn run(cli: Cli) -> Result<()> {
    let dispatcher = build_dispatcher(Duration::from_secs(cli.timeout)).await;
    let json = cli.json;

    match cli.command {
        Commands::List { provider: Some(provider) } => {
            let instances = dispatcher.list_instances(provider).await?;
            output::instances(&instances, json);
        }
        Commands::List { provider: None } => {
            let snapshot = dispatcher.list_all_instances().await;
            output::fleet(&snapshot, json);
        }
        Commands::Create {
            provider,
            name,
            machine_type,
            image,
            location,
            disk_size_gb,
            tags,
            token,
        } => {
            let mut spec = InstanceSpec::new(name, machine_type, image, location);
            spec.disk_size_gb = disk_size_gb;
            for (key, value) in parse_tags(&tags)? {
                spec.tags.insert(key, value);
            }
            let instance = dispatcher.create_instance(provider, &spec, token).await?;
            output::instance_created(&instance, json);
        }
        Commands::Start { provider, id } => {
            dispatcher.start_instance(provider, &id).await?;
            output::acted("started", provider, &id, json);
        }
        Commands::Stop { provider, id } => {
            dispatcher.stop_instance(provider, &id).await?;
            output::acted("stopped", provider, &id, json);
        }
        Commands::Delete { provider, id } => {
            dispatcher.delete_instance(provider, &id).await?;
            output::acted("deleted", provider, &id, json);
        }
        Commands::Status { provider, id } => {
            let state = dispatcher.get_status(provider, &id).await?;
            output::status(provider, &id, state, json);
        }
        Commands::Metric {
            provider,
            id,
            kind,
            start,
            end,
        } => {
            let range = metric_range(start, end);
            let series = dispatcher.get_metric(provider, &id, kind, &range).await?;
            output::metric_series(&series, json);
        }
        Commands::Storage { provider, id } => {
            let usage = dispatcher.get_storage_usage(provider, &id).await?;
            output::storage(&usage, json);
        }
        Commands::Cost {
            provider,
            start,
            end,
            granularity,
        } => {
            let range = TimeRange::new(start, end);
            let records = dispatcher.get_cost(provider, &range, granularity).await?;
            output::cost(&records, json);
        }
    }
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ProviderError>() {
        Some(provider_err) if provider_err.kind == ErrorKind::InvalidArgument => 2,
        Some(_) => 1,
        // local input problems (bad tags, bad timestamps)
        None => 2,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        output::failure(&err);
        std::process::exit(exit_code(&err));
    }
}
