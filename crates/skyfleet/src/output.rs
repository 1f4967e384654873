//! Terminal rendering: tables for humans, JSON for scripts.
//!
//! Provider failures show provider, operation and kind; raw SDK
//! payloads stay in the error's source chain and are only visible at
//! debug log level.

use colored::Colorize;
use serde_json::json;
use skyfleet_cloud::{
    CostRecord, FleetSnapshot, Instance, InstanceState, MetricSeries, MetricUnit, ProviderKind,
};
use std::collections::BTreeMap;

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{}", rendered),
        Err(err) => eprintln!("{} cannot render JSON: {}", "error:".red().bold(), err),
    }
}

fn colored_state(state: InstanceState) -> colored::ColoredString {
    let rendered = state.to_string();
    match state {
        InstanceState::Running => rendered.green(),
        InstanceState::Pending => rendered.yellow(),
        InstanceState::Stopped => rendered.yellow(),
        InstanceState::Terminated => rendered.red(),
        InstanceState::Unknown => rendered.dimmed(),
    }
}

fn instance_rows(instances: &[Instance]) {
    println!(
        "{:<24} {:<8} {:<12} {:<16} {}",
        "ID".bold(),
        "PROVIDER".bold(),
        "STATE".bold(),
        "LOCATION".bold(),
        "TYPE".bold()
    );
    for instance in instances {
        println!(
            "{:<24} {:<8} {:<12} {:<16} {}",
            instance.id,
            instance.provider,
            colored_state(instance.state),
            instance.location,
            instance.machine_type
        );
    }
}

pub fn instances(instances: &[Instance], json: bool) {
    if json {
        print_json(&instances);
        return;
    }
    if instances.is_empty() {
        println!("no instances");
        return;
    }
    instance_rows(instances);
}

pub fn fleet(snapshot: &FleetSnapshot, json: bool) {
    if json {
        let failures: Vec<_> = snapshot
            .failures
            .iter()
            .map(|f| {
                json!({
                    "provider": f.provider.as_str(),
                    "operation": f.error.operation,
                    "kind": f.error.kind,
                    "message": f.error.message,
                })
            })
            .collect();
        print_json(&json!({
            "instances": snapshot.instances,
            "failures": failures,
        }));
        return;
    }

    instances(&snapshot.instances, false);
    for failure in &snapshot.failures {
        eprintln!(
            "{} {}: {}",
            "warning:".yellow().bold(),
            failure.provider,
            failure.error
        );
    }
}

pub fn instance_created(instance: &Instance, json: bool) {
    if json {
        print_json(instance);
        return;
    }
    println!(
        "{} {} ({}, {})",
        "created".green().bold(),
        instance.id,
        instance.provider,
        instance.location
    );
}

pub fn acted(verb: &str, provider: ProviderKind, id: &str, json: bool) {
    if json {
        print_json(&json!({ "provider": provider.as_str(), "id": id, "result": verb }));
        return;
    }
    println!("{} {} ({})", verb.green().bold(), id, provider);
}

pub fn status(provider: ProviderKind, id: &str, state: InstanceState, json: bool) {
    if json {
        print_json(&json!({ "provider": provider.as_str(), "id": id, "state": state }));
        return;
    }
    println!("{} ({}): {}", id, provider, colored_state(state));
}

fn unit_suffix(unit: MetricUnit) -> &'static str {
    match unit {
        MetricUnit::Percent => "%",
        MetricUnit::Gigabytes => " GB",
        MetricUnit::Ratio => "",
        MetricUnit::Bytes => " B",
    }
}

pub fn metric_series(series: &MetricSeries, json: bool) {
    if json {
        print_json(series);
        return;
    }
    if series.samples.is_empty() {
        println!("no data points in range");
        return;
    }
    for sample in &series.samples {
        println!(
            "{}  {:>8.2}{}",
            sample.timestamp.format("%Y-%m-%d %H:%M"),
            sample.value,
            unit_suffix(series.unit)
        );
    }
    if series.partial {
        eprintln!(
            "{} some buckets in the range had no data",
            "note:".yellow().bold()
        );
    }
}

pub fn storage(usage: &BTreeMap<String, u64>, json: bool) {
    if json {
        print_json(usage);
        return;
    }
    if usage.is_empty() {
        println!("no disks attached");
        return;
    }
    for (disk, size) in usage {
        println!("{:<40} {:>6} GB", disk, size);
    }
}

pub fn cost(records: &[CostRecord], json: bool) {
    if json {
        print_json(&records);
        return;
    }
    for record in records {
        println!(
            "{} to {}  {:>12.2} {}",
            record.period_start.format("%Y-%m-%d"),
            record.period_end.format("%Y-%m-%d"),
            record.amount,
            record.currency
        );
    }
}

pub fn failure(err: &anyhow::Error) {
    eprintln!("{} {}", "error:".red().bold(), err);
}
