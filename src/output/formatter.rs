use colored::Colorize;
use serde_json::Value;

use crate::state::models::{ProviderRecord, ResourceRecord, TaskRecord};
use crate::sync::cycle::CycleReport;

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg.red());
}

fn color_status(status: &str) -> String {
    match status {
        "ready" | "available" | "active" | "connected" | "done" => status.green().to_string(),
        s if s.ends_with("failed") || s == "killed" || s == "disconnected" => s.red().to_string(),
        "deleting" | "deleted" | "cancelled" => status.dimmed().to_string(),
        "" => "-".dimmed().to_string(),
        s => s.yellow().to_string(),
    }
}

/// Columns shown for records in table and csv listings.
pub fn summary_row(record: &Value) -> Value {
    let pick = |key: &str| record.get(key).cloned().unwrap_or(Value::Null);
    serde_json::json!({
        "id": pick("id"),
        "name": pick("name"),
        "status": pick("status"),
        "enabled": pick("enabled"),
        "external_id": pick("external_id"),
        "manager_id": pick("manager_id"),
        "region_id": pick("region_id"),
    })
}

/// Print detailed record state.
pub fn print_record_detail(record: &ResourceRecord) {
    println!();
    println!("{} {}", "Resource:".bold().cyan(), record.reference().bold());
    println!("{}", "─".repeat(60));
    println!("  {:<18} {}", "Name:".bold(), record.name);
    println!("  {:<18} {}", "Status:".bold(), color_status(&record.status));
    if !record.status_reason.is_empty() {
        println!("  {:<18} {}", "Reason:".bold(), record.status_reason.dimmed());
    }
    println!("  {:<18} {}", "Enabled:".bold(), record.enabled);
    println!("  {:<18} {}", "Owner:".bold(), owner(record));
    if let Some(ref manager) = record.manager_id {
        println!("  {:<18} {}", "Provider:".bold(), manager);
    }
    if !record.external_id.is_empty() {
        println!("  {:<18} {}", "External Id:".bold(), record.external_id);
    }
    if let Some(ref region) = record.region_id {
        println!("  {:<18} {}", "Region:".bold(), region);
    }
    if let Some(ref parent) = record.parent_id {
        println!("  {:<18} {}", "Parent:".bold(), parent);
    }
    println!("  {:<18} {}", "Created:".bold(), record.created_at);
    println!("  {:<18} {}", "Updated:".bold(), record.updated_at);
    if let Some(ref synced) = record.last_sync_at {
        println!("  {:<18} {}", "Last Sync:".bold(), synced);
    }

    if !record.attributes.is_empty() {
        println!();
        println!("  {}:", "Attributes".bold());
        for (key, value) in &record.attributes {
            println!("    {:<20} = {}", key, format_value_short(value));
        }
    }

    println!("{}", "─".repeat(60));
    println!();
}

fn owner(record: &ResourceRecord) -> String {
    if record.project_id.is_empty() {
        record.domain_id.clone()
    } else {
        format!("{}/{} ({})", record.domain_id, record.project_id, record.project_src)
    }
}

pub fn print_providers(providers: &[ProviderRecord]) {
    if providers.is_empty() {
        println!("{}", "No providers registered.".dimmed());
        return;
    }

    println!();
    println!("{}", "Providers".bold().cyan());
    println!("{}", "─".repeat(80));
    println!(
        "  {:<20} {:<12} {:<14} {:<10} {}",
        "NAME".bold(),
        "BRAND".bold(),
        "STATUS".bold(),
        "SYNC".bold(),
        "LAST SYNC".bold()
    );
    println!("{}", "─".repeat(80));
    for provider in providers {
        let name = if provider.enabled {
            provider.name.normal()
        } else {
            provider.name.dimmed()
        };
        println!(
            "  {:<20} {:<12} {:<14} {:<10} {}",
            name,
            provider.brand,
            color_status(&provider.status),
            provider.sync_status,
            provider.last_sync_end_at.as_deref().unwrap_or("-").dimmed()
        );
    }
    println!();
}

pub fn print_tasks(tasks: &[TaskRecord]) {
    if tasks.is_empty() {
        println!("{}", "No tasks.".dimmed());
        return;
    }

    println!();
    println!(
        "  {:<38} {:<26} {:<28} {:<12} {}",
        "ID".bold(),
        "KIND".bold(),
        "TARGET".bold(),
        "STATUS".bold(),
        "STAGE".bold()
    );
    println!("{}", "─".repeat(120));
    for task in tasks {
        println!(
            "  {:<38} {:<26} {:<28} {:<12} {}",
            task.id.dimmed(),
            task.kind,
            format!("{}/{}", task.obj_class, task.obj_name),
            color_status(&task.status),
            task.stage
        );
        for reason in &task.failed_reasons {
            println!("      {} {}", "✗".red(), reason);
        }
    }
    println!();
    println!("  {} task(s).", tasks.len());
    println!();
}

pub fn print_cycle_report(report: &CycleReport) {
    if let Some(ref reason) = report.skipped {
        println!("{} {} skipped: {}", "→".blue(), report.provider.bold(), reason.dimmed());
        return;
    }
    println!();
    println!("{} {}", "Sync:".bold().cyan(), report.provider.bold());
    println!("{}", "─".repeat(60));
    for (class, result) in &report.classes {
        if result.added + result.updated + result.deleted + result.errors() == 0 {
            continue;
        }
        println!("  {:<28} {}", class, result);
    }
    println!("{}", "─".repeat(60));
    let total = report.total.to_string();
    if report.total.errors() > 0 {
        println!("  {}", total.yellow());
    } else {
        println!("  {}", total.green());
    }
    println!();
}

fn format_value_short(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Null => "null".dimmed().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(arr) => {
            if arr.is_empty() {
                "[]".to_string()
            } else if arr.len() <= 4 && arr.iter().all(|v| matches!(v, Value::String(_))) {
                let items: Vec<String> = arr.iter().map(format_value_short).collect();
                format!("[{}]", items.join(", "))
            } else {
                format!("[...{} items]", arr.len())
            }
        }
        Value::Object(obj) => {
            if obj.is_empty() {
                "{}".to_string()
            } else {
                format!("{{...{} keys}}", obj.len())
            }
        }
    }
}
