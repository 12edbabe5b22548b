//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    running: bool,
    seconds_since_last_commit: Option<u64>,
    #[serde(default)]
    uncommitted_partitions: usize,
    components: BTreeMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str, metrics_url: &str) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => print_health_status(&health, status_code.as_u16()),
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the k2s sync service running?");
            println!("Start it with: k2s sync --config <path-to-config>");
            return Ok(());
        }
    }

    let metrics_url = format!("{}/metrics", metrics_url.trim_end_matches('/'));
    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => println!("Failed to fetch metrics: {}", e),
    }

    Ok(())
}

fn status_tag(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_tag(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    println!("Stream loop running: {}", health.running);
    match health.seconds_since_last_commit {
        Some(secs) => println!("Last commit: {}s ago", secs),
        None => println!("Last commit: never"),
    }
    println!("Partitions with uncommitted progress: {}", health.uncommitted_partitions);
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let tag = status_tag(&status.status);
            match &status.message {
                Some(msg) => println!("  {} {}: {} ({})", tag, name, status.status, msg),
                None => println!("  {} {}: {}", tag, name, status.status),
            }
        }
    }
}

/// Parse `name value` and `name{labels} value` sample lines.
fn parse_samples(metrics_text: &str) -> HashMap<&str, f64> {
    metrics_text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.is_empty())
        .filter_map(|line| {
            let (name, value) = line.rsplit_once(' ')?;
            Some((name, value.parse::<f64>().ok()?))
        })
        .collect()
}

fn print_metrics(metrics_text: &str) {
    let values = parse_samples(metrics_text);

    let rows = [
        ("Messages Consumed", "k2s_messages_total"),
        ("Created", "k2s_reconcile_actions_total{action=\"created\"}"),
        ("Updated", "k2s_reconcile_actions_total{action=\"updated\"}"),
        ("Skipped", "k2s_reconcile_actions_total{action=\"skipped\"}"),
        ("Failed", "k2s_reconcile_actions_total{action=\"failed\"}"),
        ("Decode Errors", "k2s_decode_errors_total"),
        ("Commits", "k2s_commits_total"),
        ("Commit Failures", "k2s_commit_failures_total"),
        ("Poll Errors", "k2s_poll_errors_total"),
        ("Rewinds", "k2s_rewinds_total"),
    ];

    let mut printed = false;
    for (label, name) in rows {
        if let Some(v) = values.get(name) {
            println!("{:<18} {}", format!("{}:", label), format_number(*v as u64));
            printed = true;
        }
    }

    if !printed {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_samples_with_labels() {
        let text = "# TYPE k2s_messages_total counter\n\
                    k2s_messages_total 12\n\
                    k2s_reconcile_actions_total{action=\"created\"} 3\n";
        let values = parse_samples(text);
        assert_eq!(values.get("k2s_messages_total"), Some(&12.0));
        assert_eq!(
            values.get("k2s_reconcile_actions_total{action=\"created\"}"),
            Some(&3.0)
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
    }

    #[test]
    fn test_health_response_deserializes() {
        let body = r#"{"status":"degraded","running":true,"uncommitted_partitions":1,
            "components":{"store":{"status":"degraded","message":"503"},"log":{"status":"healthy"}}}"#;
        let health: HealthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(health.status, "degraded");
        assert!(health.seconds_since_last_commit.is_none());
        assert_eq!(health.components["store"].message.as_deref(), Some("503"));
    }
}
