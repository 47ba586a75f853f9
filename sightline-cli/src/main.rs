//! sightline-cli — command-line client for the Sightline HTTP API
//!
//! # Subcommands
//! - `status`                                       — show server health
//! - `run <prompt-id> <provider> [--json]`          — run one provider
//! - `run-all <prompt-id> [-p <provider>...] [--first-success] [--json]`
//! - `latest <prompt-id> [--json]`                  — latest answer per provider
//! - `insights --org <org-id> [--topic] [--provider] [--json]`
//! - `recompute visibility|rankings|sources`        — trigger an aggregation job

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "sightline-cli", version, about = "Sightline answer analytics CLI")]
struct Cli {
    /// Sightline HTTP server URL (overrides SIGHTLINE_HTTP_URL env var)
    #[arg(long, env = "SIGHTLINE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show Sightline server status
    Status,

    /// Run a prompt against one provider
    Run {
        prompt_id: String,
        /// openai, anthropic or gemini
        provider: String,
        #[arg(long)]
        json: bool,
    },

    /// Run a prompt against several providers concurrently
    RunAll {
        prompt_id: String,
        /// Restrict to these providers (repeatable); defaults to all configured
        #[arg(short, long = "provider")]
        providers: Vec<String>,
        /// Return as soon as one provider succeeds
        #[arg(long)]
        first_success: bool,
        #[arg(long)]
        json: bool,
    },

    /// Show the latest successful answer of each provider
    Latest {
        prompt_id: String,
        #[arg(long)]
        json: bool,
    },

    /// Per-prompt visibility, position and sentiment for an org
    Insights {
        #[arg(long)]
        org: String,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Most-cited domains per provider for a brand
    Sources {
        brand_id: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Latest brand rankings for a provider
    Rankings {
        /// openai, anthropic or gemini
        #[arg(long, default_value = "openai")]
        provider: String,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Daily visibility of a brand per provider
    Trend {
        brand_id: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long)]
        json: bool,
    },

    /// Trigger an aggregation job
    Recompute {
        #[command(subcommand)]
        job: Job,
    },
}

#[derive(Debug, Subcommand)]
enum Job {
    /// Append visibility snapshots
    Visibility,
    /// Append daily brand rankings
    Rankings {
        /// Day to rank (YYYY-MM-DD), defaults to today on the server
        #[arg(long)]
        date: Option<String>,
    },
    /// Append source aggregates
    Sources {
        #[arg(long)]
        window_days: Option<i64>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InsightRow {
    pub prompt_id: String,
    pub text: String,
    pub topic: String,
    pub runs: usize,
    pub visibility_pct: f64,
    pub avg_position: Option<f64>,
    pub sentiment: Option<u32>,
    #[serde(default)]
    pub top_entities: Vec<TopEntity>,
}

#[derive(Debug, Deserialize)]
pub struct TopEntity {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    prompts: Vec<InsightRow>,
}

// ============================================================================
// Formatting
// ============================================================================

/// One-line summary of a run response body (`{run, answer, citations}`).
pub fn format_run_summary(body: &Value) -> String {
    let run = &body["run"];
    let citations = body["citations"].as_array().map(Vec::len).unwrap_or(0);
    format!(
        "{} {} [{}] model={} cost=${:.6} citations={}",
        run["provider"].as_str().unwrap_or("?"),
        run["id"].as_str().unwrap_or("?"),
        run["status"].as_str().unwrap_or("?"),
        run["model"].as_str().unwrap_or("?"),
        run["cost_usd"].as_f64().unwrap_or(0.0),
        citations,
    )
}

/// Table row for one prompt insight.
pub fn format_insight_row(row: &InsightRow) -> String {
    let text: String = row.text.chars().take(48).collect();
    let position = row
        .avg_position
        .map(|p| format!("{:.1}", p))
        .unwrap_or_else(|| "-".to_string());
    let sentiment = row
        .sentiment
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let tops: Vec<&str> = row.top_entities.iter().map(|e| e.name.as_str()).collect();
    format!(
        "{:<48}  {:<12}  {:>6.1}%  pos {:>4}  sent {:>3}  runs {:>3}  {}",
        text,
        row.topic,
        row.visibility_pct,
        position,
        sentiment,
        row.runs,
        tops.join(", ")
    )
}

/// Table row for one ranking snapshot, with movement against the previous day.
pub fn format_ranking_row(row: &Value) -> String {
    let rank = row["rank"].as_i64().unwrap_or(0);
    let movement = match row["prev_rank"].as_i64() {
        Some(prev) if prev > rank => format!("up {}", prev - rank),
        Some(prev) if prev < rank => format!("down {}", rank - prev),
        Some(_) => "same".to_string(),
        None => "new".to_string(),
    };
    format!(
        "{}  #{:<3} {:<24} {:<12} {:>6.1}%  {}",
        row["date"].as_str().unwrap_or("?"),
        rank,
        row["brand_name"].as_str().unwrap_or("?"),
        row["topic"].as_str().unwrap_or(""),
        row["visibility_pct"].as_f64().unwrap_or(0.0),
        movement
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Sends a request and returns the JSON body, exiting on transport or HTTP errors.
fn call(req: reqwest::blocking::RequestBuilder, url: &str) -> anyhow::Result<Value> {
    let resp = match req.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("sightline-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: Value = resp.json().unwrap_or(Value::Null);
    if !status.is_success() {
        let msg = body["error"].as_str().unwrap_or("unknown error");
        eprintln!("sightline-cli: server returned {}: {}", status, msg);
        std::process::exit(1);
    }
    Ok(body)
}

fn print_json(body: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: Value = r.json().unwrap_or_default();
            println!("Sightline server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:            {}", body["store"].as_str().unwrap_or("?"));
            println!("Providers:        {}", body["providers"]);
            println!("Socket:           {}", body["socket"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("sightline-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("sightline-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn do_run(server: &str, prompt_id: &str, provider: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/prompts/{}/run", server, prompt_id);
    let body = call(
        client(180)?.post(&url).json(&serde_json::json!({ "provider": provider })),
        &url,
    )?;
    if json {
        return print_json(&body);
    }
    println!("{}", format_run_summary(&body));
    Ok(())
}

fn do_run_all(
    server: &str,
    prompt_id: &str,
    providers: Vec<String>,
    first_success: bool,
    json: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/prompts/{}/run-all", server, prompt_id);
    let mut req = serde_json::json!({
        "policy": if first_success { "first_success" } else { "all_settled" },
    });
    if !providers.is_empty() {
        req["providers"] = serde_json::json!(providers);
    }
    let body = call(client(300)?.post(&url).json(&req), &url)?;
    if json {
        return print_json(&body);
    }

    for result in body["results"].as_array().into_iter().flatten() {
        if result["status"] == "succeeded" {
            println!("{}", format_run_summary(&result["outcome"]));
        } else {
            println!(
                "{} failed ({}): {}",
                result["provider"].as_str().unwrap_or("?"),
                result["code"].as_str().unwrap_or("?"),
                result["error"].as_str().unwrap_or("")
            );
        }
    }
    for pending in body["pending"].as_array().into_iter().flatten() {
        println!("{} still running", pending.as_str().unwrap_or("?"));
    }
    Ok(())
}

fn do_latest(server: &str, prompt_id: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/prompts/{}/answers/latest", server, prompt_id);
    let body = call(client(30)?.get(&url), &url)?;
    if json {
        return print_json(&body);
    }

    for slot in body["answers"].as_array().into_iter().flatten() {
        let provider = slot["provider"].as_str().unwrap_or("?");
        match slot["answer"]["text"].as_str() {
            Some(text) => {
                println!("== {} ==", provider);
                println!("{}\n", text);
                for c in slot["citations"].as_array().into_iter().flatten() {
                    println!("  [{}] {}", c["rank_hint"], c["url"].as_str().unwrap_or(""));
                }
            }
            None => println!("== {} == (no successful run)", provider),
        }
    }
    Ok(())
}

fn do_insights(
    server: &str,
    org: &str,
    topic: Option<String>,
    provider: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/insights", server);
    let mut query = vec![("org_id", org.to_string())];
    if let Some(t) = topic {
        query.push(("topic", t));
    }
    if let Some(p) = provider {
        query.push(("provider", p));
    }
    let body = call(client(30)?.get(&url).query(&query), &url)?;
    if json {
        return print_json(&body);
    }

    let parsed: InsightsResponse = serde_json::from_value(body)?;
    if parsed.prompts.is_empty() {
        eprintln!("No prompts found for org {}", org);
        return Ok(());
    }
    for row in &parsed.prompts {
        println!("{}", format_insight_row(row));
    }
    Ok(())
}

fn do_sources(server: &str, brand_id: &str, provider: Option<String>, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/brands/{}/sources", server, brand_id);
    let query: Vec<(&str, String)> = provider.map(|p| ("provider", p)).into_iter().collect();
    let body = call(client(30)?.get(&url).query(&query), &url)?;
    if json {
        return print_json(&body);
    }

    let windows = body["sources"].as_array().cloned().unwrap_or_default();
    if windows.is_empty() {
        eprintln!("No source aggregates yet; run `sightline-cli recompute sources` first");
        return Ok(());
    }
    for window in &windows {
        println!(
            "== {} ({} .. {}) ==",
            window["provider"].as_str().unwrap_or("?"),
            window["window_start"].as_str().unwrap_or("?"),
            window["window_end"].as_str().unwrap_or("?"),
        );
        for share in window["shares"].as_array().into_iter().flatten() {
            println!(
                "  {:>5}%  {:<32} {}",
                share["share_pct"],
                share["domain"].as_str().unwrap_or(""),
                share["citations"],
            );
        }
    }
    Ok(())
}

fn do_rankings(server: &str, provider: &str, topic: Option<String>, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/rankings", server);
    let mut query = vec![("provider", provider.to_string())];
    if let Some(t) = topic {
        query.push(("topic", t));
    }
    let body = call(client(30)?.get(&url).query(&query), &url)?;
    if json {
        return print_json(&body);
    }

    let rows = body["rankings"].as_array().cloned().unwrap_or_default();
    if rows.is_empty() {
        eprintln!("No rankings yet for {}", provider);
        return Ok(());
    }
    for row in &rows {
        println!("{}", format_ranking_row(row));
    }
    Ok(())
}

fn do_trend(
    server: &str,
    brand_id: &str,
    provider: Option<String>,
    days: i64,
    json: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/brands/{}/visibility", server, brand_id);
    let mut query = vec![("days", days.to_string())];
    if let Some(p) = provider {
        query.push(("provider", p));
    }
    let body = call(client(30)?.get(&url).query(&query), &url)?;
    if json {
        return print_json(&body);
    }

    println!("{:<12} {:>8} {:>10} {:>8}", "date", "openai", "anthropic", "gemini");
    for point in body["points"].as_array().into_iter().flatten() {
        let cell = |key: &str| point[key].as_f64().map_or("-".to_string(), |v| format!("{:.1}", v));
        println!(
            "{:<12} {:>8} {:>10} {:>8}",
            point["date"].as_str().unwrap_or("?"),
            cell("openai"),
            cell("anthropic"),
            cell("gemini"),
        );
    }
    Ok(())
}

fn do_recompute(server: &str, job: Job) -> anyhow::Result<()> {
    let (path, body) = match job {
        Job::Visibility => ("visibility", serde_json::json!({})),
        Job::Rankings { date } => ("rankings", serde_json::json!({ "date": date })),
        Job::Sources { window_days } => ("sources", serde_json::json!({ "window_days": window_days })),
    };
    let url = format!("{}/jobs/{}", server, path);
    let resp = call(client(600)?.post(&url).json(&body), &url)?;
    println!("{} job: {}", path, resp);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Run {
            prompt_id,
            provider,
            json,
        } => do_run(&server, &prompt_id, &provider, json),
        Commands::RunAll {
            prompt_id,
            providers,
            first_success,
            json,
        } => do_run_all(&server, &prompt_id, providers, first_success, json),
        Commands::Latest { prompt_id, json } => do_latest(&server, &prompt_id, json),
        Commands::Insights {
            org,
            topic,
            provider,
            json,
        } => do_insights(&server, &org, topic, provider, json),
        Commands::Sources {
            brand_id,
            provider,
            json,
        } => do_sources(&server, &brand_id, provider, json),
        Commands::Rankings {
            provider,
            topic,
            json,
        } => do_rankings(&server, &provider, topic, json),
        Commands::Trend {
            brand_id,
            provider,
            days,
            json,
        } => do_trend(&server, &brand_id, provider, days, json),
        Commands::Recompute { job } => do_recompute(&server, job),
    };

    if let Err(e) = result {
        eprintln!("sightline-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(avg_position: Option<f64>, sentiment: Option<u32>) -> InsightRow {
        InsightRow {
            prompt_id: "p".into(),
            text: "What are the best trail running shoes for wide feet in winter?".into(),
            topic: "shoes".into(),
            runs: 4,
            visibility_pct: 75.0,
            avg_position,
            sentiment,
            top_entities: vec![TopEntity {
                name: "Acme".into(),
                kind: "brand".into(),
            }],
        }
    }

    #[test]
    fn test_ranking_row_movement() {
        let row = serde_json::json!({
            "date": "2025-03-02", "rank": 1, "prev_rank": 3,
            "brand_name": "Acme", "topic": "shoes", "visibility_pct": 62.5,
        });
        let line = format_ranking_row(&row);
        assert!(line.starts_with("2025-03-02  #1"));
        assert!(line.contains("62.5%"));
        assert!(line.ends_with("up 2"));

        let fresh = serde_json::json!({"date": "2025-03-02", "rank": 2, "prev_rank": null});
        assert!(format_ranking_row(&fresh).ends_with("new"));
    }

    #[test]
    fn test_run_summary_reads_nested_fields() {
        let body = serde_json::json!({
            "run": {"id": "r1", "provider": "openai", "status": "succeeded", "model": "gpt", "cost_usd": 0.0012},
            "citations": [{}, {}],
        });
        assert_eq!(
            format_run_summary(&body),
            "openai r1 [succeeded] model=gpt cost=$0.001200 citations=2"
        );
    }

    #[test]
    fn test_run_summary_tolerates_missing_fields() {
        let summary = format_run_summary(&serde_json::json!({}));
        assert!(summary.starts_with("? ? [?]"));
        assert!(summary.ends_with("citations=0"));
    }

    #[test]
    fn test_insight_row_truncates_text() {
        let line = format_insight_row(&row(Some(2.25), Some(80)));
        assert!(line.starts_with("What are the best trail running shoes for wide f"));
        assert!(line.contains("75.0%"));
        assert!(line.contains("pos  2.2") || line.contains("pos  2.3"));
        assert!(line.ends_with("Acme"));
    }

    #[test]
    fn test_insight_row_placeholders() {
        let line = format_insight_row(&row(None, None));
        assert!(line.contains("pos    -"));
        assert!(line.contains("sent   -"));
    }

    #[test]
    fn test_insights_response_parses() {
        let raw = r#"{"prompts":[{"prompt_id":"a","text":"t","topic":"x","runs":0,
            "visibility_pct":0.0,"avg_position":null,"sentiment":null,"top_entities":[]}]}"#;
        let parsed: InsightsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.prompts.len(), 1);
        assert!(parsed.prompts[0].avg_position.is_none());
    }
}
