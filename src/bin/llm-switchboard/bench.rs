//! `benchmark` and `compare` commands.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use tracing::info;

use llm_switchboard::benchmark::ProviderSummary;
use llm_switchboard::{BenchmarkReport, Dispatcher, GenerationRequest, LLMError};

use crate::helpers;

const DEFAULT_PROMPTS: &[&str] = &[
    "Explain the concept of machine learning in 3 sentences.",
    "What are the key differences between Python and JavaScript?",
    "Write a short poem about technology and nature.",
    "Summarize the impact of artificial intelligence on healthcare.",
    "How would you explain quantum computing to a 10-year-old?",
];

/// Requested providers that have credentials, or every provider with
/// credentials when none were requested.
fn select_providers(dispatcher: &Dispatcher, requested: &[String]) -> Result<Vec<String>> {
    let available: Vec<String> = dispatcher
        .provider_ids()
        .into_iter()
        .filter(|id| dispatcher.store().has_credential(id))
        .collect();
    if available.is_empty() {
        bail!("no provider has a credential; set at least one API key (for example OPENAI_API_KEY)");
    }
    if requested.is_empty() {
        return Ok(available);
    }
    let mut selected = Vec::new();
    for id in requested {
        if available.contains(id) {
            selected.push(id.clone());
        } else {
            eprintln!("Skipping {id}: unknown provider or missing credential");
        }
    }
    if selected.is_empty() {
        bail!("none of the requested providers can be used");
    }
    Ok(selected)
}

fn default_report_path() -> PathBuf {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    PathBuf::from(format!("benchmark_results_{seconds}.json"))
}

fn summary_row(summary: &ProviderSummary) -> String {
    let model: String = summary.model.chars().take(30).collect();
    let latency = summary
        .average_latency_ms
        .map(|ms| format!("{:.2}s", ms / 1000.0))
        .unwrap_or_else(|| "-".to_string());
    let characters = summary
        .average_characters
        .map(|chars| format!("{chars:.0}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<14} {:<30} {:<10} {:<10} {}/{}",
        summary.provider_id, model, latency, characters, summary.successes, summary.attempts
    )
}

pub fn print_summary(report: &BenchmarkReport) {
    println!(
        "{:<14} {:<30} {:<10} {:<10} Success",
        "Provider", "Model", "Avg time", "Avg chars"
    );
    println!("{}", "-".repeat(76));
    for summary in &report.summaries {
        println!("{}", summary_row(summary));
    }
}

pub async fn run(
    dispatcher: &Dispatcher,
    providers: &[String],
    prompts: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let providers = select_providers(dispatcher, providers)?;
    let prompts = if prompts.is_empty() {
        DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect()
    } else {
        prompts
    };
    println!(
        "Benchmarking {} with {} prompt(s)",
        providers.join(", "),
        prompts.len()
    );

    let report = dispatcher.benchmark(&providers, &prompts).await;
    let path = output.unwrap_or_else(default_report_path);
    let json = report.to_json_pretty().context("failed to serialize report")?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), entries = report.len(), "benchmark report saved");

    println!();
    print_summary(&report);
    println!("\nFull results saved to {}", path.display());
    Ok(())
}

pub async fn compare(
    dispatcher: &Dispatcher,
    providers: &[String],
    prompt: &str,
    system_prompt: Option<&str>,
) -> Result<()> {
    let providers = select_providers(dispatcher, providers)?;
    let system_prompt = system_prompt.unwrap_or(&dispatcher.settings().system_prompt);
    println!("Prompt: {prompt}");
    println!("System: {system_prompt}");

    for provider in &providers {
        println!("\n== {} ({provider})", helpers::provider_label(dispatcher, provider));
        let request = GenerationRequest::new(prompt).with_system_prompt(system_prompt);
        let outcome = match dispatcher.adapter_for(provider).await {
            Ok(adapter) => adapter.generate(request).await.map_err(LLMError::from),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(result) => helpers::print_result(&result),
            Err(err) => eprintln!("{}", helpers::describe_error(dispatcher, &err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_row_marks_missing_averages() {
        let row = summary_row(&ProviderSummary {
            provider_id: "groq".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            attempts: 2,
            successes: 0,
            average_latency_ms: None,
            average_characters: None,
        });
        assert!(row.starts_with("groq"));
        assert!(row.ends_with("0/2"));
        assert!(row.contains(" - "));
    }

    #[test]
    fn report_path_is_timestamped() {
        let path = default_report_path();
        let name = path.to_string_lossy();
        assert!(name.starts_with("benchmark_results_"));
        assert!(name.ends_with(".json"));
    }
}
