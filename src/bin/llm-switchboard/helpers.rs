//! Output helpers shared by the commands.

use std::io::Write;

use futures_util::StreamExt;

use llm_switchboard::{Dispatcher, GenerationResult, LLMError};

/// Vendor display name for `provider_id`, falling back to the id itself.
pub fn provider_label<'a>(dispatcher: &'a Dispatcher, provider_id: &'a str) -> &'a str {
    dispatcher
        .settings()
        .models
        .get(provider_id)
        .map(|config| config.kind.display_name())
        .unwrap_or(provider_id)
}

/// `Error with <Provider>: <message>`.
pub fn describe_error(dispatcher: &Dispatcher, err: &LLMError) -> String {
    let provider = err.provider().unwrap_or(dispatcher.current_provider());
    format!(
        "Error with {}: {}",
        provider_label(dispatcher, provider),
        err.message()
    )
}

pub fn print_provider(dispatcher: &Dispatcher) {
    let provider = dispatcher.current_provider();
    let model = dispatcher
        .current_config()
        .map(|config| config.model.as_str())
        .unwrap_or("unknown");
    println!("{} ({provider}) · {model}", provider_label(dispatcher, provider));
}

pub fn print_result(result: &GenerationResult) {
    println!("{}", result.text);
    let mut footer = format!(
        "[{:.2}s, {} chars",
        result.latency.as_secs_f64(),
        result.text.chars().count()
    );
    if let Some(total) = result.usage.as_ref().and_then(|usage| usage.total_tokens) {
        footer.push_str(&format!(", {total} tokens"));
    }
    footer.push(']');
    println!("{footer}");
}

/// Streams the current provider's answer to stdout and returns the full text.
pub async fn print_stream(
    dispatcher: &Dispatcher,
    prompt: &str,
    system_prompt: Option<&str>,
) -> Result<String, LLMError> {
    let started = std::time::Instant::now();
    let mut chunks = dispatcher.stream_response(prompt, system_prompt, None).await?;
    let mut full = String::new();
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        print!("{}", chunk.text);
        let _ = stdout.flush();
        full.push_str(&chunk.text);
    }
    println!();
    println!(
        "[{:.2}s, {} chars]",
        started.elapsed().as_secs_f64(),
        full.chars().count()
    );
    Ok(full)
}
