//! Interactive chat loop.

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use tracing::debug;

use llm_switchboard::Dispatcher;

use crate::{bench, helpers};

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["/quit", "/exit", "exit", "quit", "bye"];

#[derive(Debug, PartialEq, Eq)]
enum Directive {
    Switch(String),
    Providers,
    Config,
    Benchmark,
    Quit,
    Help,
    Unknown(String),
}

/// Parses `/`-prefixed directives; anything else is a prompt.
fn parse_directive(input: &str) -> Option<Directive> {
    if EXIT_COMMANDS.contains(&input.to_lowercase().as_str()) {
        return Some(Directive::Quit);
    }
    if let Some(provider) = input.strip_prefix("switch:") {
        return Some(Directive::Switch(provider.trim().to_string()));
    }
    let rest = input.strip_prefix('/')?;
    let (command, argument) = match rest.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (rest, ""),
    };
    Some(match command.to_lowercase().as_str() {
        "switch" if !argument.is_empty() => Directive::Switch(argument.to_string()),
        "providers" => Directive::Providers,
        "config" => Directive::Config,
        "benchmark" => Directive::Benchmark,
        "help" => Directive::Help,
        _ => Directive::Unknown(input.to_string()),
    })
}

fn print_help() {
    println!("Commands:");
    println!("  /switch <provider>  use another provider");
    println!("  /providers          list providers and credential status");
    println!("  /config             show the current provider's settings");
    println!("  /benchmark          benchmark providers with credentials");
    println!("  /quit               leave (also /exit)");
}

fn print_providers(dispatcher: &Dispatcher) {
    for id in dispatcher.provider_ids() {
        let marker = if id == dispatcher.current_provider() { "*" } else { " " };
        let status = if dispatcher.store().has_credential(&id) {
            "ready"
        } else {
            "no credential"
        };
        println!(
            "{marker} {id:<14} {:<14} {status}",
            helpers::provider_label(dispatcher, &id)
        );
    }
}

fn print_config(dispatcher: &Dispatcher) {
    match dispatcher.current_config() {
        Ok(config) => match serde_json::to_string_pretty(config) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("failed to render configuration: {err}"),
        },
        Err(err) => eprintln!("{err}"),
    }
}

/// Run the interactive REPL loop.
pub async fn run(mut dispatcher: Dispatcher) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    helpers::print_provider(&dispatcher);
    println!("Type /help for commands, /quit to leave.");

    loop {
        let input = match editor.readline("\nYou: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Input error: {err}");
                break;
            }
        };
        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(trimmed);

        match parse_directive(trimmed) {
            Some(Directive::Quit) => {
                println!("Goodbye!");
                break;
            }
            Some(Directive::Switch(provider)) => match dispatcher.switch_provider(&provider) {
                Ok(()) => helpers::print_provider(&dispatcher),
                Err(err) => eprintln!("Error switching provider: {err}"),
            },
            Some(Directive::Providers) => print_providers(&dispatcher),
            Some(Directive::Config) => print_config(&dispatcher),
            Some(Directive::Benchmark) => {
                if let Err(err) = bench::run(&dispatcher, &[], Vec::new(), None).await {
                    eprintln!("Benchmark failed: {err:#}");
                }
            }
            Some(Directive::Help) => print_help(),
            Some(Directive::Unknown(command)) => {
                eprintln!("Unknown command: {command} (try /help)");
            }
            None => {
                debug!(provider = dispatcher.current_provider(), "sending prompt");
                print!("\nAI: ");
                if let Err(err) = helpers::print_stream(&dispatcher, trimmed, None).await {
                    println!();
                    eprintln!("{}", helpers::describe_error(&dispatcher, &err));
                }
            }
        }
    }

    Ok(())
}
