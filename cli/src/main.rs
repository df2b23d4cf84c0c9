use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use opg_core::adapters::probe;
use opg_core::{Config, Registry, SessionController, SessionOptions, get_opg_dir};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "opg")]
#[command(about = "Multi-provider LLM chat for the terminal", long_about = None)]
struct Cli {
    /// Send one message, print the reply, and exit.
    #[arg(short, long)]
    message: Option<String>,

    /// Model to start with instead of the first available one.
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load().context("failed to load configuration")?;
    let mut registry = Registry::from_config(&config);
    probe::refresh_registry(&mut registry).await;

    let options = SessionOptions::from_config(&config);
    let mut session = SessionController::new(registry, options);

    // No usable provider at startup is the one fatal condition.
    let info = session
        .new_conversation(cli.model.as_deref())
        .context("set OPENAI_API_KEY or ANTHROPIC_API_KEY, or start a local server")?;

    if let Some(message) = cli.message {
        return one_shot(&mut session, &message).await;
    }

    println!(
        "{} {} ({}, {} mode)",
        style("opg").bold().cyan(),
        style(&info.model).green(),
        info.provider,
        info.api_mode.as_str()
    );
    println!("Type a message, or /help for commands.\n");

    let history_path = get_opg_dir().join("history");
    let mut editor = DefaultEditor::new()?;
    let _ = editor.load_history(&history_path);

    loop {
        match editor.readline("opg> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(input);

                if commands::is_command(input) {
                    if !commands::execute(commands::parse(input), &mut session) {
                        break;
                    }
                } else {
                    send(&mut session, input).await;
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {e}", style("error:").red().bold());
                break;
            }
        }
    }

    if !get_opg_dir().exists() {
        let _ = std::fs::create_dir_all(get_opg_dir());
    }
    let _ = editor.save_history(&history_path);
    println!("bye");
    Ok(())
}

async fn one_shot(session: &mut SessionController, message: &str) -> Result<()> {
    let reply = session
        .send_message(message)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{reply}");
    Ok(())
}

/// One interactive turn. Ctrl-C abandons the exchange and rolls the
/// conversation back to the last completed turn.
async fn send(session: &mut SessionController, input: &str) {
    let cancelled = tokio::select! {
        result = session.send_message(input) => {
            match result {
                Ok(reply) => println!("\n{reply}\n"),
                Err(e) => eprintln!("{} {e}", style("error:").red().bold()),
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if cancelled {
        session.discard_incomplete_turn();
        eprintln!("\n{}", style("turn cancelled").yellow());
    }
}
