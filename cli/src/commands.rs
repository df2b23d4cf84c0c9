use console::style;
use opg_core::{ApiMode, PromptScope, ProviderId, Role, SessionController};

/// Slash commands accepted at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Models,
    New { model: Option<String> },
    Clear,
    Prompt { text: String },
    SetDefault { text: String },
    LoadPrompt { path: String },
    ShowPrompt,
    History,
    ChangeModels { provider: String, models: Vec<String> },
    Api { mode: String },
    Quit,
    Invalid { message: String },
}

pub fn is_command(input: &str) -> bool {
    input.trim_start().starts_with('/')
}

pub fn parse(input: &str) -> Command {
    let trimmed = input.trim();
    let mut parts = trimmed[1..].splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let rest = parts.next().map(str::trim).unwrap_or_default();

    match name.as_str() {
        "help" | "h" => Command::Help,
        "models" => Command::Models,
        "new" => Command::New {
            model: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "clear" => Command::Clear,
        "prompt" => {
            if rest.is_empty() {
                Command::Invalid {
                    message: "usage: /prompt <text>".into(),
                }
            } else {
                Command::Prompt {
                    text: rest.to_string(),
                }
            }
        }
        "setdefault" => {
            if rest.is_empty() {
                Command::Invalid {
                    message: "usage: /setdefault <text>".into(),
                }
            } else {
                Command::SetDefault {
                    text: rest.to_string(),
                }
            }
        }
        "loadprompt" => {
            if rest.is_empty() {
                Command::Invalid {
                    message: "usage: /loadprompt <path>".into(),
                }
            } else {
                Command::LoadPrompt {
                    path: rest.to_string(),
                }
            }
        }
        "showprompt" => Command::ShowPrompt,
        "history" => Command::History,
        "changemodels" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            match (args.next().filter(|s| !s.is_empty()), args.next()) {
                (Some(provider), Some(models)) => Command::ChangeModels {
                    provider: provider.to_string(),
                    models: models
                        .split(',')
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect(),
                },
                _ => Command::Invalid {
                    message: "usage: /changemodels <provider> <model1,model2,...>".into(),
                },
            }
        }
        "api" => Command::Api {
            mode: rest.to_lowercase(),
        },
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Invalid {
            message: format!("unknown command: /{other} (try /help)"),
        },
    }
}

/// Runs one command against the session. Returns false when the shell
/// should exit. Errors are printed, never propagated; the session survives
/// every command failure.
pub fn execute(command: Command, session: &mut SessionController) -> bool {
    match command {
        Command::Help => show_help(),
        Command::Models => show_models(session),
        Command::New { model } => match session.new_conversation(model.as_deref()) {
            Ok(info) => println!(
                "new conversation with {} ({})",
                style(&info.model).green(),
                info.provider
            ),
            Err(e) => print_error(&e),
        },
        Command::Clear => match session.clear() {
            Ok(info) => println!("conversation cleared, still on {}", style(&info.model).green()),
            Err(e) => print_error(&e),
        },
        Command::Prompt { text } => match session.set_prompt(&text, PromptScope::Current) {
            Ok(()) => println!("system prompt updated for this conversation"),
            Err(e) => print_error(&e),
        },
        Command::SetDefault { text } => {
            match session.set_prompt(&text, PromptScope::Default) {
                Ok(()) => println!("default system prompt updated for future conversations"),
                Err(e) => print_error(&e),
            }
        }
        Command::LoadPrompt { path } => {
            match session
                .load_prompt(std::path::Path::new(&path))
                .and_then(|text| session.set_prompt(text.trim(), PromptScope::Current))
            {
                Ok(()) => println!("system prompt loaded from {path}"),
                Err(e) => print_error(&e),
            }
        }
        Command::ShowPrompt => match session.current_prompt() {
            Some(prompt) => println!("{prompt}"),
            None => println!("no active conversation"),
        },
        Command::History => show_history(session),
        Command::ChangeModels { provider, models } => match ProviderId::parse(&provider) {
            Some(id) => match session.change_models(id, models) {
                Ok(outcome) => {
                    println!("{} now offers: {}", outcome.provider, outcome.models.join(", "));
                    if let Some(model) = outcome.rebound_to {
                        println!("conversation rebound to {}", style(model).green());
                    } else if outcome.dropped {
                        println!(
                            "{}",
                            style("no model left; start a new conversation with /new").yellow()
                        );
                    }
                }
                Err(e) => print_error(&e),
            },
            None => println!("{} unknown provider: {provider}", style("error:").red()),
        },
        Command::Api { mode } => {
            let mode = match mode.as_str() {
                "stateful" | "responses" => ApiMode::Stateful,
                "stateless" | "chat" => ApiMode::Stateless,
                _ => {
                    println!("usage: /api <stateless|stateful>");
                    return true;
                }
            };
            match session.switch_api_mode(mode) {
                Ok(info) => println!(
                    "fresh {} conversation with {}",
                    info.api_mode.as_str(),
                    style(&info.model).green()
                ),
                Err(e) => print_error(&e),
            }
        }
        Command::Quit => return false,
        Command::Invalid { message } => println!("{message}"),
    }
    true
}

fn print_error(e: &opg_core::OpgError) {
    eprintln!("{} {e}", style("error:").red().bold());
}

fn show_help() {
    println!("{}", style("Commands").bold());
    println!("  /new [model]                     start a new conversation");
    println!("  /clear                           reset the current conversation");
    println!("  /models                          list providers and models");
    println!("  /prompt <text>                   set the system prompt for this conversation");
    println!("  /setdefault <text>               set the default prompt for future conversations");
    println!("  /loadprompt <path>               load the system prompt from a file");
    println!("  /showprompt                      print the active system prompt");
    println!("  /history                         print the conversation transcript");
    println!("  /changemodels <provider> <m,..>  replace a provider's model list");
    println!("  /api <stateless|stateful>        switch the OpenAI API mode (new conversation)");
    println!("  /quit                            exit");
}

fn show_models(session: &SessionController) {
    let active = session.conversation().map(|c| c.model().to_string());
    for listing in session.list_providers() {
        let status = if listing.available {
            style("available").green()
        } else {
            style("unavailable").dim()
        };
        println!("{} [{status}]", style(listing.provider).bold());
        for model in &listing.models {
            let marker = if active.as_deref() == Some(model.as_str()) {
                "*"
            } else {
                " "
            };
            println!("  {marker} {model}");
        }
    }
}

fn show_history(session: &SessionController) {
    let messages = session.history();
    if messages.is_empty() {
        println!("no messages yet");
        return;
    }
    if let Some(conv) = session.conversation() {
        println!(
            "{}",
            style(format!(
                "{} on {}, started {}",
                conv.api_mode().as_str(),
                conv.model(),
                conv.created_at().format("%Y-%m-%d %H:%M")
            ))
            .dim()
        );
    }
    for message in messages {
        let label = match message.role {
            Role::User => style("you").cyan(),
            Role::Assistant => style("assistant").green(),
            Role::ToolResult => style("tool").yellow(),
            Role::System => style("system").dim(),
        };
        println!("{label}: {}", message.content);
    }
}
