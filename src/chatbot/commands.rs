//! `!`-prefixed chat commands.

use tracing::{error, info};

use crate::chatbot::database::{Database, StoreError};
use crate::chatbot::prompts;
use crate::chatbot::reply;
use crate::chatbot::settings::{self, ConfigParam, GenerationParams};

pub const COMMAND_PREFIX: char = '!';

pub const HELP_TEXT: &str = "Available commands:\n\
!reset - Clear the conversation history\n\
!prompt set <name> <text> - Define a new system instruction\n\
!prompt get <name> - Show a system instruction\n\
!prompt list - List all system instructions\n\
!prompt use <name> - Use a system instruction in this chat\n\
!prompt clear - Stop using the active system instruction\n\
!config set <param> <value> - Set a generation parameter (temperature, topK, topP, maxOutputTokens)\n\
!config get [param] - Show the current configuration\n\
!help - Show this help message";

const UNKNOWN_COMMAND: &str = "Unknown command. Use !help to see the available commands.";

/// A parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset,
    Help,
    PromptSet { name: String, text: String },
    PromptGet { name: String },
    PromptList,
    PromptUse { name: String },
    PromptClear,
    ConfigSet { param: String, value: String },
    ConfigGet { param: Option<String> },
    /// Recognized command with missing arguments; carries the usage line.
    Usage(&'static str),
    UnknownSubcommand(&'static str),
    Unknown,
}

/// True if the body should be handled as a command.
pub fn is_command(body: &str) -> bool {
    body.trim_start().starts_with(COMMAND_PREFIX)
}

/// Split `!command sub args...` into a command.
pub fn parse(body: &str) -> Command {
    let body = body.trim_start();
    let Some(rest) = body.strip_prefix(COMMAND_PREFIX) else {
        return Command::Unknown;
    };

    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or("").to_lowercase();
    let sub = words.next().map(str::to_lowercase);
    let args: Vec<&str> = words.collect();

    match command.as_str() {
        "reset" => Command::Reset,
        "help" => Command::Help,
        "prompt" => match sub.as_deref() {
            Some("set") => match args.split_first() {
                Some((name, text)) if !text.is_empty() => Command::PromptSet {
                    name: name.to_string(),
                    text: text.join(" "),
                },
                _ => Command::Usage("Usage: !prompt set <name> <text>"),
            },
            Some("get") => match args.first() {
                Some(name) => Command::PromptGet { name: name.to_string() },
                None => Command::Usage("Usage: !prompt get <name>"),
            },
            Some("list") => Command::PromptList,
            Some("use") => match args.first() {
                Some(name) => Command::PromptUse { name: name.to_string() },
                None => Command::Usage("Usage: !prompt use <name>"),
            },
            Some("clear") => Command::PromptClear,
            _ => Command::UnknownSubcommand("prompt"),
        },
        "config" => match sub.as_deref() {
            Some("set") => match args.as_slice() {
                [param, value, ..] => Command::ConfigSet {
                    param: param.to_string(),
                    value: value.to_string(),
                },
                _ => Command::Usage("Usage: !config set <param> <value>"),
            },
            Some("get") => Command::ConfigGet {
                param: args.first().map(|p| p.to_string()),
            },
            _ => Command::UnknownSubcommand("config"),
        },
        _ => Command::Unknown,
    }
}

/// Everything a command needs besides the store.
pub struct CommandContext<'a> {
    pub db: &'a Database,
    pub chat_id: i64,
    pub defaults: &'a GenerationParams,
    pub default_bot_name: &'a str,
}

/// Run a parsed command, returning the reply text. Never fails.
pub fn handle_command(ctx: &CommandContext<'_>, command: Command) -> String {
    info!("⚙️ Command in chat {}: {:?}", ctx.chat_id, command);
    match execute(ctx, command) {
        Ok(reply) => reply,
        Err(e) => {
            error!("Command failed in chat {}: {}", ctx.chat_id, e);
            reply::COMMAND_FAILED.to_string()
        }
    }
}

fn execute(ctx: &CommandContext<'_>, command: Command) -> Result<String, StoreError> {
    let db = ctx.db;
    let chat_id = ctx.chat_id;

    let reply = match command {
        Command::Reset => {
            db.reset_history(chat_id)?;
            "🤖 Chat history reset".to_string()
        }
        Command::Help => HELP_TEXT.to_string(),
        Command::PromptSet { name, text } => {
            prompts::set(db, chat_id, &name, &text)?;
            format!("System instruction \"{name}\" set successfully.")
        }
        Command::PromptGet { name } => match prompts::get(db, chat_id, &name)? {
            Some(prompt) => format!("System instruction \"{name}\":\n{}", prompt.text),
            None => format!("System instruction \"{name}\" not found."),
        },
        Command::PromptList => {
            let names: Vec<String> = prompts::list(db, chat_id)?.into_iter().map(|p| p.name).collect();
            if names.is_empty() {
                "No system instructions defined.".to_string()
            } else {
                format!("Available system instructions: {}", names.join(", "))
            }
        }
        Command::PromptUse { name } => {
            if prompts::activate(db, chat_id, &name)? {
                format!("System instruction \"{name}\" activated for this chat.")
            } else {
                format!("System instruction \"{name}\" not found.")
            }
        }
        Command::PromptClear => {
            prompts::deactivate(db, chat_id)?;
            "System instruction removed. Using the default model.".to_string()
        }
        Command::ConfigSet { param, value } => match settings::parse_setting(&param, &value) {
            Ok((param, value)) => {
                settings::set_param(db, chat_id, param, value)?;
                format!("Parameter {} set to {}", param.name(), value)
            }
            Err(msg) => msg,
        },
        Command::ConfigGet { param } => {
            let effective = settings::resolve(db, chat_id, ctx.defaults, ctx.default_bot_name)?;
            match param {
                Some(name) => match ConfigParam::parse(&name) {
                    Some(p) => format!("{}: {}", p.name(), effective.params.get(p)),
                    None => format!("Unknown parameter: {name}"),
                },
                None => {
                    let mut lines: Vec<String> = ConfigParam::ALL
                        .iter()
                        .map(|p| format!("{}: {}", p.name(), effective.params.get(*p)))
                        .collect();
                    if let Some(ref prompt) = effective.active_prompt {
                        lines.push(format!("activePrompt: {prompt}"));
                    }
                    format!("Current configuration:\n{}", lines.join("\n"))
                }
            }
        }
        Command::Usage(usage) => usage.to_string(),
        Command::UnknownSubcommand(command) => {
            format!("Unknown {command} subcommand. Use !help to see the available commands.")
        }
        Command::Unknown => UNKNOWN_COMMAND.to_string(),
    };
    Ok(reply)
}
