/// Command parsing for bot messages delivered by the chat front end.
use std::fmt;

/// Handles supplied with a `/register` command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterOptions {
    /// GitLab handle (e.g. "alice").
    pub gitlab: Option<String>,
    /// Jira handle (e.g. "alice").
    pub jira: Option<String>,
}

/// A parsed bot command from a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Greeting and usage pointer.
    Start,
    /// Join the chat's review rotation.
    Register(RegisterOptions),
    /// Leave the rotation entirely.
    Unregister,
    /// Request a review for a merge request link.
    Review { link: String },
    /// Finish the caller's current review and rejoin the queue.
    EndReview,
    /// Show the rotation in fairness order.
    Queue,
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Register(opts) => {
                write!(f, "register")?;
                if let Some(gitlab) = &opts.gitlab {
                    write!(f, " gitlab:{}", gitlab)?;
                }
                if let Some(jira) = &opts.jira {
                    write!(f, " jira:{}", jira)?;
                }
                Ok(())
            }
            Self::Unregister => write!(f, "unregister"),
            Self::Review { link } => write!(f, "review {}", link),
            Self::EndReview => write!(f, "end_review"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Result of parsing a message for bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// The message is not addressed to the bot.
    NotACommand,
    /// A slash command the bot doesn't know.
    UnrecognizedCommand {
        /// The unrecognized command text that was attempted.
        attempted: String,
    },
    /// A valid command was found.
    Command(BotCommand),
}

/// Parse `key:value` options from a space-separated string.
///
/// Unrecognized keys are ignored (for forward compatibility). Empty values
/// (e.g. `gitlab:` without a value) are ignored.
fn parse_register_options(options_str: &str) -> RegisterOptions {
    let mut opts = RegisterOptions::default();

    for token in options_str.split_whitespace() {
        if let Some((key, value)) = token.split_once(':') {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            // Only lowercase the key for comparison, preserve value case.
            match key.to_lowercase().as_str() {
                "gitlab" => opts.gitlab = Some(value.to_string()),
                "jira" => opts.jira = Some(value.to_string()),
                _ => {}
            }
        }
    }

    opts
}

/// Parse a chat message into a bot command.
///
/// Commands start with `/`; Telegram group chats may address them as
/// `/command@botname`, so a `@...` suffix on the command word is stripped.
pub fn parse_message(text: &str) -> ParseResult {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return ParseResult::NotACommand;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let word = parts.next().unwrap_or_default();
    let args = parts.next().unwrap_or("").trim();

    let command = word[1..]
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match command.as_str() {
        "start" => ParseResult::Command(BotCommand::Start),
        "register" => ParseResult::Command(BotCommand::Register(parse_register_options(args))),
        "unregister" => ParseResult::Command(BotCommand::Unregister),
        "review" => ParseResult::Command(BotCommand::Review {
            link: args.split_whitespace().next().unwrap_or("").to_string(),
        }),
        "end_review" | "endreview" => ParseResult::Command(BotCommand::EndReview),
        "queue" => ParseResult::Command(BotCommand::Queue),
        _ => ParseResult::UnrecognizedCommand {
            attempted: command,
        },
    }
}
