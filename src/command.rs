//! Text command grammar.
//!
//! Each workbook row names one command. Names map to a closed set of
//! [`CommandKind`]s through a table built once on first use; the argument (the
//! cell value in a chat column) is then parsed into a typed [`Command`].
//! Only [`Command::Complete`] reaches the remote API; every other command just
//! edits local conversation state.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use thiserror::Error;

/// Argument strings that stand for "no value".
const NONE_STRINGS: &[&str] = &["\\", "\\none"];

/// Separators accepted between a command name and its argument.
const NAME_ARGUMENT_SEPS: &[char] = &['=', ' ', ':'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("command '{0}' requires an argument")]
    MissingArgument(&'static str),

    #[error("command '{0}' takes no argument")]
    UnexpectedArgument(&'static str),

    #[error("invalid argument '{value}' for command '{name}': {reason}")]
    InvalidArgument {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// The recognized commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    User,
    System,
    Complete,
    MaxTokens,
    Temperature,
    TopP,
    Timeout,
    Retries,
    Model,
    Clear,
    Reset,
}

static COMMAND_TABLE: LazyLock<HashMap<&'static str, CommandKind>> = LazyLock::new(|| {
    CommandKind::ALL
        .iter()
        .flat_map(|kind| kind.names().iter().map(move |name| (*name, *kind)))
        .collect()
});

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        CommandKind::User,
        CommandKind::System,
        CommandKind::Complete,
        CommandKind::MaxTokens,
        CommandKind::Temperature,
        CommandKind::TopP,
        CommandKind::Timeout,
        CommandKind::Retries,
        CommandKind::Model,
        CommandKind::Clear,
        CommandKind::Reset,
    ];

    /// Accepted names, the first one being canonical.
    pub fn names(self) -> &'static [&'static str] {
        match self {
            CommandKind::User => &["user"],
            CommandKind::System => &["system", "sys", "system_role", "sys_role"],
            CommandKind::Complete => &["assistant", "complete"],
            CommandKind::MaxTokens => &["max_tokens", "max_token"],
            CommandKind::Temperature => &["temperature", "temp"],
            CommandKind::TopP => &["top_p"],
            CommandKind::Timeout => &["timeout"],
            CommandKind::Retries => &["retries"],
            CommandKind::Model => &["model"],
            CommandKind::Clear => &["clear"],
            CommandKind::Reset => &["reset"],
        }
    }

    pub fn name(self) -> &'static str {
        self.names()[0]
    }

    pub fn summary(self) -> &'static str {
        match self {
            CommandKind::User => "Append user message.",
            CommandKind::System => "Append system message (empty appends the default one).",
            CommandKind::Complete => "Complete the conversation and append the reply.",
            CommandKind::MaxTokens => "Set maximum number of tokens to generate.",
            CommandKind::Temperature => "Set sampling temperature.",
            CommandKind::TopP => "Set top probability mass of tokens to consider.",
            CommandKind::Timeout => "Set seconds before a completion times out.",
            CommandKind::Retries => "Set additional attempts on rate-limit or timeout errors.",
            CommandKind::Model => "Set the model used for completion.",
            CommandKind::Clear => "Clear messages history.",
            CommandKind::Reset => "Reset parameters and clear messages history.",
        }
    }

    /// Look a command up by name, ignoring case and surrounding whitespace.
    pub fn lookup(name: &str) -> Option<Self> {
        COMMAND_TABLE
            .get(name.trim().to_lowercase().as_str())
            .copied()
    }

    /// Whether running the command calls the remote API.
    pub fn triggers_remote_call(self) -> bool {
        self == CommandKind::Complete
    }

    pub fn takes_argument(self) -> bool {
        !matches!(
            self,
            CommandKind::Complete | CommandKind::Clear | CommandKind::Reset
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A parsed command with its typed argument. `None` arguments reset the
/// corresponding parameter to its default.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    User(String),
    System(Option<String>),
    Complete,
    MaxTokens(Option<u32>),
    Temperature(Option<f64>),
    TopP(Option<f64>),
    Timeout(Option<u64>),
    Retries(Option<i64>),
    Model(Option<String>),
    Clear,
    Reset,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::User(_) => CommandKind::User,
            Command::System(_) => CommandKind::System,
            Command::Complete => CommandKind::Complete,
            Command::MaxTokens(_) => CommandKind::MaxTokens,
            Command::Temperature(_) => CommandKind::Temperature,
            Command::TopP(_) => CommandKind::TopP,
            Command::Timeout(_) => CommandKind::Timeout,
            Command::Retries(_) => CommandKind::Retries,
            Command::Model(_) => CommandKind::Model,
            Command::Clear => CommandKind::Clear,
            Command::Reset => CommandKind::Reset,
        }
    }

    /// Parse a command from its name and optional raw argument.
    pub fn parse(name: &str, argument: Option<&str>) -> Result<Self, CommandError> {
        let kind = CommandKind::lookup(name).ok_or_else(|| CommandError::Unknown(name.trim().to_string()))?;
        Self::with_argument(kind, argument)
    }

    /// Parse a single `name[=| |:]argument` line.
    pub fn parse_line(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        match line.find(NAME_ARGUMENT_SEPS) {
            Some(i) => {
                let argument = line[i..].trim_start_matches(NAME_ARGUMENT_SEPS);
                Self::parse(&line[..i], Some(argument))
            }
            None => Self::parse(line, None),
        }
    }

    /// Build a command of `kind` from a raw argument.
    pub fn with_argument(kind: CommandKind, argument: Option<&str>) -> Result<Self, CommandError> {
        let name = kind.name();
        let arg = normalize(argument);

        let command = match kind {
            CommandKind::Complete => no_argument(name, arg, Command::Complete)?,
            CommandKind::Clear => no_argument(name, arg, Command::Clear)?,
            CommandKind::Reset => no_argument(name, arg, Command::Reset)?,
            CommandKind::User => Command::User(arg.ok_or(CommandError::MissingArgument(name))?.to_string()),
            CommandKind::System => Command::System(arg.map(str::to_string)),
            CommandKind::Model => Command::Model(arg.map(str::to_string)),
            CommandKind::MaxTokens => Command::MaxTokens(arg.map(|v| parse_number::<u32>(name, v)).transpose()?),
            CommandKind::Temperature => Command::Temperature(arg.map(|v| parse_float(name, v)).transpose()?),
            CommandKind::TopP => Command::TopP(arg.map(|v| parse_float(name, v)).transpose()?),
            CommandKind::Timeout => Command::Timeout(arg.map(|v| parse_seconds(name, v)).transpose()?),
            CommandKind::Retries => Command::Retries(arg.map(|v| parse_retries(name, v)).transpose()?),
        };
        Ok(command)
    }
}

fn no_argument(name: &'static str, arg: Option<&str>, command: Command) -> Result<Command, CommandError> {
    match arg {
        Some(_) => Err(CommandError::UnexpectedArgument(name)),
        None => Ok(command),
    }
}

fn normalize(argument: Option<&str>) -> Option<&str> {
    let arg = argument?.trim();
    if arg.is_empty() || NONE_STRINGS.iter().any(|s| arg.eq_ignore_ascii_case(s)) {
        None
    } else {
        Some(arg)
    }
}

fn invalid(name: &'static str, value: &str, reason: impl ToString) -> CommandError {
    CommandError::InvalidArgument {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, CommandError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.parse::<T>().map_err(|e| invalid(name, value, e))
}

fn parse_float(name: &'static str, value: &str) -> Result<f64, CommandError> {
    let v = parse_number::<f64>(name, value)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(invalid(name, value, "not a finite number"))
    }
}

fn parse_seconds(name: &'static str, value: &str) -> Result<u64, CommandError> {
    let v = parse_float(name, value)?;
    if v < 0.0 {
        return Err(invalid(name, value, "must not be negative"));
    }
    Ok(v.round() as u64)
}

fn parse_retries(name: &'static str, value: &str) -> Result<i64, CommandError> {
    let v = parse_number::<i64>(name, value)?;
    if v < -1 {
        return Err(invalid(name, value, "must be -1 (unbounded) or more"));
    }
    Ok(v)
}
