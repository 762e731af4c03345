//! Command recognition and the closed table of supported commands.

use tracing::debug;

use crate::{CommandError, Result, args::user_mentions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Link,
    Unlink,
    UnlinkAll,
    Relay,
    Unrelay,
    Group,
    Ungroup,
    Prefix,
    Unprefix,
    Links,
    Config,
    Help,
}

/// Name to command. Lookup is case-insensitive; both spellings of
/// `unlink-all` are accepted.
const COMMANDS: &[(&str, Command)] = &[
    ("link", Command::Link),
    ("unlink", Command::Unlink),
    ("unlink-all", Command::UnlinkAll),
    ("unlink_all", Command::UnlinkAll),
    ("relay", Command::Relay),
    ("unrelay", Command::Unrelay),
    ("group", Command::Group),
    ("ungroup", Command::Ungroup),
    ("prefix", Command::Prefix),
    ("unprefix", Command::Unprefix),
    ("links", Command::Links),
    ("config", Command::Config),
    ("help", Command::Help),
];

impl Command {
    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        COMMANDS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, command)| *command)
    }

    pub fn name(self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(_, command)| *command == self)
            .map_or("", |(name, _)| name)
    }

    pub fn usage(self) -> &'static str {
        match self {
            Self::Link => "link [channel] <channel>",
            Self::Unlink => "unlink [channel] <channel>",
            Self::UnlinkAll => "unlink-all [channel]",
            Self::Relay => "relay [from channel] <to channel>",
            Self::Unrelay => "unrelay [from channel] <to channel>",
            Self::Group => "group <name> [channel ...]",
            Self::Ungroup => "ungroup <name> [channel ...]",
            Self::Prefix => "prefix <prefix> <to channel> [from channel]",
            Self::Unprefix => "unprefix <prefix> [from channel]",
            Self::Links => "links [channel]",
            Self::Config => "config [key [value]]",
            Self::Help => "help",
        }
    }
}

/// A recognised command with its tokenized arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub args: Vec<String>,
}

/// Return the command text of `content` if it addresses the bot, either
/// through the server's control characters or a leading mention.
pub fn command_text<'a>(content: &'a str, control_chars: &str, bot_id: Option<&str>) -> Option<&'a str> {
    if !control_chars.is_empty()
        && let Some(rest) = content.strip_prefix(control_chars)
    {
        return non_empty(rest);
    }
    let bot_id = bot_id?;
    user_mentions(bot_id)
        .iter()
        .find_map(|mention| content.strip_prefix(mention.as_str()))
        .and_then(non_empty)
}

fn non_empty(text: &str) -> Option<&str> {
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// Split command text into a command and its arguments.
///
/// Arguments follow shell quoting so prefixes may contain spaces
/// (`prefix "bot ping" 123`). Unbalanced quotes fall back to plain
/// whitespace splitting.
pub fn parse(text: &str) -> Result<ParsedCommand> {
    let (name, rest) = match text.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (text, ""),
    };
    let command = Command::lookup(name).ok_or_else(|| CommandError::UnknownCommand {
        name: name.to_string(),
    })?;
    let args = shell_words::split(rest).unwrap_or_else(|e| {
        debug!(error = %e, "falling back to whitespace argument split");
        rest.split_whitespace().map(str::to_string).collect()
    });
    Ok(ParsedCommand { command, args })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("link", Command::Link)]
    #[case("LINK", Command::Link)]
    #[case("unlink-all", Command::UnlinkAll)]
    #[case("unlink_all", Command::UnlinkAll)]
    #[case("unprefix", Command::Unprefix)]
    #[case("help", Command::Help)]
    fn looks_up_known_names(#[case] name: &str, #[case] command: Command) {
        assert_eq!(Command::lookup(name), Some(command));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(Command::lookup("eval"), None);
        let err = parse("eval 1+1").unwrap_err();
        assert!(matches!(err, CommandError::UnknownCommand { name } if name == "eval"));
    }

    #[test]
    fn every_command_has_a_name() {
        for (_, command) in COMMANDS {
            assert!(Command::lookup(command.name()).is_some());
        }
    }

    #[rstest]
    #[case(";link 1 2", ";", None, Some("link 1 2"))]
    #[case("!!help", "!!", None, Some("help"))]
    #[case(";", ";", None, None)]
    #[case("hello", ";", None, None)]
    #[case("<@99> links", ";", Some("99"), Some("links"))]
    #[case("<@!99>   help ", ";", Some("99"), Some("help"))]
    #[case("<@98> links", ";", Some("99"), None)]
    fn detects_commands(
        #[case] content: &str,
        #[case] chars: &str,
        #[case] bot: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(command_text(content, chars, bot), expected);
    }

    #[test]
    fn quoted_arguments_stay_together() {
        let parsed = parse("prefix \"bot ping\" 123").unwrap();
        assert_eq!(parsed.command, Command::Prefix);
        assert_eq!(parsed.args, vec!["bot ping".to_string(), "123".to_string()]);
    }

    #[test]
    fn unbalanced_quotes_fall_back() {
        let parsed = parse("prefix \"bot 123").unwrap();
        assert_eq!(parsed.args, vec!["\"bot".to_string(), "123".to_string()]);
    }
}
