//! Parsing of command arguments into identifiers.

use relaybot_common::ChannelId;

use crate::{CommandError, Result};

/// Accept a raw numeric id or a channel mention (`<#123>`).
pub fn parse_channel(arg: &str) -> Result<ChannelId> {
    let raw = arg
        .strip_prefix("<#")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(arg);
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommandError::invalid_argument(format!(
            "`{arg}` is not a channel. Use a channel ID or mention it like #channel."
        )));
    }
    Ok(ChannelId::from(raw))
}

/// Parse every argument as a channel.
pub fn parse_channels(args: &[String]) -> Result<Vec<ChannelId>> {
    args.iter().map(|a| parse_channel(a)).collect()
}

/// Mention forms of a user id: `<@id>` and the nickname form `<@!id>`.
pub fn user_mentions(user_id: &str) -> [String; 2] {
    [format!("<@{user_id}>"), format!("<@!{user_id}>")]
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("123", "123")]
    #[case("<#456>", "456")]
    fn accepts_ids_and_mentions(#[case] arg: &str, #[case] id: &str) {
        assert_eq!(parse_channel(arg).unwrap(), ChannelId::from(id));
    }

    #[rstest]
    #[case("general")]
    #[case("<#>")]
    #[case("<@123>")]
    #[case("12a")]
    #[case("")]
    fn rejects_anything_else(#[case] arg: &str) {
        assert!(matches!(
            parse_channel(arg),
            Err(CommandError::InvalidArgument { .. })
        ));
    }
}
