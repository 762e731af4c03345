//! Built-in reply texts.

pub const WELCOME_MESSAGE: &str = "\
Hello! I relay messages between channels, on this server and across servers.

Use `;link <channel> <channel>` to connect two channels, or `;help` to see everything I can do. \
You can also mention me instead of typing `;`.

Management commands need the **Manage Server** permission on every server involved.";

pub const HELP_MESSAGE: &str = "\
__**Commands**__

`link [channel] <channel>`: relay both ways between two channels
`unlink [channel] <channel>`: remove a link
`unlink-all [channel]`: remove a channel's links, outgoing relays and group memberships
`relay [from] <to>`: relay one way
`unrelay [from] <to>`: remove a one-way relay
`group <name> [channel ...]`: add channels to a group whose members all relay to each other
`ungroup <name> [channel ...]`: remove channels from a group
`prefix <prefix> <to> [from]`: relay messages starting with `prefix`, without it
`unprefix <prefix> [from]`: remove a prefix relay
`links [channel]`: show what a channel is connected to
`config [key [value]]`: show or change this server's settings

Channels default to the one you type in. Give them as IDs or #mentions.";
