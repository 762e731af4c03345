//! Chat command layer: recognises management commands in messages, checks
//! that the author may run them, and applies them to the topology.

pub mod args;
pub mod command;
pub mod error;
pub mod handler;
pub mod text;

pub use {
    command::{Command, ParsedCommand, command_text, parse},
    error::{CommandError, Result},
    handler::{CommandHandler, Invocation},
    text::{HELP_MESSAGE, WELCOME_MESSAGE},
};
