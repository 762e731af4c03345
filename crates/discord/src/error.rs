/// Failures of the Discord client itself (login, gateway session).
///
/// REST failures surfaced through the platform traits are classified into
/// [`relaybot_channels::Error`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("discord client error: {0}")]
    Serenity(#[from] serenity::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
