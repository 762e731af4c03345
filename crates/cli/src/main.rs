mod store_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    relaybot_config::BotConfig,
    relaybot_gateway::{LogChannelLayer, LogReceiver},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "relaybot", about = "Relaybot: mirror messages between Discord channels")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/relaybot/).
    #[arg(long, global = true, env = "RELAYBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the relation and server files.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and relay (default when no subcommand is given).
    Run,
    /// Validate the config and summarize the stored relations.
    Check,
    /// Print the stored relations of one channel.
    Links {
        /// Channel ID.
        channel: String,
    },
}

/// Initialise tracing and optionally attach a [`LogChannelLayer`] that
/// queues records for the configured log channel.
fn init_telemetry(cli: &Cli, log_layer: Option<LogChannelLayer>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .with(log_layer)
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .with(log_layer)
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BotConfig> {
    let mut config = relaybot_config::discover_and_load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Only the running service forwards logs to Discord.
    let is_run = matches!(cli.command, None | Some(Commands::Run));
    let (log_layer, log_rx): (Option<LogChannelLayer>, Option<LogReceiver>) =
        match (is_run, &config.log_channel) {
            (true, Some(_)) => {
                let (layer, rx) = LogChannelLayer::new(config.log_channel_level);
                (Some(layer), Some(rx))
            },
            _ => (None, None),
        };

    init_telemetry(&cli, log_layer);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "relaybot starting");
            relaybot_gateway::server::start(config, log_rx).await
        },
        Some(Commands::Check) => store_commands::handle_check(&config).await,
        Some(Commands::Links { ref channel }) => {
            store_commands::handle_links(&config, channel).await
        },
    }
}
