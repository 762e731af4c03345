//! Log forwarding to a chat channel.
//!
//! [`LogChannelLayer`] is a `tracing_subscriber::Layer` that captures events
//! at or above a configured level and queues them. [`spawn_forwarder`] drains
//! the queue and posts each record to the log channel as an embed. The
//! forwarder's own events are never captured, so a failing post cannot feed
//! itself.

use std::{fmt::Write as _, sync::Arc};

use {
    chrono::{DateTime, Utc},
    relaybot_channels::{ChannelOutbound, Embed},
    relaybot_common::ChannelId,
    relaybot_config::LogLevel,
    serde_json::Value,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{
        Level,
        field::{Field, Visit},
    },
    tracing_subscriber::{Layer, layer::Context},
};

const FORWARDER_TARGET: &str = "relaybot_gateway::logs";

const MAX_DESCRIPTION: usize = 4000;

const COLOR_INFO: u32 = 0x3498DB;
const COLOR_WARN: u32 = 0xF1C40F;
const COLOR_ERROR: u32 = 0xE74C3C;

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: serde_json::Map<String, Value>,
    pub at: DateTime<Utc>,
}

impl LogRecord {
    pub fn to_embed(&self) -> Embed {
        let mut description = self.message.clone();
        for (key, value) in &self.fields {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = write!(description, "\n`{key}` = {value}");
        }
        if let Some((idx, _)) = description.char_indices().nth(MAX_DESCRIPTION) {
            description.truncate(idx);
        }
        Embed::new(format!("{} / {}", self.target, self.level), description)
            .color(level_color(self.level))
            .footer(self.at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .timestamp(self.at.to_rfc3339())
    }
}

fn level_color(level: Level) -> u32 {
    match level {
        Level::ERROR => COLOR_ERROR,
        Level::WARN => COLOR_WARN,
        _ => COLOR_INFO,
    }
}

pub fn tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

pub type LogReceiver = mpsc::UnboundedReceiver<LogRecord>;

pub struct LogChannelLayer {
    min_level: Level,
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl LogChannelLayer {
    pub fn new(min_level: LogLevel) -> (Self, LogReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let layer = Self {
            min_level: tracing_level(min_level),
            tx,
        };
        (layer, rx)
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogChannelLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // More verbose levels compare greater.
        if *meta.level() > self.min_level || meta.target().starts_with(FORWARDER_TARGET) {
            return;
        }
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let _ = self.tx.send(LogRecord {
            level: *meta.level(),
            target: meta.target().into(),
            message: visitor.message,
            fields: visitor.fields,
            at: Utc::now(),
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: serde_json::Map<String, Value>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().into(), Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.into();
        } else {
            self.fields
                .insert(field.name().into(), Value::String(value.into()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().into(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().into(), Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().into(), Value::Bool(value));
    }
}

/// Post queued records to `channel` until every layer handle is gone.
pub fn spawn_forwarder(
    mut rx: LogReceiver,
    channel: ChannelId,
    outbound: Arc<dyn ChannelOutbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = outbound.send_embed(&channel, &record.to_embed()).await {
                tracing::debug!(target: FORWARDER_TARGET, %channel, error = %e, "failed to forward log record");
            }
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        relaybot_channels::MemoryPlatform,
        tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt},
    };

    fn capture(level: LogLevel, emit: impl FnOnce()) -> Vec<LogRecord> {
        let (layer, mut rx) = LogChannelLayer::new(level);
        let subscriber = tracing_subscriber::registry().with(layer);
        {
            let _guard = subscriber.set_default();
            emit();
        }
        let mut out = Vec::new();
        while let Ok(record) = rx.try_recv() {
            out.push(record);
        }
        out
    }

    #[test]
    fn captures_at_or_above_threshold() {
        let records = capture(LogLevel::Warn, || {
            tracing::info!("quiet");
            tracing::warn!(channel = "42", attempts = 3u64, "slow delivery");
            tracing::error!("broken");
        });
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, Level::WARN);
        assert_eq!(records[0].message, "slow delivery");
        assert_eq!(records[0].fields["channel"], "42");
        assert_eq!(records[0].fields["attempts"], 3);
    }

    #[test]
    fn forwarder_events_are_not_captured() {
        let records = capture(LogLevel::Info, || {
            tracing::error!(target: FORWARDER_TARGET, "post failed");
            tracing::info!(target: "relaybot_relay", "kept");
        });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "relaybot_relay");
    }

    #[test]
    fn embed_shows_target_level_and_fields() {
        let record = LogRecord {
            level: Level::ERROR,
            target: "relaybot_relay::dispatcher".into(),
            message: "failed to persist".into(),
            fields: [("origin".to_string(), Value::String("1".into()))]
                .into_iter()
                .collect(),
            at: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let embed = record.to_embed();
        assert_eq!(
            embed.title.as_deref(),
            Some("relaybot_relay::dispatcher / ERROR")
        );
        assert_eq!(embed.color, Some(COLOR_ERROR));
        assert!(embed.description.unwrap().contains("`origin` = 1"));
        assert_eq!(embed.footer.unwrap().text, "2026-01-02 03:04:05 UTC");
    }

    #[tokio::test]
    async fn forwarder_posts_embeds() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.add_channel("9", "10");
        let (layer, rx) = LogChannelLayer::new(LogLevel::Warn);
        let handle = spawn_forwarder(rx, ChannelId::from("9"), platform.clone());

        let subscriber = tracing_subscriber::registry().with(layer);
        {
            let _guard = subscriber.set_default();
            tracing::warn!("disk almost full");
        }
        handle.await.unwrap();

        let posted = platform.messages_to(&ChannelId::from("9"));
        assert_eq!(posted.len(), 1);
        assert!(posted[0].starts_with("disk almost full"));
    }
}
