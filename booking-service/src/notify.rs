use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::{BookingNotification, NotificationEnvelope};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Receives structured booking notifications. Implementations must return
/// immediately; delivery happens elsewhere or not at all.
pub trait NotificationSink: Send + Sync + 'static {
    fn publish(&self, notification: BookingNotification);
}

/// Emits every notification as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, notification: BookingNotification) {
        match serde_json::to_string(&notification) {
            Ok(json) => info!(
                target: "booking_events",
                event_type = notification.event_type(),
                payload = %json,
                "Booking notification"
            ),
            Err(e) => warn!(error = %e, "Failed to encode booking notification"),
        }
    }
}

/// Queues notifications for a background Kafka producer. A full queue drops
/// the notification instead of blocking the caller.
#[derive(Debug, Clone)]
pub struct KafkaSink {
    tx: mpsc::Sender<NotificationEnvelope>,
}

impl KafkaSink {
    pub fn spawn(
        brokers: &str,
        topic: String,
        capacity: usize,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;
        let (tx, rx) = mpsc::channel(capacity);
        let publisher = KafkaPublisher { producer, topic };
        let handle = tokio::spawn(publisher.run(rx));
        Ok((Self { tx }, handle))
    }
}

impl NotificationSink for KafkaSink {
    fn publish(&self, notification: BookingNotification) {
        let envelope = NotificationEnvelope::new(notification);
        if let Err(e) = self.tx.try_send(envelope) {
            warn!(error = %e, "Dropping booking notification");
        }
    }
}

struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    async fn run(self, mut rx: mpsc::Receiver<NotificationEnvelope>) {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = self.send(&envelope).await {
                error!("Failed to publish notification {}: {}", envelope.id, e);
            }
        }
        info!("Notification publisher stopped");
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()> {
        let json = envelope.to_json()?;
        let key = envelope
            .notification
            .event_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let record = FutureRecord::to(&self.topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;
        Ok(())
    }
}

/// Fans a notification out to several sinks.
pub struct FanoutSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn publish(&self, notification: BookingNotification) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(notification.clone());
            }
            last.publish(notification);
        }
    }
}
