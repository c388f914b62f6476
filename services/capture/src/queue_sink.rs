//! Best-effort publication of frame metadata to a message queue.
//!
//! Every publish is a self-contained cycle: connect, declare the queue,
//! publish with the queue name as routing key, close. Nothing is kept open
//! between frames.

use crate::config::BrokerConfig;
use crate::error::SinkError;
use crate::metadata::FrameRecord;
use crate::report::SinkOutcome;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Connection to a broker that can publish one payload to a named queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Open a connection, declare `queue`, publish `payload`, close.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), SinkError>;
}

/// Kafka transport: queues are topics, declared through the admin API.
pub struct KafkaTransport {
    bootstrap_servers: String,
    client_id: String,
    timeout: Duration,
}

impl KafkaTransport {
    pub fn new(bootstrap_servers: impl Into<String>, client_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            client_id: client_id.into(),
            timeout,
        }
    }

    /// Build the rdkafka ClientConfig shared by the admin client and producer
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set("message.timeout.ms", self.timeout.as_millis().to_string())
            .set("socket.timeout.ms", self.timeout.as_millis().to_string());
        config
    }

    /// Create the topic unless it already exists.
    async fn declare_queue(&self, queue: &str) -> Result<(), SinkError> {
        let admin: AdminClient<DefaultClientContext> = self
            .client_config()
            .create()
            .map_err(|e| SinkError::connection(format!("Failed to create admin client: {e}")))?;

        let topic = NewTopic::new(queue, 1, TopicReplication::Fixed(1));
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = admin
            .create_topics([&topic], &options)
            .await
            .map_err(classify_kafka_error)?;

        for result in results {
            match result {
                Ok(_) => debug!(queue = %queue, "Queue declared"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(classify_error_code(
                        code,
                        format!("Failed to declare queue {name}: {code}"),
                    ))
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl QueueTransport for KafkaTransport {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), SinkError> {
        self.declare_queue(queue).await?;

        let producer: FutureProducer = self
            .client_config()
            .create()
            .map_err(|e| SinkError::connection(format!("Failed to create producer: {e}")))?;

        let record = FutureRecord::to(queue).key(queue).payload(payload);

        let (partition, offset) = producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| classify_kafka_error(e))?;

        debug!(queue = %queue, partition = partition, offset = offset, "Payload delivered");
        // Dropping the producer closes its broker connections.
        Ok(())
    }
}

fn classify_error_code(code: RDKafkaErrorCode, message: String) -> SinkError {
    match code {
        RDKafkaErrorCode::MessageTimedOut
        | RDKafkaErrorCode::OperationTimedOut
        | RDKafkaErrorCode::RequestTimedOut => SinkError::timeout(message),
        RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessage => {
            SinkError::serialization(message)
        }
        _ => SinkError::connection(message),
    }
}

fn classify_kafka_error(err: KafkaError) -> SinkError {
    let message = err.to_string();
    match err.rdkafka_error_code() {
        Some(code) => classify_error_code(code, message),
        None => SinkError::connection(message),
    }
}

/// Publishes frame metadata to the configured queue.
pub struct QueueSink {
    transport: Option<Arc<dyn QueueTransport>>,
    queue_name: String,
    timeout: Duration,
}

impl QueueSink {
    pub fn new(transport: Arc<dyn QueueTransport>, queue_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport: Some(transport),
            queue_name: queue_name.into(),
            timeout,
        }
    }

    /// A sink that skips every publish.
    pub fn disabled() -> Self {
        Self {
            transport: None,
            queue_name: String::new(),
            timeout: Duration::ZERO,
        }
    }

    /// Kafka-backed sink, or a disabled one when the broker is switched off.
    pub fn from_config(config: &BrokerConfig, client_id: &str) -> Self {
        if !config.enabled {
            info!("Queue publishing disabled");
            return Self::disabled();
        }

        let transport = KafkaTransport::new(&config.host, client_id, config.publish_timeout());
        Self::new(Arc::new(transport), &config.queue_name, config.publish_timeout())
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Publish `record` as JSON. `None` (no metadata) is skipped.
    #[instrument(skip(self, record), fields(queue = %self.queue_name))]
    pub async fn publish(&self, record: Option<&FrameRecord>) -> SinkOutcome {
        let Some(transport) = &self.transport else {
            return SinkOutcome::skipped("queue publishing disabled");
        };

        let Some(record) = record else {
            info!("No metadata for frame, queue publish skipped");
            return SinkOutcome::skipped("no metadata");
        };

        let payload = match record.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(sequence = record.sequence, error = %e, "Failed to serialize metadata");
                return SinkOutcome::Failed { error: e.into() };
            }
        };

        let result = match tokio::time::timeout(
            self.timeout,
            transport.publish(&self.queue_name, payload.as_bytes()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SinkError::timeout(format!(
                "publish exceeded {}ms",
                self.timeout.as_millis()
            ))),
        };

        match &result {
            Ok(()) => info!(sequence = record.sequence, payload = %payload, "Sent to queue"),
            Err(e) => warn!(sequence = record.sequence, error = %e, "Queue publish failed"),
        }
        result.into()
    }
}
