//! RabbitMQ transport built on `lapin`.
//!
//! Retries never sleep in process: a retried order is published to the
//! retry exchange, sits in the retry queue for `x-message-ttl`, and is
//! dead-lettered back to the primary exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::broker::{
    Delivery, DeliveryHandler, Disposition, OutboundMessage, Publisher, Subscriber, RETRY_COUNT_HEADER,
};
use crate::error::BrokerError;
use crate::settings::NotifierConfig;

const BIND_ALL: &str = "*";
const CONSUMER_TAG: &str = "webhook-notifier";

/// Exchange and queue names plus retry delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpTopology {
    pub primary_exchange: String,
    pub primary_queue: String,
    pub retry_exchange: String,
    pub retry_queue: String,
    pub retry_delay: Duration,
    /// Extra exchanges published to directly (tax reporting).
    pub side_exchanges: Vec<String>,
}

impl AmqpTopology {
    pub fn from_config(config: &NotifierConfig) -> Self {
        Self {
            primary_exchange: config.notify_topic.clone(),
            primary_queue: format!("{}.queue", config.notify_topic),
            retry_exchange: config.retry_exchange.clone(),
            retry_queue: format!("{}.queue", config.retry_exchange),
            retry_delay: config.retry_delay(),
            side_exchanges: vec![
                config.taxjar_transactions_topic.clone(),
                config.taxjar_refunds_topic.clone(),
            ],
        }
    }

    fn retry_queue_args(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(self.retry_delay.as_millis() as i64),
        );
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.primary_exchange.clone().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(BIND_ALL.into()),
        );
        args
    }
}

pub struct AmqpBroker {
    _connection: Connection,
    publish_channel: Channel,
    consume_channel: Channel,
    topology: AmqpTopology,
    prefetch_count: u16,
}

impl AmqpBroker {
    pub async fn connect(address: &str, topology: AmqpTopology, prefetch_count: u16) -> Result<Self, BrokerError> {
        let connection = Connection::connect(
            address,
            ConnectionProperties::default().with_connection_name(CONSUMER_TAG.into()),
        )
        .await
        .map_err(|e| BrokerError::Connection(format!("RabbitMQ connection failed: {e}")))?;

        let publish_channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("channel creation failed: {e}")))?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("confirm select failed: {e}")))?;

        let consume_channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("channel creation failed: {e}")))?;
        consume_channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("failed to set QoS: {e}")))?;

        info!(address, "connected to RabbitMQ");
        Ok(Self {
            _connection: connection,
            publish_channel,
            consume_channel,
            topology,
            prefetch_count,
        })
    }

    pub fn topology(&self) -> &AmqpTopology {
        &self.topology
    }

    /// Declare every exchange and queue. Idempotent on the broker side.
    pub async fn declare_topology(&self) -> Result<(), BrokerError> {
        let topology = &self.topology;

        self.declare_exchange(&topology.primary_exchange).await?;
        self.declare_bound_queue(&topology.primary_queue, &topology.primary_exchange, FieldTable::default())
            .await?;

        self.declare_exchange(&topology.retry_exchange).await?;
        self.declare_bound_queue(&topology.retry_queue, &topology.retry_exchange, topology.retry_queue_args())
            .await?;

        for exchange in &topology.side_exchanges {
            self.declare_exchange(exchange).await?;
            self.declare_bound_queue(exchange, exchange, FieldTable::default()).await?;
        }
        Ok(())
    }

    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.publish_channel
            .exchange_declare(
                name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Connection(format!("exchange {name} declaration failed: {e}")))
    }

    async fn declare_bound_queue(&self, queue: &str, exchange: &str, args: FieldTable) -> Result<(), BrokerError> {
        self.publish_channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| BrokerError::Connection(format!("queue {queue} declaration failed: {e}")))?;

        self.publish_channel
            .queue_bind(queue, exchange, BIND_ALL, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("queue {queue} binding failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for AmqpBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let failed = |reason: String| BrokerError::Publish {
            exchange: message.exchange.clone(),
            reason,
        };

        let mut headers = FieldTable::default();
        headers.insert(
            RETRY_COUNT_HEADER.into(),
            AMQPValue::LongInt(i32::try_from(message.retry_count).unwrap_or(i32::MAX)),
        );

        let confirm = self
            .publish_channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into())
                    .with_headers(headers),
            )
            .await
            .map_err(|e| failed(format!("publish failed: {e}")))?;

        let confirmation = confirm
            .await
            .map_err(|e| failed(format!("publish confirmation failed: {e}")))?;
        if confirmation.is_nack() {
            return Err(failed("broker nacked the message".to_string()));
        }

        debug!(
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            retry_count = message.retry_count,
            "message published"
        );
        Ok(())
    }
}

#[async_trait]
impl Subscriber for AmqpBroker {
    async fn subscribe(&self, handler: Arc<dyn DeliveryHandler>) -> Result<(), BrokerError> {
        let mut consumer = self
            .consume_channel
            .basic_consume(
                &self.topology.primary_queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Connection(format!("consume failed: {e}")))?;

        let permits = Arc::new(Semaphore::new(usize::from(self.prefetch_count.max(1))));
        info!(queue = %self.topology.primary_queue, "consumer started");

        while let Some(next) = consumer.next().await {
            let delivery = match next {
                Ok(delivery) => delivery,
                Err(err) => {
                    error!(error = %err, "consumer stream failed");
                    return Err(BrokerError::Connection(err.to_string()));
                }
            };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let handler = handler.clone();

            tokio::spawn(async move {
                let retry_count = delivery
                    .properties
                    .headers()
                    .as_ref()
                    .and_then(retry_count_header)
                    .unwrap_or(0);
                let message = Delivery::new(delivery.routing_key.as_str(), delivery.data.clone())
                    .with_retry_count(retry_count);

                // Retries travel by republish; only a delivery nothing was
                // done for goes back on the queue.
                match handler.handle(message).await {
                    Disposition::Ack => {
                        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(error = %err, "delivery ack failed");
                        }
                    }
                    Disposition::Requeue => {
                        let requeue = BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        };
                        if let Err(err) = delivery.nack(requeue).await {
                            warn!(error = %err, "delivery nack failed");
                        }
                    }
                }
                drop(permit);
            });
        }

        info!("consumer stream ended");
        Ok(())
    }
}

fn retry_count_header(headers: &FieldTable) -> Option<u32> {
    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
        .and_then(|(_, value)| amqp_int(value))
}

fn amqp_int(value: &AMQPValue) -> Option<u32> {
    let number: i64 = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        _ => return None,
    };
    u32::try_from(number).ok()
}
