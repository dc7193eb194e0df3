use std::time::Duration;

use config::{Config, ConfigError, Environment, Source};
use serde::Deserialize;

use crate::dispatcher::DispatcherConfig;
use crate::realtime::RealtimeChannels;
use crate::retry::{RetryPolicy, MAX_ATTEMPTS, RETRY_DELAY_SECS, RETRY_EXCHANGE};
use crate::tax::{REFUNDS_TOPIC, TRANSACTIONS_TOPIC};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CentrifugoConfig {
    pub url: String,
    pub api_secret: String,
}

/// Notifier settings, read from the process environment.
///
/// Nested fields use `__`: `CENTRIFUGO_DASHBOARD__URL`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub broker_address: String,
    pub redis_url: String,

    pub notify_topic: String,
    pub retry_exchange: String,
    pub retry_delay_secs: u64,
    pub max_attempts: u32,
    pub republish_backoff_ms: u64,

    pub taxjar_transactions_topic: String,
    pub taxjar_refunds_topic: String,

    pub lock_ttl_ms: u64,
    pub http_timeout_secs: u64,
    pub prefetch_count: u16,

    pub centrifugo_payment_form: CentrifugoConfig,
    pub centrifugo_dashboard: CentrifugoConfig,

    pub user_channel_mask: String,
    pub admin_channel: String,
    pub merchant_testing_channel_mask: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        let channels = RealtimeChannels::default();
        Self {
            broker_address: "amqp://127.0.0.1:5672".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            notify_topic: "notify_payment".to_string(),
            retry_exchange: RETRY_EXCHANGE.to_string(),
            retry_delay_secs: RETRY_DELAY_SECS,
            max_attempts: MAX_ATTEMPTS,
            republish_backoff_ms: 5_000,
            taxjar_transactions_topic: TRANSACTIONS_TOPIC.to_string(),
            taxjar_refunds_topic: REFUNDS_TOPIC.to_string(),
            lock_ttl_ms: 30_000,
            http_timeout_secs: 30,
            prefetch_count: 10,
            centrifugo_payment_form: CentrifugoConfig::default(),
            centrifugo_dashboard: CentrifugoConfig::default(),
            user_channel_mask: channels.user_channel_mask,
            admin_channel: channels.admin_channel,
            merchant_testing_channel_mask: channels.merchant_testing_channel_mask,
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default().separator("__").try_parsing(true))
    }

    fn load<S>(source: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        Config::builder().add_source(source).build()?.try_deserialize()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            exchange: self.retry_exchange.clone(),
            max_attempts: self.max_attempts,
            republish_backoff: Duration::from_millis(self.republish_backoff_ms),
        }
    }

    pub fn channels(&self) -> RealtimeChannels {
        RealtimeChannels {
            user_channel_mask: self.user_channel_mask.clone(),
            admin_channel: self.admin_channel.clone(),
            merchant_testing_channel_mask: self.merchant_testing_channel_mask.clone(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            retry: self.retry_policy(),
            taxjar_transactions_topic: self.taxjar_transactions_topic.clone(),
            taxjar_refunds_topic: self.taxjar_refunds_topic.clone(),
        }
    }
}
