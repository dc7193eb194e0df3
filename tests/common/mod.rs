#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use webhook_notifier::{
    BrokerError, Collaborators, Dispatcher, DispatcherConfig, DistributedLock, IdempotencyStore,
    InMemoryIdempotencyStore, InMemoryLock, InMemoryPublisher, LockError, LockHandle, NotificationRecord, Order,
    OrderRepository, OrderStatus, OutboundMessage, ProjectOrder, ProjectStatus, Publisher, RealtimeChannels,
    RealtimeError, RealtimeNotifier, RealtimePublisher, RepositoryError, RetryEnvelope, RetryPolicy, SendError,
    Sender, StoreError, TestResult, WebhookRequest, WebhookResponse,
};

pub const SECRET: &str = "merchant-secret";
pub const PROCESS_URL: &str = "http://merchant.test/process";

/// Answers with a scripted status sequence; the last one repeats.
pub struct RecordingSender {
    statuses: Mutex<VecDeque<u16>>,
    fallback: u16,
    unreachable: bool,
    delay: Duration,
    requests: Mutex<Vec<WebhookRequest>>,
    calls: AtomicUsize,
}

impl RecordingSender {
    pub fn always(status: u16) -> Self {
        Self::sequence(&[], status)
    }

    pub fn sequence(statuses: &[u16], fallback: u16) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            fallback,
            unreachable: false,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every send fails at the network level.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::always(200)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, request: WebhookRequest) -> Result<WebhookResponse, SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.unreachable {
            return Err(SendError::Network("connection refused".to_string()));
        }
        let status = self.statuses.lock().await.pop_front().unwrap_or(self.fallback);
        Ok(WebhookResponse::new(status))
    }
}

#[derive(Default)]
pub struct RecordingRepository {
    pub updates: Mutex<Vec<Order>>,
    pub test_results: Mutex<Vec<TestResult>>,
    pub rate_requests: Mutex<Vec<(String, String)>>,
    pub fail_updates: bool,
}

impl RecordingRepository {
    pub async fn update_count(&self) -> usize {
        self.updates.lock().await.len()
    }

    pub async fn last_update(&self) -> Option<Order> {
        self.updates.lock().await.last().cloned()
    }
}

#[async_trait]
impl OrderRepository for RecordingRepository {
    async fn update_order(&self, order: &Order) -> Result<(), RepositoryError> {
        self.updates.lock().await.push(order.clone());
        if self.fail_updates {
            return Err(RepositoryError::Call {
                call: "update_order",
                reason: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn notify_test_results(&self, result: &TestResult) -> Result<(), RepositoryError> {
        self.test_results.lock().await.push(result.clone());
        Ok(())
    }

    async fn get_convert_rate(&self, from: &str, to: &str) -> Result<f64, RepositoryError> {
        self.rate_requests.lock().await.push((from.to_string(), to.to_string()));
        Ok(0.5)
    }
}

#[derive(Default)]
pub struct RecordingRealtime {
    pub sent: Mutex<Vec<(String, Value)>>,
}

impl RecordingRealtime {
    pub async fn channels(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(c, _)| c.clone()).collect()
    }

    pub async fn count(&self, channel: &str) -> usize {
        self.sent.lock().await.iter().filter(|(c, _)| c == channel).count()
    }
}

#[async_trait]
impl RealtimePublisher for RecordingRealtime {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), RealtimeError> {
        self.sent.lock().await.push((channel.to_string(), payload));
        Ok(())
    }
}

/// Store whose every call fails.
pub struct FailingStore;

#[async_trait]
impl IdempotencyStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<NotificationRecord, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _field: &str, _delivered: bool) -> Result<(), StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

/// Lock backend that is down.
pub struct FailingLock;

#[async_trait]
impl DistributedLock for FailingLock {
    async fn acquire(&self, _name: &str) -> Result<Option<LockHandle>, LockError> {
        Err(LockError::Backend("connection refused".to_string()))
    }

    async fn release(&self, _handle: LockHandle) -> Result<(), LockError> {
        Ok(())
    }
}

/// Broker whose every publish fails.
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        Err(BrokerError::Publish {
            exchange: message.exchange,
            reason: "channel closed".to_string(),
        })
    }
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub sender: Arc<RecordingSender>,
    pub repository: Arc<RecordingRepository>,
    pub store: Arc<InMemoryIdempotencyStore>,
    pub realtime: Arc<RecordingRealtime>,
    pub publisher: Arc<InMemoryPublisher>,
    pub lock: Arc<InMemoryLock>,
}

pub struct HarnessBuilder {
    sender: RecordingSender,
    repository: RecordingRepository,
    store: Option<Arc<dyn IdempotencyStore>>,
    lock: Option<Arc<dyn DistributedLock>>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl HarnessBuilder {
    pub fn new(sender: RecordingSender) -> Self {
        Self {
            sender,
            repository: RecordingRepository::default(),
            store: None,
            lock: None,
            publisher: None,
        }
    }

    pub fn repository(mut self, repository: RecordingRepository) -> Self {
        self.repository = repository;
        self
    }

    pub fn store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn build(self) -> Harness {
        let sender = Arc::new(self.sender);
        let repository = Arc::new(self.repository);
        let in_memory_store = Arc::new(InMemoryIdempotencyStore::new());
        let realtime = Arc::new(RecordingRealtime::default());
        let publisher = Arc::new(InMemoryPublisher::new());
        let lock = Arc::new(InMemoryLock::default());

        let notifier = Arc::new(RealtimeNotifier::new(
            realtime.clone(),
            realtime.clone(),
            RealtimeChannels::default(),
        ));
        let store: Arc<dyn IdempotencyStore> = self
            .store
            .unwrap_or_else(|| in_memory_store.clone() as Arc<dyn IdempotencyStore>);
        let dispatch_lock: Arc<dyn DistributedLock> = self
            .lock
            .unwrap_or_else(|| lock.clone() as Arc<dyn DistributedLock>);
        let dispatch_publisher: Arc<dyn Publisher> = self
            .publisher
            .unwrap_or_else(|| publisher.clone() as Arc<dyn Publisher>);

        let config = DispatcherConfig {
            retry: RetryPolicy {
                republish_backoff: Duration::from_millis(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(
            config,
            Collaborators {
                lock: dispatch_lock,
                sender: sender.clone(),
                repository: repository.clone(),
                store,
                realtime: notifier,
                publisher: dispatch_publisher,
            },
        );

        Harness {
            dispatcher: Arc::new(dispatcher),
            sender,
            repository,
            store: in_memory_store,
            realtime,
            publisher,
            lock,
        }
    }
}

pub fn harness(sender: RecordingSender) -> Harness {
    HarnessBuilder::new(sender).build()
}

pub fn order(protocol: &str) -> Order {
    Order {
        id: "5d1b4a3c".to_string(),
        uuid: "4b8f1c2e-uuid".to_string(),
        private_status: OrderStatus::PaymentSystemComplete,
        project: ProjectOrder {
            id: "project-1".to_string(),
            merchant_id: "merchant-1".to_string(),
            secret_key: SECRET.to_string(),
            callback_protocol: protocol.to_string(),
            status: ProjectStatus::InProduction,
            url_process_payment: PROCESS_URL.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn first_attempt() -> RetryEnvelope {
    attempt(0)
}

pub fn attempt(attempt_count: u32) -> RetryEnvelope {
    RetryEnvelope {
        attempt_count,
        routing_key: "*".to_string(),
    }
}
