//! Integration tests for the consume → deliver → commit loop.
//!
//! Kafka is replaced by a scripted in-memory consumer. Time is paused, so
//! retry delays and empty polls advance instantly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use relay_common::error::BrokerError;
use relay_common::types::{BrokerRecord, Message};
use relay_notifier::availability::HealthSignal;
use relay_notifier::client::{DeliveryClient, RetryPolicy};
use relay_notifier::dead_letter::DeadLetterStore;
use relay_notifier::simulated::SimulatedClient;
use relay_worker::{BrokerConsumer, ConsumerWorker, StopReason, WorkerState};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Ordered log of deliveries and commits shared by the fakes.
type Events = Arc<Mutex<Vec<String>>>;

enum Step {
    Record(BrokerRecord),
    Error(BrokerError),
}

struct ScriptedConsumer {
    script: Mutex<VecDeque<Step>>,
    events: Events,
    commits: Arc<Mutex<Vec<i64>>>,
    subscribed: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedConsumer {
    fn new(steps: Vec<Step>, events: Events) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            events,
            commits: Arc::new(Mutex::new(Vec::new())),
            subscribed: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        }
    }
}

#[async_trait]
impl BrokerConsumer for ScriptedConsumer {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        if topics.iter().any(|t| t == "forbidden") {
            return Err(BrokerError::Consumption("topic authorization failed".into()));
        }
        self.subscribed.lock().unwrap().extend_from_slice(topics);
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerRecord>, BrokerError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Step::Record(record)) => Ok(Some(record)),
            Some(Step::Error(e)) => Err(e),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn commit(&self, record: &BrokerRecord) -> Result<(), BrokerError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("commit:{}", record.offset));
        self.commits.lock().unwrap().push(record.offset);
        Ok(())
    }

    fn close(self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Downstream that accepts or rejects by request id and logs every attempt.
struct RecordingClient {
    reject: Vec<String>,
    events: Events,
    policy: RetryPolicy,
    store: DeadLetterStore,
}

#[async_trait]
impl DeliveryClient for RecordingClient {
    async fn deliver(&self, message: &Message) -> bool {
        let accepted = !self.reject.contains(&message.request_id);
        let verdict = if accepted { "deliver" } else { "reject" };
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", verdict, message.request_id));
        accepted
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn dead_letters(&self) -> &DeadLetterStore {
        &self.store
    }

    async fn persist_failed(
        &self,
        message: &Message,
        raw: &[u8],
    ) -> Result<(), relay_common::error::AppError> {
        self.store.append(raw).await?;
        self.events
            .lock()
            .unwrap()
            .push(format!("dead_letter:{}", message.request_id));
        Ok(())
    }
}

struct CountingSignal {
    up: bool,
    calls: AtomicU32,
}

impl HealthSignal for CountingSignal {
    fn is_up(&self, _now: DateTime<Utc>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.up
    }
}

fn record(offset: i64, request_id: &str) -> BrokerRecord {
    let message = Message {
        request_id: request_id.to_string(),
        topic_name: "notifications".to_string(),
        message_body: format!("body {}", offset),
        ..Message::default()
    };
    BrokerRecord {
        topic: "notifications".to_string(),
        partition: 0,
        offset,
        key: None,
        payload: message.to_bytes().unwrap(),
    }
}

fn recording_client(reject: &[&str], events: Events, dir: &tempfile::TempDir) -> Arc<RecordingClient> {
    Arc::new(RecordingClient {
        reject: reject.iter().map(|s| s.to_string()).collect(),
        events,
        policy: RetryPolicy::new(2, Duration::from_secs(1)),
        store: DeadLetterStore::new(dir.path().join("failed.log")),
    })
}

fn position(events: &[String], entry: &str) -> usize {
    events
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing event {entry}: {events:?}"))
}

#[tokio::test(start_paused = true)]
async fn test_every_record_resolved_once_and_committed_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let events: Events = Arc::default();
    let steps = (0..5)
        .map(|i| Step::Record(record(i, &format!("r{}", i))))
        .collect();
    let consumer = ScriptedConsumer::new(steps, events.clone());
    let commits = consumer.commits.clone();
    let client = recording_client(&["r1", "r3"], events.clone(), &dir);

    let worker = ConsumerWorker::new(consumer, client.clone(), POLL_TIMEOUT, 2)
        .with_max_iterations(5);
    let report = worker.run(CancellationToken::new()).await;

    assert_eq!(report.stop_reason, StopReason::IterationLimit);
    assert_eq!(report.polled, 5);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.dead_lettered, 2);
    assert_eq!(report.lost, 0);
    assert_eq!(report.committed, 5);
    assert_eq!(*commits.lock().unwrap(), vec![0, 1, 2, 3, 4]);

    // Rejected records end up in the log exactly once, delivered ones never.
    let dead: Vec<String> = client
        .store
        .read_all()
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.message())
        .map(|m| m.request_id)
        .collect();
    assert_eq!(dead, vec!["r1".to_string(), "r3".to_string()]);

    let events = events.lock().unwrap();
    assert!(!events.contains(&"deliver:r1".to_string()));
    assert!(!events.contains(&"dead_letter:r0".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_commit_follows_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let events: Events = Arc::default();
    let steps = vec![
        Step::Record(record(10, "ok")),
        Step::Record(record(11, "bad")),
    ];
    let consumer = ScriptedConsumer::new(steps, events.clone());
    let client = recording_client(&["bad"], events.clone(), &dir);

    let report = ConsumerWorker::new(consumer, client, POLL_TIMEOUT, 4)
        .with_max_iterations(2)
        .run(CancellationToken::new())
        .await;
    assert_eq!(report.committed, 2);

    let events = events.lock().unwrap();
    assert!(position(&events, "deliver:ok") < position(&events, "commit:10"));
    assert!(position(&events, "dead_letter:bad") < position(&events, "commit:11"));
    assert!(position(&events, "commit:10") < position(&events, "commit:11"));
}

#[tokio::test(start_paused = true)]
async fn test_always_down_downstream_dead_letters_after_full_retry_budget() {
    let dir = tempfile::tempdir().unwrap();
    let signal = Arc::new(CountingSignal {
        up: false,
        calls: AtomicU32::new(0),
    });
    let store = DeadLetterStore::new(dir.path().join("failed.log"));
    let client = Arc::new(SimulatedClient::new(
        signal.clone(),
        RetryPolicy::new(3, Duration::from_secs(1)),
        store,
    ));

    let original = record(0, "down-1");
    let consumer = ScriptedConsumer::new(vec![Step::Record(original.clone())], Arc::default());
    let report = ConsumerWorker::new(consumer, client.clone(), POLL_TIMEOUT, 1)
        .with_max_iterations(1)
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.committed, 1);
    // The first attempt plus three retries.
    assert_eq!(signal.calls.load(Ordering::SeqCst), 4);

    let stored = client.dead_letters().read_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].raw, original.payload);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_record_is_dead_lettered_and_committed() {
    let dir = tempfile::tempdir().unwrap();
    let events: Events = Arc::default();
    let mut poison = record(3, "unused");
    poison.payload = b"{not json".to_vec();
    let consumer = ScriptedConsumer::new(vec![Step::Record(poison)], events.clone());
    let commits = consumer.commits.clone();
    let client = recording_client(&[], events.clone(), &dir);

    let report = ConsumerWorker::new(consumer, client.clone(), POLL_TIMEOUT, 1)
        .with_max_iterations(1)
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(*commits.lock().unwrap(), vec![3]);
    assert_eq!(
        client.store.read_all().await.unwrap()[0].raw,
        b"{not json".to_vec()
    );
    // No delivery attempt for a body that cannot be parsed.
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .all(|e| e.starts_with("commit:"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_recoverable_broker_error_keeps_polling() {
    let dir = tempfile::tempdir().unwrap();
    let events: Events = Arc::default();
    let steps = vec![
        Step::Error(BrokerError::Transport("connection reset".into())),
        Step::Record(record(0, "a")),
        Step::Error(BrokerError::Consumption("unknown topic".into())),
        Step::Record(record(1, "b")),
    ];
    let consumer = ScriptedConsumer::new(steps, events.clone());
    let client = recording_client(&[], events, &dir);

    let report = ConsumerWorker::new(consumer, client, POLL_TIMEOUT, 2)
        .with_max_iterations(4)
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.stop_reason, StopReason::IterationLimit);
    assert_eq!(report.broker_errors, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.committed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_all_brokers_down_drains_and_closes() {
    let dir = tempfile::tempdir().unwrap();
    let events: Events = Arc::default();
    let steps = vec![
        Step::Record(record(0, "a")),
        Step::Error(BrokerError::AllBrokersDown("no brokers".into())),
        Step::Record(record(1, "never-polled")),
    ];
    let consumer = ScriptedConsumer::new(steps, events.clone());
    let closed = consumer.closed.clone();
    let commits = consumer.commits.clone();
    let client = recording_client(&[], events.clone(), &dir);

    let worker = ConsumerWorker::new(consumer, client, POLL_TIMEOUT, 4);
    let mut state = worker.watch_state();
    let report = worker.run(CancellationToken::new()).await;

    assert_eq!(report.stop_reason, StopReason::FatalBrokerError);
    assert_eq!(report.broker_errors, 1);
    assert_eq!(report.polled, 1);
    // The first record may or may not have started before the drain, but
    // whatever resolved was committed.
    assert_eq!(report.committed, report.resolved());
    assert!(commits.lock().unwrap().len() <= 1);
    assert!(*closed.lock().unwrap());
    assert_eq!(*state.borrow_and_update(), WorkerState::Stopped);
    assert!(
        !events
            .lock()
            .unwrap()
            .contains(&"deliver:never-polled".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_retries_and_dead_letters_in_flight_record() {
    let dir = tempfile::tempdir().unwrap();
    let events: Events = Arc::default();
    let consumer = ScriptedConsumer::new(vec![Step::Record(record(7, "slow"))], events.clone());
    let commits = consumer.commits.clone();
    let client = Arc::new(RecordingClient {
        reject: vec!["slow".to_string()],
        events: events.clone(),
        policy: RetryPolicy::new(5, Duration::from_secs(30)),
        store: DeadLetterStore::new(dir.path().join("failed.log")),
    });

    let shutdown = CancellationToken::new();
    let worker = ConsumerWorker::new(consumer, client.clone(), POLL_TIMEOUT, 1);
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    // Well inside the first 30s retry sleep.
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.cancel();
    let report = handle.await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(*commits.lock().unwrap(), vec![7]);
    assert_eq!(client.store.read_all().await.unwrap().len(), 1);

    let rejected = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| *e == "reject:slow")
        .count();
    assert_eq!(rejected, 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_worker_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let consumer = ScriptedConsumer::new(Vec::new(), Arc::default());
    let closed = consumer.closed.clone();
    let commits = consumer.commits.clone();
    let client = recording_client(&[], Arc::default(), &dir);

    let shutdown = CancellationToken::new();
    let worker = ConsumerWorker::new(consumer, client, POLL_TIMEOUT, 1);
    assert_eq!(worker.state(), WorkerState::Initializing);
    let mut state = worker.watch_state();

    let handle = tokio::spawn(worker.run(shutdown.clone()));
    state
        .wait_for(|s| *s == WorkerState::Running)
        .await
        .unwrap();

    shutdown.cancel();
    let report = handle.await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert_eq!(report.polled, 0);
    assert!(commits.lock().unwrap().is_empty());
    assert!(*closed.lock().unwrap());
    assert_eq!(*state.borrow(), WorkerState::Stopped);
}

#[test]
fn test_start_subscribes_or_fails_as_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let consumer = ScriptedConsumer::new(Vec::new(), Arc::default());
    let subscribed = consumer.subscribed.clone();
    let client = recording_client(&[], Arc::default(), &dir);
    let worker = ConsumerWorker::new(consumer, client, POLL_TIMEOUT, 1);

    worker
        .start(&["orders".to_string(), "alerts".to_string()])
        .unwrap();
    assert_eq!(*subscribed.lock().unwrap(), vec!["orders", "alerts"]);

    let err = worker.start(&["forbidden".to_string()]).unwrap_err();
    assert!(matches!(
        err,
        relay_common::error::AppError::BrokerConnection(_)
    ));
}
