use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use relay_common::error::AppError;
use relay_common::types::Resolution;
use relay_notifier::client::DeliveryClient;

use crate::consumer::BrokerConsumer;
use crate::dispatcher::{Dispatched, Dispatcher};

/// Lifecycle of a consumer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Initializing => write!(f, "initializing"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Draining => write!(f, "draining"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    #[default]
    Shutdown,
    FatalBrokerError,
    IterationLimit,
    /// The delivery task ended while the poll loop still had records for it.
    DispatcherExited,
}

/// Counters collected over one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub polled: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub lost: u64,
    pub committed: u64,
    pub commit_failures: u64,
    pub broker_errors: u64,
    pub stop_reason: StopReason,
}

impl WorkerReport {
    fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Delivered => self.delivered += 1,
            Resolution::DeadLettered => self.dead_lettered += 1,
            Resolution::Lost => self.lost += 1,
        }
    }

    /// Records that reached a resolution.
    pub fn resolved(&self) -> u64 {
        self.delivered + self.dead_lettered + self.lost
    }
}

/// Polls the broker, hands records to the delivery task and commits each
/// offset once that record is resolved.
pub struct ConsumerWorker<C: BrokerConsumer> {
    consumer: C,
    client: Arc<dyn DeliveryClient>,
    poll_timeout: Duration,
    queue_depth: usize,
    max_iterations: Option<u64>,
    state: watch::Sender<WorkerState>,
}

impl<C: BrokerConsumer> ConsumerWorker<C> {
    pub fn new(
        consumer: C,
        client: Arc<dyn DeliveryClient>,
        poll_timeout: Duration,
        queue_depth: usize,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Initializing);
        Self {
            consumer,
            client,
            poll_timeout,
            queue_depth: queue_depth.max(1),
            max_iterations: None,
            state,
        }
    }

    /// Stop after `n` polls, letting already queued records finish.
    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions. Useful once `run` has taken the worker.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Join the consumer group for `topics`.
    ///
    /// A worker that cannot subscribe has nothing to do, so the error is
    /// reported as a connection failure.
    pub fn start(&self, topics: &[String]) -> Result<(), AppError> {
        self.consumer.subscribe(topics).map_err(|e| {
            AppError::BrokerConnection(format!("Failed to subscribe to {:?}: {}", topics, e))
        })?;
        Ok(())
    }

    /// Run until `shutdown` is cancelled, a fatal broker error occurs or the
    /// iteration limit is reached.
    pub async fn run(self, shutdown: CancellationToken) -> WorkerReport {
        let dispatch_token = shutdown.child_token();
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_depth);
        let (resolved_tx, mut resolved_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(Arc::clone(&self.client), dispatch_token.clone());
        let dispatch_handle = tokio::spawn(dispatcher.run(queue_rx, resolved_tx));

        self.transition(WorkerState::Running);
        tracing::info!(
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            queue_depth = self.queue_depth,
            "Consumer worker running"
        );

        let mut report = WorkerReport::default();
        let mut iterations: u64 = 0;

        let stop_reason = loop {
            if self.max_iterations.is_some_and(|max| iterations >= max) {
                break StopReason::IterationLimit;
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break StopReason::Shutdown,

                Some(done) = resolved_rx.recv() => {
                    self.commit(done, &mut report).await;
                }

                polled = self.consumer.poll(self.poll_timeout) => {
                    iterations += 1;
                    match polled {
                        Ok(None) => {}
                        Ok(Some(record)) => {
                            report.polled += 1;
                            tracing::debug!(
                                topic = %record.topic,
                                partition = record.partition,
                                offset = record.offset,
                                "Record received"
                            );
                            tokio::select! {
                                biased;
                                _ = shutdown.cancelled() => break StopReason::Shutdown,
                                sent = queue_tx.send(record) => {
                                    if sent.is_err() {
                                        tracing::error!("Delivery task is gone, stopping worker");
                                        break StopReason::DispatcherExited;
                                    }
                                }
                            }
                        }
                        Err(e) if e.is_fatal() => {
                            report.broker_errors += 1;
                            tracing::error!(error = %e, "Unrecoverable broker error, draining");
                            break StopReason::FatalBrokerError;
                        }
                        Err(e) => {
                            report.broker_errors += 1;
                            tracing::warn!(error = %e, "Broker error, continuing to poll");
                        }
                    }
                }
            }
        };

        self.transition(WorkerState::Draining);
        tracing::info!(reason = ?stop_reason, "Consumer worker draining");

        // Closing the queue lets the delivery task finish what is already
        // queued; cancelling it stops after the record in flight.
        drop(queue_tx);
        if stop_reason != StopReason::IterationLimit {
            dispatch_token.cancel();
        }
        if let Err(e) = dispatch_handle.await {
            tracing::error!(error = %e, "Delivery task panicked");
        }

        while let Ok(done) = resolved_rx.try_recv() {
            self.commit(done, &mut report).await;
        }

        report.stop_reason = stop_reason;

        let ConsumerWorker {
            consumer, state, ..
        } = self;
        consumer.close();
        state.send_replace(WorkerState::Stopped);

        tracing::info!(
            polled = report.polled,
            delivered = report.delivered,
            dead_lettered = report.dead_lettered,
            lost = report.lost,
            committed = report.committed,
            "Consumer worker stopped"
        );

        report
    }

    async fn commit(&self, done: Dispatched, report: &mut WorkerReport) {
        report.record(done.resolution);

        match self.consumer.commit(&done.record).await {
            Ok(()) => {
                report.committed += 1;
                tracing::debug!(
                    topic = %done.record.topic,
                    partition = done.record.partition,
                    offset = done.record.offset,
                    resolution = %done.resolution,
                    "Offset committed"
                );
            }
            Err(e) => {
                // The record is redelivered after a restart or rebalance.
                report.commit_failures += 1;
                tracing::warn!(
                    error = %e,
                    topic = %done.record.topic,
                    partition = done.record.partition,
                    offset = done.record.offset,
                    "Offset commit failed"
                );
            }
        }
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = %previous, to = %next, "Worker state changed");
    }
}
