//! Bounded handoff work queue and its background worker.
//!
//! Request handlers push tasks with [`HandoffQueue::enqueue`], which never
//! waits. The [`HandoffWorker`] drains the channel off the request path and
//! dispatches up to `concurrency` tasks at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::handoff::dispatcher::HandoffDispatcher;
use crate::handoff::error::{HandoffError, HandoffResult};
use crate::handoff::types::HandoffRequest;

/// A queued handoff.
#[derive(Clone, Debug)]
pub struct HandoffTask {
    /// What to deliver.
    pub request: HandoffRequest,
    /// When it entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

/// Cloneable producer side of the queue.
#[derive(Clone)]
pub struct HandoffQueue {
    tx: mpsc::Sender<HandoffTask>,
    dispatcher: Arc<HandoffDispatcher>,
}

impl HandoffQueue {
    /// Create a queue and the worker that drains it. The worker does nothing
    /// until [`HandoffWorker::spawn`] is called.
    #[must_use]
    pub fn new(
        dispatcher: Arc<HandoffDispatcher>,
        capacity: usize,
        concurrency: usize,
    ) -> (Self, HandoffWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            dispatcher: Arc::clone(&dispatcher),
        };
        let worker = HandoffWorker {
            rx,
            dispatcher,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            shutdown: Arc::new(Notify::new()),
        };
        (queue, worker)
    }

    /// Queue a handoff without waiting.
    ///
    /// # Errors
    /// Returns [`HandoffError::QueueFull`] or [`HandoffError::QueueClosed`];
    /// in both cases the conversation is recorded as `failed`.
    pub fn enqueue(&self, request: HandoffRequest) -> HandoffResult<()> {
        let id = request.conversation_id;
        let ledger = self.dispatcher.ledger();
        ledger.mark_queued(id);

        let task = HandoffTask {
            request,
            enqueued_at: Utc::now(),
        };
        let err = match self.tx.try_send(task) {
            Ok(()) => {
                info!(conversation_id = %id, "Handoff queued");
                return Ok(());
            }
            Err(TrySendError::Full(_)) => HandoffError::QueueFull,
            Err(TrySendError::Closed(_)) => HandoffError::QueueClosed,
        };

        warn!(conversation_id = %id, error = %err, "Could not queue handoff");
        ledger.mark_unqueued(id, err.to_string());
        Err(err)
    }

    /// Dispatcher shared with the worker.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<HandoffDispatcher> {
        &self.dispatcher
    }
}

/// Consumer side of the queue.
pub struct HandoffWorker {
    rx: mpsc::Receiver<HandoffTask>,
    dispatcher: Arc<HandoffDispatcher>,
    permits: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

/// Handle to a running worker.
pub struct HandoffWorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl HandoffWorkerHandle {
    /// Stop taking new work, finish what is queued and in flight, then
    /// return.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            error!(?err, "Handoff worker terminated abnormally");
        }
    }
}

impl HandoffWorker {
    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(self) -> HandoffWorkerHandle {
        let shutdown = Arc::clone(&self.shutdown);
        let join = tokio::spawn(self.run());
        HandoffWorkerHandle { shutdown, join }
    }

    async fn run(mut self) {
        info!(
            concurrency = self.permits.available_permits(),
            "Starting handoff worker"
        );
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                task = self.rx.recv() => {
                    let Some(task) = task else { break };
                    self.start(task, &mut in_flight).await;
                }
                () = self.shutdown.notified() => {
                    info!("Handoff worker draining queue");
                    self.rx.close();
                    while let Some(task) = self.rx.recv().await {
                        self.start(task, &mut in_flight).await;
                    }
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!(?err, "Handoff task panicked");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(?err, "Handoff task panicked");
            }
        }
        info!("Handoff worker stopped");
    }

    async fn start(&self, task: HandoffTask, in_flight: &mut JoinSet<()>) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        in_flight.spawn(async move {
            let _permit = permit;
            process(&dispatcher, task).await;
        });
    }
}

async fn process(dispatcher: &HandoffDispatcher, task: HandoffTask) {
    let id = task.request.conversation_id;
    let waited_ms = (Utc::now() - task.enqueued_at).num_milliseconds();
    match dispatcher.dispatch(task.request).await {
        Ok(receipt) if receipt.accepted => {
            info!(conversation_id = %id, waited_ms, attempts = receipt.attempts, "Queued handoff completed");
        }
        Ok(_) => {
            warn!(conversation_id = %id, "Queued handoff rejected by channel");
        }
        Err(err) => {
            error!(conversation_id = %id, error = %err, "Queued handoff failed");
        }
    }
}
