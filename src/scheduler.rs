//! Single-worker queue serializing every renderer call.
//!
//! Operations are dispatched in submission order by one worker task, which
//! drives each to a terminal state before dequeuing the next. At most one
//! operation is ever `Executing` against the renderer.

use crate::errors::RenderError;
use crate::operation::Operation;
use crate::renderer::{RenderOutput, Renderer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

struct Job {
    operation: Operation,
    cancel: watch::Receiver<bool>,
    completion: oneshot::Sender<RenderOutput>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    queued: AtomicUsize,
    in_flight: AtomicBool,
}

/// Handle to a submitted [`Operation`].
#[derive(Debug)]
pub struct OperationHandle {
    id: Uuid,
    cancel: watch::Sender<bool>,
    receiver: oneshot::Receiver<RenderOutput>,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Requests cancellation. A pending operation is skipped without reaching
    /// the renderer; an executing one is cancelled; a finished one is
    /// unaffected.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Waits for the operation to reach a terminal state.
    pub async fn output(self) -> RenderOutput {
        match self.receiver.await {
            Ok(output) => output,
            Err(_) => RenderOutput::failed(RenderError::WorkerGone),
        }
    }
}

pub struct Scheduler {
    sender: mpsc::UnboundedSender<Job>,
    state: Arc<SchedulerState>,
    worker: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns the worker on the current Tokio runtime.
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(SchedulerState::default());
        let worker = tokio::spawn(run_worker(renderer, Arc::clone(&state), receiver));
        Self {
            sender,
            state,
            worker,
        }
    }

    /// Enqueues `operation` behind everything submitted before it.
    pub fn submit(&self, operation: Operation) -> OperationHandle {
        let id = operation.id();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, rx) = oneshot::channel();

        debug!(operation = %id, "operation submitted");
        self.state.queued.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            operation,
            cancel: cancel_rx,
            completion: tx,
        };
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(operation = %id, "scheduler worker is gone");
            let _ = job
                .completion
                .send(RenderOutput::failed(RenderError::WorkerGone));
        }

        OperationHandle {
            id,
            cancel: cancel_tx,
            receiver: rx,
        }
    }

    /// Operations submitted but not yet dequeued.
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::SeqCst)
    }

    /// True while an operation is executing against the renderer.
    pub fn is_busy(&self) -> bool {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Stops accepting work and waits for queued operations to drain.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.worker.await {
            warn!("scheduler worker ended abnormally: {err}");
        }
    }
}

async fn run_worker(
    renderer: Arc<dyn Renderer>,
    state: Arc<SchedulerState>,
    mut receiver: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = receiver.recv().await {
        state.queued.fetch_sub(1, Ordering::SeqCst);
        dispatch(renderer.as_ref(), &state, job).await;
    }
    debug!("scheduler worker stopped");
}

/// Drives one dequeued job to a terminal state and replies to its submitter.
async fn dispatch(renderer: &dyn Renderer, state: &SchedulerState, job: Job) {
    let Job {
        mut operation,
        cancel,
        completion,
    } = job;

    let cancelled_while_pending = *cancel.borrow();
    if cancelled_while_pending {
        debug!(operation = %operation.id(), "skipping operation cancelled while pending");
        operation.cancel(RenderError::Cancelled);
    } else if state.in_flight.swap(true, Ordering::SeqCst) {
        // Unreachable with a single worker; guards against a renderer being
        // shared by more than one dispatcher.
        warn!(operation = %operation.id(), "renderer already in flight, rejecting operation");
        operation.begin();
        operation.finish(None, Some(RenderError::Busy));
    } else {
        operation.execute(renderer, cancel).await;
        state.in_flight.store(false, Ordering::SeqCst);
    }

    if completion.send(operation.into_output()).is_err() {
        debug!("operation result dropped by its submitter");
    }
}
