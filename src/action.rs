//! Deferred, composable asynchronous actions.
//!
//! An [`Action`] holds an unexecuted operation. Nothing happens until the
//! action is started (or run), and every start performs the work again.
//! Chains are built with [`Action::and_then`] and friends; the first failure
//! short-circuits the rest of the chain.

use crate::errors::{ActionError, Outcome};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

/// Callback receiving the single [`Outcome`] of a started action.
pub type Completion<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// A started action's pending outcome.
pub type PendingOutcome<T> = Pin<Box<dyn Future<Output = Outcome<T>> + Send + 'static>>;

type OperationFn<T> = dyn Fn() -> PendingOutcome<T> + Send + Sync;

pub struct Action<T> {
    operation: Arc<OperationFn<T>>,
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
        }
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("output", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Send + 'static> Action<T> {
    /// Wraps a callback-style operation. The operation receives a
    /// [`Completion`] it must invoke once; a completion that is dropped
    /// without being invoked fails the action with
    /// [`ActionError::NetworkRequestFailure`].
    pub fn new<F>(operation: F) -> Self
    where
        F: Fn(Completion<T>) + Send + Sync + 'static,
    {
        let operation = Arc::new(operation);
        Self::from_future(move || {
            let operation = Arc::clone(&operation);
            async move {
                let (tx, rx) = oneshot::channel();
                operation(Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                }));
                match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("action completion dropped without being invoked");
                        Err(ActionError::NetworkRequestFailure)
                    }
                }
            }
        })
    }

    /// Wraps a future factory; each run calls `factory` once.
    pub fn from_future<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        Self {
            operation: Arc::new(move || -> PendingOutcome<T> { Box::pin(factory()) }),
        }
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_future(move || {
            let outcome = outcome.clone();
            async move { outcome }
        })
    }

    pub fn ok(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_outcome(Ok(value))
    }

    pub fn err(error: ActionError) -> Self {
        Self::from_future(move || async move { Err(error) })
    }

    /// Starts the action and returns its pending outcome.
    pub fn run(&self) -> PendingOutcome<T> {
        (self.operation)()
    }

    /// Runs the action, collapsing any failure into `None`.
    pub async fn value(&self) -> Option<T> {
        self.run().await.ok()
    }

    /// Starts the action on the current Tokio runtime.
    ///
    /// `completion` is invoked exactly once, from a spawned task, so it never
    /// runs re-entrantly inside `start`. Must be called from within a runtime.
    pub fn start<F>(&self, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let pending = self.run();
        tokio::spawn(async move {
            completion(pending.await);
        })
    }

    /// Like [`start`](Self::start), but the completion only sees the value.
    pub fn start_optional<F>(&self, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<T>) + Send + 'static,
    {
        self.start(move |outcome| completion(outcome.ok()))
    }

    pub fn map<U, F>(self, f: F) -> Action<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Action::from_future(move || {
            let pending = self.run();
            let f = Arc::clone(&f);
            async move { pending.await.map(|value| f(value)) }
        })
    }

    /// Like [`map`](Self::map), but an absent result fails with
    /// [`ActionError::TransformFailure`].
    pub fn flat_map<U, F>(self, f: F) -> Action<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Action::from_future(move || {
            let pending = self.run();
            let f = Arc::clone(&f);
            async move { f(pending.await?).ok_or(ActionError::TransformFailure) }
        })
    }

    /// Sequential bind: on success starts `f(value)` and forwards its outcome.
    /// On failure `f` is never invoked and the error propagates unchanged.
    pub fn and_then<U, F>(self, f: F) -> Action<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Action<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Action::from_future(move || {
            let pending = self.run();
            let f = Arc::clone(&f);
            async move {
                let value = pending.await?;
                f(value).run().await
            }
        })
    }

    /// Runs `next` after this action succeeds, discarding this action's value.
    pub fn then<U: Send + 'static>(self, next: Action<U>) -> Action<U> {
        self.and_then(move |_| next.clone())
    }

    /// Repeatedly runs `f`, seeded with the previous value, collecting every
    /// value until `stop` returns true for the most recent one.
    ///
    /// There is no iteration cap: a `stop` predicate that never holds keeps
    /// the loop running and the collected list growing. Any failure discards
    /// the values collected so far.
    pub fn collect_until<F, S>(initial: T, f: F, stop: S) -> Action<Vec<T>>
    where
        T: Clone + Sync,
        F: Fn(T) -> Action<T> + Send + Sync + 'static,
        S: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let stop = Arc::new(stop);
        Action::from_future(move || {
            let f = Arc::clone(&f);
            let stop = Arc::clone(&stop);
            let mut current = initial.clone();
            async move {
                let mut collected = Vec::new();
                loop {
                    let next = f(current).run().await?;
                    collected.push(next.clone());
                    if stop(&next) {
                        return Ok(collected);
                    }
                    current = next;
                }
            }
        })
    }

    /// Starts `f(element)` for every element concurrently and joins the results
    /// in input order.
    ///
    /// Completes with the first failure observed. Siblings still in flight are
    /// not cancelled; they run to completion and their outcomes are discarded.
    pub fn batch<E, F>(elements: Vec<E>, f: F) -> Action<Vec<T>>
    where
        E: Clone + Send + Sync + 'static,
        F: Fn(E) -> Action<T> + Send + Sync + 'static,
    {
        Action::from_future(move || {
            let pending: Vec<PendingOutcome<T>> = elements
                .iter()
                .cloned()
                .map(|element| f(element).run())
                .collect();
            async move {
                let total = pending.len();
                let (tx, mut rx) = mpsc::unbounded_channel();
                for (index, outcome) in pending.into_iter().enumerate() {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send((index, outcome.await));
                    });
                }
                drop(tx);

                let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
                let mut remaining = total;
                while remaining > 0 {
                    match rx.recv().await {
                        Some((index, Ok(value))) => {
                            slots[index] = Some(value);
                            remaining -= 1;
                        }
                        Some((_, Err(error))) => return Err(error),
                        // A sub-action task panicked before reporting.
                        None => return Err(ActionError::NetworkRequestFailure),
                    }
                }
                Ok(slots.into_iter().flatten().collect())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn delayed<T: Clone + Send + Sync + 'static>(value: T, millis: u64) -> Action<T> {
        Action::from_future(move || {
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(value)
            }
        })
    }

    #[tokio::test]
    async fn map_transforms_success_and_preserves_failure() {
        assert_eq!(Action::ok(2).map(|v| v * 10).run().await, Ok(20));

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let mapped = Action::<u32>::err(ActionError::ParsingFailure).map(move |v| {
            flag.store(true, Ordering::SeqCst);
            v + 1
        });
        assert_eq!(mapped.run().await, Err(ActionError::ParsingFailure));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn flat_map_turns_absence_into_transform_failure() {
        let found = Action::ok("42".to_string()).flat_map(|s| s.parse::<u32>().ok());
        assert_eq!(found.run().await, Ok(42));

        let missing = Action::ok("x".to_string()).flat_map(|s| s.parse::<u32>().ok());
        assert_eq!(missing.run().await, Err(ActionError::TransformFailure));

        let failed = Action::<String>::err(ActionError::NotFound).flat_map(|s| Some(s.len()));
        assert_eq!(failed.run().await, Err(ActionError::NotFound));
    }

    #[tokio::test]
    async fn and_then_short_circuits_after_first_failure() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let second = Arc::clone(&invoked);
        let third = Arc::clone(&invoked);

        let chain = Action::ok(1u32)
            .and_then(|_| Action::<u32>::err(ActionError::NotFound))
            .and_then(move |v| {
                second.fetch_add(1, Ordering::SeqCst);
                Action::ok(v + 1)
            })
            .and_then(move |v| {
                third.fetch_add(1, Ordering::SeqCst);
                Action::ok(v + 1)
            });

        assert_eq!(chain.run().await, Err(ActionError::NotFound));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn then_discards_previous_value() {
        let chain = Action::ok(1u8).then(Action::ok("next"));
        assert_eq!(chain.run().await, Ok("next"));
    }

    #[tokio::test]
    async fn actions_are_rerunnable() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let action = Action::new(move |completion: Completion<usize>| {
            completion(Ok(counter.fetch_add(1, Ordering::SeqCst) + 1));
        });

        assert_eq!(action.run().await, Ok(1));
        assert_eq!(action.run().await, Ok(2));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_completion_fails_the_action() {
        let action = Action::<u8>::new(|completion| drop(completion));
        assert_eq!(action.run().await, Err(ActionError::NetworkRequestFailure));
    }

    #[tokio::test]
    async fn start_never_completes_reentrantly() {
        let returned = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&returned);
        let (tx, rx) = oneshot::channel();

        let handle = Action::ok(5u8).start(move |outcome| {
            let _ = tx.send((observed.load(Ordering::SeqCst), outcome));
        });
        returned.store(true, Ordering::SeqCst);

        assert_ok!(handle.await);
        let (start_had_returned, outcome) = assert_ok!(rx.await);
        assert!(start_had_returned);
        assert_eq!(outcome, Ok(5));
    }

    #[tokio::test]
    async fn start_optional_collapses_errors() {
        let (tx, rx) = oneshot::channel();
        let _ = Action::<u8>::err(ActionError::NotFound).start_optional(move |value| {
            let _ = tx.send(value);
        });
        assert_eq!(assert_ok!(rx.await), None);
        assert_eq!(Action::ok(3u8).value().await, Some(3));
    }

    #[tokio::test]
    async fn collect_until_with_immediate_stop_yields_single_value() {
        let collected = Action::collect_until(1u32, |v| Action::ok(v + 1), |_| true);
        assert_eq!(collected.run().await, Ok(vec![2]));
    }

    #[tokio::test]
    async fn collect_until_accumulates_in_order() {
        let collected = Action::collect_until(0u32, |v| Action::ok(v + 1), |v| *v == 4);
        assert_eq!(collected.run().await, Ok(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn collect_until_discards_partial_results_on_failure() {
        let collected = Action::collect_until(
            0u32,
            |v| {
                if v == 2 {
                    Action::err(ActionError::NotFound)
                } else {
                    Action::ok(v + 1)
                }
            },
            |_| false,
        );
        assert_err!(collected.run().await);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_preserves_input_order() {
        let batch = Action::batch(vec![30u64, 20, 10, 0], |millis| delayed(millis, millis));
        assert_eq!(batch.run().await, Ok(vec![30, 20, 10, 0]));
    }

    #[tokio::test]
    async fn batch_of_nothing_succeeds_empty() {
        let batch = Action::<u8>::batch(Vec::<u8>::new(), Action::ok);
        assert_eq!(batch.run().await, Ok(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_reports_first_failure_and_lets_siblings_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let batch = Action::batch(vec![1u64, 2, 3], move |n| {
            let counter = Arc::clone(&counter);
            Action::from_future(move || {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(n * 10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    if n == 1 {
                        Err(ActionError::ParsingFailure)
                    } else {
                        Ok(n)
                    }
                }
            })
        });

        assert_eq!(batch.run().await, Err(ActionError::ParsingFailure));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }
}
