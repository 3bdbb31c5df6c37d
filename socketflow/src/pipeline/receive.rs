//! Receive stages: fold records pulled from the dispatcher.

use std::fmt::Display;
use std::future::Future;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::FlowContext;
use super::policy::{Fold, IterationPolicy};
use super::stage::{Observer, Stage};
use crate::codec;
use crate::error::{FlowError, FlowResult};
use crate::sync::LockFuture;

/// Work delivered to a receive stage's worker, in upstream order.
enum RoundEvent<T> {
    /// Upstream emitted; run one round seeded with the value.
    Round { seed: T, lock: LockFuture },
    Complete,
    Fail(FlowError),
}

/// Upstream observer feeding a receive stage's worker.
struct RoundFeeder<T, R> {
    events: mpsc::UnboundedSender<RoundEvent<T>>,
    flow: Rc<FlowContext>,
    downstream: Stage<R>,
}

impl<T: Clone, R: Clone + 'static> Observer<T> for RoundFeeder<T, R> {
    fn on_emit(&self, value: &T) {
        // A failed stage takes no part in later rounds.
        if self.downstream.is_terminated() {
            return;
        }

        // Registered before the upstream round signals, so the barrier cannot
        // drain while this round is outstanding.
        if let Err(e) = self.flow.barrier.wait() {
            tracing::error!(error = %e, "round barrier rejected a wait");
            return;
        }

        let round = RoundEvent::Round {
            seed: value.clone(),
            lock: self.flow.round_lock.lock(),
        };
        if self.events.send(round).is_err() {
            tracing::trace!("receive stage is gone, releasing its round");
            let _ = self.flow.barrier.signal();
        }
    }

    fn on_error(&self, error: &FlowError) {
        let _ = self.events.send(RoundEvent::Fail(error.clone()));
    }

    fn on_complete(&self) {
        let _ = self.events.send(RoundEvent::Complete);
    }
}

impl<T: Clone + 'static> Stage<T> {
    /// Derive a stage pulling one record per upstream emission.
    ///
    /// See [`receive_with`](Stage::receive_with).
    pub fn receive<M, R, H, Fut, E>(&self, handler: H) -> Stage<R>
    where
        M: DeserializeOwned + 'static,
        R: Clone + 'static,
        H: Fn(M, Fold<T, R>) -> Fut + 'static,
        Fut: Future<Output = Result<R, E>> + 'static,
        E: Display + 'static,
    {
        self.receive_with(handler, IterationPolicy::Once)
    }

    /// Derive a stage folding records pulled from the channel.
    ///
    /// Each emission of this stage starts a round on the derived stage. The
    /// round resolves `policy` against the emission, then pulls records one
    /// at a time, decodes them into `M` and calls `handler` with
    /// [`Fold::Seed`] on the first call and [`Fold::Partial`] afterwards.
    /// The final accumulator is emitted; a round that pulls no record emits
    /// nothing.
    ///
    /// The derived stage fails with [`FlowError::StreamExhausted`] when the
    /// channel ends in the middle of a round, and with
    /// [`FlowError::Handler`] or [`FlowError::Decode`] when a record cannot
    /// be processed. A failed stage ignores later emissions and passes the
    /// failure down its own chain.
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`].
    pub fn receive_with<M, R, H, Fut, E>(
        &self,
        handler: H,
        policy: IterationPolicy<T, R>,
    ) -> Stage<R>
    where
        M: DeserializeOwned + 'static,
        R: Clone + 'static,
        H: Fn(M, Fold<T, R>) -> Fut + 'static,
        Fut: Future<Output = Result<R, E>> + 'static,
        E: Display + 'static,
    {
        let downstream = Stage::new(self.flow().clone(), self.depth() + 1);
        tracing::debug!(stage = downstream.depth(), policy = ?policy, "receive stage attached");
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = StageWorker {
            events: rx,
            flow: self.flow().clone(),
            downstream: downstream.clone(),
            policy,
            handler,
        };
        tokio::task::spawn_local(worker.run::<M, Fut, E>());

        // Subscriptions live as long as the upstream stage.
        let _ = self.attach(Rc::new(RoundFeeder {
            events: tx,
            flow: self.flow().clone(),
            downstream: downstream.clone(),
        }));

        downstream
    }
}

struct StageWorker<T, R, H> {
    events: mpsc::UnboundedReceiver<RoundEvent<T>>,
    flow: Rc<FlowContext>,
    downstream: Stage<R>,
    policy: IterationPolicy<T, R>,
    handler: H,
}

impl<T, R, H> StageWorker<T, R, H>
where
    T: Clone + 'static,
    R: Clone + 'static,
{
    async fn run<M, Fut, E>(mut self)
    where
        M: DeserializeOwned,
        H: Fn(M, Fold<T, R>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let stage = self.downstream.depth();
        while let Some(event) = self.events.recv().await {
            match event {
                RoundEvent::Round { seed, lock } => {
                    if self.downstream.is_terminated() {
                        drop(lock);
                        tracing::trace!(stage, "skipping round of a terminated stage");
                    } else {
                        match self.play::<M, Fut, E>(seed, lock).await {
                            Ok(Some(value)) => self.downstream.emit(value),
                            Ok(None) => tracing::trace!(stage, "round pulled no record"),
                            Err(error) => {
                                tracing::warn!(stage, error = %error, "round failed");
                                self.downstream.fail(error);
                            }
                        }
                    }

                    if let Err(e) = self.flow.barrier.signal() {
                        tracing::error!(stage, error = %e, "round barrier rejected a signal");
                    }
                }
                RoundEvent::Fail(error) => {
                    tracing::debug!(stage, error = %error, "upstream failed");
                    self.downstream.fail(error);
                }
                RoundEvent::Complete => {
                    self.downstream.complete();
                    break;
                }
            }
        }
    }

    /// Run one round. The round lock is released before returning.
    async fn play<M, Fut, E>(&self, seed: T, lock: LockFuture) -> FlowResult<Option<R>>
    where
        M: DeserializeOwned,
        H: Fn(M, Fold<T, R>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let dispatcher = self.flow.dispatcher.upgrade()?;
        let mut plan = self.policy.plan(&seed);
        let _grant = lock.await;

        let mut fold = Fold::Seed(seed);
        let mut pulled = 0usize;
        while !plan.exhausted_after(pulled) {
            let record = dispatcher.next().await?.ok_or(FlowError::StreamExhausted)?;
            let message: M = codec::decode(record, self.flow.config.format)?;
            let result = (self.handler)(message, fold)
                .await
                .map_err(|e| FlowError::Handler(e.to_string()))?;
            pulled += 1;

            let accepted = plan.accepts(&result);
            fold = Fold::Partial(result);
            if accepted {
                break;
            }
        }

        tracing::trace!(stage = self.downstream.depth(), pulled, "round finished");
        match fold {
            Fold::Partial(result) => Ok(Some(result)),
            Fold::Seed(_) => Ok(None),
        }
    }
}
