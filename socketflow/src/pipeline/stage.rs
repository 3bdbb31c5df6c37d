//! Stage handles: replay log, terminal state and observers.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::sync::oneshot;

use super::FlowContext;
use crate::error::FlowError;

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Upstream completed and every round finished.
    Completed,
    /// A round failed, or failure arrived from upstream.
    Failed(FlowError),
}

/// Receives the events of a [`Stage`].
pub trait Observer<T> {
    /// A round produced a value.
    fn on_emit(&self, value: &T);

    /// The stage failed. No further events follow.
    fn on_error(&self, error: &FlowError) {
        let _ = error;
    }

    /// The stage completed. No further events follow.
    fn on_complete(&self) {}
}

type EmitFn<T> = Box<dyn Fn(&T)>;
type ErrorFn = Box<dyn Fn(&FlowError)>;
type CompleteFn = Box<dyn Fn()>;

/// [`Observer`] assembled from closures.
pub struct FnObserver<T> {
    on_emit: EmitFn<T>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl<T> FnObserver<T> {
    /// Observer reacting to emissions only.
    pub fn new<F>(on_emit: F) -> Self
    where
        F: Fn(&T) + 'static,
    {
        Self {
            on_emit: Box::new(on_emit),
            on_error: None,
            on_complete: None,
        }
    }

    /// Also react to failure.
    pub fn with_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&FlowError) + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Also react to completion.
    pub fn with_complete<F>(mut self, on_complete: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }
}

impl<T> Observer<T> for FnObserver<T> {
    fn on_emit(&self, value: &T) {
        (self.on_emit)(value)
    }

    fn on_error(&self, error: &FlowError) {
        if let Some(on_error) = &self.on_error {
            on_error(error)
        }
    }

    fn on_complete(&self) {
        if let Some(on_complete) = &self.on_complete {
            on_complete()
        }
    }
}

struct StageCore<T> {
    /// Every value emitted so far, replayed to late subscribers.
    emissions: Vec<T>,
    termination: Option<Termination>,
    observers: Vec<(u64, Rc<dyn Observer<T>>)>,
    next_observer: u64,
}

/// One step of a pipeline.
///
/// A stage is a cheap handle: clones share the same emissions and
/// observers. Stages are derived from the root returned by
/// [`flow`](crate::flow) with [`receive`](Stage::receive) and
/// [`send`](Stage::send).
///
/// Subscribing replays everything the stage emitted so far, then its
/// terminal state if it has one, then live events. Stages chained with
/// `receive` and `send` only see emissions made after they were attached.
pub struct Stage<T> {
    core: Rc<RefCell<StageCore<T>>>,
    flow: Rc<FlowContext>,
    depth: usize,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            flow: self.flow.clone(),
            depth: self.depth,
        }
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("Stage")
            .field("depth", &self.depth)
            .field("emissions", &core.emissions.len())
            .field("observers", &core.observers.len())
            .field("termination", &core.termination)
            .finish()
    }
}

impl<T: Clone + 'static> Stage<T> {
    pub(crate) fn new(flow: Rc<FlowContext>, depth: usize) -> Self {
        Self {
            core: Rc::new(RefCell::new(StageCore {
                emissions: Vec::new(),
                termination: None,
                observers: Vec::new(),
                next_observer: 0,
            })),
            flow,
            depth,
        }
    }

    pub(crate) fn flow(&self) -> &Rc<FlowContext> {
        &self.flow
    }

    /// Position in the chain; the root is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Values emitted so far, oldest first.
    pub fn emissions(&self) -> Vec<T> {
        self.core.borrow().emissions.clone()
    }

    /// Terminal state, if the stage ended.
    pub fn termination(&self) -> Option<Termination> {
        self.core.borrow().termination.clone()
    }

    /// Whether the stage completed or failed.
    pub fn is_terminated(&self) -> bool {
        self.core.borrow().termination.is_some()
    }

    /// Subscribe to emissions.
    ///
    /// Prior emissions are replayed synchronously before this returns.
    pub fn subscribe<F>(&self, on_emit: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.subscribe_with(Rc::new(FnObserver::new(on_emit)))
    }

    /// Subscribe an observer to emissions, failure and completion.
    ///
    /// Prior emissions and the terminal state are replayed synchronously
    /// before this returns.
    pub fn subscribe_with(&self, observer: Rc<dyn Observer<T>>) -> Subscription {
        let history = self.emissions();
        for value in &history {
            observer.on_emit(value);
        }
        self.attach(observer)
    }

    /// Resolve once the stage completed or failed.
    ///
    /// Dropping the future detaches its observer.
    pub async fn settled(&self) -> Termination {
        let (tx, rx) = oneshot::channel();
        let _guard = DetachOnDrop(Some(self.attach(Rc::new(Settle {
            tx: RefCell::new(Some(tx)),
        }))));
        // Settle is resolved before terminate() clears the observers.
        rx.await.unwrap_or(Termination::Failed(FlowError::DispatcherVanished))
    }

    /// Register an observer for live events only.
    ///
    /// An already terminated stage reports its terminal state immediately.
    pub(crate) fn attach(&self, observer: Rc<dyn Observer<T>>) -> Subscription {
        let termination = self.termination();
        match termination {
            Some(Termination::Completed) => {
                observer.on_complete();
                return Subscription::detached();
            }
            Some(Termination::Failed(error)) => {
                observer.on_error(&error);
                return Subscription::detached();
            }
            None => {}
        }

        let id = {
            let mut core = self.core.borrow_mut();
            let id = core.next_observer;
            core.next_observer += 1;
            core.observers.push((id, observer));
            id
        };

        let core = Rc::downgrade(&self.core);
        Subscription {
            detach: Some(Box::new(move || detach(&core, id))),
        }
    }

    pub(crate) fn emit(&self, value: T) {
        let observers = {
            let mut core = self.core.borrow_mut();
            if core.termination.is_some() {
                tracing::trace!(stage = self.depth, "ignoring emission after termination");
                return;
            }
            core.emissions.push(value.clone());
            snapshot(&core.observers)
        };

        for observer in observers {
            observer.on_emit(&value);
        }
    }

    pub(crate) fn fail(&self, error: FlowError) {
        let Some(observers) = self.terminate(Termination::Failed(error.clone())) else {
            return;
        };
        for observer in observers {
            observer.on_error(&error);
        }
    }

    pub(crate) fn complete(&self) {
        let Some(observers) = self.terminate(Termination::Completed) else {
            return;
        };
        tracing::debug!(stage = self.depth, "stage completed");
        for observer in observers {
            observer.on_complete();
        }
    }

    fn terminate(&self, termination: Termination) -> Option<Vec<Rc<dyn Observer<T>>>> {
        let mut core = self.core.borrow_mut();
        if core.termination.is_some() {
            return None;
        }
        core.termination = Some(termination);
        let observers = snapshot(&core.observers);
        core.observers.clear();
        Some(observers)
    }
}

fn snapshot<T>(observers: &[(u64, Rc<dyn Observer<T>>)]) -> Vec<Rc<dyn Observer<T>>> {
    observers.iter().map(|(_, observer)| observer.clone()).collect()
}

fn detach<T>(core: &Weak<RefCell<StageCore<T>>>, id: u64) {
    if let Some(core) = core.upgrade() {
        core.borrow_mut().observers.retain(|(observer, _)| *observer != id);
    }
}

struct Settle {
    tx: RefCell<Option<oneshot::Sender<Termination>>>,
}

impl Settle {
    fn resolve(&self, termination: Termination) {
        if let Some(tx) = self.tx.borrow_mut().take() {
            let _ = tx.send(termination);
        }
    }
}

impl<T> Observer<T> for Settle {
    fn on_emit(&self, _value: &T) {}

    fn on_error(&self, error: &FlowError) {
        self.resolve(Termination::Failed(error.clone()));
    }

    fn on_complete(&self) {
        self.resolve(Termination::Completed);
    }
}

struct DetachOnDrop(Option<Subscription>);

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        if let Some(subscription) = self.0.take() {
            subscription.unsubscribe();
        }
    }
}

/// Registration of an observer on a stage.
///
/// Dropping the subscription keeps the observer attached; call
/// [`unsubscribe`](Subscription::unsubscribe) to detach it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn detached() -> Self {
        Self { detach: None }
    }

    /// Whether the observer is still attached to a live stage.
    pub fn is_attached(&self) -> bool {
        self.detach.is_some()
    }

    /// Stop receiving events.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::pipeline::FlowContext;

    fn stage() -> Stage<u32> {
        let channel = MemoryChannel::opened();
        Stage::new(FlowContext::detached(channel), 1)
    }

    fn recorder(stage: &Stage<u32>) -> (Rc<RefCell<Vec<String>>>, Subscription) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let observer = {
            let emitted = events.clone();
            let failed = events.clone();
            let completed = events.clone();
            FnObserver::new(move |v: &u32| emitted.borrow_mut().push(format!("emit:{}", v)))
                .with_error(move |e| failed.borrow_mut().push(format!("error:{}", e)))
                .with_complete(move || completed.borrow_mut().push("complete".to_string()))
        };
        let subscription = stage.subscribe_with(Rc::new(observer));
        (events, subscription)
    }

    #[test]
    fn test_live_emissions_reach_observers() {
        let stage = stage();
        let (events, _subscription) = recorder(&stage);

        stage.emit(1);
        stage.emit(2);
        stage.complete();
        stage.emit(3);

        assert_eq!(*events.borrow(), vec!["emit:1", "emit:2", "complete"]);
        assert_eq!(stage.emissions(), vec![1, 2]);
        assert_eq!(stage.termination(), Some(Termination::Completed));
    }

    #[test]
    fn test_late_subscriber_gets_replay_then_terminal() {
        let stage = stage();
        stage.emit(7);
        stage.emit(8);
        stage.fail(FlowError::StreamExhausted);

        let (events, subscription) = recorder(&stage);
        assert!(!subscription.is_attached());
        assert_eq!(
            *events.borrow(),
            vec![
                "emit:7".to_string(),
                "emit:8".to_string(),
                format!("error:{}", FlowError::StreamExhausted),
            ]
        );
    }

    #[test]
    fn test_replay_precedes_live_events() {
        let stage = stage();
        stage.emit(1);
        let (events, _subscription) = recorder(&stage);
        stage.emit(2);
        assert_eq!(*events.borrow(), vec!["emit:1", "emit:2"]);
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let stage = stage();
        let (events, subscription) = recorder(&stage);
        stage.emit(1);
        subscription.unsubscribe();
        stage.emit(2);
        assert_eq!(*events.borrow(), vec!["emit:1"]);
    }

    #[test]
    fn test_attach_skips_history() {
        let stage = stage();
        stage.emit(1);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = stage.attach(Rc::new(FnObserver::new(move |v: &u32| {
            sink.borrow_mut().push(*v)
        })));
        stage.emit(2);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn test_first_termination_wins() {
        let stage = stage();
        stage.fail(FlowError::Handler("boom".to_string()));
        stage.complete();
        assert_eq!(
            stage.termination(),
            Some(Termination::Failed(FlowError::Handler("boom".to_string())))
        );
    }

    #[tokio::test]
    async fn test_settled_resolves_on_completion() {
        let stage = stage();
        let settled = stage.settled();
        tokio::pin!(settled);

        assert!(poll_briefly(&mut settled).await.is_none());
        stage.complete();
        assert_eq!(settled.await, Termination::Completed);
        assert_eq!(stage.settled().await, Termination::Completed);
    }

    #[tokio::test]
    async fn test_dropped_settled_detaches() {
        let stage = stage();
        for _ in 0..3 {
            let settled = stage.settled();
            tokio::pin!(settled);
            assert!(poll_briefly(&mut settled).await.is_none());
            assert_eq!(stage.core.borrow().observers.len(), 1);
        }
        assert!(stage.core.borrow().observers.is_empty());

        stage.complete();
        assert_eq!(stage.settled().await, Termination::Completed);
    }

    async fn poll_briefly<F: std::future::Future + Unpin>(future: &mut F) -> Option<F::Output> {
        tokio::time::timeout(std::time::Duration::from_millis(1), future)
            .await
            .ok()
    }
}
