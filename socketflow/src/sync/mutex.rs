//! AsyncMutex: FIFO mutual exclusion for single-threaded tasks.
//!
//! Lock requests are queued in call order. Releasing hands the lock directly
//! to the oldest live waiter, so a late `lock()` can never overtake an
//! earlier one.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Identifies one grant of the lock.
type Generation = u64;

struct MutexState {
    /// Generation currently holding the lock.
    holder: Option<Generation>,

    /// Waiters in arrival order.
    waiters: VecDeque<(Generation, oneshot::Sender<Generation>)>,

    /// Next generation to hand out.
    next_generation: Generation,
}

impl MutexState {
    fn allocate(&mut self) -> Generation {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

/// Asynchronous mutex whose lock queue is strictly FIFO.
///
/// Cloning yields another handle to the same mutex.
#[derive(Clone)]
pub struct AsyncMutex {
    state: Rc<RefCell<MutexState>>,
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncMutex {
    /// Create an unlocked mutex.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MutexState {
                holder: None,
                waiters: VecDeque::new(),
                next_generation: 0,
            })),
        }
    }

    /// Request the lock.
    ///
    /// The request is queued immediately; the returned future resolves to a
    /// [`LockGrant`] once every earlier request has been released.
    pub fn lock(&self) -> LockFuture {
        let mut state = self.state.borrow_mut();
        let generation = state.allocate();

        if state.holder.is_none() {
            state.holder = Some(generation);
            return LockFuture {
                mutex: self.clone(),
                generation,
                granted: None,
                acquired: true,
            };
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back((generation, tx));
        tracing::trace!(generation, waiters = state.waiters.len(), "lock queued");
        LockFuture {
            mutex: self.clone(),
            generation,
            granted: Some(rx),
            acquired: false,
        }
    }

    /// Release the current holder.
    ///
    /// Returns `false` without side effects when nobody holds the lock.
    pub fn release(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(previous) = state.holder.take() else {
            return false;
        };

        while let Some((generation, waiter)) = state.waiters.pop_front() {
            state.holder = Some(generation);
            if waiter.send(generation).is_ok() {
                tracing::trace!(previous, generation, "lock handed over");
                return true;
            }
            // Waiter gave up before being granted.
            state.holder = None;
        }

        tracing::trace!(previous, "lock released");
        true
    }

    /// Release every holder and queued waiter in order.
    ///
    /// Intended for teardown.
    pub fn flush(&self) {
        let mut released = 0usize;
        while self.release() {
            released += 1;
        }
        tracing::debug!(released, "lock queue flushed");
    }

    /// Whether some request currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.borrow().holder.is_some()
    }

    /// Number of requests waiting behind the holder.
    pub fn waiters(&self) -> usize {
        self.state.borrow().waiters.len()
    }

    fn release_if_holder(&self, generation: Generation) -> bool {
        if self.state.borrow().holder != Some(generation) {
            return false;
        }
        self.release()
    }
}

/// Future returned by [`AsyncMutex::lock`].
///
/// Dropping it after the lock was granted but before it was observed passes
/// the lock on to the next waiter.
pub struct LockFuture {
    mutex: AsyncMutex,
    generation: Generation,
    granted: Option<oneshot::Receiver<Generation>>,
    acquired: bool,
}

impl Future for LockFuture {
    type Output = LockGrant;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(granted) = this.granted.as_mut() {
            match Pin::new(granted).poll(cx) {
                Poll::Ready(_) => {
                    this.granted = None;
                    this.acquired = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        // Ownership of the grant moves to the LockGrant.
        this.acquired = false;
        Poll::Ready(LockGrant {
            mutex: this.mutex.clone(),
            generation: this.generation,
        })
    }
}

impl Drop for LockFuture {
    fn drop(&mut self) {
        if let Some(granted) = self.granted.as_mut() {
            if granted.try_recv().is_ok() {
                self.acquired = true;
            }
        }
        if self.acquired {
            self.mutex.release_if_holder(self.generation);
        }
    }
}

/// Capability to release one grant of an [`AsyncMutex`].
///
/// Dropping the grant releases the lock if it is still held by this grant.
#[must_use = "dropping a LockGrant releases the lock immediately"]
pub struct LockGrant {
    mutex: AsyncMutex,
    generation: Generation,
}

impl LockGrant {
    /// Release the lock. Returns `false` if this grant no longer held it.
    pub fn release(self) -> bool {
        // Generations are never reused, so the drop that follows is a no-op.
        self.mutex.release_if_holder(self.generation)
    }

    /// Whether this grant is still the active holder.
    pub fn is_held(&self) -> bool {
        self.mutex.state.borrow().holder == Some(self.generation)
    }
}

impl Drop for LockGrant {
    fn drop(&mut self) {
        self.mutex.release_if_holder(self.generation);
    }
}
