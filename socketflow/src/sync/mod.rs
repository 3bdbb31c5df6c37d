//! Synchronization primitives for single-threaded tasks.
//!
//! - [`RendezvousChannel`]: FIFO pairing of wait and signal requests with a
//!   drain notification.
//! - [`AsyncMutex`]: FIFO mutual exclusion with explicit release.
//!
//! Both keep an explicit queue of `oneshot` completion handles and rely on
//! `Rc<RefCell<_>>`; they are meant for a current-thread runtime.

mod mutex;
mod rendezvous;

pub use mutex::{AsyncMutex, LockFuture, LockGrant};
pub use rendezvous::{Drained, Rendezvous, RendezvousChannel, RequestKind};
