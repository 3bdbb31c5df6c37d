//! # socketflow
//!
//! Round-based message pipelines over a duplex channel.
//!
//! A duplex channel pushes inbound messages at its own pace. socketflow turns
//! that push stream into a pull sequence and lets you describe a conversation
//! as a chain of stages, each consuming a known number of records per round:
//!
//! - **Synchronization primitives** ([`sync`]): a FIFO rendezvous channel
//!   with a drain notification, and an async mutex with explicit release.
//! - **Dispatcher** ([`MessageDispatcher`]): buffers channel arrivals and
//!   serves them one at a time, waiting for the channel to open first.
//! - **Pipelines** ([`flow`]): a root stage ticking once per round, receive
//!   stages folding records with an [`IterationPolicy`], send stages writing
//!   back on the channel, and replaying subscriptions.
//!
//! The crate is single-threaded: state is shared through `Rc<RefCell<_>>` and
//! tasks are spawned with [`tokio::task::spawn_local`], so pipelines run
//! inside a [`tokio::task::LocalSet`] on a current-thread runtime.
//!
//! ## Example
//!
//! ```no_run
//! use std::convert::Infallible;
//!
//! use socketflow::{Fold, IterationPolicy, MemoryChannel, flow};
//!
//! # async fn run() {
//! let channel = MemoryChannel::opened();
//! let _subscription = flow(channel.clone())
//!     .receive(|count: usize, _: Fold<(), usize>| async move { Ok::<_, Infallible>(count) })
//!     .receive_with(
//!         |word: String, fold: Fold<usize, String>| async move {
//!             Ok::<_, Infallible>(fold.fold_with(|_| word.clone(), |acc| acc + " " + &word))
//!         },
//!         IterationPolicy::computed(|count: &usize| *count),
//!     )
//!     .subscribe(|sentence| println!("{}", sentence));
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatcher;
mod error;
pub mod pipeline;
pub mod sync;

// Channel exports
pub use channel::{
    ChannelListener, DuplexChannel, InboundMessage, MemoryChannel, OutboundMessage, ReadyState,
    SendOptions,
};

// Configuration exports
pub use codec::MessageFormat;
pub use config::{DEFAULT_OPEN_TIMEOUT, FlowConfig};

// Error exports
pub use error::{FlowError, FlowResult};

// Dispatcher and pipeline exports
pub use dispatcher::{MessageDispatcher, WeakDispatcher};
pub use pipeline::{
    FnObserver, Fold, IterationPolicy, Observer, Outgoing, Stage, Subscription, Termination, flow,
    flow_with_config,
};

// Synchronization exports
pub use sync::{AsyncMutex, RendezvousChannel};
