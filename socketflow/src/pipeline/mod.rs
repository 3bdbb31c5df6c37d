//! Round-based pipelines over a duplex channel.
//!
//! A pipeline starts with [`flow`], which returns the root [`Stage`]. The
//! root emits one tick per *round*. Stages derived with
//! [`Stage::receive`] pull records from the channel's dispatcher and fold
//! them with a handler; [`Stage::send`] transmits each emission back on the
//! channel.
//!
//! # Rounds
//!
//! Every emission that starts a downstream round registers a wait on the
//! flow's round barrier, and every finished round signals it. The root emits
//! its next tick only once the barrier drained, that is once every round
//! triggered by the previous tick, transitively, has finished. Records
//! therefore reach stages in a deterministic order.
//!
//! Receive stages also take a round lock for the duration of a round, so the
//! records of one round are pulled contiguously even when sibling stages
//! share the dispatcher.
//!
//! # Runtime
//!
//! Everything is single-threaded. [`flow`] spawns the drive loop with
//! [`tokio::task::spawn_local`] and receive stages spawn their workers the
//! same way, so pipelines must be built inside a [`tokio::task::LocalSet`].

mod policy;
mod receive;
mod root;
mod send;
mod stage;

pub use policy::{Fold, IterationPolicy};
pub use root::{flow, flow_with_config};
pub use send::Outgoing;
pub use stage::{FnObserver, Observer, Stage, Subscription, Termination};

use std::rc::Rc;

use crate::channel::DuplexChannel;
use crate::config::FlowConfig;
use crate::dispatcher::WeakDispatcher;
use crate::sync::{AsyncMutex, RendezvousChannel};

/// State shared by every stage of one pipeline.
pub(crate) struct FlowContext {
    /// Outbound side, used by send stages.
    pub(crate) channel: Rc<dyn DuplexChannel>,
    /// Inbound side. The drive loop holds the only strong handle.
    pub(crate) dispatcher: WeakDispatcher,
    /// Drains once every round triggered by a root tick has finished.
    pub(crate) barrier: RendezvousChannel,
    /// Held by a receive stage for the duration of a round.
    pub(crate) round_lock: AsyncMutex,
    pub(crate) config: FlowConfig,
}

#[cfg(test)]
impl FlowContext {
    /// Context with a dispatcher but no drive loop.
    pub(crate) fn detached<C: DuplexChannel + 'static>(channel: C) -> Rc<Self> {
        let config = FlowConfig::default();
        let dispatcher =
            crate::dispatcher::MessageDispatcher::with_config(&channel, config.clone());
        Rc::new(Self {
            channel: Rc::new(channel),
            dispatcher: dispatcher.downgrade(),
            barrier: RendezvousChannel::new(),
            round_lock: AsyncMutex::new(),
            config,
        })
    }
}
