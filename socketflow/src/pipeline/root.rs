//! Root stage and the round drive loop.

use std::rc::Rc;

use super::FlowContext;
use super::stage::Stage;
use crate::channel::DuplexChannel;
use crate::config::FlowConfig;
use crate::dispatcher::MessageDispatcher;
use crate::sync::{AsyncMutex, RendezvousChannel};

/// Start a pipeline on `channel` with the default configuration.
///
/// See [`flow_with_config`].
pub fn flow<C>(channel: C) -> Stage<()>
where
    C: DuplexChannel + 'static,
{
    flow_with_config(channel, FlowConfig::default())
}

/// Start a pipeline on `channel`.
///
/// Attaches a [`MessageDispatcher`] to the channel and spawns the drive
/// loop, which:
///
/// 1. waits for the channel to open, failing the root with
///    [`FlowError::ConnectionTimeout`](crate::FlowError::ConnectionTimeout)
///    after [`FlowConfig::open_timeout`];
/// 2. while the dispatcher is available, emits a tick on the root and waits
///    until every round it triggered has finished, or until the stream ends;
/// 3. completes the root.
///
/// Build the chain before yielding to the runtime: the first tick is emitted
/// once the drive loop gets to run.
///
/// # Panics
///
/// Panics if called outside a [`tokio::task::LocalSet`].
pub fn flow_with_config<C>(channel: C, config: FlowConfig) -> Stage<()>
where
    C: DuplexChannel + 'static,
{
    let dispatcher = MessageDispatcher::with_config(&channel, config.clone());
    let context = Rc::new(FlowContext {
        channel: Rc::new(channel),
        dispatcher: dispatcher.downgrade(),
        barrier: RendezvousChannel::new(),
        round_lock: AsyncMutex::new(),
        config,
    });

    let root = Stage::new(context, 0);
    tokio::task::spawn_local(drive(root.clone(), dispatcher));
    root
}

async fn drive(root: Stage<()>, dispatcher: MessageDispatcher) {
    let flow = root.flow().clone();

    if let Err(e) = dispatcher.wait_open().await {
        tracing::error!(error = %e, "pipeline could not start");
        root.fail(e);
        return;
    }

    let mut rounds = 0u64;
    while dispatcher.available() {
        let drained = flow.barrier.wait_all();
        root.emit(());
        rounds += 1;

        tokio::select! {
            biased;
            _ = drained => {
                tracing::trace!(round = rounds, "round drained");
            }
            _ = dispatcher.unavailable() => {
                tracing::debug!(
                    round = rounds,
                    pending = flow.barrier.pending(),
                    "stream ended during round"
                );
                break;
            }
        }
    }

    // Stages still queued for the round lock find the stream ended.
    flow.round_lock.flush();
    tracing::info!(rounds, "pipeline finished");
    root.complete();
}
