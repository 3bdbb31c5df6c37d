//! Pipeline test modules and shared helpers.

mod conversation;
mod folds;
mod stream;

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use socketflow::{MemoryChannel, Stage};
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

/// Run `test` on a current-thread runtime inside a `LocalSet`.
pub fn run_local<F: Future>(test: F) -> F::Output {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_test_writer()
        .try_init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime");

    LocalSet::new().block_on(&runtime, test)
}

/// Deliver text frames to `channel` in order.
pub fn deliver_all(channel: &MemoryChannel, messages: &[&str]) {
    for message in messages {
        channel.deliver_text(*message);
    }
}

/// Wait until `stage` emitted at least `count` values and return them.
pub async fn wait_for_emissions<T: Clone + 'static>(stage: &Stage<T>, count: usize) -> Vec<T> {
    let emitted = Rc::new(Notify::new());
    let subscription = {
        let emitted = emitted.clone();
        stage.subscribe(move |_| emitted.notify_one())
    };

    let emissions = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let emissions = stage.emissions();
            if emissions.len() >= count {
                return emissions;
            }
            emitted.notified().await;
        }
    })
    .await
    .expect("stage did not emit in time");

    subscription.unsubscribe();
    emissions
}
