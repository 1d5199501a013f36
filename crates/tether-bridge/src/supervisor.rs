//! The reconnect supervisor behind `listen`.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::client::ClientShared;
use crate::error::diagnostic;
use crate::session;

/// Where the listen loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    /// `listen` has not been called.
    Idle,
    /// Opening the duplex call.
    Connecting,
    /// The duplex call is open and relaying.
    Streaming,
    /// Waiting before the next attempt.
    Backoff,
    /// Retries exhausted or the client was shut down.
    Stopped,
}

impl fmt::Display for ListenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenState::Idle => "idle",
            ListenState::Connecting => "connecting",
            ListenState::Streaming => "streaming",
            ListenState::Backoff => "backoff",
            ListenState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Keep a duplex session alive, reconnecting after a fixed backoff.
///
/// `retry_count` is the number of reconnects after the first attempt; a
/// negative value retries forever. The backoff is slept after every attempt,
/// including the last.
pub(crate) async fn run(shared: Arc<ClientShared>, mut retry_count: i32) {
    let backoff = shared.options.backoff;
    info!(retry_count, "listen loop started");

    loop {
        shared.set_state(ListenState::Connecting);
        let attempt = shared.record_attempt();

        let reason = match session::run(&shared).await {
            Ok(()) => "duplex stream ended".to_string(),
            Err(e) => diagnostic(&e),
        };
        shared.correlator().reap();

        shared.set_state(ListenState::Backoff);
        warn!(
            attempt,
            retry_count,
            "duplex stream failed ({}), {} after {:?}",
            reason,
            next_step(retry_count),
            backoff
        );
        tokio::time::sleep(backoff).await;

        if retry_count == 0 {
            break;
        }
        if retry_count > 0 {
            retry_count -= 1;
        }
    }

    shared.set_state(ListenState::Stopped);
    info!("listen loop stopped, retries exhausted");
}

/// What the loop does once the current backoff ends.
fn next_step(retry_count: i32) -> &'static str {
    if retry_count == 0 {
        "no retries left, stopping"
    } else {
        "retrying"
    }
}
