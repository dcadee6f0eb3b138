//! Client-side `last_operation` polling with a deadline.

use std::time::Duration;

use stencil_core::UserInfo;
use tokio::time::Instant;
use tracing::debug;

use crate::engine::{BrokerEngine, LastOperationResponse, Operation};
use crate::error::BrokerResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// The last state observed.
    pub last: LastOperationResponse,
    /// True when the deadline passed before a terminal state was seen.
    pub timed_out: bool,
    pub polls: u32,
}

/// Poll until the operation reaches a terminal state or `deadline` has
/// elapsed. Only reads; giving up leaves the instance untouched.
pub async fn poll_last_operation(
    engine: &BrokerEngine,
    actor: &UserInfo,
    instance_id: &str,
    operation: Operation,
    interval: Duration,
    deadline: Duration,
) -> BrokerResult<PollOutcome> {
    let give_up_at = Instant::now() + deadline;
    let mut polls = 0;
    loop {
        let last = engine.last_operation(actor, instance_id, operation)?;
        polls += 1;
        if last.state.is_terminal() {
            debug!(instance = instance_id, %operation, polls, state = ?last.state, "operation finished");
            return Ok(PollOutcome {
                last,
                timed_out: false,
                polls,
            });
        }
        if Instant::now() + interval > give_up_at {
            debug!(instance = instance_id, %operation, polls, "gave up polling");
            return Ok(PollOutcome {
                last,
                timed_out: true,
                polls,
            });
        }
        tokio::time::sleep(interval).await;
    }
}
