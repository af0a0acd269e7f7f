//! The periodic silent-renewal task.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::controller::{Inner, SessionController};

/// Handle to the running renewal task. Dropping it stops the task.
pub(crate) struct RenewalTimer {
    handle: JoinHandle<()>,
    generation: u64,
}

impl RenewalTimer {
    /// Spawn a task that calls `renew_now` every `period`, first one period from now.
    ///
    /// The task only holds a weak reference, so it ends on its own once the
    /// last controller handle is dropped.
    pub fn spawn(inner: Weak<Inner>, period: Duration, generation: u64) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(strong) = inner.upgrade() else {
                    debug!(generation, "Controller dropped, renewal timer exiting");
                    break;
                };
                let controller = SessionController::from_inner(strong);
                debug!(generation, "Renewal timer fired");
                if let Err(e) = controller.renew_now().await {
                    warn!(generation, error = %e, kind = ?e.kind(), "Scheduled renewal failed");
                }
            }
        });

        Self { handle, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
