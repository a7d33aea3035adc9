use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{Inner, RedirectCache};
use crate::error::AppError;

/// Longest a single refresh may run before it is abandoned.
const UPDATE_IDLE_LIMIT: Duration = Duration::from_secs(60);

pub(super) struct ObserverHandle {
    close: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RedirectCache {
    /// Starts the background refresh task, ticking every `interval`.
    ///
    /// Only one task may run per cache. The first refresh happens one full
    /// interval after the call.
    pub fn observe(&self, interval: Duration) -> Result<(), AppError> {
        let mut slot = self.inner.observer.lock();
        if slot.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            return Err(AppError::ObserverAlreadyRunning);
        }

        let (close, closed) = oneshot::channel();
        let task = tokio::spawn(run(Arc::downgrade(&self.inner), interval, closed));
        *slot = Some(ObserverHandle { close, task });

        info!(interval_secs = interval.as_secs(), "Cache observer started");
        Ok(())
    }

    /// Stops the refresh task and waits for it to finish.
    pub async fn close_observer(&self) {
        let handle = self.inner.observer.lock().take();
        let Some(handle) = handle else {
            return;
        };

        let _ = handle.close.send(());
        if let Err(e) = handle.task.await {
            error!("Cache observer task failed: {}", e);
        }
        info!("Cache observer stopped");
    }

    pub fn is_observing(&self) -> bool {
        self.inner
            .observer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }
}

async fn run(weak: Weak<Inner>, interval: Duration, mut closed: oneshot::Receiver<()>) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut closed => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = weak.upgrade() else {
            debug!("Cache dropped, observer exiting");
            break;
        };
        let cache = RedirectCache { inner };

        tokio::select! {
            biased;
            _ = &mut closed => break,
            refreshed = time::timeout(UPDATE_IDLE_LIMIT, cache.update()) => match refreshed {
                Ok(Ok(count)) => debug!(count, "Periodic refresh complete"),
                Ok(Err(e)) => error!("Periodic cache refresh failed: {}", e),
                Err(_) => warn!(
                    limit_secs = UPDATE_IDLE_LIMIT.as_secs(),
                    "Periodic cache refresh abandoned"
                ),
            },
        }
    }
}
