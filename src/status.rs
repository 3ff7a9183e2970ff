use async_std::channel::Receiver;
use async_std::task;
use chrono::{DateTime, Utc};
use log::*;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::PollError;
use crate::observe::{lock, Observable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Saving,
    Saved,
    Error,
}

/**
 * What the "saving / saved / error" indicator should show
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncStatus {
    state: SyncState,
    error: Option<PollError>,
    changed_at: DateTime<Utc>,
}

impl SyncStatus {
    fn new(state: SyncState, error: Option<PollError>) -> Self {
        SyncStatus {
            state,
            error,
            changed_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /**
     * Only set while the state is `Error`
     */
    pub fn error(&self) -> Option<&PollError> {
        self.error.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(PollError::message)
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }
}

#[derive(Debug)]
struct TrackerState {
    status: Observable<SyncStatus>,
    /**
     * Bumped on every transition; a reset timer only fires if nothing happened since it was armed
     */
    epoch: u64,
    latest_started: u64,
    latest_settled: u64,
}

impl TrackerState {
    fn transition(&mut self, label: &str, state: SyncState, error: Option<PollError>) {
        debug!(
            "sync status of {}: {:?} -> {:?}",
            label,
            self.status.get().state(),
            state
        );
        self.epoch += 1;
        self.status.set(SyncStatus::new(state, error));
    }
}

/**
 * Drives the sync indicator of one editable unit, such as a poll.
 *
 * Every remote operation is numbered by its caller, numbers only ever grow. Outcomes
 * of operations that were overtaken by a newer one cannot hide the newer one's outcome.
 */
#[derive(Clone, Debug)]
pub struct SyncStatusTracker {
    label: Arc<str>,
    reset_after: Duration,
    inner: Arc<Mutex<TrackerState>>,
}

impl SyncStatusTracker {
    pub fn new(label: &str, reset_after: Duration) -> Self {
        SyncStatusTracker {
            label: Arc::from(label),
            reset_after,
            inner: Arc::new(Mutex::new(TrackerState {
                status: Observable::new(SyncStatus::new(SyncState::Idle, None)),
                epoch: 0,
                latest_started: 0,
                latest_settled: 0,
            })),
        }
    }

    pub fn status(&self) -> SyncStatus {
        lock(&self.inner).status.get().clone()
    }

    pub fn state(&self) -> SyncState {
        lock(&self.inner).status.get().state()
    }

    pub fn subscribe(&self) -> Receiver<SyncStatus> {
        lock(&self.inner).status.subscribe()
    }

    /**
     * A remote call started; cancels any pending reset to idle
     */
    pub fn begin(&self, operation: u64) {
        let mut inner = lock(&self.inner);
        inner.latest_started = inner.latest_started.max(operation);
        inner.transition(&self.label, SyncState::Saving, None);
    }

    /**
     * The call numbered `operation` succeeded.
     *
     * Shows `Saved` only when no newer call is still running, and returns whether it did.
     */
    pub fn succeed(&self, operation: u64) -> bool {
        let epoch = {
            let mut inner = lock(&self.inner);
            if operation < inner.latest_started {
                debug!(
                    "{}: ignoring success of operation {}, operation {} is newer",
                    self.label, operation, inner.latest_started
                );
                return false;
            }
            inner.latest_settled = operation;
            inner.transition(&self.label, SyncState::Saved, None);
            inner.epoch
        };
        self.schedule_reset(epoch);
        true
    }

    /**
     * The call numbered `operation` failed.
     *
     * Shows the error unless a newer call has already settled, and returns whether it did.
     * An error stays until it is acknowledged or another call begins.
     */
    pub fn fail(&self, operation: u64, error: PollError) -> bool {
        let mut inner = lock(&self.inner);
        if operation < inner.latest_settled {
            debug!(
                "{}: not showing failure of operation {} over settled operation {}: {}",
                self.label, operation, inner.latest_settled, error
            );
            return false;
        }
        inner.latest_settled = operation;
        inner.transition(&self.label, SyncState::Error, Some(error));
        true
    }

    /**
     * The user dismissed the error
     */
    pub fn acknowledge(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.status.get().state() != SyncState::Error {
            return false;
        }
        inner.transition(&self.label, SyncState::Idle, None);
        true
    }

    fn schedule_reset(&self, epoch: u64) {
        let inner = Arc::downgrade(&self.inner);
        let label = Arc::clone(&self.label);
        let delay = self.reset_after;

        task::spawn(async move {
            task::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                let mut inner = lock(&inner);
                if inner.epoch == epoch && inner.status.get().state() == SyncState::Saved {
                    inner.transition(&label, SyncState::Idle, None);
                }
            }
        });
    }
}
