//! Cancellation, pause and observable state shared with the host.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Observable lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Cancelling,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Cancelling => "cancelling",
        };
        f.write_str(name)
    }
}

struct Inner {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    state: Mutex<RunState>,
}

/// Handle the host uses to pause, resume or cancel a run.
///
/// Cheap to clone; every clone controls the same run.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<Inner>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancel: CancellationToken::new(),
                paused,
                state: Mutex::new(RunState::Idle),
            }),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn cancel(&self) {
        log::info!("Cancellation requested");
        if self.state() != RunState::Idle {
            self.set_state(RunState::Cancelling);
        }
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    pub fn state(&self) -> RunState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_state(&self, state: RunState) {
        let mut current = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != state {
            log::debug!("Run state {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Block while paused. Returns `false` if the run was cancelled.
    pub async fn wait_if_paused(&self) -> bool {
        let mut paused = self.inner.paused.subscribe();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                if self.state() == RunState::Paused {
                    log::info!("Resumed");
                    self.set_state(RunState::Running);
                }
                return true;
            }
            if self.state() != RunState::Paused {
                log::info!("Paused");
                self.set_state(RunState::Paused);
            }
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` if cancelled.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        tokio::select! {
            _ = self.inner.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_not_paused_passes_through() {
        let control = RunControl::new();
        assert!(control.wait_if_paused().await);
    }

    #[tokio::test]
    async fn test_resume_releases_waiter() {
        let control = RunControl::new();
        control.set_state(RunState::Running);
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(control.state(), RunState::Paused);

        control.resume();
        assert!(waiter.await.unwrap());
        assert_eq!(control.state(), RunState::Running);
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiter() {
        let control = RunControl::new();
        control.set_state(RunState::Running);
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_if_paused().await })
        };
        control.cancel();
        assert!(!waiter.await.unwrap());
        assert!(control.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_is_cancellable() {
        let control = RunControl::new();
        control.cancel();
        assert!(!control.sleep(Duration::from_secs(60)).await);
        assert_eq!(control.state(), RunState::Idle);
    }
}
