use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Ctrl-C aware stop flag shared by long-running commands.
#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Install a Ctrl-C listener. Requires a Tokio runtime.
    pub fn new() -> Self {
        let signal = Self::manual();
        let listener = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                listener.trigger();
            }
        });
        signal
    }

    /// A signal that only fires through [`ShutdownSignal::trigger`].
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`. Returns `false` when interrupted by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.triggered(),
            _ = self.notify.notified() => false,
        }
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        while !self.triggered() {
            let notified = self.notify.notified();
            if self.triggered() {
                break;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_interrupts_sleep() {
        let signal = ShutdownSignal::manual();
        let sleeper = signal.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.trigger();
        assert!(!handle.await.unwrap());
        assert!(!signal.sleep(Duration::from_millis(1)).await);
        signal.wait().await;
    }
}
