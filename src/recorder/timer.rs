//! Cancellable one-shot stop timer
//!
//! Each started timer owns an `armed` flag shared with its fire task. The
//! fire path must win [`TimerTicket::claim`] before acting and cancellation
//! clears the flag, so a cancelled timer can never fire even if its deadline
//! has already passed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handed to the fire callback
#[derive(Debug)]
pub struct TimerTicket {
    armed: Arc<AtomicBool>,
}

impl TimerTicket {
    /// Disarm and return `true` if the timer was still armed
    pub fn claim(&self) -> bool {
        self.armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Default)]
pub struct StopTimer {
    armed: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
}

impl StopTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Armed and not yet fired or cancelled
    pub fn is_alive(&self) -> bool {
        self.armed
            .as_ref()
            .map(|armed| armed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Start the timer unless one is already alive.
    ///
    /// Returns `false` (and does nothing) when a timer is alive.
    pub fn start<F, Fut>(&mut self, timeout: Duration, on_fire: F) -> bool
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_alive() {
            return false;
        }

        let armed = Arc::new(AtomicBool::new(true));
        let ticket = TimerTicket {
            armed: armed.clone(),
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_fire(ticket).await;
        });

        self.armed = Some(armed);
        self.handle = Some(handle);
        true
    }

    /// Cancel the timer. Returns `true` if it was alive.
    pub fn cancel(&mut self) -> bool {
        let was_alive = self
            .armed
            .take()
            .map(|armed| armed.swap(false, Ordering::AcqRel))
            .unwrap_or(false);

        if let Some(handle) = self.handle.take() {
            if was_alive {
                handle.abort();
            }
        }

        was_alive
    }
}

impl Drop for StopTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(
        fired: &Arc<AtomicUsize>,
    ) -> impl FnOnce(TimerTicket) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> {
        let fired = fired.clone();
        move |ticket| {
            Box::pin(async move {
                if ticket.claim() {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_timeout() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = StopTimer::new();

        assert!(timer.start(Duration::from_secs(2), counting_callback(&fired)));
        assert!(timer.is_alive());

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_alive_is_noop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = StopTimer::new();

        assert!(timer.start(Duration::from_secs(2), counting_callback(&fired)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!timer.start(Duration::from_secs(2), counting_callback(&fired)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = StopTimer::new();

        timer.start(Duration::from_secs(2), counting_callback(&fired));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(timer.cancel());
        assert!(!timer.is_alive());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Cancelling again, or with nothing started, is a no-op
        assert!(!timer.cancel());
        assert!(!StopTimer::new().cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = StopTimer::new();

        timer.start(Duration::from_secs(1), counting_callback(&fired));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!timer.cancel());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_claim_after_cancel_loses() {
        let armed = Arc::new(AtomicBool::new(true));
        let ticket = TimerTicket {
            armed: armed.clone(),
        };

        armed.swap(false, Ordering::AcqRel);
        assert!(!ticket.claim());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = StopTimer::new();

        timer.start(Duration::from_secs(1), counting_callback(&fired));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(timer.start(Duration::from_secs(1), counting_callback(&fired)));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
