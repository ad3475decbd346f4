use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// One-shot cancellation signal shared by every blocking wait of a session.
///
/// Once cancelled it stays cancelled; all current and future waiters wake up.
#[derive(Debug, Clone)]
pub struct SignalOfStop {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::Release);

        // Lock briefly so a waiter can't miss the notification between its check and its wait
        let _guard = self.shared.mutex.lock();
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    pub fn wait_cancellation(&self) {
        let mut guard = self.shared.mutex.lock();
        while !self.cancelled() {
            self.shared.condvar.wait(&mut guard);
        }
    }

    /// Block for at most `timeout`. Returns `true` if the signal was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.mutex.lock();
        while !self.cancelled() {
            if self
                .shared
                .condvar
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.cancelled();
            }
        }
        true
    }
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_timeout_expires() {
        let sos = SignalOfStop::new();
        let begin = Instant::now();
        assert!(!sos.wait_timeout(Duration::from_millis(20)));
        assert!(begin.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_wakes_waiters() {
        let sos = SignalOfStop::new();
        let waiter = {
            let sos = sos.clone();
            thread::spawn(move || sos.wait_timeout(Duration::from_secs(10)))
        };
        let blocked = {
            let sos = sos.clone();
            thread::spawn(move || sos.wait_cancellation())
        };

        thread::sleep(Duration::from_millis(20));
        sos.cancel();

        assert!(waiter.join().unwrap());
        blocked.join().unwrap();
        assert!(sos.cancelled());
    }

    #[test]
    fn test_cancelled_is_sticky() {
        let sos = SignalOfStop::new();
        sos.cancel();
        sos.cancel();
        assert!(sos.wait_timeout(Duration::from_secs(10)));
        sos.wait_cancellation();
    }
}
