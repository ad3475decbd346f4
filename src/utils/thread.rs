use log::error;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Join `handle`, giving up after `timeout`.
///
/// A thread that doesn't finish in time is detached and reported as leaked; it is
/// never forcibly terminated. Returns `true` when the thread was joined.
pub fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            error!(
                "{} thread did not stop within {:?}, leaking it for this session",
                name, timeout
            );
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    if handle.join().is_err() {
        error!("{} thread panicked", name);
    }
    true
}
