//! Thread helpers shared by every loop in the station.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Wait for `handle` to finish, at most `timeout`.
///
/// Returns `true` if the thread finished and was joined. On timeout the thread
/// is detached and keeps running until it observes its stop flag.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} did not stop within {timeout:?}; detaching");
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }

    if handle.join().is_err() {
        warn!("{name} panicked before stopping");
    }
    true
}

/// Spawn a named worker thread.
pub fn spawn_named<F>(name: &str, body: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_join_finished_thread() {
        let handle = thread::spawn(|| {});
        assert!(join_with_timeout(handle, Duration::from_secs(1), "quick"));
    }

    #[test]
    fn test_join_times_out_and_detaches() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&release);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(5));
            }
        });

        let started = Instant::now();
        assert!(!join_with_timeout(handle, Duration::from_millis(50), "stuck"));
        assert!(started.elapsed() < Duration::from_secs(1));
        release.store(true, Ordering::Release);
    }
}
