//! Single-consumer executor standing in for the host's main thread.
//!
//! The host API is not thread-safe, so client handler threads never call it
//! directly. They defer closures onto this queue and whichever thread owns the
//! [`MainLoop`] drains it, serialising every host mutation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

const MAIN_LOOP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::main_loop");

/// Interval at which [`MainLoop::run_until`] re-checks its stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Unit of deferred work.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Raised when work is deferred after the owning loop was dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("host main loop is no longer running")]
pub struct MainLoopClosed;

/// Owner of the deferred-work queue.
#[derive(Debug)]
pub struct MainLoop {
    sender: Sender<Work>,
    receiver: Receiver<Work>,
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop {
    /// Creates an empty loop.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// Returns a producer handle that can be moved to other threads.
    #[must_use]
    pub fn handle(&self) -> MainLoopHandle {
        MainLoopHandle {
            sender: self.sender.clone(),
        }
    }

    /// Runs everything currently queued without blocking.
    ///
    /// Embedding hosts call this from their own timer tick. Returns the number
    /// of work items executed.
    pub fn run_pending(&self) -> usize {
        let mut executed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(work) => {
                    run_work(work);
                    executed += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return executed,
            }
        }
    }

    /// Waits up to `timeout` for work, then drains the queue.
    ///
    /// Returns `true` when at least one item ran.
    pub fn pump(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(work) => {
                run_work(work);
                self.run_pending();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Services the queue on the calling thread until `stop` is set.
    pub fn run_until(&self, stop: &AtomicBool) {
        debug!(target: MAIN_LOOP_TARGET, "main loop servicing deferred work");
        while !stop.load(Ordering::SeqCst) {
            self.pump(POLL_INTERVAL);
        }
        let drained = self.run_pending();
        debug!(target: MAIN_LOOP_TARGET, drained, "main loop stopped");
    }
}

fn run_work(work: Work) {
    if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
        error!(target: MAIN_LOOP_TARGET, "deferred work panicked");
    }
}

/// Cloneable producer side of the main loop.
#[derive(Debug, Clone)]
pub struct MainLoopHandle {
    sender: Sender<Work>,
}

impl MainLoopHandle {
    /// Queues `work` to run on the main loop's thread.
    ///
    /// # Errors
    ///
    /// Returns [`MainLoopClosed`] when the owning [`MainLoop`] was dropped.
    pub fn defer<F>(&self, work: F) -> Result<(), MainLoopClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(work)).map_err(|_| MainLoopClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn main_loop() -> MainLoop {
        MainLoop::new()
    }

    #[rstest]
    fn runs_work_in_submission_order(main_loop: MainLoop) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = main_loop.handle();
        for index in 0..3 {
            let seen = Arc::clone(&seen);
            handle
                .defer(move || seen.lock().expect("lock").push(index))
                .expect("defer");
        }
        assert_eq!(main_loop.run_pending(), 3);
        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[rstest]
    fn work_runs_on_the_loop_thread(main_loop: MainLoop) {
        let handle = main_loop.handle();
        let loop_thread = thread::current().id();
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        thread::spawn(move || {
            handle
                .defer(move || *sink.lock().expect("lock") = Some(thread::current().id()))
                .expect("defer");
        })
        .join()
        .expect("join producer");
        assert!(main_loop.pump(Duration::from_secs(1)));
        assert_eq!(*observed.lock().expect("lock"), Some(loop_thread));
    }

    #[rstest]
    fn pump_times_out_when_idle(main_loop: MainLoop) {
        assert!(!main_loop.pump(Duration::from_millis(10)));
    }

    #[rstest]
    fn panicking_work_does_not_stop_the_loop(main_loop: MainLoop) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = main_loop.handle();
        handle.defer(|| panic!("boom")).expect("defer");
        let counter = Arc::clone(&count);
        handle
            .defer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("defer");
        assert_eq!(main_loop.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn defer_fails_after_loop_dropped() {
        let handle = MainLoop::new().handle();
        assert_eq!(handle.defer(|| {}), Err(MainLoopClosed));
    }

    #[rstest]
    fn run_until_drains_before_returning(main_loop: MainLoop) {
        let stop = AtomicBool::new(true);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        main_loop
            .handle()
            .defer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("defer");
        main_loop.run_until(&stop);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
