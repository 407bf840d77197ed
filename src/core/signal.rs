//! One-shot completion signal between the encoder callback and the controller.
//!
//! Backed by a single-slot channel: the callback posts with `try_send`, so a
//! second post for the same frame is absorbed, and the controller drains any
//! stale post before arming the next frame.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Receiving side, owned by the controller.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

/// Posting side, cloned into buffer callbacks.
#[derive(Debug, Clone)]
pub struct SignalPoster {
    tx: Sender<()>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub fn poster(&self) -> SignalPoster {
        SignalPoster { tx: self.tx.clone() }
    }

    /// Discards a pending post; returns whether one was pending.
    pub fn reset(&self) -> bool {
        let mut drained = false;
        loop {
            match self.rx.try_recv() {
                Ok(()) => drained = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return drained,
            }
        }
    }

    /// Blocks until posted.
    pub fn wait(&self) {
        // `self.tx` keeps the channel connected, so this only returns on a post.
        let _ = self.rx.recv();
    }

    /// Blocks until posted or `limit` elapses; returns whether it was posted.
    pub fn wait_timeout(&self, limit: Duration) -> bool {
        match self.rx.recv_timeout(limit) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    pub fn is_posted(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl SignalPoster {
    /// Posts completion; returns `false` if a post was already pending.
    pub fn post(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_post_is_collapsed() {
        let signal = CompletionSignal::new();
        let poster = signal.poster();
        assert!(poster.post());
        assert!(!poster.post());
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.is_posted());
    }

    #[test]
    fn test_reset_drops_stale_post() {
        let signal = CompletionSignal::new();
        signal.poster().post();
        assert!(signal.reset());
        assert!(!signal.reset());
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_across_threads() {
        let signal = CompletionSignal::new();
        let poster = signal.poster();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            poster.post();
        });
        signal.wait();
        handle.join().unwrap();
    }
}
