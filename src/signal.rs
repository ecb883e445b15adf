//! One-shot stop signal shared by every thread that needs to observe shutdown.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::time::Duration;

/// Create a connected stop handle and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (sender, receiver) = bounded(0);
    let signal = StopSignal { receiver };
    let handle = StopHandle {
        sender: Mutex::new(Some(sender)),
        signal: signal.clone(),
    };
    (handle, signal)
}

/// Owning side of a stop signal.
///
/// Firing closes the underlying channel, which every [`StopSignal`] clone observes at
/// once. Dropping the handle fires it as well.
#[derive(Debug)]
pub struct StopHandle {
    sender: Mutex<Option<Sender<()>>>,
    signal: StopSignal,
}

impl StopHandle {
    /// Fire the signal. Returns true only for the call that actually fired it.
    pub fn stop(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// A new observer of this handle
    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }
}

/// Observing side of a stop signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: Receiver<()>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until the signal fires
    pub fn wait(&self) {
        // Nothing is ever sent; recv only returns once the sender is gone.
        let _ = self.receiver.recv();
    }

    /// Block for at most `timeout`. Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Receiver that becomes ready once the signal fires, for use in `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_stop_fires_once() {
        let (handle, signal) = stop_channel();
        assert!(!signal.is_stopped());

        assert!(handle.stop());
        assert!(!handle.stop());
        assert!(handle.is_stopped());
        assert!(signal.is_stopped());
    }

    #[test]
    fn test_every_waiter_observes_stop() {
        let (handle, signal) = stop_channel();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait())
            })
            .collect();

        handle.stop();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_drop_fires_signal() {
        let (handle, signal) = stop_channel();
        drop(handle);
        assert!(signal.wait_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn test_wait_timeout_without_stop() {
        let (_handle, signal) = stop_channel();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }
}
