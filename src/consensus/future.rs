//! Handles for results produced later by the driver thread.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::error::{Error, Result};

/// A result the driver thread will deliver once.
///
/// If the driver goes away without answering, the result is `Shutdown`.
#[must_use = "a pending result does nothing unless waited on"]
pub struct Pending<T> {
    reply: Receiver<Result<T>>,
}

/// Resolves to the log index a command was committed and applied at.
pub type ApplyFuture = Pending<u64>;

impl<T> Pending<T> {
    pub(crate) fn new(reply: Receiver<Result<T>>) -> Self {
        Pending { reply }
    }

    /// An already resolved failure.
    pub(crate) fn failed(err: Error) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(Err(err));
        Pending { reply: rx }
    }

    /// Block until the result is available.
    pub fn wait(self) -> Result<T> {
        self.reply.recv().unwrap_or(Err(Error::Shutdown))
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(Error::Timeout(format!("result after {:?}", timeout)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Shutdown),
        }
    }
}

/// Completes once the driver thread has exited.
#[must_use = "shutdown is only complete once waited on"]
pub struct ShutdownFuture {
    id: u64,
    driver: Option<JoinHandle<Result<()>>>,
}

impl ShutdownFuture {
    pub(crate) fn new(id: u64, driver: Option<JoinHandle<Result<()>>>) -> Self {
        ShutdownFuture { id, driver }
    }

    /// Join the driver thread.
    ///
    /// Returns the error the driver stopped with, `Panicked` if it panicked,
    /// and `Ok` if the engine was already shut down.
    pub fn wait(self) -> Result<()> {
        match self.driver {
            None => Ok(()),
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(Error::Panicked(self.id)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_dropped_sender_means_shutdown() {
        let (tx, rx) = bounded::<Result<u64>>(1);
        drop(tx);
        assert!(matches!(Pending::new(rx).wait(), Err(Error::Shutdown)));
    }

    #[test]
    fn test_wait_timeout() {
        let (_tx, rx) = bounded::<Result<u64>>(1);
        let err = Pending::new(rx)
            .wait_timeout(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_failed_resolves_immediately() {
        let pending: ApplyFuture = Pending::failed(Error::LeadershipLost);
        assert!(matches!(pending.wait(), Err(Error::LeadershipLost)));
    }

    #[test]
    fn test_shutdown_reports_panic() {
        let handle = thread::spawn(|| -> Result<()> { panic!("boom") });
        let err = ShutdownFuture::new(4, Some(handle)).wait().unwrap_err();
        assert!(matches!(err, Error::Panicked(4)));

        ShutdownFuture::new(4, None).wait().unwrap();
    }
}
