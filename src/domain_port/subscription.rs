use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// Listener handle returned by every event source.
///
/// The listener stays registered until [`Subscription::unsubscribe`] is called
/// or the handle is dropped.
pub struct Subscription<T> {
    name: &'static str,
    receiver: Option<broadcast::Receiver<T>>,
}

impl<T: Clone> Subscription<T> {
    pub fn new(name: &'static str, receiver: broadcast::Receiver<T>) -> Self {
        Subscription {
            name,
            receiver: Some(receiver),
        }
    }

    /// Waits for the next event. Returns `None` once unsubscribed or when the
    /// source has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(subscription = self.name, skipped, "listener lagged behind");
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Takes the next event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(subscription = self.name, skipped, "listener lagged behind");
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        self.receiver = None;
    }
}
