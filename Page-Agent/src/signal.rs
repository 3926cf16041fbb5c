use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One-shot "generation finished" notification from the host to an agent.
///
/// The agent arms a listener before asking the host to start monitoring and
/// awaits it. `fire` resolves the armed listener at most once; firing with
/// nothing armed is dropped. Arming again replaces (and closes) any
/// previous listener.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    slot: Mutex<Option<oneshot::Sender<()>>>,
}

/// The armed side of a [`CompletionSignal`].
#[derive(Debug)]
pub struct SignalListener {
    rx: oneshot::Receiver<()>,
}

/// The signal was disarmed or re-armed before it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalClosed;

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) -> SignalListener {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if previous.is_some() {
            debug!("Completion listener re-armed, previous listener closed");
        }
        SignalListener { rx }
    }

    /// Resolve the armed listener. Returns whether one was waiting.
    pub fn fire(&self) -> bool {
        let armed = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match armed {
            Some(tx) => tx.send(()).is_ok(),
            None => {
                warn!("Completion signal received with no armed listener, dropped");
                false
            }
        }
    }

    /// Drop the armed listener without resolving it.
    pub fn disarm(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl SignalListener {
    pub async fn wait(self) -> Result<(), SignalClosed> {
        self.rx.await.map_err(|_| SignalClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_resolves_armed_listener() {
        let signal = CompletionSignal::new();
        let listener = signal.arm();
        assert!(signal.fire());
        assert_eq!(listener.wait().await, Ok(()));
        assert!(!signal.is_armed());
    }

    #[tokio::test]
    async fn test_fire_without_listener_is_dropped() {
        let signal = CompletionSignal::new();
        assert!(!signal.fire());

        // A later listener is not resolved by the stale signal.
        let listener = signal.arm();
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), listener.wait()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_second_fire_is_noop() {
        let signal = CompletionSignal::new();
        let listener = signal.arm();
        assert!(signal.fire());
        assert!(!signal.fire());
        assert_eq!(listener.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_rearm_closes_previous() {
        let signal = CompletionSignal::new();
        let first = signal.arm();
        let second = signal.arm();
        assert_eq!(first.wait().await, Err(SignalClosed));
        signal.fire();
        assert_eq!(second.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_disarm_closes_listener() {
        let signal = CompletionSignal::new();
        let listener = signal.arm();
        signal.disarm();
        assert_eq!(listener.wait().await, Err(SignalClosed));
    }
}
