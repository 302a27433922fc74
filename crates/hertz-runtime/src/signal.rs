//! Per-node completion handle.
//!
//! A [`Signal`] holds a single slot: the completion of the most recently
//! scheduled operation on its node.  Scheduling a new operation awaits the
//! current completion and then replaces it, which serializes every operation
//! on the node in schedule order.
//!
//! Until the node's init is scheduled the slot holds a pending completion
//! fed by a oneshot channel, so children and early updates can wait on an
//! init that has not started yet.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use hertz_types::{HertzError, LifecycleState};
use tokio::sync::oneshot;

/// Cloneable, awaitable outcome of a scheduled operation.
pub type Completion = Shared<BoxFuture<'static, Result<(), HertzError>>>;

/// Sender half used to settle a node's init.
pub type InitSender = oneshot::Sender<Result<(), HertzError>>;

/// Wrap an already known outcome as a [`Completion`].
pub fn settled(result: Result<(), HertzError>) -> Completion {
    futures_util::future::ready(result).boxed().shared()
}

pub struct Signal {
    tail: Completion,
    init: Option<InitSender>,
    removing: bool,
}

impl Signal {
    /// Reserve the slot for a freshly created node.  `component` names the
    /// node in the error seen by waiters if init never runs.
    pub fn new(component: String) -> Self {
        let (tx, rx) = oneshot::channel::<Result<(), HertzError>>();
        let tail = async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(HertzError::NotInitialized {
                    component,
                    state: LifecycleState::Uninitialized,
                }),
            }
        }
        .boxed()
        .shared();

        Self {
            tail,
            init: Some(tx),
            removing: false,
        }
    }

    /// Completion of the latest scheduled operation.
    pub fn current(&self) -> Completion {
        self.tail.clone()
    }

    /// Make `next` the latest operation.  It must already await the one it
    /// replaces.
    pub fn advance(&mut self, next: Completion) {
        self.tail = next;
    }

    /// Claim the right to settle init.  `None` once init was already claimed.
    pub fn claim_init(&mut self) -> Option<InitSender> {
        self.init.take()
    }

    pub fn init_scheduled(&self) -> bool {
        self.init.is_none()
    }

    /// Settle a never-scheduled init as failed so waiters do not hang.
    pub fn abandon_init(&mut self) {
        // Dropping the sender resolves the pending completion.
        self.init = None;
    }

    /// Mark the node as being removed.  Returns `false` if it already was.
    pub fn begin_removal(&mut self) -> bool {
        !std::mem::replace(&mut self.removing, true)
    }

    pub fn is_removing(&self) -> bool {
        self.removing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_settles_pending_completion() {
        let mut signal = Signal::new("dpinout#0".to_string());
        let pending = signal.current();
        assert!(!signal.init_scheduled());

        let tx = signal.claim_init().unwrap();
        assert!(signal.init_scheduled());
        assert!(signal.claim_init().is_none());

        tx.send(Ok(())).unwrap();
        assert_eq!(pending.await, Ok(()));
    }

    #[tokio::test]
    async fn abandoned_init_reports_not_initialized() {
        let mut signal = Signal::new("motor#2".to_string());
        let pending = signal.current();
        signal.abandon_init();

        let err = pending.await.unwrap_err();
        assert_eq!(
            err,
            HertzError::NotInitialized {
                component: "motor#2".to_string(),
                state: LifecycleState::Uninitialized,
            }
        );
    }

    #[tokio::test]
    async fn advance_replaces_the_slot() {
        let mut signal = Signal::new("dpinin#1".to_string());
        let previous = signal.current();
        let tx = signal.claim_init().unwrap();
        tx.send(Err(HertzError::Transport("timeout".into()))).unwrap();

        signal.advance(settled(Ok(())));
        assert!(previous.await.is_err());
        assert_eq!(signal.current().await, Ok(()));
    }

    #[test]
    fn removal_is_claimed_once() {
        let mut signal = Signal::new("dpinout#3".to_string());
        assert!(!signal.is_removing());
        assert!(signal.begin_removal());
        assert!(!signal.begin_removal());
        assert!(signal.is_removing());
    }
}
