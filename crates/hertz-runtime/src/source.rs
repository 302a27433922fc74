//! The abstract producer of tree-diff operations.

use async_trait::async_trait;
use hertz_types::HertzError;

use crate::orchestrator::Orchestrator;

/// Anything that declares a peripheral tree and keeps it current.
///
/// Each call to [`reconcile`](DeclarationSource::reconcile) issues the next
/// round of operations against `host` (instantiate, attach, schedule init,
/// update, command or remove).  A round may await, e.g. a timer or an input
/// channel; it is dropped mid-way when the runtime shuts down.
#[async_trait]
pub trait DeclarationSource: Send {
    /// Returns `Ok(false)` once there is nothing more to declare.  The tree
    /// then stays mounted until shutdown.
    async fn reconcile(&mut self, host: &Orchestrator) -> Result<bool, HertzError>;
}

#[async_trait]
impl<S: DeclarationSource + ?Sized> DeclarationSource for Box<S> {
    async fn reconcile(&mut self, host: &Orchestrator) -> Result<bool, HertzError> {
        (**self).reconcile(host).await
    }
}
