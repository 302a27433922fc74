//! [`Reconciler`] – wires the registry, orchestrator, poller and event bus
//! together and drives a [`DeclarationSource`] until shutdown.

use std::sync::Arc;
use std::time::Duration;

use hertz_hal::{HardwareDriver, PeripheralCatalog};
use hertz_types::HertzError;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bus::{DEFAULT_CAPACITY, EventBus};
use crate::orchestrator::Orchestrator;
use crate::poller::{DEFAULT_POLL_INTERVAL, Poller};
use crate::registry::NodeRegistry;
use crate::source::DeclarationSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay between two change-detection ticks.
    pub poll_interval: Duration,
    /// Lifecycle events buffered per subscriber before it lags.
    pub event_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_capacity: DEFAULT_CAPACITY,
        }
    }
}

pub struct Reconciler {
    orchestrator: Orchestrator,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        driver: Arc<dyn HardwareDriver>,
        catalog: PeripheralCatalog,
        config: ReconcilerConfig,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            NodeRegistry::shared(),
            catalog,
            driver,
            EventBus::new(config.event_capacity),
        );
        Self {
            orchestrator,
            config,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn events(&self) -> &EventBus {
        self.orchestrator.events()
    }

    /// Drive `source` and the poller until `shutdown` turns `true` (or its
    /// sender is dropped), then dispose the whole tree.
    ///
    /// A source error stops reconciliation early.  The tree is torn down
    /// either way and the error is returned afterwards.
    pub async fn run<S>(
        &self,
        mut source: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), HertzError>
    where
        S: DeclarationSource,
    {
        let (stop_poller, poller_stopped) = watch::channel(false);
        let poller = Poller::new(
            self.orchestrator.registry().clone(),
            self.config.poll_interval,
        );
        let poller = tokio::spawn(poller.run(poller_stopped));
        info!("reconciler started");

        let result = self.drive(&mut source, &mut shutdown).await;

        let _ = stop_poller.send(true);
        if let Err(e) = poller.await {
            warn!(error = %e, "poller task ended abnormally");
        }
        self.orchestrator.shutdown().await;
        info!("reconciler stopped");
        result
    }

    async fn drive<S>(
        &self,
        source: &mut S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), HertzError>
    where
        S: DeclarationSource,
    {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                more = source.reconcile(&self.orchestrator) => {
                    if !more? {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        // Source is done: keep the tree mounted and polled until shutdown.
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
