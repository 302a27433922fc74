//! Change-Detection Poller: a single round-robin loop over the registry's
//! live instances.
//!
//! Each tick looks at one instance.  If it is `Ready`, its
//! `query_for_changes()` is spawned without being awaited, so a slow read
//! never delays the next tick.  Polling is best-effort at a fixed interval.

use std::time::Duration;

use hertz_types::LifecycleState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::registry::SharedRegistry;

/// Default delay between two ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Poller {
    registry: SharedRegistry,
    interval: Duration,
    cursor: usize,
}

impl Poller {
    pub fn new(registry: SharedRegistry, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            cursor: 0,
        }
    }

    /// Index of the instance the next tick will look at.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Run one tick.  Returns the spawned query, if any.
    pub fn tick(&mut self) -> Option<JoinHandle<()>> {
        let instance = {
            let registry = self.registry.lock();
            let len = registry.live_len();
            if len == 0 {
                self.cursor = 0;
                return None;
            }
            if self.cursor >= len {
                self.cursor = 0;
            }
            let instance = registry.live_at(self.cursor);
            self.cursor = (self.cursor + 1) % len;
            instance?
        };

        if instance.state() != LifecycleState::Ready {
            return None;
        }

        Some(tokio::spawn(async move {
            if let Err(e) = instance.query_for_changes().await {
                warn!(
                    node = %instance.id(),
                    kind = instance.kind(),
                    error = %e,
                    "query for changes failed"
                );
            }
        }))
    }

    /// Tick every interval until `shutdown` turns `true` or its sender is
    /// dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = self.interval.as_millis() as u64, "poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("poller stopped");
    }
}
