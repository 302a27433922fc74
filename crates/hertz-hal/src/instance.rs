//! Peripheral Instance: the lifecycle wrapper the reconciliation runtime talks
//! to.
//!
//! [`PeripheralInstance`] is object-safe so the node registry can store every
//! kind as `Arc<dyn PeripheralInstance>`.  [`ManagedPeripheral`] implements it
//! for any [`Peripheral`] and owns the state machine, the last-applied
//! attribute snapshot and the last-read observable snapshot.
//!
//! ```text
//! Uninitialized → Initializing → Ready ⇄ Updating
//!       │                          │
//!       └────────→ Disposing ←─────┘ → Disposed
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hertz_types::{
    Attributes, ChangeCallback, HertzError, LifecycleState, NodeId, PropMap,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::driver::HardwareDriver;
use crate::peripheral::{Peripheral, PropHandlers};
use crate::prop_diff::{PropAction, diff_props};

/// Lifecycle operations on one hardware peripheral.
#[async_trait]
pub trait PeripheralInstance: Send + Sync {
    fn id(&self) -> NodeId;

    /// Type tag of the underlying peripheral.
    fn kind(&self) -> &'static str;

    fn state(&self) -> LifecycleState;

    /// One-time hardware setup.  Only valid from `Uninitialized`.
    async fn initialize(&self) -> Result<(), HertzError>;

    /// Reconcile the hardware with `next`, given the previously declared
    /// `prev`.  Only valid from `Ready`.
    async fn apply_props(&self, prev: &Attributes, next: &Attributes) -> Result<(), HertzError>;

    /// Read observables and notify observers of changes.
    async fn query_for_changes(&self) -> Result<(), HertzError>;

    /// Release every applied attribute and drop the hardware handle.
    async fn dispose(&self) -> Result<(), HertzError>;

    /// Run a named one-shot action.  Only valid from `Ready`.
    async fn command(&self, name: &str) -> Result<(), HertzError>;
}

struct Inner<P> {
    /// `None` once disposed.
    peripheral: Option<P>,
    /// Attributes whose apply handler last succeeded, in application order.
    applied: PropMap,
    observers: HashMap<String, ChangeCallback>,
    last_values: Option<PropMap>,
    applied_once: bool,
}

/// Lifecycle-managed wrapper around a concrete [`Peripheral`].
pub struct ManagedPeripheral<P: Peripheral> {
    id: NodeId,
    component: String,
    handlers: PropHandlers<P>,
    state: Mutex<LifecycleState>,
    inner: tokio::sync::Mutex<Inner<P>>,
}

impl<P: Peripheral> ManagedPeripheral<P> {
    /// Construct the peripheral from its creation attributes.  No hardware is
    /// touched; the instance starts `Uninitialized`.
    pub fn new(
        id: NodeId,
        attributes: &Attributes,
        driver: Arc<dyn HardwareDriver>,
    ) -> Result<Self, HertzError> {
        let component = format!("{}{}", P::KIND, id);
        let peripheral = P::create(&attributes.props, driver).map_err(|e| {
            let details = match e {
                HertzError::Update { key, details, .. } => format!("`{key}`: {details}"),
                other => other.to_string(),
            };
            HertzError::Initialization {
                component: component.clone(),
                details,
            }
        })?;

        Ok(Self {
            id,
            component,
            handlers: P::handlers(),
            state: Mutex::new(LifecycleState::Uninitialized),
            inner: tokio::sync::Mutex::new(Inner {
                peripheral: Some(peripheral),
                applied: PropMap::new(),
                observers: attributes.observers.clone(),
                last_values: None,
                applied_once: false,
            }),
        })
    }

    /// Attributes currently applied to the hardware.
    pub async fn applied(&self) -> PropMap {
        self.inner.lock().await.applied.clone()
    }

    // Move from `Ready` to `Updating`, or explain why not.
    fn begin_update(&self) -> Result<(), HertzError> {
        let mut state = self.state.lock();
        match *state {
            LifecycleState::Ready => {
                *state = LifecycleState::Updating;
                Ok(())
            }
            LifecycleState::Disposing | LifecycleState::Disposed => Err(HertzError::Disposed {
                component: self.component.clone(),
            }),
            other => Err(HertzError::NotInitialized {
                component: self.component.clone(),
                state: other,
            }),
        }
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.lock() = next;
    }

    fn update_error(&self, key: &str, err: HertzError) -> HertzError {
        HertzError::Update {
            component: self.component.clone(),
            key: key.to_string(),
            details: detail_of(err),
        }
    }

    fn disposed(&self) -> HertzError {
        HertzError::Disposed {
            component: self.component.clone(),
        }
    }

    async fn run_diff(
        &self,
        inner: &mut Inner<P>,
        prev: &PropMap,
        next: &PropMap,
    ) -> Result<(), HertzError> {
        let diffs = diff_props(prev, next, !inner.applied_once, &self.handlers);
        let Inner {
            peripheral,
            applied,
            ..
        } = &mut *inner;
        let peripheral = peripheral.as_mut().ok_or_else(|| self.disposed())?;

        for diff in diffs {
            match (diff.action, diff.next) {
                (PropAction::Apply, Some(value)) => {
                    let Some(apply) = self.handlers.apply_handler(&diff.key) else {
                        continue;
                    };
                    trace!(component = %self.component, key = %diff.key, "apply");
                    apply(peripheral, &value)
                        .await
                        .map_err(|e| self.update_error(&diff.key, e))?;
                    applied.insert(diff.key, value);
                }
                (PropAction::Disown, _) => {
                    let Some(disown) = self.handlers.disown_handler(&diff.key) else {
                        continue;
                    };
                    trace!(component = %self.component, key = %diff.key, "disown");
                    disown(peripheral)
                        .await
                        .map_err(|e| self.update_error(&diff.key, e))?;
                    applied.shift_remove(&diff.key);
                }
                _ => {}
            }
        }

        inner.applied_once = true;
        Ok(())
    }
}

// Handler errors carry an empty component label; keep only their detail text
// when relabelling them for this instance.
fn detail_of(err: HertzError) -> String {
    match err {
        HertzError::Update { details, .. } => details,
        other => other.to_string(),
    }
}

#[async_trait]
impl<P: Peripheral> PeripheralInstance for ManagedPeripheral<P> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> &'static str {
        P::KIND
    }

    fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    async fn initialize(&self) -> Result<(), HertzError> {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Uninitialized {
                return Err(HertzError::Initialization {
                    component: self.component.clone(),
                    details: format!("cannot initialize while {}", *state),
                });
            }
            *state = LifecycleState::Initializing;
        }

        let mut inner = self.inner.lock().await;
        let Some(peripheral) = inner.peripheral.as_mut() else {
            self.set_state(LifecycleState::Disposed);
            return Err(self.disposed());
        };

        match peripheral.init().await {
            Ok(()) => {
                self.set_state(LifecycleState::Ready);
                debug!(component = %self.component, "initialized");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Uninitialized);
                Err(HertzError::Initialization {
                    component: self.component.clone(),
                    details: e.to_string(),
                })
            }
        }
    }

    async fn apply_props(&self, prev: &Attributes, next: &Attributes) -> Result<(), HertzError> {
        self.begin_update()?;

        let mut inner = self.inner.lock().await;
        let result = self.run_diff(&mut inner, &prev.props, &next.props).await;
        inner.observers = next.observers.clone();
        drop(inner);

        // A dispose may not overlap an update, so the state is still ours.
        self.set_state(LifecycleState::Ready);
        result
    }

    async fn query_for_changes(&self) -> Result<(), HertzError> {
        if !matches!(
            self.state(),
            LifecycleState::Ready | LifecycleState::Updating
        ) {
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        let Inner {
            peripheral,
            observers,
            last_values,
            ..
        } = &mut *inner;
        let Some(peripheral) = peripheral.as_mut() else {
            return Ok(());
        };

        let values = peripheral.read_values().await?;
        let previous = last_values.as_ref();
        for (key, value) in &values {
            let Some(observer) = observers.get(key) else {
                continue;
            };
            match previous {
                None => observer(value, true),
                Some(prev) if prev.get(key) != Some(value) => observer(value, false),
                Some(_) => {}
            }
        }

        *last_values = Some(values);
        Ok(())
    }

    async fn dispose(&self) -> Result<(), HertzError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Ready
                | LifecycleState::Updating
                | LifecycleState::Uninitialized => *state = LifecycleState::Disposing,
                LifecycleState::Disposing | LifecycleState::Disposed => {
                    return Err(self.disposed());
                }
                LifecycleState::Initializing => {
                    return Err(HertzError::NotInitialized {
                        component: self.component.clone(),
                        state: LifecycleState::Initializing,
                    });
                }
            }
        }

        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner.applied.keys().cloned().collect();
        let mut first_error = None;

        if let Some(peripheral) = inner.peripheral.as_mut() {
            for key in keys {
                let Some(disown) = self.handlers.disown_handler(&key) else {
                    continue;
                };
                trace!(component = %self.component, key = %key, "disown on dispose");
                if let Err(e) = disown(peripheral).await {
                    first_error.get_or_insert_with(|| self.update_error(&key, e));
                }
            }
        }

        inner.applied.clear();
        inner.observers.clear();
        inner.last_values = None;
        // Dropping the peripheral releases its driver handle.
        inner.peripheral = None;
        drop(inner);

        self.set_state(LifecycleState::Disposed);
        debug!(component = %self.component, "disposed");
        first_error.map_or(Ok(()), Err)
    }

    async fn command(&self, name: &str) -> Result<(), HertzError> {
        self.begin_update()?;

        let mut inner = self.inner.lock().await;
        let result = match inner.peripheral.as_mut() {
            Some(peripheral) => peripheral.command(name).await,
            None => Err(self.disposed()),
        };
        drop(inner);

        self.set_state(LifecycleState::Ready);
        result
    }
}
