//! The [`Peripheral`] trait implemented by every concrete hardware kind, and
//! the [`PropHandlers`] dispatch table that maps attribute keys to apply and
//! disown handlers.
//!
//! A peripheral kind declares its handlers once, at construction time:
//!
//! ```rust,ignore
//! fn handlers() -> PropHandlers<Self> {
//!     PropHandlers::new()
//!         .on_apply("value", Self::apply_value)
//!         .on_disown("value", Self::disown_value)
//! }
//! ```
//!
//! Handlers are plain function pointers returning a boxed future so the table
//! can be stored next to the peripheral without any name-based lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use hertz_types::{HertzError, PropMap};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::driver::HardwareDriver;

/// Handler invoked with the next value of an attribute.
pub type ApplyFn<P> = for<'a> fn(&'a mut P, &'a Value) -> BoxFuture<'a, Result<(), HertzError>>;

/// Handler invoked when an attribute stops being declared.
pub type DisownFn<P> = for<'a> fn(&'a mut P) -> BoxFuture<'a, Result<(), HertzError>>;

/// A concrete hardware kind (digital input, digital output, motor, ...).
///
/// Implementors hold their fixed identity (pin, port) and an
/// `Arc<dyn HardwareDriver>`; lifecycle bookkeeping lives in
/// [`ManagedPeripheral`][crate::instance::ManagedPeripheral].
#[async_trait]
pub trait Peripheral: Send + Sized + 'static {
    /// Type tag used by declarations, e.g. `"motor"`.
    const KIND: &'static str;

    /// Construct from the creation attributes.  No hardware is touched.
    fn create(props: &PropMap, driver: Arc<dyn HardwareDriver>) -> Result<Self, HertzError>;

    /// Attribute key → handler table for this kind.
    fn handlers() -> PropHandlers<Self>;

    /// One-time hardware setup tied to the peripheral's identity.
    async fn init(&mut self) -> Result<(), HertzError>;

    /// Read the observable values.  Kinds without observables keep the default.
    async fn read_values(&mut self) -> Result<PropMap, HertzError> {
        Ok(PropMap::new())
    }

    /// Run a named one-shot action.
    async fn command(&mut self, name: &str) -> Result<(), HertzError> {
        Err(HertzError::UnsupportedCommand {
            component: Self::KIND.to_string(),
            command: name.to_string(),
        })
    }
}

/// Per-kind table of attribute handlers.
pub struct PropHandlers<P> {
    apply: HashMap<&'static str, ApplyFn<P>>,
    disown: HashMap<&'static str, DisownFn<P>>,
}

impl<P> PropHandlers<P> {
    pub fn new() -> Self {
        Self {
            apply: HashMap::new(),
            disown: HashMap::new(),
        }
    }

    /// Register the apply handler for `key`, replacing any previous one.
    pub fn on_apply(mut self, key: &'static str, handler: ApplyFn<P>) -> Self {
        self.apply.insert(key, handler);
        self
    }

    /// Register the disown handler for `key`, replacing any previous one.
    pub fn on_disown(mut self, key: &'static str, handler: DisownFn<P>) -> Self {
        self.disown.insert(key, handler);
        self
    }

    pub fn apply_handler(&self, key: &str) -> Option<ApplyFn<P>> {
        self.apply.get(key).copied()
    }

    pub fn disown_handler(&self, key: &str) -> Option<DisownFn<P>> {
        self.disown.get(key).copied()
    }

    pub fn has_apply(&self, key: &str) -> bool {
        self.apply.contains_key(key)
    }

    pub fn has_disown(&self, key: &str) -> bool {
        self.disown.contains_key(key)
    }
}

impl<P> Default for PropHandlers<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attribute helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Error for an attribute that a handler rejected.
///
/// The component label is left empty; the managing instance fills it in with
/// the node's `kind#id` before the error leaves the crate.
pub fn rejected(key: &str, details: impl Into<String>) -> HertzError {
    HertzError::Update {
        component: String::new(),
        key: key.to_string(),
        details: details.into(),
    }
}

/// Deserialize one attribute value.
pub fn parse_attr<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, HertzError> {
    T::deserialize(value).map_err(|e| rejected(key, format!("invalid value {value}: {e}")))
}

/// Read a mandatory attribute from the creation props.
pub fn required_attr<T: DeserializeOwned>(props: &PropMap, key: &str) -> Result<T, HertzError> {
    match props.get(key) {
        Some(value) if !value.is_null() => parse_attr(key, value),
        _ => Err(rejected(key, "attribute is required")),
    }
}

/// Read an optional attribute; `null` counts as absent.
pub fn optional_attr<T: DeserializeOwned>(
    props: &PropMap,
    key: &str,
) -> Result<Option<T>, HertzError> {
    match props.get(key) {
        Some(value) if !value.is_null() => parse_attr(key, value).map(Some),
        _ => Ok(None),
    }
}
