//! [`PeripheralCatalog`] – maps declaration type tags to peripheral
//! constructors.
//!
//! The catalog is built once at startup and handed to the orchestrator.
//! Unknown tags are rejected at instantiation time, before any node exists.

use std::collections::HashMap;
use std::sync::Arc;

use hertz_types::{Attributes, HertzError, NodeId};

use crate::dpin_in::DigitalPinIn;
use crate::dpin_out::DigitalPinOut;
use crate::driver::HardwareDriver;
use crate::instance::{ManagedPeripheral, PeripheralInstance};
use crate::motor::Motor;
use crate::peripheral::Peripheral;

type Constructor = fn(
    NodeId,
    &Attributes,
    Arc<dyn HardwareDriver>,
) -> Result<Arc<dyn PeripheralInstance>, HertzError>;

fn construct<P: Peripheral>(
    id: NodeId,
    attributes: &Attributes,
    driver: Arc<dyn HardwareDriver>,
) -> Result<Arc<dyn PeripheralInstance>, HertzError> {
    let instance = ManagedPeripheral::<P>::new(id, attributes, driver)?;
    Ok(Arc::new(instance))
}

/// Type tag → constructor table.
#[derive(Default, Clone)]
pub struct PeripheralCatalog {
    constructors: HashMap<&'static str, Constructor>,
}

impl PeripheralCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in kind: `dpinin`, `dpinout` and `motor`.
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register::<DigitalPinIn>();
        catalog.register::<DigitalPinOut>();
        catalog.register::<Motor>();
        catalog
    }

    /// Register a peripheral kind under its [`Peripheral::KIND`] tag.  A kind
    /// registered twice replaces the earlier entry.
    pub fn register<P: Peripheral>(&mut self) {
        self.constructors.insert(P::KIND, construct::<P>);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered tags, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.constructors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct an `Uninitialized` instance of `kind`.
    ///
    /// # Errors
    ///
    /// [`HertzError::UnknownPeripheral`] for an unregistered tag, or
    /// [`HertzError::Initialization`] if the creation attributes are invalid.
    pub fn create(
        &self,
        kind: &str,
        id: NodeId,
        attributes: &Attributes,
        driver: Arc<dyn HardwareDriver>,
    ) -> Result<Arc<dyn PeripheralInstance>, HertzError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| HertzError::UnknownPeripheral(kind.to_string()))?;
        constructor(id, attributes, driver)
    }
}
