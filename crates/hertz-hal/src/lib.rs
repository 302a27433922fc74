//! Hardware side of Hertz: the controller driver abstraction, the peripheral
//! kinds built on top of it, and the lifecycle wrapper the reconciliation
//! runtime drives.

pub mod catalog;
pub mod dpin_in;
pub mod dpin_out;
pub mod driver;
pub mod instance;
pub mod motor;
pub mod peripheral;
pub mod prop_diff;
pub mod sim;

pub use catalog::PeripheralCatalog;
pub use driver::{HardwareDriver, MoveCommand, VelocityCommand};
pub use instance::{ManagedPeripheral, PeripheralInstance};
pub use peripheral::{Peripheral, PropHandlers};
pub use sim::SimDriver;
