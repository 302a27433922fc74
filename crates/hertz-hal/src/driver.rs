//! Generic `HardwareDriver` trait for the motion/IO controller behind the
//! serial link.
//!
//! Peripherals only ever talk to this trait, so the transport (a real serial
//! controller, or the [`SimDriver`][crate::sim::SimDriver]) can be swapped
//! without touching reconciliation logic.
//!
//! Every method is a suspension point and may fail with
//! [`HertzError::Transport`].  Calls from different nodes may arrive
//! concurrently; implementations are responsible for serializing access to
//! the shared transport (e.g. with a command queue).

use async_trait::async_trait;
use hertz_types::{HertzError, MotorState, PinMode};

/// A relative move command for one motor axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCommand {
    pub port: u8,
    /// Signed number of steps to travel from the current position.
    pub steps: i64,
    pub velocity: i64,
    pub acceleration: i64,
}

/// A continuous-velocity command for one motor axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityCommand {
    pub port: u8,
    pub velocity: i64,
    pub acceleration: i64,
}

/// Asynchronous, fallible primitives exposed by the hardware controller.
#[async_trait]
pub trait HardwareDriver: Send + Sync {
    /// Fix the direction of a digital pin.
    async fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), HertzError>;

    /// Drive a digital output pin high (`true`) or low (`false`).
    async fn write_digital_pin(&self, pin: u8, value: bool) -> Result<(), HertzError>;

    /// Read the levels of the given digital pins, in request order.
    async fn read_digital_pins(&self, pins: &[u8]) -> Result<Vec<bool>, HertzError>;

    /// Route the emergency-stop input of all motors to `pin`.
    async fn set_estop_pin(&self, pin: u8) -> Result<(), HertzError>;

    /// Detach the emergency-stop input.
    async fn clear_estop_pin(&self) -> Result<(), HertzError>;

    async fn enable_motor(&self, port: u8) -> Result<(), HertzError>;

    async fn disable_motor(&self, port: u8) -> Result<(), HertzError>;

    /// Decelerate the axis to standstill and drop any pending motion.
    async fn stop_motor(&self, port: u8) -> Result<(), HertzError>;

    async fn move_motor(&self, command: MoveCommand) -> Result<(), HertzError>;

    async fn set_motor_velocity(&self, command: VelocityCommand) -> Result<(), HertzError>;

    /// Declare the current position of the axis as home (position zero).
    async fn home_motor(&self, port: u8) -> Result<(), HertzError>;

    async fn read_motor(&self, port: u8) -> Result<MotorState, HertzError>;
}
