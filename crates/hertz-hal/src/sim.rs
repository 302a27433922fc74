//! In-process simulated controller for CI/CD testing without physical hardware.
//!
//! [`SimDriver`] implements [`HardwareDriver`] entirely in memory.  It records
//! every call as a [`DriverCommand`], keeps plausible pin and motor state, and
//! can inject transport faults and artificial latency.  It also tracks the
//! peak number of overlapping calls per [`Target`], which lets tests assert
//! that operations on one node never interleave.
//!
//! # Example
//!
//! ```rust
//! use hertz_hal::sim::{SimDriver, Target};
//!
//! let driver = SimDriver::builder()
//!     .with_input(1, true)
//!     .with_motor(0)
//!     .with_fault(Target::Pin(7))
//!     .build();
//!
//! assert_eq!(driver.pin_level(1), Some(true));
//! assert!(driver.commands().is_empty());
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hertz_types::{HertzError, MotorState, PinMode};
use parking_lot::Mutex;
use tracing::trace;

use crate::driver::{HardwareDriver, MoveCommand, VelocityCommand};

// ────────────────────────────────────────────────────────────────────────────
// Recorded commands
// ────────────────────────────────────────────────────────────────────────────

/// One call made against the simulated controller.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    SetPinMode { pin: u8, mode: PinMode },
    WritePin { pin: u8, value: bool },
    ReadPins(Vec<u8>),
    SetEStopPin(u8),
    ClearEStopPin,
    EnableMotor(u8),
    DisableMotor(u8),
    StopMotor(u8),
    MoveMotor(MoveCommand),
    SetVelocity(VelocityCommand),
    HomeMotor(u8),
    ReadMotor(u8),
}

impl DriverCommand {
    /// The hardware resource this command addresses.
    pub fn target(&self) -> Target {
        match self {
            DriverCommand::SetPinMode { pin, .. } | DriverCommand::WritePin { pin, .. } => {
                Target::Pin(*pin)
            }
            DriverCommand::ReadPins(pins) => match pins.first() {
                Some(pin) => Target::Pin(*pin),
                None => Target::Controller,
            },
            DriverCommand::SetEStopPin(_) | DriverCommand::ClearEStopPin => Target::Controller,
            DriverCommand::EnableMotor(port)
            | DriverCommand::DisableMotor(port)
            | DriverCommand::StopMotor(port)
            | DriverCommand::HomeMotor(port)
            | DriverCommand::ReadMotor(port) => Target::Motor(*port),
            DriverCommand::MoveMotor(cmd) => Target::Motor(cmd.port),
            DriverCommand::SetVelocity(cmd) => Target::Motor(cmd.port),
        }
    }
}

/// Addressable resource on the simulated controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Pin(u8),
    Motor(u8),
    /// Controller-wide settings such as the emergency-stop routing.
    Controller,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Pin(pin) => write!(f, "pin {pin}"),
            Target::Motor(port) => write!(f, "motor {port}"),
            Target::Controller => f.write_str("controller"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimState {
    commands: Vec<DriverCommand>,
    pin_modes: HashMap<u8, PinMode>,
    levels: HashMap<u8, bool>,
    motors: HashMap<u8, MotorState>,
    estop_pin: Option<u8>,
    faults: HashSet<Target>,
    in_flight: HashMap<Target, usize>,
    peak: HashMap<Target, usize>,
}

/// A simulated IO/motion controller.  Always consistent, never touches real
/// hardware.
pub struct SimDriver {
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimDriver {
    /// Create a simulator with no latency and no preset state.
    pub fn new() -> Arc<Self> {
        SimDriverBuilder::default().build()
    }

    /// Start building a simulator with preset state.
    pub fn builder() -> SimDriverBuilder {
        SimDriverBuilder::default()
    }

    /// Set the level seen on an input pin, as if an external signal changed.
    pub fn set_input(&self, pin: u8, level: bool) {
        self.state.lock().levels.insert(pin, level);
    }

    /// Current level of `pin`, or `None` if it was never written or preset.
    pub fn pin_level(&self, pin: u8) -> Option<bool> {
        self.state.lock().levels.get(&pin).copied()
    }

    pub fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.state.lock().pin_modes.get(&pin).copied()
    }

    /// Current state of motor `port` (default state if never addressed).
    pub fn motor(&self, port: u8) -> MotorState {
        self.state.lock().motors.get(&port).cloned().unwrap_or_default()
    }

    pub fn estop_pin(&self) -> Option<u8> {
        self.state.lock().estop_pin
    }

    /// Every command issued so far, in issue order.
    pub fn commands(&self) -> Vec<DriverCommand> {
        self.state.lock().commands.clone()
    }

    /// Return and forget the commands issued so far.
    pub fn take_commands(&self) -> Vec<DriverCommand> {
        std::mem::take(&mut self.state.lock().commands)
    }

    /// Make every subsequent call addressing `target` fail with a transport
    /// error.  The failing call is still recorded.
    pub fn fail_on(&self, target: Target) {
        self.state.lock().faults.insert(target);
    }

    pub fn clear_fault(&self, target: Target) {
        self.state.lock().faults.remove(&target);
    }

    /// Highest number of calls that were in flight on `target` at once.
    pub fn peak_concurrency(&self, target: Target) -> usize {
        self.state.lock().peak.get(&target).copied().unwrap_or(0)
    }

    // Record the call, simulate the transport round-trip, then mutate state.
    async fn call<T, F>(&self, command: DriverCommand, apply: F) -> Result<T, HertzError>
    where
        F: FnOnce(&mut SimState) -> T + Send,
    {
        let target = command.target();
        trace!(?command, "sim driver call");
        {
            let mut state = self.state.lock();
            state.commands.push(command);
            if state.faults.contains(&target) {
                return Err(HertzError::Transport(format!("simulated fault on {target}")));
            }
            let in_flight = state.in_flight.entry(target).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let peak = state.peak.entry(target).or_default();
            *peak = (*peak).max(current);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(&target) {
            *in_flight = in_flight.saturating_sub(1);
        }
        Ok(apply(&mut state))
    }
}

#[async_trait]
impl HardwareDriver for SimDriver {
    async fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), HertzError> {
        self.call(DriverCommand::SetPinMode { pin, mode }, |s| {
            s.pin_modes.insert(pin, mode);
        })
        .await
    }

    async fn write_digital_pin(&self, pin: u8, value: bool) -> Result<(), HertzError> {
        self.call(DriverCommand::WritePin { pin, value }, |s| {
            s.levels.insert(pin, value);
        })
        .await
    }

    async fn read_digital_pins(&self, pins: &[u8]) -> Result<Vec<bool>, HertzError> {
        let requested = pins.to_vec();
        self.call(DriverCommand::ReadPins(requested.clone()), move |s| {
            requested
                .iter()
                .map(|pin| s.levels.get(pin).copied().unwrap_or(false))
                .collect()
        })
        .await
    }

    async fn set_estop_pin(&self, pin: u8) -> Result<(), HertzError> {
        self.call(DriverCommand::SetEStopPin(pin), |s| s.estop_pin = Some(pin))
            .await
    }

    async fn clear_estop_pin(&self) -> Result<(), HertzError> {
        self.call(DriverCommand::ClearEStopPin, |s| s.estop_pin = None)
            .await
    }

    async fn enable_motor(&self, port: u8) -> Result<(), HertzError> {
        self.call(DriverCommand::EnableMotor(port), |s| {
            s.motors.entry(port).or_default().enabled = true;
        })
        .await
    }

    async fn disable_motor(&self, port: u8) -> Result<(), HertzError> {
        self.call(DriverCommand::DisableMotor(port), |s| {
            let motor = s.motors.entry(port).or_default();
            motor.enabled = false;
            motor.moving = false;
            motor.velocity = 0;
        })
        .await
    }

    async fn stop_motor(&self, port: u8) -> Result<(), HertzError> {
        self.call(DriverCommand::StopMotor(port), |s| {
            let motor = s.motors.entry(port).or_default();
            motor.moving = false;
            motor.velocity = 0;
        })
        .await
    }

    async fn move_motor(&self, command: MoveCommand) -> Result<(), HertzError> {
        self.call(DriverCommand::MoveMotor(command), |s| {
            // Moves complete instantly in simulation.
            let motor = s.motors.entry(command.port).or_default();
            motor.position = motor.position.saturating_add(command.steps);
            motor.moving = false;
        })
        .await
    }

    async fn set_motor_velocity(&self, command: VelocityCommand) -> Result<(), HertzError> {
        self.call(DriverCommand::SetVelocity(command), |s| {
            let motor = s.motors.entry(command.port).or_default();
            motor.velocity = command.velocity;
            motor.moving = command.velocity != 0;
        })
        .await
    }

    async fn home_motor(&self, port: u8) -> Result<(), HertzError> {
        self.call(DriverCommand::HomeMotor(port), |s| {
            s.motors.entry(port).or_default().position = 0;
        })
        .await
    }

    async fn read_motor(&self, port: u8) -> Result<MotorState, HertzError> {
        self.call(DriverCommand::ReadMotor(port), |s| {
            let motor = s.motors.entry(port).or_default();
            // A spinning axis advances by 1% of its velocity per read.
            if motor.moving {
                motor.position = motor.position.saturating_add(motor.velocity / 100);
            }
            motor.clone()
        })
        .await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a [`SimDriver`] with preset inputs, motors and faults.
#[derive(Default)]
pub struct SimDriverBuilder {
    latency: Duration,
    inputs: Vec<(u8, bool)>,
    motors: Vec<u8>,
    faults: Vec<Target>,
}

impl SimDriverBuilder {
    /// Delay every call by `latency` to emulate a serial round-trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Preset the level of an input pin.
    pub fn with_input(mut self, pin: u8, level: bool) -> Self {
        self.inputs.push((pin, level));
        self
    }

    /// Register a motor axis in its default (disabled, at home) state.
    pub fn with_motor(mut self, port: u8) -> Self {
        self.motors.push(port);
        self
    }

    /// Fail every call addressing `target` from the start.
    pub fn with_fault(mut self, target: Target) -> Self {
        self.faults.push(target);
        self
    }

    pub fn build(self) -> Arc<SimDriver> {
        let mut state = SimState::default();
        for (pin, level) in self.inputs {
            state.levels.insert(pin, level);
        }
        for port in self.motors {
            state.motors.insert(port, MotorState::default());
        }
        state.faults.extend(self.faults);
        Arc::new(SimDriver {
            state: Mutex::new(state),
            latency: self.latency,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
