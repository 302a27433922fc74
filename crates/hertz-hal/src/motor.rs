//! `motor` – one stepper/servo axis on the controller.
//!
//! Attributes:
//!
//! - `port` and `eStopPin` are fixed for the lifetime of the node.
//! - `enabled` energizes or de-energizes the axis.
//! - `target` is either a velocity move `{targetVelocity, acceleration}` or a
//!   position move `{targetPosition, targetVelocity, acceleration}`.
//!
//! A `target` with `targetVelocity: 0` holds the axis still
//! ([`MotorControl::Halted`]); removing `target` altogether releases control
//! of the axis ([`MotorControl::Released`]).  Both stop the motor, but they
//! are different declared states.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use hertz_types::{HertzError, PropMap};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::driver::{HardwareDriver, MoveCommand, VelocityCommand};
use crate::peripheral::{
    Peripheral, PropHandlers, optional_attr, parse_attr, rejected, required_attr,
};

/// Declared motion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotorTarget {
    pub target_velocity: Option<i64>,
    pub acceleration: Option<i64>,
    pub target_position: Option<i64>,
}

/// What the node currently asks of the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorControl {
    /// No target declared.
    Released,
    /// Target declared with zero velocity.
    Halted,
    Velocity { velocity: i64, acceleration: i64 },
    Position { position: i64, velocity: i64, acceleration: i64 },
}

pub struct Motor {
    port: u8,
    estop_pin: Option<u8>,
    control: MotorControl,
    driver: Arc<dyn HardwareDriver>,
}

impl Motor {
    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn control(&self) -> MotorControl {
        self.control
    }

    fn apply_port<'a>(&'a mut self, value: &'a Value) -> BoxFuture<'a, Result<(), HertzError>> {
        async move {
            let port: u8 = parse_attr("port", value)?;
            if port != self.port {
                return Err(rejected(
                    "port",
                    "changing the port after initialization is not supported",
                ));
            }
            Ok(())
        }
        .boxed()
    }

    fn apply_estop_pin<'a>(
        &'a mut self,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<(), HertzError>> {
        async move {
            let pin: u8 = parse_attr("eStopPin", value)?;
            if Some(pin) != self.estop_pin {
                return Err(rejected(
                    "eStopPin",
                    "changing the eStopPin after initialization is not supported",
                ));
            }
            Ok(())
        }
        .boxed()
    }

    fn disown_estop_pin(&mut self) -> BoxFuture<'_, Result<(), HertzError>> {
        async move { self.driver.clear_estop_pin().await }.boxed()
    }

    fn apply_enabled<'a>(&'a mut self, value: &'a Value) -> BoxFuture<'a, Result<(), HertzError>> {
        async move {
            if parse_attr::<bool>("enabled", value)? {
                self.driver.enable_motor(self.port).await
            } else {
                self.driver.disable_motor(self.port).await
            }
        }
        .boxed()
    }

    fn disown_enabled(&mut self) -> BoxFuture<'_, Result<(), HertzError>> {
        async move {
            self.driver.stop_motor(self.port).await?;
            self.driver.disable_motor(self.port).await
        }
        .boxed()
    }

    fn apply_target<'a>(&'a mut self, value: &'a Value) -> BoxFuture<'a, Result<(), HertzError>> {
        async move {
            let target: MotorTarget = parse_attr("target", value)?;
            self.drive_to(target).await
        }
        .boxed()
    }

    fn disown_target(&mut self) -> BoxFuture<'_, Result<(), HertzError>> {
        async move {
            self.driver.stop_motor(self.port).await?;
            self.control = MotorControl::Released;
            Ok(())
        }
        .boxed()
    }

    async fn drive_to(&mut self, target: MotorTarget) -> Result<(), HertzError> {
        let (Some(velocity), Some(acceleration)) = (target.target_velocity, target.acceleration)
        else {
            return Err(rejected(
                "target",
                "targetVelocity and acceleration must both be set",
            ));
        };

        // Any new target starts from standstill.
        self.driver.stop_motor(self.port).await?;
        self.control = MotorControl::Halted;

        if acceleration <= 0 {
            return Err(rejected("target", "acceleration must be positive"));
        }
        if velocity == 0 {
            debug!(port = self.port, "motor halted");
            return Ok(());
        }

        match target.target_position {
            None => {
                self.driver
                    .set_motor_velocity(VelocityCommand {
                        port: self.port,
                        velocity,
                        acceleration,
                    })
                    .await?;
                self.control = MotorControl::Velocity {
                    velocity,
                    acceleration,
                };
            }
            Some(position) => {
                let current = self.driver.read_motor(self.port).await?.position;
                let steps = position.checked_sub(current).ok_or_else(|| {
                    rejected("target", "targetPosition is out of reach from the current position")
                })?;
                if steps != 0 {
                    self.driver
                        .move_motor(MoveCommand {
                            port: self.port,
                            steps,
                            velocity,
                            acceleration,
                        })
                        .await?;
                }
                self.control = MotorControl::Position {
                    position,
                    velocity,
                    acceleration,
                };
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Peripheral for Motor {
    const KIND: &'static str = "motor";

    fn create(props: &PropMap, driver: Arc<dyn HardwareDriver>) -> Result<Self, HertzError> {
        Ok(Self {
            port: required_attr(props, "port")?,
            estop_pin: optional_attr(props, "eStopPin")?,
            control: MotorControl::Released,
            driver,
        })
    }

    fn handlers() -> PropHandlers<Self> {
        PropHandlers::new()
            .on_apply("port", Self::apply_port)
            .on_apply("eStopPin", Self::apply_estop_pin)
            .on_disown("eStopPin", Self::disown_estop_pin)
            .on_apply("enabled", Self::apply_enabled)
            .on_disown("enabled", Self::disown_enabled)
            .on_apply("target", Self::apply_target)
            .on_disown("target", Self::disown_target)
    }

    async fn init(&mut self) -> Result<(), HertzError> {
        if let Some(pin) = self.estop_pin {
            self.driver.set_estop_pin(pin).await?;
        }
        Ok(())
    }

    async fn read_values(&mut self) -> Result<PropMap, HertzError> {
        let state = self.driver.read_motor(self.port).await?;
        let mut values = PropMap::new();
        values.insert("position".to_string(), Value::from(state.position));
        values.insert("velocity".to_string(), Value::from(state.velocity));
        values.insert("enabled".to_string(), Value::Bool(state.enabled));
        values.insert("moving".to_string(), Value::Bool(state.moving));
        values.insert("fault".to_string(), Value::Bool(state.fault));
        Ok(values)
    }

    async fn command(&mut self, name: &str) -> Result<(), HertzError> {
        match name {
            "setHome" => self.driver.home_motor(self.port).await,
            other => Err(HertzError::UnsupportedCommand {
                component: Self::KIND.to_string(),
                command: other.to_string(),
            }),
        }
    }
}
