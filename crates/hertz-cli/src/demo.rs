//! Built-in declarations mounted against the simulated controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hertz_hal::SimDriver;
use hertz_runtime::{AttachPoint, DeclarationSource, Orchestrator};
use hertz_types::{Attributes, HertzError, NodeId};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DemoKind;

/// Delay between two rounds of a demo.
pub const DEMO_PERIOD: Duration = Duration::from_millis(500);

const BLINK_PIN: u8 = 13;
const FOLLOW_INPUT_PIN: u8 = 2;
const FOLLOW_OUTPUT_PIN: u8 = 3;
const MOTOR_PORT: u8 = 0;
const MOTOR_ESTOP_PIN: u8 = 7;
const MOTOR_LED_PIN: u8 = 12;
const CRUISE_VELOCITY: i64 = 1000;
const CRUISE_ACCELERATION: i64 = 500;

/// Build the declaration source for `kind`.
pub fn source(kind: DemoKind, driver: Arc<SimDriver>, period: Duration) -> Box<dyn DeclarationSource> {
    match kind {
        DemoKind::Blink => Box::new(Blink::new(BLINK_PIN, period)),
        DemoKind::Follow => Box::new(Follow::new(driver, period)),
        DemoKind::MotorVelocity => Box::new(MotorVelocity::new(period)),
    }
}

/// Create `kind` under the container and schedule its init.
fn mount(host: &Orchestrator, kind: &str, attributes: Attributes) -> Result<NodeId, HertzError> {
    mount_under(host, AttachPoint::Container, kind, attributes)
}

fn mount_under(
    host: &Orchestrator,
    at: AttachPoint,
    kind: &str,
    attributes: Attributes,
) -> Result<NodeId, HertzError> {
    let id = host.instantiate(kind, attributes)?;
    host.attach(at, id, None)?;
    host.schedule_init(id)?;
    Ok(id)
}

/// Redeclare one attribute of `id`, keeping the rest.
fn redeclare(host: &Orchestrator, id: NodeId, key: &str, value: Value) -> Result<(), HertzError> {
    let prev = host.attributes(id).ok_or(HertzError::UnknownNode(id))?;
    let next = prev.with_prop(key, value);
    host.schedule_update(id, prev, next)
}

fn log_failures(attributes: Attributes, label: &'static str) -> Attributes {
    attributes.on_error(move |e| warn!(node = label, error = %e, "demo node failed"))
}

// ─────────────────────────────────────────────────────────────────────────────
// blink
// ─────────────────────────────────────────────────────────────────────────────

/// Toggles one digital output every period.
pub struct Blink {
    pin: u8,
    period: Duration,
    node: Option<NodeId>,
    on: bool,
}

impl Blink {
    pub fn new(pin: u8, period: Duration) -> Self {
        Self {
            pin,
            period,
            node: None,
            on: false,
        }
    }
}

#[async_trait]
impl DeclarationSource for Blink {
    async fn reconcile(&mut self, host: &Orchestrator) -> Result<bool, HertzError> {
        let Some(id) = self.node else {
            let attrs = Attributes::from_json(json!({"pin": self.pin, "value": self.on}));
            self.node = Some(mount(host, "dpinout", log_failures(attrs, "led"))?);
            return Ok(true);
        };

        tokio::time::sleep(self.period).await;
        self.on = !self.on;
        redeclare(host, id, "value", json!(self.on))?;
        info!(pin = self.pin, on = self.on, "blink");
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// follow
// ─────────────────────────────────────────────────────────────────────────────

/// Mirrors an observed input onto an output.  The simulated input level is
/// flipped every period, standing in for an external switch.
pub struct Follow {
    driver: Arc<SimDriver>,
    period: Duration,
    output: Option<NodeId>,
    level: bool,
    changes_tx: mpsc::UnboundedSender<bool>,
    changes_rx: mpsc::UnboundedReceiver<bool>,
}

impl Follow {
    pub fn new(driver: Arc<SimDriver>, period: Duration) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        Self {
            driver,
            period,
            output: None,
            level: false,
            changes_tx,
            changes_rx,
        }
    }
}

#[async_trait]
impl DeclarationSource for Follow {
    async fn reconcile(&mut self, host: &Orchestrator) -> Result<bool, HertzError> {
        let Some(output) = self.output else {
            let changes = self.changes_tx.clone();
            let input = Attributes::from_json(json!({"pin": FOLLOW_INPUT_PIN})).on_change(
                "value",
                move |value, _initial| {
                    let _ = changes.send(value.as_bool().unwrap_or_default());
                },
            );
            mount(host, "dpinin", log_failures(input, "switch"))?;
            let out = Attributes::from_json(json!({"pin": FOLLOW_OUTPUT_PIN, "value": false}));
            self.output = Some(mount(host, "dpinout", log_failures(out, "lamp"))?);
            return Ok(true);
        };

        tokio::select! {
            Some(level) = self.changes_rx.recv() => {
                info!(level, "switch changed");
                redeclare(host, output, "value", json!(level))?;
            }
            _ = tokio::time::sleep(self.period) => {
                self.level = !self.level;
                self.driver.set_input(FOLLOW_INPUT_PIN, self.level);
            }
        }
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// motor-velocity
// ─────────────────────────────────────────────────────────────────────────────

/// Alternates a motor between cruising and halting, with an indicator output
/// mounted as its child.  Every fourth halt re-homes the axis.
pub struct MotorVelocity {
    period: Duration,
    motor: Option<(NodeId, NodeId)>,
    cruising: bool,
    halts: u32,
}

impl MotorVelocity {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            motor: None,
            cruising: true,
            halts: 0,
        }
    }

    fn target(velocity: i64) -> Value {
        json!({"targetVelocity": velocity, "acceleration": CRUISE_ACCELERATION})
    }
}

#[async_trait]
impl DeclarationSource for MotorVelocity {
    async fn reconcile(&mut self, host: &Orchestrator) -> Result<bool, HertzError> {
        let Some((motor, led)) = self.motor else {
            let attrs = Attributes::from_json(json!({
                "port": MOTOR_PORT,
                "eStopPin": MOTOR_ESTOP_PIN,
                "enabled": true,
                "target": Self::target(CRUISE_VELOCITY),
            }))
            .on_change("position", |value, _| debug!(%value, "motor position"));
            let motor = mount(host, "motor", log_failures(attrs, "axis"))?;
            let led = Attributes::from_json(json!({"pin": MOTOR_LED_PIN, "value": true}));
            let led = mount_under(
                host,
                AttachPoint::Node(motor),
                "dpinout",
                log_failures(led, "axis-led"),
            )?;
            self.motor = Some((motor, led));
            return Ok(true);
        };

        tokio::time::sleep(self.period).await;
        self.cruising = !self.cruising;
        let velocity = if self.cruising { CRUISE_VELOCITY } else { 0 };
        redeclare(host, motor, "target", Self::target(velocity))?;
        redeclare(host, led, "value", json!(self.cruising))?;

        if !self.cruising {
            self.halts += 1;
            if self.halts % 4 == 0 {
                host.schedule_command(motor, "setHome")?;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hertz_hal::PeripheralCatalog;
    use hertz_hal::sim::DriverCommand;
    use hertz_runtime::{Reconciler, ReconcilerConfig};
    use hertz_types::PinMode;
    use tokio::sync::watch;

    const FAST: Duration = Duration::from_millis(5);

    fn reconciler(driver: &Arc<SimDriver>) -> Reconciler {
        Reconciler::new(
            driver.clone(),
            PeripheralCatalog::with_builtin(),
            ReconcilerConfig::default(),
        )
    }

    async fn run_for(kind: DemoKind, driver: &Arc<SimDriver>, time: Duration) {
        let reconciler = reconciler(driver);
        let (stop, shutdown) = watch::channel(false);
        let source = source(kind, driver.clone(), FAST);
        let stopper = async {
            tokio::time::sleep(time).await;
            stop.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(reconciler.run(source, shutdown), stopper);
        result.unwrap();
        assert!(reconciler.orchestrator().registry().lock().is_empty());
    }

    #[tokio::test]
    async fn blink_toggles_and_ends_low() {
        let driver = SimDriver::new();
        run_for(DemoKind::Blink, &driver, Duration::from_millis(60)).await;

        let writes: Vec<bool> = driver
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                DriverCommand::WritePin { pin: BLINK_PIN, value } => Some(value),
                _ => None,
            })
            .collect();
        assert!(writes.contains(&true));
        assert_eq!(writes.last(), Some(&false));
        assert_eq!(driver.pin_mode(BLINK_PIN), Some(PinMode::DigitalOutput));
    }

    #[tokio::test]
    async fn follow_mirrors_the_input() {
        let driver = SimDriver::new();
        run_for(DemoKind::Follow, &driver, Duration::from_millis(80)).await;

        let commands = driver.commands();
        assert!(commands.contains(&DriverCommand::WritePin {
            pin: FOLLOW_OUTPUT_PIN,
            value: true
        }));
        assert_eq!(driver.pin_mode(FOLLOW_INPUT_PIN), Some(PinMode::DigitalInput));
    }

    #[tokio::test]
    async fn motor_demo_halts_with_stop_only() {
        let driver = SimDriver::new();
        run_for(DemoKind::MotorVelocity, &driver, Duration::from_millis(60)).await;

        let commands = driver.commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            DriverCommand::SetVelocity(cmd) if cmd.velocity == CRUISE_VELOCITY
        )));
        // Halting never asks for a zero velocity.
        assert!(!commands.iter().any(|c| matches!(
            c,
            DriverCommand::SetVelocity(cmd) if cmd.velocity == 0
        )));
        // The indicator was set up only after the axis.
        let estop = commands
            .iter()
            .position(|c| *c == DriverCommand::SetEStopPin(MOTOR_ESTOP_PIN))
            .unwrap();
        let led = commands
            .iter()
            .position(|c| {
                *c == DriverCommand::SetPinMode {
                    pin: MOTOR_LED_PIN,
                    mode: PinMode::DigitalOutput,
                }
            })
            .unwrap();
        assert!(estop < led);
        assert!(!driver.motor(MOTOR_PORT).enabled);
    }
}
