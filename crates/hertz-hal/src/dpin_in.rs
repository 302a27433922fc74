//! `dpinin` – a digital input pin with a single `value` observable.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use hertz_types::{HertzError, PinMode, PropMap};
use serde_json::Value;

use crate::driver::HardwareDriver;
use crate::peripheral::{Peripheral, PropHandlers, parse_attr, rejected, required_attr};

pub struct DigitalPinIn {
    pin: u8,
    driver: Arc<dyn HardwareDriver>,
}

impl DigitalPinIn {
    pub fn pin(&self) -> u8 {
        self.pin
    }

    // The pin is part of the node's identity.
    fn apply_pin<'a>(&'a mut self, value: &'a Value) -> BoxFuture<'a, Result<(), HertzError>> {
        async move {
            let pin: u8 = parse_attr("pin", value)?;
            if pin != self.pin {
                return Err(rejected(
                    "pin",
                    "changing the pin after initialization is not supported",
                ));
            }
            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl Peripheral for DigitalPinIn {
    const KIND: &'static str = "dpinin";

    fn create(props: &PropMap, driver: Arc<dyn HardwareDriver>) -> Result<Self, HertzError> {
        Ok(Self {
            pin: required_attr(props, "pin")?,
            driver,
        })
    }

    fn handlers() -> PropHandlers<Self> {
        PropHandlers::new().on_apply("pin", Self::apply_pin)
    }

    async fn init(&mut self) -> Result<(), HertzError> {
        self.driver
            .set_pin_mode(self.pin, PinMode::DigitalInput)
            .await
    }

    async fn read_values(&mut self) -> Result<PropMap, HertzError> {
        let levels = self.driver.read_digital_pins(&[self.pin]).await?;
        let level = levels.first().copied().ok_or_else(|| {
            HertzError::Transport(format!("no level reported for pin {}", self.pin))
        })?;

        let mut values = PropMap::new();
        values.insert("value".to_string(), Value::Bool(level));
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{DriverCommand, SimDriver};
    use serde_json::json;

    fn props(value: Value) -> PropMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn init_sets_input_mode() {
        let driver = SimDriver::new();
        let mut input = DigitalPinIn::create(&props(json!({"pin": 5})), driver.clone()).unwrap();
        input.init().await.unwrap();
        assert_eq!(input.pin(), 5);
        assert_eq!(
            driver.commands(),
            vec![DriverCommand::SetPinMode { pin: 5, mode: PinMode::DigitalInput }]
        );
    }

    #[tokio::test]
    async fn reads_single_value() {
        let driver = SimDriver::builder().with_input(5, true).build();
        let mut input = DigitalPinIn::create(&props(json!({"pin": 5})), driver.clone()).unwrap();
        let values = input.read_values().await.unwrap();
        assert_eq!(Value::Object(values), json!({"value": true}));
    }

    #[tokio::test]
    async fn pin_is_fixed() {
        let driver = SimDriver::new();
        let mut input = DigitalPinIn::create(&props(json!({"pin": 5})), driver).unwrap();
        input.apply_pin(&json!(5)).await.unwrap();
        let err = input.apply_pin(&json!(6)).await.unwrap_err();
        assert!(matches!(err, HertzError::Update { ref key, .. } if key == "pin"));
    }

    #[test]
    fn missing_pin_is_rejected() {
        let err = DigitalPinIn::create(&PropMap::new(), SimDriver::new()).err().unwrap();
        assert!(matches!(err, HertzError::Update { ref key, .. } if key == "pin"));
    }
}
