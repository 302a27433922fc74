//! `dpinout` – a digital output pin driven by the declared `value`.
//!
//! Dropping `value` from the declaration drives the pin low.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use hertz_types::{HertzError, PinMode, PropMap};
use serde_json::Value;

use crate::driver::HardwareDriver;
use crate::peripheral::{Peripheral, PropHandlers, parse_attr, rejected, required_attr};

pub struct DigitalPinOut {
    pin: u8,
    driver: Arc<dyn HardwareDriver>,
}

impl DigitalPinOut {
    pub fn pin(&self) -> u8 {
        self.pin
    }

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

    fn apply_value<'a>(&'a mut self, value: &'a Value) -> BoxFuture<'a, Result<(), HertzError>> {
        async move {
            let level: bool = parse_attr("value", value)?;
            self.driver.write_digital_pin(self.pin, level).await
        }
        .boxed()
    }

    fn disown_value(&mut self) -> BoxFuture<'_, Result<(), HertzError>> {
        async move { self.driver.write_digital_pin(self.pin, false).await }.boxed()
    }
}

#[async_trait]
impl Peripheral for DigitalPinOut {
    const KIND: &'static str = "dpinout";

    fn create(props: &PropMap, driver: Arc<dyn HardwareDriver>) -> Result<Self, HertzError> {
        Ok(Self {
            pin: required_attr(props, "pin")?,
            driver,
        })
    }

    fn handlers() -> PropHandlers<Self> {
        PropHandlers::new()
            .on_apply("pin", Self::apply_pin)
            .on_apply("value", Self::apply_value)
            .on_disown("value", Self::disown_value)
    }

    async fn init(&mut self) -> Result<(), HertzError> {
        self.driver
            .set_pin_mode(self.pin, PinMode::DigitalOutput)
            .await
    }
}
