//! # EMU Objects
//!
//! The hardware object models: stepper motors, endstops, heaters,
//! thermistors, probes, axes, the toolhead, PWM outputs and digital pins,
//! plus the kinematics maps the toolhead composes over its axes.
//!
//! Each klass exposes a factory with the `(name, config blob)` contract;
//! [`register_builtin_klasses`] wires all of them into a runtime.

#[cfg(test)]
pub(crate) mod testutil;

pub mod axis;
pub mod endstop;
pub mod heater;
pub mod kinematics;
pub mod pin;
pub mod probe;
pub mod pwm;
pub mod stepper;
pub mod thermistor;
pub mod toolhead;

use emu_common::klass::Klass;
use emu_core::Runtime;

/// Register every built-in klass factory on `runtime`.
pub fn register_builtin_klasses(runtime: &Runtime) {
    runtime.register_klass(Klass::Stepper, stepper::factory);
    runtime.register_klass(Klass::Endstop, endstop::factory);
    runtime.register_klass(Klass::Heater, heater::factory);
    runtime.register_klass(Klass::Thermistor, thermistor::factory);
    runtime.register_klass(Klass::Probe, probe::factory);
    runtime.register_klass(Klass::Axis, axis::factory);
    runtime.register_klass(Klass::Toolhead, toolhead::factory);
    runtime.register_klass(Klass::Pwm, pwm::factory);
    runtime.register_klass(Klass::DigitalPin, pin::factory);
}
