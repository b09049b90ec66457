//! Thermistor: beta-model resistance over a referenced heater's sensor
//! temperature.

use emu_common::config::{self, ThermistorConfig};
use emu_common::consts::{AMBIENT_TEMP, DEFAULT_UPDATE_HZ};
use emu_common::error::{CoreError, CoreResult};
use emu_common::klass::{Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{ObjectState, ThermistorSnapshot};

const KELVIN: f64 = 273.15;

/// The thermistor object.
pub struct Thermistor {
    name: String,
    config: ThermistorConfig,
    heater: ObjectId,
    temperature: f64,
    resistance: f64,
    update_hz: f64,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: ThermistorConfig = config::decode(blob)?;
    let update_hz = cfg.update_frequency.unwrap_or(DEFAULT_UPDATE_HZ);
    let mut t = Thermistor {
        name: name.to_string(),
        config: cfg,
        heater: ObjectId::INVALID,
        temperature: AMBIENT_TEMP,
        resistance: 0.0,
        update_hz,
    };
    t.resistance = t.resistance_at(AMBIENT_TEMP);
    Ok(Box::new(t))
}

impl Thermistor {
    /// Beta equation: `R = R0 · exp(B · (1/T − 1/T0))`, temperatures in
    /// kelvin.
    fn resistance_at(&self, temp_c: f64) -> f64 {
        let t = temp_c + KELVIN;
        let t0 = self.config.t0 + KELVIN;
        self.config.r0 * (self.config.beta * (1.0 / t - 1.0 / t0)).exp()
    }
}

impl SimObject for Thermistor {
    fn klass(&self) -> Klass {
        Klass::Thermistor
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BASE
    }

    fn update_frequency(&self) -> f64 {
        self.update_hz
    }

    fn init(&mut self, _id: ObjectId, core: &dyn CoreHandle) -> CoreResult<()> {
        self.heater = core
            .lookup(Klass::Heater, &self.config.heater)
            .ok_or_else(|| CoreError::NotFound(format!("heater/{}", self.config.heater)))?;
        Ok(())
    }

    fn reset(&mut self, _core: &dyn CoreHandle) {
        self.temperature = AMBIENT_TEMP;
        self.resistance = self.resistance_at(AMBIENT_TEMP);
    }

    fn update(&mut self, _ticks: u64, _runtime_ns: u64, core: &dyn CoreHandle) {
        if let Some(ObjectState::Heater(heater)) = core.object_state(self.heater) {
            self.temperature = heater.temperature;
            self.resistance = self.resistance_at(heater.temperature);
        }
    }

    fn state(&self) -> ObjectState {
        ObjectState::Thermistor(ThermistorSnapshot {
            temperature: self.temperature,
            resistance: self.resistance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingCore;
    use emu_common::state::HeaterSnapshot;

    fn thermistor() -> Box<dyn SimObject> {
        factory("t0", br#"{"heater": "bed"}"#).unwrap()
    }

    #[test]
    fn init_requires_the_heater() {
        let core = RecordingCore::new();
        let mut t = thermistor();
        assert!(matches!(
            t.init(ObjectId::new(1), &core),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn nominal_resistance_at_t0() {
        let core = RecordingCore::new();
        let heater = core.insert_object(
            7,
            Klass::Heater,
            "bed",
            ObjectState::Heater(HeaterSnapshot {
                temperature: 25.0,
                ..Default::default()
            }),
        );
        let mut t = thermistor();
        t.init(ObjectId::new(1), &core).unwrap();
        t.update(0, 0, &core);
        let ObjectState::Thermistor(snap) = t.state() else {
            panic!("wrong snapshot klass");
        };
        assert!((snap.resistance - 100_000.0).abs() < 1e-6);
        let _ = heater;
    }

    #[test]
    fn resistance_falls_as_temperature_rises() {
        let core = RecordingCore::new();
        let heater = core.insert_object(
            7,
            Klass::Heater,
            "bed",
            ObjectState::Heater(HeaterSnapshot {
                temperature: 25.0,
                ..Default::default()
            }),
        );
        let mut t = thermistor();
        t.init(ObjectId::new(1), &core).unwrap();
        t.update(0, 0, &core);
        let ObjectState::Thermistor(cold) = t.state() else { unreachable!() };

        core.set_state(
            heater,
            ObjectState::Heater(HeaterSnapshot {
                temperature: 60.0,
                ..Default::default()
            }),
        );
        t.update(0, 1, &core);
        let ObjectState::Thermistor(hot) = t.state() else { unreachable!() };
        assert_eq!(hot.temperature, 60.0);
        assert!(hot.resistance < cold.resistance / 3.0);
        // Beta 3950, 25 → 60 °C: roughly 100 kΩ → ~24 kΩ.
        assert!((hot.resistance - 24_000.0).abs() < 2_000.0);
    }
}
