//! Probe: polls the toolhead, applies per-axis offsets, and triggers
//! inside a randomized band around the configured trigger point.
//!
//! The band half-width is re-drawn from ±25 % of the configured fuzz on
//! every disengage, so repeated probing of the same point scatters the
//! way a mechanical switch does.

use emu_common::config::{self, ProbeConfig};
use emu_common::consts::DEFAULT_UPDATE_HZ;
use emu_common::error::{CoreError, CoreResult};
use emu_common::events::{EventKind, EventPayload};
use emu_common::klass::{Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{ObjectState, Position, ProbeSnapshot};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// The probe object.
pub struct Probe {
    name: String,
    id: ObjectId,
    config: ProbeConfig,
    toolhead: ObjectId,
    position: Position,
    triggered: bool,
    band: f64,
    rng: SmallRng,
    update_hz: f64,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: ProbeConfig = config::decode(blob)?;
    if cfg.fuzz <= 0.0 {
        return Err(CoreError::InvalidArgument(format!(
            "probe {name} needs a positive fuzz range"
        )));
    }
    let update_hz = cfg.update_frequency.unwrap_or(DEFAULT_UPDATE_HZ);
    let band = cfg.fuzz;
    Ok(Box::new(Probe {
        name: name.to_string(),
        id: ObjectId::INVALID,
        config: cfg,
        toolhead: ObjectId::INVALID,
        position: Position::default(),
        triggered: false,
        band,
        rng: SmallRng::from_entropy(),
        update_hz,
    }))
}

impl Probe {
    fn redraw_band(&mut self) {
        self.band = self.config.fuzz * self.rng.gen_range(0.75..1.25);
    }

    fn within_band(&self, p: Position) -> bool {
        (p.x - self.config.trigger[0]).abs() <= self.band
            && (p.y - self.config.trigger[1]).abs() <= self.band
            && (p.z - self.config.trigger[2]).abs() <= self.band
    }
}

impl SimObject for Probe {
    fn klass(&self) -> Klass {
        Klass::Probe
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

    fn init(&mut self, id: ObjectId, core: &dyn CoreHandle) -> CoreResult<()> {
        self.id = id;
        self.toolhead = core
            .list_objects(Klass::Toolhead)
            .first()
            .copied()
            .ok_or_else(|| CoreError::NotFound(format!("probe {} found no toolhead", self.name)))?;
        Ok(())
    }

    fn reset(&mut self, _core: &dyn CoreHandle) {
        self.triggered = false;
        self.position = Position::default();
        self.band = self.config.fuzz;
    }

    fn update(&mut self, _ticks: u64, _runtime_ns: u64, core: &dyn CoreHandle) {
        let Some(ObjectState::Toolhead(toolhead)) = core.object_state(self.toolhead) else {
            return;
        };
        self.position = Position::new(
            toolhead.position.x + self.config.offset[0],
            toolhead.position.y + self.config.offset[1],
            toolhead.position.z + self.config.offset[2],
        );

        let inside = self.within_band(self.position);
        if inside && !self.triggered {
            self.triggered = true;
            trace!(target: "emu.objects.probe", "{}: triggered at {}", self.name, self.position);
            core.submit_event(
                EventKind::ProbeTriggered,
                self.id,
                EventPayload::Position(self.position),
            );
        } else if !inside && self.triggered {
            self.triggered = false;
            self.redraw_band();
        }
    }

    fn state(&self) -> ObjectState {
        ObjectState::Probe(ProbeSnapshot {
            triggered: self.triggered,
            position: self.position,
        })
    }
}
