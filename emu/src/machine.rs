//! Machine description file: a TOML document listing runtime parameters
//! and the objects to create. Each object's `config` table is re-encoded
//! as JSON and handed to the klass constructor unchanged.

use std::path::Path;

use emu_common::error::{CoreError, CoreResult};
use emu_common::klass::Klass;
use emu_common::object::ObjectId;
use emu_core::{Runtime, RuntimeConfig};
use serde::Deserialize;
use tracing::info;

/// Top-level machine file.
#[derive(Debug, Deserialize)]
pub struct MachineFile {
    #[serde(default)]
    pub machine: MachineSection,
    #[serde(default, rename = "object")]
    pub objects: Vec<ObjectSection>,
}

/// Runtime parameters.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MachineSection {
    /// Controller tick frequency [Hz].
    pub tick_frequency: u64,
    /// Pacing frequency of the time-control thread [Hz].
    pub pacing_frequency: u64,
    /// Tick counter width [bits].
    pub tick_width: u32,
    /// CPU for the time-control thread.
    pub time_cpu: Option<usize>,
    /// Opt-in SCHED_FIFO priority.
    pub rt_priority: Option<i32>,
}

impl Default for MachineSection {
    fn default() -> Self {
        Self {
            tick_frequency: 1_000_000,
            pacing_frequency: 1000,
            tick_width: 32,
            time_cpu: None,
            rt_priority: None,
        }
    }
}

/// One object entry.
#[derive(Debug, Deserialize)]
pub struct ObjectSection {
    pub klass: Klass,
    pub name: String,
    /// Klass-specific configuration, passed through as JSON.
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl MachineSection {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            pacing_hz: self.pacing_frequency,
            tick_width: self.tick_width,
            time_cpu: self.time_cpu,
            rt_priority: self.rt_priority,
        }
    }
}

/// Parse a machine file.
pub fn load(path: &Path) -> CoreResult<MachineFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
    })?;
    toml::from_str(&content)
        .map_err(|e| CoreError::InvalidArgument(format!("cannot parse {}: {e}", path.display())))
}

/// Create every object from the file, in file order.
pub fn build(runtime: &Runtime, machine: &MachineFile) -> CoreResult<Vec<ObjectId>> {
    let mut ids = Vec::with_capacity(machine.objects.len());
    for object in &machine.objects {
        let blob = serde_json::to_vec(&object.config)
            .map_err(|e| CoreError::InvalidArgument(format!("config of {}: {e}", object.name)))?;
        let id = runtime.create_object(object.klass, &object.name, &blob)?;
        info!("created {}/{} as {id}", object.klass, object.name);
        ids.push(id);
    }
    Ok(ids)
}
