//! Physical and runtime constants shared across the workspace.

/// Ambient temperature every thermal model starts from [°C].
pub const AMBIENT_TEMP: f64 = 25.0;

/// Decimal precision for reported positions and temperature targets.
/// Comparisons use `10^-PRECISION` as the equality band.
pub const PRECISION: i32 = 2;

/// Stefan-Boltzmann constant [W/(m²·K⁴)].
pub const STEFAN_BOLTZMANN: f64 = 5.67e-8;

/// Empirical correction factor applied to radiative losses.
pub const EMISSION_CORRECTION: f64 = 0.85;

/// Default thermal mesh resolution [mm].
pub const DEFAULT_MESH_RESOLUTION: f64 = 5.0;

/// Maximum number of layers in a heater stack.
pub const MAX_HEATER_LAYERS: usize = 8;

/// Default per-object update frequency [Hz].
pub const DEFAULT_UPDATE_HZ: f64 = 1000.0;

/// Default runtime-wide pacing frequency for the time-control thread [Hz].
pub const DEFAULT_PACING_HZ: u64 = 1000;

/// Default tick counter width [bits].
pub const DEFAULT_TICK_WIDTH: u32 = 32;

/// Maximum motors a single axis may own.
pub const MAX_AXIS_MOTORS: usize = 8;

/// Maximum axes a toolhead may bind.
pub const MAX_TOOLHEAD_AXES: usize = 7;

/// Pin-monitor poll period [ns].
pub const PIN_POLL_PERIOD_NS: u64 = 1_000;

/// High-32 prefix marking an error-encoded command id.
pub const ERROR_ID_PREFIX: u64 = 0xDEAD_BEEF;

/// Invalid object id returned by rejected raw-façade calls.
pub const OBJECT_ID_INVALID: u64 = 0;
