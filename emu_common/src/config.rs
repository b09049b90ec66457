//! Klass configuration blobs.
//!
//! Each klass constructor receives an opaque byte slice and decodes it
//! itself; the canonical encoding is JSON (`decode`). Field defaults keep
//! hand-written machine files short.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::consts::{DEFAULT_MESH_RESOLUTION, MAX_HEATER_LAYERS};
use crate::error::{CoreError, CoreResult};
use crate::klass::{AxisType, EndstopKind};

/// Decode a klass config blob from JSON bytes.
pub fn decode<T: DeserializeOwned>(blob: &[u8]) -> CoreResult<T> {
    Ok(serde_json::from_slice(blob)?)
}

// ─── Stepper ────────────────────────────────────────────────────────

/// Stepper motor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepperConfig {
    /// Full steps per rotation.
    #[serde(default = "default_steps_per_rotation")]
    pub steps_per_rotation: u32,
    /// Microstep divider.
    #[serde(default = "default_microsteps")]
    pub microsteps: u32,
    /// Initial cruise speed [steps/s].
    #[serde(default = "default_start_speed")]
    pub start_speed: f64,
    /// Update-thread pacing override [Hz].
    #[serde(default)]
    pub update_frequency: Option<f64>,
}

fn default_steps_per_rotation() -> u32 {
    200
}
fn default_microsteps() -> u32 {
    16
}
fn default_start_speed() -> f64 {
    1000.0
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            steps_per_rotation: 200,
            microsteps: 16,
            start_speed: 1000.0,
            update_frequency: None,
        }
    }
}

impl StepperConfig {
    /// Microsteps per full rotation.
    #[inline]
    pub fn steps_per_rev(&self) -> u32 {
        self.steps_per_rotation * self.microsteps
    }
}

// ─── Heater ─────────────────────────────────────────────────────────

/// Role of a layer in the heater stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerRole {
    /// Injects energy.
    Heater,
    /// Conducting mass carrying the sensor point.
    Body,
    /// Passive mass (insulation, mounting plate).
    Other,
}

/// Thermal material properties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Thermal conductivity [W/(m·K)].
    pub conductivity: f64,
    /// Density [kg/m³].
    pub density: f64,
    /// Specific heat capacity [J/(kg·K)].
    pub specific_heat: f64,
    /// Surface emissivity for radiative losses.
    pub emissivity: f64,
}

impl Material {
    /// Built-in material table. Inline definitions override it.
    pub fn named(name: &str) -> Option<Self> {
        let m = match name {
            "aluminum" => Self {
                conductivity: 237.0,
                density: 2700.0,
                specific_heat: 897.0,
                emissivity: 0.09,
            },
            "copper" => Self {
                conductivity: 401.0,
                density: 8960.0,
                specific_heat: 385.0,
                emissivity: 0.03,
            },
            "steel" => Self {
                conductivity: 50.0,
                density: 7850.0,
                specific_heat: 490.0,
                emissivity: 0.40,
            },
            "silicone" => Self {
                conductivity: 0.9,
                density: 1100.0,
                specific_heat: 1300.0,
                emissivity: 0.95,
            },
            "glass" => Self {
                conductivity: 1.0,
                density: 2500.0,
                specific_heat: 840.0,
                emissivity: 0.92,
            },
            "fr4" => Self {
                conductivity: 0.3,
                density: 1850.0,
                specific_heat: 1100.0,
                emissivity: 0.90,
            },
            _ => return None,
        };
        Some(m)
    }
}

/// Material reference: a table name or an inline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaterialSpec {
    Named(String),
    Inline(Material),
}

impl MaterialSpec {
    /// Resolve against the built-in table.
    pub fn resolve(&self) -> CoreResult<Material> {
        match self {
            Self::Named(name) => Material::named(name).ok_or_else(|| {
                CoreError::InvalidArgument(format!("unknown material '{name}'"))
            }),
            Self::Inline(m) => Ok(*m),
        }
    }
}

/// One rectangular layer of the heater stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub role: LayerRole,
    /// Layer extent [mm]: x, y, thickness.
    pub size: [f64; 3],
    pub material: MaterialSpec,
    /// Rated power [W]; only meaningful for HEATER layers.
    #[serde(default)]
    pub power: f64,
}

/// PID gains. The integrator accumulates in output units and is clamped
/// to the output range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.05,
            kd: 0.5,
        }
    }
}

/// Per-side convective heat-transfer coefficients [W/(m²·K)].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConvectionConfig {
    #[serde(default = "default_convection_top")]
    pub top: f64,
    #[serde(default = "default_convection_bottom")]
    pub bottom: f64,
    #[serde(default = "default_convection_side")]
    pub side: f64,
}

fn default_convection_top() -> f64 {
    12.0
}
fn default_convection_bottom() -> f64 {
    6.0
}
fn default_convection_side() -> f64 {
    9.0
}

impl Default for ConvectionConfig {
    fn default() -> Self {
        Self {
            top: 12.0,
            bottom: 6.0,
            side: 9.0,
        }
    }
}

/// Heater configuration: layer stack, controller, limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaterConfig {
    /// Layer stack, bottom first. At most 8 layers.
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub pid: PidConfig,
    /// SET_TEMP upper bound [°C].
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
    /// Mesh resolution [mm].
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default)]
    pub convection: ConvectionConfig,
    #[serde(default)]
    pub update_frequency: Option<f64>,
}

fn default_max_temp() -> f64 {
    300.0
}
fn default_resolution() -> f64 {
    DEFAULT_MESH_RESOLUTION
}

impl HeaterConfig {
    /// Structural validation: layer count, roles, geometry.
    pub fn validate(&self) -> CoreResult<()> {
        if self.layers.is_empty() || self.layers.len() > MAX_HEATER_LAYERS {
            return Err(CoreError::InvalidArgument(format!(
                "heater stack must have 1..={MAX_HEATER_LAYERS} layers, got {}",
                self.layers.len()
            )));
        }
        if !self.layers.iter().any(|l| l.role == LayerRole::Body) {
            return Err(CoreError::InvalidArgument(
                "heater stack needs a body layer for the sensor point".into(),
            ));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.size.iter().any(|&d| d <= 0.0) {
                return Err(CoreError::InvalidArgument(format!(
                    "layer {i} has non-positive extent"
                )));
            }
            if layer.role == LayerRole::Heater && layer.power <= 0.0 {
                return Err(CoreError::InvalidArgument(format!(
                    "heater layer {i} needs positive power"
                )));
            }
            layer.material.resolve()?;
        }
        if self.resolution <= 0.0 {
            return Err(CoreError::InvalidArgument("resolution must be positive".into()));
        }
        Ok(())
    }

    /// Total rated power over all heater layers [W].
    pub fn rated_power(&self) -> f64 {
        self.layers
            .iter()
            .filter(|l| l.role == LayerRole::Heater)
            .map(|l| l.power)
            .sum()
    }
}

// ─── Thermistor / endstop / probe ───────────────────────────────────

/// Thermistor configuration (beta model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermistorConfig {
    /// Name of the heater whose temperature is sensed.
    pub heater: String,
    /// Nominal resistance at `t0` [Ω].
    #[serde(default = "default_r0")]
    pub r0: f64,
    /// Nominal temperature [°C].
    #[serde(default = "default_t0")]
    pub t0: f64,
    /// Beta coefficient [K].
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default)]
    pub update_frequency: Option<f64>,
}

fn default_r0() -> f64 {
    100_000.0
}
fn default_t0() -> f64 {
    25.0
}
fn default_beta() -> f64 {
    3950.0
}

/// Endstop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndstopConfig {
    /// Name of the guarded axis.
    pub axis: String,
    #[serde(default)]
    pub kind: EndstopKind,
    #[serde(default)]
    pub update_frequency: Option<f64>,
}

/// Probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Per-axis offsets added to the toolhead position [mm].
    #[serde(default)]
    pub offset: [f64; 3],
    /// Trigger point [mm].
    #[serde(default)]
    pub trigger: [f64; 3],
    /// Base half-width of the trigger band [mm]; the effective band is
    /// randomized around this value per approach.
    #[serde(default = "default_fuzz")]
    pub fuzz: f64,
    #[serde(default)]
    pub update_frequency: Option<f64>,
}

fn default_fuzz() -> f64 {
    0.05
}

// ─── Axis / toolhead ────────────────────────────────────────────────

/// Axis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    #[serde(rename = "type")]
    pub axis_type: AxisType,
    /// Travel length [mm].
    pub length: f64,
    /// Linear travel per microstep [mm].
    #[serde(default = "default_travel_per_step")]
    pub travel_per_step: f64,
    /// Names of the driving stepper objects.
    pub steppers: Vec<String>,
    /// Name of the endstop guarding this axis, if any.
    #[serde(default)]
    pub endstop: Option<String>,
    /// Initial position [mm].
    #[serde(default)]
    pub start_position: f64,
    #[serde(default)]
    pub update_frequency: Option<f64>,
}

fn default_travel_per_step() -> f64 {
    0.0025
}

/// Kinematics selection for the toolhead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KinematicsConfig {
    Cartesian,
    CoreXy,
    CoreXz,
    Delta(DeltaConfig),
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self::Cartesian
    }
}

/// Delta tower geometry and work-volume limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaConfig {
    /// Diagonal arm length [mm].
    pub arm_length: f64,
    /// Tower circle radius [mm].
    pub radius: f64,
    /// Per-axis minimum of the work volume [mm].
    #[serde(default = "default_delta_min")]
    pub min_limit: [f64; 3],
    /// Per-axis maximum of the work volume [mm].
    #[serde(default = "default_delta_max")]
    pub max_limit: [f64; 3],
}

fn default_delta_min() -> [f64; 3] {
    [-100.0, -100.0, 0.0]
}
fn default_delta_max() -> [f64; 3] {
    [100.0, 100.0, 300.0]
}

/// Toolhead configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolheadConfig {
    #[serde(default)]
    pub kinematics: KinematicsConfig,
    #[serde(default)]
    pub update_frequency: Option<f64>,
}

// ─── PWM / digital pin ──────────────────────────────────────────────

/// PWM output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwmConfig {
    /// Switching frequency [Hz].
    #[serde(default = "default_pwm_frequency")]
    pub frequency: f64,
    /// Initial duty in [0, 1].
    #[serde(default)]
    pub duty: f64,
    #[serde(default)]
    pub enabled: bool,
}

fn default_pwm_frequency() -> f64 {
    1000.0
}

/// Digital-pin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigitalPinConfig {
    /// Initial level.
    #[serde(default)]
    pub level: bool,
}
