//! Finite-element thermal model of the heater stack.
//!
//! Each layer is meshed at the configured resolution into Ex×Ey
//! elements. A step clears the per-element energy accumulator, injects
//! heater power, conducts within layers (Fourier) and between adjacent
//! layers (series resistance over the projected footprint), applies
//! convective and radiative losses on exposed faces, then integrates
//! temperatures. Wall-clock gaps are sub-stepped to keep the explicit
//! scheme inside its stability bound.

use emu_common::config::{ConvectionConfig, HeaterConfig, LayerRole, Material};
use emu_common::consts::{AMBIENT_TEMP, EMISSION_CORRECTION, STEFAN_BOLTZMANN};

const KELVIN: f64 = 273.15;

/// Hard ceiling for one explicit integration step [s].
const MAX_SUBSTEP: f64 = 0.05;

struct Layer {
    role: LayerRole,
    ex: usize,
    ey: usize,
    /// Footprint [m].
    size_x: f64,
    size_y: f64,
    /// Thickness [m].
    thickness: f64,
    material: Material,
    /// Rated power [W] (heater layers).
    power: f64,
    /// Element temperatures [°C].
    temp: Vec<f64>,
    /// Per-step energy accumulator [J].
    dq: Vec<f64>,
}

impl Layer {
    #[inline]
    fn idx(&self, x: usize, y: usize) -> usize {
        y * self.ex + x
    }

    /// Heat capacity of one element [J/K].
    #[inline]
    fn element_capacity(&self, resolution: f64) -> f64 {
        self.material.density
            * self.material.specific_heat
            * resolution
            * resolution
            * self.thickness
    }
}

/// The meshed stack.
pub struct ThermalModel {
    layers: Vec<Layer>,
    /// Mesh resolution [m].
    resolution: f64,
    convection: ConvectionConfig,
    /// Index of the BODY layer carrying the sensor point.
    sensor_layer: usize,
    /// Stability-bounded substep [s].
    substep: f64,
}

impl ThermalModel {
    pub fn new(config: &HeaterConfig) -> emu_common::error::CoreResult<Self> {
        config.validate()?;
        let resolution = config.resolution / 1000.0;

        let mut layers = Vec::with_capacity(config.layers.len());
        for lc in &config.layers {
            let size_x = lc.size[0] / 1000.0;
            let size_y = lc.size[1] / 1000.0;
            let thickness = lc.size[2] / 1000.0;
            let ex = ((size_x / resolution).ceil() as usize).max(1);
            let ey = ((size_y / resolution).ceil() as usize).max(1);
            layers.push(Layer {
                role: lc.role,
                ex,
                ey,
                size_x,
                size_y,
                thickness,
                material: lc.material.resolve()?,
                power: lc.power,
                temp: vec![AMBIENT_TEMP; ex * ey],
                dq: vec![0.0; ex * ey],
            });
        }

        // Sensor: the BODY layer closest to the stack's mid-height.
        let total_height: f64 = layers.iter().map(|l| l.thickness).sum();
        let mut z = 0.0;
        let mut sensor_layer = None;
        let mut best = f64::INFINITY;
        for (i, layer) in layers.iter().enumerate() {
            let center = z + layer.thickness / 2.0;
            z += layer.thickness;
            if layer.role == LayerRole::Body {
                let dist = (center - total_height / 2.0).abs();
                if dist < best {
                    best = dist;
                    sensor_layer = Some(i);
                }
            }
        }
        let sensor_layer = sensor_layer.expect("validated config has a body layer");

        let substep = stable_substep(&layers, resolution);
        Ok(Self {
            layers,
            resolution,
            convection: config.convection,
            sensor_layer,
            substep,
        })
    }

    /// Sensor temperature: geometric center of the BODY layer [°C].
    pub fn sensor_temp(&self) -> f64 {
        let layer = &self.layers[self.sensor_layer];
        layer.temp[layer.idx(layer.ex / 2, layer.ey / 2)]
    }

    /// Return every element to ambient and clear the accumulators.
    pub fn reset(&mut self) {
        for layer in &mut self.layers {
            layer.temp.fill(AMBIENT_TEMP);
            layer.dq.fill(0.0);
        }
    }

    /// Advance the model by `dt` seconds at the given drive duty.
    pub fn step(&mut self, duty: f64, dt: f64) {
        let duty = duty.clamp(0.0, 1.0);
        let mut remaining = dt;
        while remaining > 0.0 {
            let slice = remaining.min(self.substep);
            self.substep(duty, slice);
            remaining -= slice;
        }
    }

    /// Total thermal energy relative to 0 °C [J]. Conserved when losses
    /// and injection are zero.
    pub fn energy(&self) -> f64 {
        let mut total = 0.0;
        for layer in &self.layers {
            let cap = layer.element_capacity(self.resolution);
            total += layer.temp.iter().sum::<f64>() * cap;
        }
        total
    }

    fn substep(&mut self, duty: f64, dt: f64) {
        let res = self.resolution;

        for layer in &mut self.layers {
            layer.dq.fill(0.0);
        }

        // Power injection, spread uniformly over the heater footprint.
        for layer in &mut self.layers {
            if layer.role == LayerRole::Heater && layer.power > 0.0 {
                let per_element = duty * layer.power * dt / (layer.ex * layer.ey) as f64;
                for dq in &mut layer.dq {
                    *dq += per_element;
                }
            }
        }

        // In-layer conduction, X then Y. Fourier with A = res·z and
        // dx = res collapses to k·z·ΔT·dt.
        for layer in &mut self.layers {
            let factor = layer.material.conductivity * layer.thickness * dt;
            for y in 0..layer.ey {
                for x in 0..layer.ex - 1 {
                    let i = layer.idx(x, y);
                    let j = layer.idx(x + 1, y);
                    let q = factor * (layer.temp[i] - layer.temp[j]);
                    layer.dq[i] -= q;
                    layer.dq[j] += q;
                }
            }
            for y in 0..layer.ey - 1 {
                for x in 0..layer.ex {
                    let i = layer.idx(x, y);
                    let j = layer.idx(x, y + 1);
                    let q = factor * (layer.temp[i] - layer.temp[j]);
                    layer.dq[i] -= q;
                    layer.dq[j] += q;
                }
            }
        }

        // Inter-layer conduction through the series resistance of the
        // two half-thicknesses, over the projected overlap.
        for l in 0..self.layers.len().saturating_sub(1) {
            let (head, tail) = self.layers.split_at_mut(l + 1);
            let a = &mut head[l];
            let b = &mut tail[0];
            let u = 1.0
                / (0.5 * a.thickness / a.material.conductivity
                    + 0.5 * b.thickness / b.material.conductivity);
            let cell = u * res * res * dt;

            // Iterate the smaller footprint; centered projection onto
            // the larger.
            let a_small = a.ex * a.ey <= b.ex * b.ey;
            let (small, big) = if a_small { (a, b) } else { (b, a) };
            let off_x = (big.size_x - small.size_x) / 2.0;
            let off_y = (big.size_y - small.size_y) / 2.0;
            for sy in 0..small.ey {
                for sx in 0..small.ex {
                    let cx = (sx as f64 + 0.5) * res + off_x;
                    let cy = (sy as f64 + 0.5) * res + off_y;
                    let bx = ((cx / res) as usize).min(big.ex - 1);
                    let by = ((cy / res) as usize).min(big.ey - 1);
                    let i = small.idx(sx, sy);
                    let j = big.idx(bx, by);
                    let q = cell * (small.temp[i] - big.temp[j]);
                    small.dq[i] -= q;
                    big.dq[j] += q;
                }
            }
        }

        // Convection and radiation on exposed faces.
        let ambient4 = (AMBIENT_TEMP + KELVIN).powi(4);
        let layer_count = self.layers.len();
        for (li, layer) in self.layers.iter_mut().enumerate() {
            let emissive = layer.material.emissivity * STEFAN_BOLTZMANN * EMISSION_CORRECTION;
            let loss = |t: f64, h: f64, area: f64| {
                (h * (t - AMBIENT_TEMP) + emissive * ((t + KELVIN).powi(4) - ambient4)) * area * dt
            };

            let face_area = res * res;
            if li == 0 {
                for i in 0..layer.temp.len() {
                    layer.dq[i] -= loss(layer.temp[i], self.convection.bottom, face_area);
                }
            }
            if li == layer_count - 1 {
                for i in 0..layer.temp.len() {
                    layer.dq[i] -= loss(layer.temp[i], self.convection.top, face_area);
                }
            }

            let side_area = res * layer.thickness;
            for y in 0..layer.ey {
                for &x in &[0, layer.ex - 1] {
                    let i = layer.idx(x, y);
                    layer.dq[i] -= loss(layer.temp[i], self.convection.side, side_area);
                }
            }
            for x in 0..layer.ex {
                for &y in &[0, layer.ey - 1] {
                    let i = layer.idx(x, y);
                    layer.dq[i] -= loss(layer.temp[i], self.convection.side, side_area);
                }
            }
        }

        // Temperature integration.
        for layer in &mut self.layers {
            let capacity = layer.element_capacity(res);
            for i in 0..layer.temp.len() {
                layer.temp[i] += layer.dq[i] / capacity;
            }
        }
    }
}

/// Conservative explicit-Euler bound over in-layer diffusion and
/// inter-layer coupling.
fn stable_substep(layers: &[Layer], resolution: f64) -> f64 {
    let mut bound: f64 = MAX_SUBSTEP;
    for layer in layers {
        let alpha = layer.material.conductivity
            / (layer.material.density * layer.material.specific_heat);
        bound = bound.min(0.2 * resolution * resolution / alpha);
    }
    for pair in layers.windows(2) {
        let u = 1.0
            / (0.5 * pair[0].thickness / pair[0].material.conductivity
                + 0.5 * pair[1].thickness / pair[1].material.conductivity);
        for layer in pair {
            let rho_c_z =
                layer.material.density * layer.material.specific_heat * layer.thickness;
            bound = bound.min(0.2 * rho_c_z / u);
        }
    }
    bound.max(1e-4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_common::config::{LayerConfig, MaterialSpec, PidConfig};

    fn bed_config() -> HeaterConfig {
        HeaterConfig {
            layers: vec![
                LayerConfig {
                    role: LayerRole::Heater,
                    size: [250.0, 250.0, 1.5],
                    material: MaterialSpec::Named("silicone".into()),
                    power: 400.0,
                },
                LayerConfig {
                    role: LayerRole::Body,
                    size: [300.0, 300.0, 8.0],
                    material: MaterialSpec::Named("aluminum".into()),
                    power: 0.0,
                },
            ],
            pid: PidConfig::default(),
            max_temp: 300.0,
            resolution: 5.0,
            convection: ConvectionConfig::default(),
            update_frequency: None,
        }
    }

    fn lossless_config() -> HeaterConfig {
        let adiabatic = Material {
            conductivity: 50.0,
            density: 2000.0,
            specific_heat: 1000.0,
            emissivity: 0.0,
        };
        HeaterConfig {
            layers: vec![
                LayerConfig {
                    role: LayerRole::Heater,
                    size: [100.0, 100.0, 2.0],
                    material: MaterialSpec::Inline(adiabatic),
                    power: 100.0,
                },
                LayerConfig {
                    role: LayerRole::Body,
                    size: [100.0, 100.0, 5.0],
                    material: MaterialSpec::Inline(adiabatic),
                    power: 0.0,
                },
            ],
            pid: PidConfig::default(),
            max_temp: 300.0,
            resolution: 5.0,
            convection: ConvectionConfig {
                top: 0.0,
                bottom: 0.0,
                side: 0.0,
            },
            update_frequency: None,
        }
    }

    #[test]
    fn mesh_dimensions_follow_resolution() {
        let model = ThermalModel::new(&bed_config()).unwrap();
        assert_eq!(model.layers[0].ex, 50);
        assert_eq!(model.layers[0].ey, 50);
        assert_eq!(model.layers[1].ex, 60);
        assert_eq!(model.layers[1].ey, 60);
        assert_eq!(model.sensor_layer, 1);
    }

    #[test]
    fn unpowered_model_stays_at_ambient() {
        let mut model = ThermalModel::new(&bed_config()).unwrap();
        for _ in 0..50 {
            model.step(0.0, 0.1);
        }
        assert!((model.sensor_temp() - AMBIENT_TEMP).abs() < 1e-9);
    }

    #[test]
    fn open_loop_heating_is_monotonic() {
        let mut model = ThermalModel::new(&bed_config()).unwrap();
        let mut prev = model.sensor_temp();
        let mut rose = false;
        for _ in 0..120 {
            model.step(1.0, 0.5);
            let t = model.sensor_temp();
            assert!(t >= prev - 1e-9, "sensor oscillated: {t} < {prev}");
            rose |= t > prev;
            prev = t;
        }
        assert!(rose, "sensor never heated");
        // 60 s at 400 W into ~1.9 kJ/K of metal: a few kelvin minimum.
        assert!(prev > AMBIENT_TEMP + 5.0, "implausibly slow heating: {prev}");
        assert!(prev < 100.0, "implausibly fast heating: {prev}");
    }

    #[test]
    fn heater_layer_runs_hotter_than_body() {
        let mut model = ThermalModel::new(&bed_config()).unwrap();
        for _ in 0..60 {
            model.step(1.0, 0.5);
        }
        let heater_mid = {
            let l = &model.layers[0];
            l.temp[l.idx(l.ex / 2, l.ey / 2)]
        };
        assert!(heater_mid > model.sensor_temp());
    }

    #[test]
    fn energy_is_conserved_without_losses() {
        let mut model = ThermalModel::new(&lossless_config()).unwrap();
        // Inject for 10 s, then let it redistribute.
        for _ in 0..20 {
            model.step(1.0, 0.5);
        }
        let injected = model.energy();
        for _ in 0..100 {
            model.step(0.0, 0.5);
        }
        let after = model.energy();
        assert!(
            ((after - injected) / injected).abs() < 1e-9,
            "energy drifted: {injected} → {after}"
        );
        // 1 kJ over the stack's capacity: uniform end temperature.
        let l0 = &model.layers[0];
        let l1 = &model.layers[1];
        let spread = (l0.temp[l0.idx(10, 10)] - l1.temp[l1.idx(10, 10)]).abs();
        assert!(spread < 0.5, "stack did not equilibrate: {spread}");
    }

    #[test]
    fn reset_returns_to_ambient() {
        let mut model = ThermalModel::new(&bed_config()).unwrap();
        for _ in 0..20 {
            model.step(1.0, 0.5);
        }
        assert!(model.sensor_temp() > AMBIENT_TEMP);
        model.reset();
        assert_eq!(model.sensor_temp(), AMBIENT_TEMP);
        assert_eq!(model.energy(), {
            let fresh = ThermalModel::new(&bed_config()).unwrap();
            fresh.energy()
        });
    }

    #[test]
    fn convective_losses_bound_the_steady_state() {
        // Coarser mesh: this test simulates 10 minutes.
        let mut config = bed_config();
        config.resolution = 10.0;
        let mut model = ThermalModel::new(&config).unwrap();
        // Long open-loop run; losses grow with temperature, so the rise
        // rate must fall off rather than diverge.
        for _ in 0..600 {
            model.step(1.0, 1.0);
        }
        let early_rate = {
            let before = model.sensor_temp();
            model.step(1.0, 1.0);
            model.sensor_temp() - before
        };
        assert!(model.sensor_temp() < 400.0, "no steady state in sight");
        assert!(early_rate < 0.2, "rise rate not tapering: {early_rate} K/s");
    }
}
