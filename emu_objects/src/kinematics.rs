//! Kinematics maps: Cartesian, CoreXY, CoreXZ and Delta.
//!
//! All maps are pure. Axis objects track motor-space coordinates; the
//! toolhead composes `toolhead_position` over them to report cartesian
//! space. `motor_movement` is the inverse map used when planning moves.

use emu_common::config::{DeltaConfig, KinematicsConfig};
use emu_common::state::Position;

/// Delta tower geometry, derived from the configured circle radius.
/// Towers sit at 210°, 330° and 90° on the tower circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaGeometry {
    /// Diagonal arm length [mm].
    pub arm: f64,
    /// Tower base positions [mm].
    pub towers: [[f64; 2]; 3],
    /// Work-volume minimum per axis [mm].
    pub min_limit: [f64; 3],
    /// Work-volume maximum per axis [mm].
    pub max_limit: [f64; 3],
}

impl DeltaGeometry {
    pub fn from_config(config: &DeltaConfig) -> Self {
        const TOWER_ANGLES_DEG: [f64; 3] = [210.0, 330.0, 90.0];
        let towers = TOWER_ANGLES_DEG.map(|deg| {
            let rad = deg.to_radians();
            [config.radius * rad.cos(), config.radius * rad.sin()]
        });
        Self {
            arm: config.arm_length,
            towers,
            min_limit: config.min_limit,
            max_limit: config.max_limit,
        }
    }

    /// True when `p` lies inside the configured work volume.
    pub fn in_volume(&self, p: Position) -> bool {
        let v = [p.x, p.y, p.z];
        (0..3).all(|i| v[i] >= self.min_limit[i] && v[i] <= self.max_limit[i])
    }
}

/// The process-wide kinematics model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kinematics {
    Cartesian,
    CoreXy,
    CoreXz,
    Delta(DeltaGeometry),
}

impl Kinematics {
    pub fn from_config(config: &KinematicsConfig) -> Self {
        match config {
            KinematicsConfig::Cartesian => Self::Cartesian,
            KinematicsConfig::CoreXy => Self::CoreXy,
            KinematicsConfig::CoreXz => Self::CoreXz,
            KinematicsConfig::Delta(delta) => Self::Delta(DeltaGeometry::from_config(delta)),
        }
    }

    /// Inverse map: cartesian target to motor-space positions.
    pub fn motor_movement(&self, cartesian: Position) -> [f64; 3] {
        let Position { x, y, z } = cartesian;
        match self {
            Self::Cartesian => [x, y, z],
            Self::CoreXy => [x + y, x - y, z],
            Self::CoreXz => [x + z, y, x - z],
            Self::Delta(geometry) => geometry.towers.map(|[tx, ty]| {
                let dx = x - tx;
                let dy = y - ty;
                (geometry.arm * geometry.arm - dx * dx - dy * dy).sqrt() + z
            }),
        }
    }

    /// Forward map: motor-space positions to axis/cartesian coordinates.
    pub fn axis_movement(&self, motors: [f64; 3]) -> [f64; 3] {
        let [a, b, c] = motors;
        match self {
            Self::Cartesian => [a, b, c],
            Self::CoreXy => [(a + b) / 2.0, (a - b) / 2.0, c],
            Self::CoreXz => [(a + c) / 2.0, b, (a - c) / 2.0],
            Self::Delta(geometry) => {
                let p = geometry.forward(motors);
                [p.x, p.y, p.z]
            }
        }
    }

    /// Cartesian toolhead position from the axes' tracked positions.
    pub fn toolhead_position(&self, axes: [f64; 3]) -> Position {
        let [x, y, z] = self.axis_movement(axes);
        Position::new(x, y, z)
    }
}

impl DeltaGeometry {
    /// Three-sphere trilateration of the effector from carriage heights,
    /// taking the lower root.
    pub fn forward(&self, carriages: [f64; 3]) -> Position {
        let p1 = [self.towers[0][0], self.towers[0][1], carriages[0]];
        let p2 = [self.towers[1][0], self.towers[1][1], carriages[1]];
        let p3 = [self.towers[2][0], self.towers[2][1], carriages[2]];

        let ex = normalize(sub(p2, p1));
        let p13 = sub(p3, p1);
        let i = dot(ex, p13);
        let ey = normalize(sub(p13, scale(ex, i)));
        let ez = cross(ex, ey);
        let d = norm(sub(p2, p1));
        let j = dot(ey, p13);

        // Equal sphere radii collapse the usual trilateration terms.
        let x = d / 2.0;
        let y = (i * i + j * j) / (2.0 * j) - (i / j) * x;
        let z_sq = self.arm * self.arm - x * x - y * y;
        let z = z_sq.max(0.0).sqrt();

        let base = add(add(p1, scale(ex, x)), scale(ey, y));
        let up = add(base, scale(ez, z));
        let down = add(base, scale(ez, -z));
        let p = if up[2] < down[2] { up } else { down };
        Position::new(p[0], p[1], p[2])
    }
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: [f64; 3]) -> [f64; 3] {
    scale(a, 1.0 / norm(a))
}
