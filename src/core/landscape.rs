//! Loss surfaces over the fixed logical square [-5, 5] x [-5, 5] and the
//! mapping between viewport pixels and that domain.
//!
//! Everything here is pure. Particles evaluate the surface at their own
//! position every tick; the loss range is scanned once per landscape
//! selection or viewport change and then shared read-only.

use std::f64::consts::{E, PI};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DOMAIN_MIN: f64 = -5.0;
pub const DOMAIN_MAX: f64 = 5.0;
pub const DOMAIN_SIZE: f64 = DOMAIN_MAX - DOMAIN_MIN;

/// Added to the loss span before dividing, so flat surfaces never yield NaN.
pub const RANGE_EPSILON: f64 = 0.001;

/// The closed set of benchmark surfaces a particle can descend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossFunction {
    #[default]
    Rastrigin,
    Ackley,
    Himmelblau,
}

impl LossFunction {
    pub const ALL: [LossFunction; 3] = [
        LossFunction::Rastrigin,
        LossFunction::Ackley,
        LossFunction::Himmelblau,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LossFunction::Rastrigin => "Rastrigin",
            LossFunction::Ackley => "Ackley",
            LossFunction::Himmelblau => "Himmelblau",
        }
    }

    /// Evaluate the surface at domain coordinates.
    pub fn eval(self, x: f64, y: f64) -> f64 {
        match self {
            LossFunction::Rastrigin => {
                let a = 10.0;
                a * 2.0 + (x * x - a * (2.0 * PI * x).cos()) + (y * y - a * (2.0 * PI * y).cos())
            }
            LossFunction::Ackley => {
                let (a, b, c) = (20.0, 0.2, 2.0 * PI);
                -a * (-b * (0.5 * (x * x + y * y)).sqrt()).exp()
                    - (0.5 * ((c * x).cos() + (c * y).cos())).exp()
                    + a
                    + E
            }
            LossFunction::Himmelblau => (x * x + y - 11.0).powi(2) + (x + y * y - 7.0).powi(2),
        }
    }

    /// Evaluate the surface at a viewport pixel.
    pub fn eval_at(self, viewport: Viewport, px: f64, py: f64) -> f64 {
        let p = viewport.to_domain(px, py);
        self.eval(p.x, p.y)
    }
}

impl fmt::Display for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rastrigin" => Ok(LossFunction::Rastrigin),
            "ackley" => Ok(LossFunction::Ackley),
            "himmelblau" => Ok(LossFunction::Himmelblau),
            other => Err(format!(
                "unknown landscape '{other}' (expected rastrigin, ackley or himmelblau)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainPoint {
    pub x: f64,
    pub y: f64,
}

/// Simulation-space viewport in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Zero, negative, NaN or infinite extents leave nothing to draw into.
    pub fn is_empty(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }

    /// Side of the centred square that the domain is drawn into.
    pub fn square_size(&self) -> f64 {
        self.width.min(self.height)
    }

    /// Pixels per domain unit.
    pub fn pixel_scale(&self) -> f64 {
        self.square_size() / DOMAIN_SIZE
    }

    /// Pixel to domain coordinates. Letterboxing centres the square on the
    /// longer axis; the arithmetic order here is load-bearing for loss values.
    pub fn to_domain(&self, px: f64, py: f64) -> DomainPoint {
        let size = self.square_size();
        let offset_x = (self.width - size) / 2.0;
        let offset_y = (self.height - size) / 2.0;
        DomainPoint {
            x: ((px - offset_x) / size) * DOMAIN_SIZE + DOMAIN_MIN,
            y: ((py - offset_y) / size) * DOMAIN_SIZE + DOMAIN_MIN,
        }
    }

    /// Inverse of [`Viewport::to_domain`].
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let size = self.square_size();
        let offset_x = (self.width - size) / 2.0;
        let offset_y = (self.height - size) / 2.0;
        (
            (x - DOMAIN_MIN) / DOMAIN_SIZE * size + offset_x,
            (y - DOMAIN_MIN) / DOMAIN_SIZE * size + offset_y,
        )
    }
}

/// Global min/max of a surface over the current viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRange {
    pub min: f64,
    pub max: f64,
}

impl Default for LossRange {
    fn default() -> Self {
        Self { min: 0.0, max: 100.0 }
    }
}

impl LossRange {
    /// Full scan over every pixel of the viewport.
    pub fn scan(func: LossFunction, viewport: Viewport) -> Self {
        if viewport.is_empty() {
            return Self::default();
        }
        let w = viewport.width as usize;
        let h = viewport.height as usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for py in 0..h {
            for px in 0..w {
                let v = func.eval_at(viewport, px as f64, py as f64);
                min = min.min(v);
                max = max.max(v);
            }
        }
        if !min.is_finite() || !max.is_finite() {
            return Self::default();
        }
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min + RANGE_EPSILON
    }

    /// Rescale a raw loss into [0, 1].
    pub fn normalize(&self, loss: f64) -> f64 {
        let t = (loss - self.min) / self.span();
        if t.is_nan() {
            return 1.0;
        }
        t.clamp(0.0, 1.0)
    }
}
