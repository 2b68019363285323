//! Key frames and interpolation kernels.

use std::fmt;
use std::str::FromStr;

/// How a key blends towards the next key on its track.
///
/// The discriminants are the values carried on the wire and in track files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Interpolation {
    /// Hold the value until the next key
    #[default]
    Step = 0,
    /// Straight line to the next key
    Linear = 1,
    /// Cubic Hermite ease in and out (`3t² − 2t³`)
    Smooth = 2,
    /// Quadratic ease in (`t²`)
    Ramp = 3,
}

impl Interpolation {
    /// All kernels in wire order.
    pub const ALL: [Interpolation; 4] = [Self::Step, Self::Linear, Self::Smooth, Self::Ramp];

    /// Decode a wire/file byte. Returns `None` for anything above 3.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Step),
            1 => Some(Self::Linear),
            2 => Some(Self::Smooth),
            3 => Some(Self::Ramp),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The next kernel in wire order, wrapping around after `Ramp`.
    pub fn cycle(self) -> Self {
        Self::ALL[(self.as_u8() as usize + 1) % Self::ALL.len()]
    }

    /// Blend weight for a segment parameter `t` in `[0, 1]`.
    ///
    /// `Step` always returns 0 so the left key's value is held.
    pub fn weight(self, t: f64) -> f64 {
        match self {
            Self::Step => 0.0,
            Self::Linear => t,
            Self::Smooth => t * t * (3.0 - 2.0 * t),
            Self::Ramp => t * t,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Linear => "linear",
            Self::Smooth => "smooth",
            Self::Ramp => "ramp",
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "step" | "0" => Ok(Self::Step),
            "linear" | "1" => Ok(Self::Linear),
            "smooth" | "2" => Ok(Self::Smooth),
            "ramp" | "3" => Ok(Self::Ramp),
            other => Err(format!("unknown interpolation '{}'", other)),
        }
    }
}

/// A control point on a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyFrame {
    /// Timeline row (unique within its track)
    pub row: u32,
    pub value: f32,
    /// Kernel used for the segment starting at this key
    pub interpolation: Interpolation,
}

impl KeyFrame {
    pub fn new(row: u32, value: f32, interpolation: Interpolation) -> Self {
        Self {
            row,
            value,
            interpolation,
        }
    }

    /// Same key moved to another row.
    pub fn at_row(self, row: u32) -> Self {
        Self { row, ..self }
    }
}
