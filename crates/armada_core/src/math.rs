//! Fixed-point math utilities for deterministic simulation.
//!
//! Positions, velocities, strengths and damage all use fixed-point
//! arithmetic so that two sessions fed the same commands and seed
//! produce bit-identical state on every platform.

use fixed::types::{I32F32, I64F64};
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Fixed-point 2D vector.
///
/// Used both for continuous strategic transit (in cell units) and for
/// points on a tactical plane (in tactical units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Intermediate for products of counts, health and coefficients.
///
/// Large fleets push those products past the [`Fixed`] range; compute in
/// this type and come back through [`narrow`].
pub type WideFixed = I64F64;

/// Convert a wide intermediate back to [`Fixed`], saturating at its bounds.
#[must_use]
pub fn narrow(value: WideFixed) -> Fixed {
    Fixed::saturating_from_num(value)
}

/// Build a fixed-point fraction from a whole percentage (`25` -> `0.25`).
#[must_use]
pub fn percent(value: u32) -> Fixed {
    Fixed::from_num(value) / Fixed::from_num(100)
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer coordinates.
    #[must_use]
    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Vector length.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.dot(self))
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Multiply both components by a scalar.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Linearly interpolate between two vectors.
    #[must_use]
    pub fn lerp(self, other: Self, t: Fixed) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == Fixed::ZERO {
            return Self::ZERO;
        }

        Self::new(self.x / len, self.y / len)
    }

    /// Clamp both components into `[min, max]`.
    #[must_use]
    pub fn clamp(self, min: Fixed, max: Fixed) -> Self {
        Self::new(self.x.clamp(min, max), self.y.clamp(min, max))
    }

    /// Direction of this vector in degrees, normalized to `[0, 360)`.
    ///
    /// `atan2` has no fixed-point counterpart, so the angle is computed in
    /// `f64` and converted back. Headings are presentation state and never
    /// feed back into positions, which keeps ticks deterministic.
    #[must_use]
    pub fn heading_degrees(self) -> Fixed {
        let radians = self.y.to_num::<f64>().atan2(self.x.to_num::<f64>());
        let mut degrees = radians.to_degrees();
        if degrees < 0.0 {
            degrees += 360.0;
        }
        if degrees >= 360.0 {
            degrees -= 360.0;
        }
        Fixed::from_num(degrees)
    }
}

/// Smallest absolute difference between two headings, in degrees (0..=180).
#[must_use]
pub fn heading_delta(from: Fixed, to: Fixed) -> Fixed {
    let full = Fixed::from_num(360);
    let half = Fixed::from_num(180);
    let mut delta = (to - from).abs() % full;
    if delta > half {
        delta = full - delta;
    }
    delta
}

/// Computes the square root of a fixed-point number using binary search.
///
/// Sixty-four halvings are enough to reach the last fractional bit for
/// any value on a tactical plane.
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::ONE { value } else { Fixed::ONE };

    for _ in 0..64 {
        let mid = low + (high - low) / Fixed::from_num(2);
        if mid == low {
            break;
        }
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}
