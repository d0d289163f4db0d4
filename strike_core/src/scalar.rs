use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub};

use strike_runtime::CHANCE_SCALE;

/// Fixed-point probability/fraction with 6 decimal places.
///
/// All intercept and mission odds flow through `Chance` so caps and clamps
/// are exact and resolution stays deterministic across platforms.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Chance(i64);

impl Chance {
    pub const SCALE: i64 = CHANCE_SCALE;
    pub const ZERO: Chance = Chance(0);
    pub const ONE: Chance = Chance(Self::SCALE);

    pub fn from_f32(value: f32) -> Self {
        Self((value * Self::SCALE as f32).round() as i64)
    }

    pub fn from_percent(percent: u8) -> Self {
        Self(percent as i64 * Self::SCALE / 100)
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    /// Clamp into [0, 1].
    pub fn clamp_unit(self) -> Self {
        self.clamp(Self::ZERO, Self::ONE)
    }

    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self((self.0 - other.0).max(0))
    }

    /// Remaining headroom to certainty: `1 - self`, floored at zero.
    pub fn complement(self) -> Self {
        Self::ONE.saturating_sub(self)
    }

    /// Half of this chance, rounding down.
    pub fn halved(self) -> Self {
        Self(self.0 / 2)
    }
}

impl Add for Chance {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Chance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Chance {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul for Chance {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self((self.0 * rhs.0) / Self::SCALE)
    }
}

impl Sum for Chance {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Debug for Chance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chance({:.6})", self.to_f32())
    }
}

impl fmt::Display for Chance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.to_f32() * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_scales_fixed_point() {
        let a = Chance::from_f32(0.10);
        let m = Chance::from_f32(0.9);
        assert_eq!((a * m).raw(), 90_000);
    }

    #[test]
    fn clamp_unit_bounds_both_sides() {
        assert_eq!(Chance::from_raw(-5).clamp_unit(), Chance::ZERO);
        assert_eq!(
            Chance::from_raw(2 * Chance::SCALE).clamp_unit(),
            Chance::ONE
        );
    }

    #[test]
    fn complement_and_halved_compose() {
        let c = Chance::from_f32(0.4);
        // 0.4 + 0.5 * (1 - 0.4) = 0.7
        let partial_ceiling = c + c.complement().halved();
        assert_eq!(partial_ceiling, Chance::from_f32(0.7));
    }
}
