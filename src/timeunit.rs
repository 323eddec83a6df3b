use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// A span or point on the stream clock, held as whole microseconds.
///
/// Fractional results (division, float seconds) truncate toward zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeunit(i64);

impl Timeunit {
    pub const ZERO: Timeunit = Timeunit(0);

    pub const fn from_micros(us: i64) -> Self {
        Timeunit(us)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Timeunit(ms * 1_000)
    }

    pub const fn from_secs(s: i64) -> Self {
        Timeunit(s * 1_000_000)
    }

    pub const fn from_minutes(m: i64) -> Self {
        Timeunit(m * 60 * 1_000_000)
    }

    pub fn from_secs_f64(s: f64) -> Self {
        Timeunit((s * 1_000_000.0) as i64)
    }

    pub fn from_millis_f64(ms: f64) -> Self {
        Timeunit((ms * 1_000.0) as i64)
    }

    pub const fn micros(self) -> i64 {
        self.0
    }

    pub fn millis(self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    pub fn secs(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub const fn abs(self) -> Self {
        Timeunit(self.0.abs())
    }

    /// Round down to a multiple of `step`.
    pub fn align(self, step: Timeunit) -> Self {
        if step.0 == 0 {
            return self;
        }
        Timeunit(self.0.div_euclid(step.0) * step.0)
    }

    /// How many `other` fit in `self`, as a float.
    pub fn ratio(self, other: Timeunit) -> f64 {
        self.0 as f64 / other.0 as f64
    }

    pub fn scale(self, factor: f64) -> Self {
        Timeunit((self.0 as f64 * factor) as i64)
    }

    pub fn to_delta(self) -> TimeDelta {
        TimeDelta::microseconds(self.0)
    }
}

impl fmt::Display for Timeunit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis())
    }
}

impl Add for Timeunit {
    type Output = Timeunit;
    fn add(self, rhs: Timeunit) -> Timeunit {
        Timeunit(self.0 + rhs.0)
    }
}

impl AddAssign for Timeunit {
    fn add_assign(&mut self, rhs: Timeunit) {
        self.0 += rhs.0;
    }
}

impl Sub for Timeunit {
    type Output = Timeunit;
    fn sub(self, rhs: Timeunit) -> Timeunit {
        Timeunit(self.0 - rhs.0)
    }
}

impl Neg for Timeunit {
    type Output = Timeunit;
    fn neg(self) -> Timeunit {
        Timeunit(-self.0)
    }
}

impl Mul<i64> for Timeunit {
    type Output = Timeunit;
    fn mul(self, rhs: i64) -> Timeunit {
        Timeunit(self.0 * rhs)
    }
}

impl Div<i64> for Timeunit {
    type Output = Timeunit;
    fn div(self, rhs: i64) -> Timeunit {
        Timeunit(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_down_to_grid() {
        assert_eq!(Timeunit::from_millis(1234).align(Timeunit::from_millis(100)), Timeunit::from_millis(1200));
        assert_eq!(Timeunit::from_millis(-50).align(Timeunit::from_millis(100)), Timeunit::from_millis(-100));
    }

    #[test]
    fn division_truncates() {
        assert_eq!(Timeunit::from_millis(1001) / 18, Timeunit::from_micros(55_611));
        assert_eq!(Timeunit::from_secs(3).ratio(Timeunit::from_secs(2)), 1.5);
    }

    #[test]
    fn float_seconds() {
        assert_eq!(Timeunit::from_secs_f64(1.5), Timeunit::from_millis(1500));
        assert_eq!(Timeunit::from_millis(250).secs(), 0.25);
    }
}
