//! The malbolge value type.
use std::fmt;
use std::ops::{Add, AddAssign, Rem, RemAssign, Sub, SubAssign};
use std::str::FromStr;

use crate::definitions::trit;
use crate::error::BadInput;
use crate::tritset::TritSet;

/// Trit-wise lookup table for [`Ternary::op`]. Rows are indexed by the trit
/// of the left operand, columns by the trit of the right operand.
const OP_LUT: [[u8; 3]; 3] = [[1, 1, 2], [0, 0, 2], [0, 2, 1]];

/// A 10 digit ternary unsigned integer, the only data type malbolge knows.
///
/// The backing integer is wide enough to hold the sum of two maximum values,
/// so the wrapping arithmetic below never overflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ternary(u32);

impl Ternary {
    /// The largest representable value, which doubles as the input EOF
    /// marker.
    pub const MAX: Ternary = Ternary(trit::MAX);

    /// Wraps `value` into the ternary domain.
    pub fn new(value: u32) -> Self {
        Self(value % (trit::MAX + 1))
    }

    /// The decimal value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// The trit representation of the value.
    pub fn to_tritset(self) -> TritSet {
        TritSet::new(self.0)
    }

    /// Right-rotates the trits by `i` positions.
    #[must_use]
    pub fn rotate(self, i: usize) -> Self {
        let mut set = self.to_tritset();
        set.rotate(i);
        Self(set.to_base10())
    }

    /// *The* operation: combines two values trit by trit through a fixed
    /// 3x3 table. Not commutative.
    #[must_use]
    pub fn op(self, other: Ternary) -> Self {
        let a = self.to_tritset();
        let b = other.to_tritset();

        let mut result = TritSet::default();
        for i in 0..TritSet::WIDTH {
            result.set(i, OP_LUT[a.get(i) as usize][b.get(i) as usize]);
        }
        Self(result.to_base10())
    }
}

impl From<u32> for Ternary {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<u8> for Ternary {
    fn from(value: u8) -> Self {
        Self(u32::from(value))
    }
}

impl From<TritSet> for Ternary {
    fn from(set: TritSet) -> Self {
        Self(set.to_base10())
    }
}

impl FromStr for Ternary {
    type Err = BadInput;

    fn from_str(s: &str) -> Result<Self, BadInput> {
        s.parse::<TritSet>().map(Self::from)
    }
}

impl Add for Ternary {
    type Output = Ternary;

    fn add(self, other: Ternary) -> Ternary {
        Ternary::new(self.0 + other.0)
    }
}

impl AddAssign for Ternary {
    fn add_assign(&mut self, other: Ternary) {
        *self = *self + other;
    }
}

impl Sub for Ternary {
    type Output = Ternary;

    fn sub(self, other: Ternary) -> Ternary {
        if other.0 > self.0 {
            Ternary(trit::MAX - (other.0 - self.0))
        } else {
            Ternary(self.0 - other.0)
        }
    }
}

impl SubAssign for Ternary {
    fn sub_assign(&mut self, other: Ternary) {
        *self = *self - other;
    }
}

impl Rem for Ternary {
    type Output = Ternary;

    fn rem(self, other: Ternary) -> Ternary {
        Ternary(self.0 % other.0)
    }
}

impl RemAssign for Ternary {
    fn rem_assign(&mut self, other: Ternary) {
        *self = *self % other;
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_tritset())
    }
}
