//! Exact rational numbers.

use core::cmp::Ordering;
use core::fmt::{self, Display};
use core::ops::{Add, Div, Mul, Neg, Sub};

/// A rational number in lowest terms with a positive denominator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ratio {
    num: i128,
    den: i128,
}

fn gcd(mut a: i128, mut b: i128) -> Option<i128> {
    while b != 0 {
        (a, b) = (b, a.checked_rem(b)?);
    }
    a.checked_abs()
}

fn overflow() -> ! {
    panic!("rational arithmetic overflow")
}

impl Ratio {
    pub const ZERO: Self = Self { num: 0, den: 1 };
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// Construct `num / den`.
    ///
    /// Panics if `den` is zero or if the result is not representable.
    pub fn new(num: i128, den: i128) -> Self {
        Self::checked_new(num, den).unwrap_or_else(|| overflow())
    }

    /// Construct `num / den`, returning `None` if the result is not representable.
    ///
    /// Panics if `den` is zero.
    pub fn checked_new(num: i128, den: i128) -> Option<Self> {
        assert!(den != 0, "zero denominator");
        let g = gcd(num, den)?;
        let sign = den.signum();
        Some(Self {
            num: (num / g).checked_mul(sign)?,
            den: (den / g).checked_mul(sign)?,
        })
    }

    pub fn integer(n: i128) -> Self {
        Self { num: n, den: 1 }
    }

    pub fn numer(self) -> i128 {
        self.num
    }

    pub fn denom(self) -> i128 {
        self.den
    }

    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    pub fn signum(self) -> i128 {
        self.num.signum()
    }

    pub fn abs(self) -> Self {
        self.checked_abs().unwrap_or_else(|| overflow())
    }

    pub fn recip(self) -> Self {
        Self::new(self.den, self.num)
    }

    pub fn checked_abs(self) -> Option<Self> {
        let num = self.num.checked_abs()?;
        Some(Self { num, den: self.den })
    }

    pub fn checked_neg(self) -> Option<Self> {
        let num = self.num.checked_neg()?;
        Some(Self { num, den: self.den })
    }

    /// Panics if `self` is zero.
    pub fn checked_recip(self) -> Option<Self> {
        Self::checked_new(self.den, self.num)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let l = self.num.checked_mul(rhs.den)?;
        let r = rhs.num.checked_mul(self.den)?;
        Self::checked_new(l.checked_add(r)?, self.den.checked_mul(rhs.den)?)
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let num = self.num.checked_mul(rhs.num)?;
        Self::checked_new(num, self.den.checked_mul(rhs.den)?)
    }

    /// Panics if `rhs` is zero.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        self.checked_mul(rhs.checked_recip()?)
    }

    /// Integer part (rounded towards negative infinity) and remainder.
    fn split(self) -> (i128, i128) {
        (self.num.div_euclid(self.den), self.num.rem_euclid(self.den))
    }
}

impl Add for Ratio {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.checked_add(rhs).unwrap_or_else(|| overflow())
    }
}

impl Sub for Ratio {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl Neg for Ratio {
    type Output = Self;
    fn neg(self) -> Self {
        self.checked_neg().unwrap_or_else(|| overflow())
    }
}

impl Mul for Ratio {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        self.checked_mul(rhs).unwrap_or_else(|| overflow())
    }
}

impl Div for Ratio {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        self * rhs.recip()
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        let l = self.num.checked_mul(other.den);
        let r = other.num.checked_mul(self.den);
        if let (Some(l), Some(r)) = (l, r) {
            return l.cmp(&r);
        }
        // compare integer parts, then the reciprocals of the remainders
        let ((qa, ra), (qb, rb)) = (self.split(), other.split());
        match (qa.cmp(&qb), ra, rb) {
            (Ordering::Equal, 0, 0) => Ordering::Equal,
            (Ordering::Equal, 0, _) => Ordering::Less,
            (Ordering::Equal, _, 0) => Ordering::Greater,
            (Ordering::Equal, _, _) => {
                let a = Self { num: self.den, den: ra };
                let b = Self { num: other.den, den: rb };
                b.cmp(&a)
            }
            (o, _, _) => o,
        }
    }
}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

#[test]
fn arith() {
    let half = Ratio::new(1, 2);
    let third = Ratio::new(-2, -6);
    assert_eq!(third, Ratio::new(1, 3));
    assert_eq!(half + half, Ratio::ONE);
    assert_eq!(half - third, Ratio::new(1, 6));
    assert_eq!(half * third, Ratio::new(1, 6));
    assert_eq!(half / third, Ratio::new(3, 2));
    assert_eq!(Ratio::new(2, -4), -half);
    assert!(third < half && -half < Ratio::ZERO);
    assert_eq!(alloc::format!("{}", Ratio::new(6, 3)), "2");
}

#[test]
fn large() {
    let max = Ratio::integer(i128::MAX);
    assert_eq!(max.checked_add(Ratio::ONE), None);
    assert_eq!(max.checked_mul(Ratio::integer(2)), None);
    assert_eq!(Ratio::integer(i128::MIN).checked_abs(), None);
    assert_eq!(max.checked_add(-Ratio::ONE), Some(Ratio::integer(i128::MAX - 1)));

    // cross multiplication overflows for these
    assert!(Ratio::new(i128::MAX, 2) > Ratio::new(i128::MAX - 2, 3));
    let a = Ratio::new(i128::MAX, i128::MAX - 1);
    let b = Ratio::new(i128::MAX - 1, i128::MAX - 2);
    assert!(a < b && b > a);
    assert_eq!(a.cmp(&a), Ordering::Equal);
}
