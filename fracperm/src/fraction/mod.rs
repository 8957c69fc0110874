//! Symbolic fractions and constraints over them.
//!
//! A fraction is a linear expression with rational coefficients over
//! fraction variables, such as `1/2`, `x`, or `1 - x - _3`.
//! Named variables stem from annotations;
//! fresh variables are created whenever a permission is split.

mod ratio;
mod store;

pub use ratio::Ratio;
pub use store::{Assignment, Constraint, Constraints, Rel};

use alloc::collections::BTreeMap;
use alloc::string::String;
use core::fmt::{self, Display};
use core::ops::{Add, Neg, Sub};
use core::sync::atomic::{AtomicU64, Ordering};

/// Counter for fresh variables; its values only serve to make variables unique.
static FRESH: AtomicU64 = AtomicU64::new(0);

/// Fraction variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    Named(String),
    Fresh(u64),
}

impl Var {
    pub fn fresh() -> Self {
        Self::Fresh(FRESH.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Named(s) => s.fmt(f),
            Self::Fresh(n) => write!(f, "_{}", n),
        }
    }
}

/// Linear expression over fraction variables.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fraction {
    constant: Ratio,
    terms: BTreeMap<Var, Ratio>,
}

impl Fraction {
    pub fn constant(c: Ratio) -> Self {
        Self {
            constant: c,
            terms: BTreeMap::new(),
        }
    }

    pub fn zero() -> Self {
        Self::constant(Ratio::ZERO)
    }

    pub fn one() -> Self {
        Self::constant(Ratio::ONE)
    }

    pub fn var(v: Var) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(v, Ratio::ONE);
        Self {
            constant: Ratio::ZERO,
            terms,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::var(Var::Named(name.into()))
    }

    /// A fraction consisting of a new variable.
    pub fn fresh() -> Self {
        Self::var(Var::fresh())
    }

    /// The value of the fraction if it does not depend on any variable.
    pub fn as_constant(&self) -> Option<Ratio> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn constant_part(&self) -> Ratio {
        self.constant
    }

    pub fn coeff(&self, v: &Var) -> Ratio {
        self.terms.get(v).copied().unwrap_or(Ratio::ZERO)
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Var, Ratio)> {
        self.terms.iter().map(|(v, c)| (v, *c))
    }

    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.terms.keys()
    }

    pub fn scale(self, c: Ratio) -> Self {
        self.checked_scale(c).unwrap_or_else(|| overflow())
    }

    /// Replace `v` by `by` everywhere.
    pub fn subst(self, v: &Var, by: &Self) -> Self {
        self.checked_subst(v, by).unwrap_or_else(|| overflow())
    }

    pub fn checked_scale(mut self, c: Ratio) -> Option<Self> {
        if c.is_zero() {
            return Some(Self::zero());
        }
        self.constant = self.constant.checked_mul(c)?;
        for r in self.terms.values_mut() {
            *r = r.checked_mul(c)?;
        }
        Some(self)
    }

    pub fn checked_add(mut self, rhs: Self) -> Option<Self> {
        self.constant = self.constant.checked_add(rhs.constant)?;
        for (v, c) in rhs.terms {
            self.add_term(v, c)?;
        }
        Some(self)
    }

    pub fn checked_subst(mut self, v: &Var, by: &Self) -> Option<Self> {
        match self.terms.remove(v) {
            None => Some(self),
            Some(c) => self.checked_add(by.clone().checked_scale(c)?),
        }
    }

    /// Add `c * v` to the fraction.
    fn add_term(&mut self, v: Var, c: Ratio) -> Option<()> {
        let sum = self.coeff(&v).checked_add(c)?;
        if sum.is_zero() {
            self.terms.remove(&v);
        } else {
            self.terms.insert(v, sum);
        }
        Some(())
    }

    /// Scale the fraction such that its first coefficient is 1 or -1.
    ///
    /// Return `None` on arithmetic overflow.
    pub(crate) fn normalise(self) -> Option<Self> {
        match self.terms.values().next().copied() {
            Some(c) => self.checked_scale(c.checked_abs()?.checked_recip()?),
            None => Some(self),
        }
    }
}

fn overflow() -> ! {
    panic!("fraction arithmetic overflow")
}

impl Add for Fraction {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.checked_add(rhs).unwrap_or_else(|| overflow())
    }
}

impl Neg for Fraction {
    type Output = Self;
    fn neg(self) -> Self {
        self.scale(-Ratio::ONE)
    }
}

impl Sub for Fraction {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl From<Ratio> for Fraction {
    fn from(r: Ratio) -> Self {
        Self::constant(r)
    }
}

impl Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (v, c) in self.terms() {
            let sign = if c.signum() < 0 { "-" } else if first { "" } else { "+" };
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", sign)?;
            if !first {
                write!(f, " ")?;
            }
            if c.abs() != Ratio::ONE {
                write!(f, "{}*", c.abs())?;
            }
            write!(f, "{}", v)?;
            first = false;
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant.is_zero() {
            Ok(())
        } else if self.constant.signum() < 0 {
            write!(f, " - {}", self.constant.abs())
        } else {
            write!(f, " + {}", self.constant)
        }
    }
}

#[test]
fn linear() {
    let x = Fraction::named("x");
    let y = Fraction::named("y");
    let half = Fraction::constant(Ratio::new(1, 2));
    let e = x.clone() + y.clone() - x.clone() + half.clone();
    assert_eq!(e, y.clone() + half.clone());
    assert_eq!((x.clone() - x.clone()).as_constant(), Some(Ratio::ZERO));
    let s = (x.clone() + y.clone()).subst(&Var::Named("x".into()), &(Fraction::one() - y.clone()));
    assert_eq!(s, Fraction::one());
    assert_eq!(alloc::format!("{}", Fraction::one() - x - y.scale(Ratio::new(1, 2))), "-x - 1/2*y + 1");
    assert_ne!(Fraction::fresh(), Fraction::fresh());

    let big = Ratio::integer(i128::MAX / 2);
    let twice = |f: Fraction| f.checked_scale(big)?.checked_scale(big);
    assert_eq!(twice(Fraction::named("x")), None);
    let tiny = Fraction::named("x").scale(big.recip());
    assert_eq!(tiny.clone().checked_add(tiny.clone()), None);
    assert_eq!(tiny.normalise(), Some(Fraction::named("x")));
}
