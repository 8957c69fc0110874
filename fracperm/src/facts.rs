//! Dynamic facts about locations.
//!
//! Facts are learnt from tests such as `x == null` or from boolean results,
//! and are used to decide which implications hold.

use crate::Loc;
use core::fmt::{self, Display};
use im::{OrdMap, OrdSet};

/// Facts known about locations at a program point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Facts {
    bools: OrdMap<Loc, bool>,
    /// true if the location is known to be null, false if known to be non-null
    nulls: OrdMap<Loc, bool>,
    /// pairs `(a, b)` with `a < b`
    equal: OrdSet<(Loc, Loc)>,
    unequal: OrdSet<(Loc, Loc)>,
}

fn ordered(a: Loc, b: Loc) -> (Loc, Loc) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Learn a value into a map, returning false if it contradicts the map.
fn learn(map: &mut OrdMap<Loc, bool>, loc: Loc, value: bool) -> bool {
    match map.get(&loc) {
        Some(v) => *v == value,
        None => {
            map.insert(loc, value);
            true
        }
    }
}

impl Facts {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bools.is_empty()
            && self.nulls.is_empty()
            && self.equal.is_empty()
            && self.unequal.is_empty()
    }

    pub fn bool_value(&self, loc: Loc) -> Option<bool> {
        self.bools.get(&loc).copied()
    }

    /// Return `Some(true)` if the location is known to be null.
    pub fn is_null(&self, loc: Loc) -> Option<bool> {
        self.nulls.get(&loc).copied()
    }

    /// Return `Some(true)` if both locations are known to hold the same object.
    pub fn are_equal(&self, a: Loc, b: Loc) -> Option<bool> {
        let pair = ordered(a, b);
        if a == b || self.equal.contains(&pair) {
            Some(true)
        } else if self.unequal.contains(&pair) {
            Some(false)
        } else {
            None
        }
    }

    /// Return false if the fact contradicts known facts.
    pub fn learn_bool(&mut self, loc: Loc, value: bool) -> bool {
        learn(&mut self.bools, loc, value)
    }

    /// Return false if the fact contradicts known facts.
    pub fn learn_null(&mut self, loc: Loc, null: bool) -> bool {
        learn(&mut self.nulls, loc, null)
    }

    /// Return false if the fact contradicts known facts.
    pub fn learn_equal(&mut self, a: Loc, b: Loc, equal: bool) -> bool {
        match self.are_equal(a, b) {
            Some(known) => known == equal,
            None if equal => self.equal.insert(ordered(a, b)).is_none(),
            None => self.unequal.insert(ordered(a, b)).is_none(),
        }
    }

    /// Forget everything known about a location.
    pub fn forget(&mut self, loc: Loc) {
        self.bools.remove(&loc);
        self.nulls.remove(&loc);
        let keep = |set: &OrdSet<(Loc, Loc)>| {
            let other = set.iter().filter(|(a, b)| *a != loc && *b != loc);
            other.cloned().collect()
        };
        self.equal = keep(&self.equal);
        self.unequal = keep(&self.unequal);
    }

    /// Facts known on both sides.
    pub fn join(&self, other: &Self) -> Self {
        let same = |a: &OrdMap<Loc, bool>, b: &OrdMap<Loc, bool>| {
            a.iter()
                .filter(|(k, v)| b.get(k) == Some(v))
                .map(|(k, v)| (*k, *v))
                .collect()
        };
        Self {
            bools: same(&self.bools, &other.bools),
            nulls: same(&self.nulls, &other.nulls),
            equal: self.equal.clone().intersection(other.equal.clone()),
            unequal: self.unequal.clone().intersection(other.unequal.clone()),
        }
    }

    /// Return true if all facts of `other` are known here.
    pub fn at_least_as_precise(&self, other: &Self) -> bool {
        let sub = |a: &OrdMap<Loc, bool>, b: &OrdMap<Loc, bool>| {
            b.iter().all(|(k, v)| a.get(k) == Some(v))
        };
        sub(&self.bools, &other.bools)
            && sub(&self.nulls, &other.nulls)
            && other.equal.is_subset(&self.equal)
            && other.unequal.is_subset(&self.unequal)
    }
}

impl Display for Facts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bools = self.bools.iter().map(|(l, b)| (*l, "==", if *b { "true" } else { "false" }));
        let nulls = self.nulls.iter().map(|(l, n)| (*l, if *n { "==" } else { "!=" }, "null"));
        let mut first = true;
        for (l, op, r) in bools.chain(nulls) {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{} {} {}", l, op, r)?;
            first = false;
        }
        let eqs = self.equal.iter().map(|p| (p, "=="));
        let neqs = self.unequal.iter().map(|p| (p, "!="));
        for ((a, b), op) in eqs.chain(neqs) {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{} {} {}", a, op, b)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contradictions() {
        let mut f = Facts::new();
        assert!(f.learn_bool(Loc(0), true));
        assert!(f.learn_bool(Loc(0), true));
        assert!(!f.learn_bool(Loc(0), false));
        assert!(f.learn_null(Loc(1), false));
        assert!(!f.learn_null(Loc(1), true));
        assert!(f.learn_equal(Loc(2), Loc(1), false));
        assert!(!f.learn_equal(Loc(1), Loc(2), true));
        assert_eq!(f.are_equal(Loc(3), Loc(3)), Some(true));
        f.forget(Loc(1));
        assert_eq!(f.is_null(Loc(1)), None);
        assert_eq!(f.are_equal(Loc(1), Loc(2)), None);
    }

    #[test]
    fn join() {
        let mut a = Facts::new();
        a.learn_bool(Loc(0), true);
        a.learn_null(Loc(1), false);
        let mut b = Facts::new();
        b.learn_bool(Loc(0), false);
        b.learn_null(Loc(1), false);
        let j = a.join(&b);
        assert_eq!(j.bool_value(Loc(0)), None);
        assert_eq!(j.is_null(Loc(1)), Some(false));
        assert!(a.at_least_as_precise(&j));
        assert!(!j.at_least_as_precise(&a));
    }
}
