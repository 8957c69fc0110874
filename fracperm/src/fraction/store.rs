//! Stores of linear constraints over fractions.

use super::{Fraction, Ratio, Var};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Display};
use fnv::FnvHashSet;

/// Maximal number of inequalities during variable elimination.
///
/// Stores whose elimination exceeds this bound or overflows
/// rational arithmetic are considered unsatisfiable.
const ELIMINATION_LIMIT: usize = 4096;

/// Relation of a constraint `expr rel 0`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Rel {
    Eq,
    Le,
    Lt,
}

/// Linear constraint `expr rel 0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub expr: Fraction,
    pub rel: Rel,
}

impl Constraint {
    /// `a = b`
    pub fn equal(a: Fraction, b: Fraction) -> Self {
        let expr = a - b;
        let rel = Rel::Eq;
        Self { expr, rel }
    }

    /// `a <= b`
    pub fn le(a: Fraction, b: Fraction) -> Self {
        let expr = a - b;
        let rel = Rel::Le;
        Self { expr, rel }
    }

    /// `a < b`
    pub fn lt(a: Fraction, b: Fraction) -> Self {
        let expr = a - b;
        let rel = Rel::Lt;
        Self { expr, rel }
    }

    /// Decide the constraint if it does not contain variables.
    fn trivially(&self) -> Option<bool> {
        let c = self.expr.as_constant()?;
        Some(match self.rel {
            Rel::Eq => c.is_zero(),
            Rel::Le => c.signum() <= 0,
            Rel::Lt => c.signum() < 0,
        })
    }

    /// Constraints whose conjunction with `self` is unsatisfiable,
    /// such that `self` is entailed iff each of them is refuted.
    fn negations(&self) -> Vec<Self> {
        let neg = || -self.expr.clone();
        match self.rel {
            Rel::Eq => Vec::from([
                Self { expr: self.expr.clone(), rel: Rel::Lt },
                Self { expr: neg(), rel: Rel::Lt },
            ]),
            Rel::Le => Vec::from([Self { expr: neg(), rel: Rel::Lt }]),
            Rel::Lt => Vec::from([Self { expr: neg(), rel: Rel::Le }]),
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rel = match self.rel {
            Rel::Eq => "=",
            Rel::Le => "<=",
            Rel::Lt => "<",
        };
        write!(f, "{} {} 0", self.expr, rel)
    }
}

/// Values of variables that are determined by a constraint store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assignment(BTreeMap<Var, Ratio>);

impl Assignment {
    pub fn get(&self, v: &Var) -> Option<Ratio> {
        self.0.get(v).copied()
    }

    /// Value of a fraction if all its variables are determined
    /// and the value is representable.
    pub fn eval(&self, f: &Fraction) -> Option<Ratio> {
        f.terms().try_fold(f.constant_part(), |acc, (v, c)| {
            acc.checked_add(c.checked_mul(self.get(v)?)?)
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, Ratio)> {
        self.0.iter().map(|(v, r)| (v, *r))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Feasibility {
    Feasible,
    Infeasible,
    /// elimination exceeded its budget or overflowed
    Unknown,
}

/// Equalities solved for one of their variables, in the order of solving.
type Solved = Vec<(Var, Fraction)>;

/// Solve equalities by Gaussian elimination and substitute their solutions.
///
/// Return the solutions and the remaining inequalities as `(expr, strict)`,
/// meaning `expr < 0` if strict and `expr <= 0` otherwise.
/// Fail with `Infeasible` if the equalities are contradictory and
/// with `Unknown` on arithmetic overflow.
fn gauss(cs: impl Iterator<Item = Constraint>) -> Result<(Solved, Vec<(Fraction, bool)>), Feasibility> {
    let mut eqs = Vec::new();
    let mut ineqs = Vec::new();
    let mut vars = FnvHashSet::default();
    for c in cs {
        vars.extend(c.expr.vars().cloned());
        match c.rel {
            Rel::Eq => eqs.push(c.expr),
            Rel::Le => ineqs.push((c.expr, false)),
            Rel::Lt => ineqs.push((c.expr, true)),
        }
    }
    // every fraction lies between 0 and 1
    for v in vars {
        ineqs.push((-Fraction::var(v.clone()), false));
        ineqs.push((Fraction::var(v) - Fraction::one(), false));
    }

    let mut solved: Solved = Vec::new();
    while let Some(e) = eqs.pop() {
        let (v, c) = match e.terms().next() {
            None if e.constant_part().is_zero() => continue,
            None => return Err(Feasibility::Infeasible),
            Some((v, c)) => (v.clone(), c),
        };
        let unknown = || Feasibility::Unknown;
        // v = -(e - c v) / c
        let mut sol = e;
        sol.terms.remove(&v);
        let sol = sol
            .checked_scale(c.checked_neg().and_then(Ratio::checked_recip).ok_or_else(unknown)?)
            .ok_or_else(unknown)?;
        let rows = eqs.iter_mut().chain(ineqs.iter_mut().map(|(e, _)| e));
        for e in rows {
            *e = core::mem::replace(e, Fraction::zero())
                .checked_subst(&v, &sol)
                .ok_or_else(unknown)?;
        }
        solved.push((v, sol));
    }
    Ok((solved, ineqs))
}

/// Fourier-Motzkin elimination.
fn eliminate(mut rows: Vec<(Fraction, bool)>) -> Feasibility {
    loop {
        let mut seen = FnvHashSet::default();
        let mut kept = Vec::new();
        for (e, strict) in rows {
            match e.as_constant() {
                Some(c) if (strict && c.signum() >= 0) || c.signum() > 0 => {
                    return Feasibility::Infeasible
                }
                Some(_) => (),
                None => {
                    let e = match e.normalise() {
                        Some(e) => e,
                        None => return Feasibility::Unknown,
                    };
                    if seen.insert((e.clone(), strict)) {
                        kept.push((e, strict))
                    }
                }
            }
        }
        if kept.len() > ELIMINATION_LIMIT {
            return Feasibility::Unknown;
        }

        // pick the variable producing the fewest combinations
        let mut counts: BTreeMap<&Var, (usize, usize)> = BTreeMap::new();
        for (e, _) in &kept {
            for (v, c) in e.terms() {
                let entry = counts.entry(v).or_default();
                if c.signum() > 0 {
                    entry.0 += 1
                } else {
                    entry.1 += 1
                }
            }
        }
        let v = match counts.iter().min_by_key(|(_, (p, n))| p * n) {
            None => return Feasibility::Feasible,
            Some((v, _)) => (*v).clone(),
        };

        let (mut upper, mut lower, mut rest) = (Vec::new(), Vec::new(), Vec::new());
        for (e, strict) in kept {
            match e.coeff(&v).signum() {
                1 => upper.push((e, strict)),
                -1 => lower.push((e, strict)),
                _ => rest.push((e, strict)),
            }
        }
        for (u, su) in &upper {
            let a = u.coeff(&v);
            for (l, sl) in &lower {
                let b = -l.coeff(&v);
                let e = u.clone().checked_scale(b).zip(l.clone().checked_scale(a));
                match e.and_then(|(u, l)| u.checked_add(l)) {
                    Some(e) => rest.push((e, *su || *sl)),
                    None => return Feasibility::Unknown,
                }
            }
        }
        if rest.len() > ELIMINATION_LIMIT {
            return Feasibility::Unknown;
        }
        rows = rest;
    }
}

fn feasible(cs: impl Iterator<Item = Constraint>) -> Feasibility {
    match gauss(cs) {
        Err(f) => f,
        Ok((_, ineqs)) => eliminate(ineqs),
    }
}

/// A store of linear constraints over fractions.
///
/// Every variable is implicitly constrained to lie between 0 and 1.
/// Besides constraints, a store records conflicts that make it
/// unsatisfiable regardless of the constraints, such as illegal splits.
///
/// ~~~
/// # use fracperm::fraction::{Constraints, Fraction, Ratio};
/// let (x, y) = (Fraction::fresh(), Fraction::fresh());
/// let mut cs = Constraints::new();
/// cs.equal(x.clone() + y.clone(), Fraction::one());
/// cs.lt(Fraction::zero(), y.clone());
/// assert!(!cs.is_one(x.clone()));
/// cs.equal(y.clone(), Fraction::zero());
/// assert!(cs.is_unsatisfiable());
/// ~~~
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Constraints {
    list: im::Vector<Constraint>,
    conflicts: im::Vector<String>,
}

impl Constraints {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, c: Constraint) {
        if c.trivially() == Some(true) || self.list.contains(&c) {
            return;
        }
        trace!("constraint: {}", c);
        self.list.push_back(c)
    }

    pub fn equal(&mut self, a: Fraction, b: Fraction) {
        self.add(Constraint::equal(a, b))
    }

    pub fn le(&mut self, a: Fraction, b: Fraction) {
        self.add(Constraint::le(a, b))
    }

    pub fn lt(&mut self, a: Fraction, b: Fraction) {
        self.add(Constraint::lt(a, b))
    }

    /// Constrain a fraction to denote a permission, i.e. `0 < f <= 1`.
    pub fn permission(&mut self, f: &Fraction) {
        self.lt(Fraction::zero(), f.clone());
        self.le(f.clone(), Fraction::one());
    }

    /// Record that the store is unsatisfiable for the given reason.
    pub fn conflict(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("conflict: {}", reason);
        self.conflicts.push_back(reason)
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &str> {
        self.conflicts.iter().map(|s| s.as_str())
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty() && self.conflicts.is_empty()
    }

    /// Add all constraints and conflicts of another store.
    pub fn concat(&mut self, other: &Self) {
        for c in other.list.iter() {
            self.add(c.clone())
        }
        for r in other.conflicts.iter() {
            if !self.conflicts.contains(r) {
                self.conflicts.push_back(r.clone())
            }
        }
    }

    /// Cheap check that finds no conflict and no violated constant constraint.
    ///
    /// This does not imply that the store is satisfiable.
    pub fn is_satisfiable(&self) -> bool {
        self.conflicts.is_empty() && self.list.iter().all(|c| c.trivially() != Some(false))
    }

    /// Return true unless the constraints are proven to have a solution.
    pub fn is_unsatisfiable(&self) -> bool {
        if !self.is_satisfiable() {
            return true;
        }
        let result = feasible(self.list.iter().cloned());
        if result == Feasibility::Unknown {
            debug!("elimination inconclusive for {} constraints", self.len());
        }
        result != Feasibility::Feasible
    }

    /// Return true if the constraint holds in every solution of the store.
    pub fn entails(&self, c: &Constraint) -> bool {
        if c.trivially() == Some(true) {
            return true;
        }
        c.negations().into_iter().all(|neg| {
            let cs = self.list.iter().cloned().chain(core::iter::once(neg));
            feasible(cs) == Feasibility::Infeasible
        })
    }

    /// Return true if the fraction is provably 1.
    pub fn is_one(&self, f: Fraction) -> bool {
        self.entails(&Constraint::equal(f, Fraction::one()))
    }

    /// Return true if the fraction is provably 0.
    pub fn is_zero(&self, f: Fraction) -> bool {
        self.entails(&Constraint::equal(f, Fraction::zero()))
    }

    /// Determine the values of all variables that are fixed by
    /// the equalities of the store or by coinciding bounds.
    pub fn simplify(&self) -> Assignment {
        let (solved, ineqs) = match gauss(self.list.iter().cloned()) {
            Ok(x) => x,
            Err(_) => return Assignment::default(),
        };
        let mut asg = BTreeMap::new();

        // bounds on single variables
        let mut lower: BTreeMap<Var, Ratio> = BTreeMap::new();
        let mut upper: BTreeMap<Var, Ratio> = BTreeMap::new();
        for (e, strict) in &ineqs {
            let mut terms = e.terms();
            if let (Some((v, c)), None, false) = (terms.next(), terms.next(), *strict) {
                // c v + k <= 0
                let bound = match e.constant_part().checked_neg().and_then(|k| k.checked_div(c)) {
                    Some(b) => b,
                    None => continue,
                };
                if c.signum() > 0 {
                    let u = upper.entry(v.clone()).or_insert(bound);
                    *u = (*u).min(bound);
                } else {
                    let l = lower.entry(v.clone()).or_insert(bound);
                    *l = (*l).max(bound);
                }
            }
        }
        for (v, u) in &upper {
            if lower.get(v) == Some(u) {
                asg.insert(v.clone(), *u);
            }
        }

        // later solutions do not mention earlier variables
        for (v, sol) in solved.iter().rev() {
            let sol = asg.iter().try_fold(sol.clone(), |sol, (w, r): (&Var, &Ratio)| {
                sol.checked_subst(w, &Fraction::constant(*r))
            });
            if let Some(r) = sol.as_ref().and_then(Fraction::as_constant) {
                asg.insert(v.clone(), r);
            }
        }
        Assignment(asg)
    }
}

impl Display for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for c in self.list.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
            first = false;
        }
        for r in self.conflicts.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "false ({})", r)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: i128, d: i128) -> Fraction {
        Fraction::constant(Ratio::new(n, d))
    }

    #[test]
    fn satisfiable() {
        let (x, y, z) = (Fraction::fresh(), Fraction::fresh(), Fraction::fresh());
        let mut cs = Constraints::new();
        cs.permission(&x);
        cs.permission(&y);
        cs.equal(x.clone() + y.clone(), Fraction::one());
        cs.lt(x.clone(), y.clone());
        assert!(!cs.is_unsatisfiable());
        assert!(cs.entails(&Constraint::lt(x.clone(), r(1, 2))));
        assert!(!cs.entails(&Constraint::lt(x.clone(), r(1, 4))));

        // z is squeezed between x and y
        cs.lt(y.clone(), z.clone());
        cs.le(z.clone(), x.clone() + y.clone());
        assert!(!cs.is_unsatisfiable());
        cs.lt(z.clone() + x.clone(), Fraction::one());
        assert!(cs.is_unsatisfiable());
    }

    #[test]
    fn bounds() {
        let x = Fraction::fresh();
        let mut cs = Constraints::new();
        // implicit bounds 0 <= x <= 1
        cs.lt(Fraction::one(), x.clone());
        assert!(cs.is_unsatisfiable());

        let mut cs = Constraints::new();
        cs.le(Fraction::one(), x.clone());
        assert!(cs.is_one(x.clone()));
        assert!(!cs.is_zero(x.clone()));
    }

    #[test]
    fn entailment() {
        let (x, y) = (Fraction::fresh(), Fraction::fresh());
        let mut cs = Constraints::new();
        cs.equal(x.clone() + y.clone(), Fraction::one());
        assert!(!cs.is_one(x.clone()));
        assert!(cs.is_one(x.clone() + y.clone()));
        cs.equal(y.clone(), r(1, 3));
        assert!(cs.entails(&Constraint::equal(x.clone(), r(2, 3))));
        assert!(cs.is_zero(x.clone() + y.clone() - Fraction::one()));
    }

    #[test]
    fn simplification() {
        let (x, y, z) = (Fraction::fresh(), Fraction::fresh(), Fraction::fresh());
        let mut cs = Constraints::new();
        cs.equal(x.clone() + y.clone(), Fraction::one());
        cs.equal(y.clone(), r(1, 4));
        cs.le(Fraction::one(), z.clone());
        let asg = cs.simplify();
        assert_eq!(asg.eval(&x), Some(Ratio::new(3, 4)));
        assert_eq!(asg.eval(&(y + z)), Some(Ratio::new(5, 4)));
    }

    #[test]
    fn conflicts() {
        let mut cs = Constraints::new();
        assert!(cs.is_satisfiable());
        cs.conflict("illegal split");
        assert!(!cs.is_satisfiable());
        assert!(cs.is_unsatisfiable());
        let mut other = Constraints::new();
        other.concat(&cs);
        assert_eq!(other.conflicts().collect::<Vec<_>>(), ["illegal split"]);

        let mut cs = Constraints::new();
        cs.equal(Fraction::one(), Fraction::zero());
        assert!(!cs.is_satisfiable());
    }

    #[test]
    fn overflow() {
        let (x, y) = (Fraction::fresh(), Fraction::fresh());
        let big = Ratio::integer(i128::MAX / 2);
        let mut cs = Constraints::new();
        cs.le(x.clone().scale(big), y.clone().scale(big.recip()));
        assert!(cs.is_satisfiable());
        // inconclusive elimination counts as unsatisfiable, but entails nothing
        assert!(cs.is_unsatisfiable());
        assert!(!cs.is_one(x.clone()));
        assert!(!cs.is_zero(x));
        assert!(cs.simplify().is_empty());
    }
}
