//! Permissions to objects.
//!
//! A [`Permission`] is what an annotation declares;
//! a [`FractionalPermission`] is a permission actually held at a program point,
//! equipped with the fraction of its root's access that it represents.
//!
//! Splitting a permission does not forget where the split-off piece came from:
//! the remainder records a *loan* consisting of the kind and fraction
//! of the piece. Merging the piece back discharges the loan and
//! restores the original permission.

use crate::fraction::{Constraints, Fraction};
use crate::state::{StateId, StateSpace};
use crate::PermissionKind;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Display};

/// How fractions of instantiated permissions are created.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FractionCreation {
    /// Named after the permission's owner and root, used when analysing a body.
    Named,
    /// Fresh variables, used at call sites.
    Fresh,
}

/// Permission as declared by an annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permission<'s> {
    pub space: &'s StateSpace,
    pub root: StateId,
    pub kind: PermissionKind,
    /// states guaranteed besides the root
    pub states: Vec<StateId>,
    /// declared fraction, if any
    pub fraction: Option<Fraction>,
}

impl<'s> Permission<'s> {
    pub fn new(space: &'s StateSpace, root: StateId, kind: PermissionKind) -> Self {
        Self {
            space,
            root,
            kind,
            states: Vec::new(),
            fraction: None,
        }
    }

    pub fn in_states(mut self, states: impl IntoIterator<Item = StateId>) -> Self {
        for s in states {
            self.space.learn(&mut self.states, s);
        }
        self
    }

    pub fn purify(mut self) -> Self {
        self.kind = self.kind.purify();
        self
    }

    /// Assign a fraction to the permission.
    ///
    /// The owner is used to name fractions of [`FractionCreation::Named`].
    pub fn instantiate(&self, owner: &str, creation: FractionCreation) -> FractionalPermission<'s> {
        let fraction = match (&self.fraction, self.kind, creation) {
            (Some(f), _, _) => f.clone(),
            (None, PermissionKind::Unique, _) => Fraction::one(),
            (None, _, FractionCreation::Named) => {
                Fraction::named(format!("{}.{}", owner, self.space.name(self.root)))
            }
            (None, _, FractionCreation::Fresh) => Fraction::fresh(),
        };
        let mut p = FractionalPermission::new(self.space, self.root, self.kind, fraction);
        p.states = self.states.clone();
        p
    }
}

impl<'s> Display for Permission<'s> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.space.name(self.root))?;
        if !self.states.is_empty() {
            write!(f, " in {}", self.space.display_claims(&self.states))?;
        }
        Ok(())
    }
}

/// Piece of a permission that was split off and not yet merged back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loan {
    pub kind: PermissionKind,
    pub fraction: Fraction,
}

/// Reason why a permission could not be split off another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitError {
    /// no permission to the object (or its frame) is held
    Missing,
    /// the held permission is for another type
    Space,
    /// the held permission does not cover the wanted root
    Root { have: String, want: String },
    /// the wanted kind cannot be split off the held kind
    Kind { have: Option<PermissionKind>, want: PermissionKind },
    /// the object is not known to be in the wanted state
    State(String),
}

impl Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "no permission available"),
            Self::Space => write!(f, "permission for a different type"),
            Self::Root { have, want } => write!(f, "permission rooted at {} does not cover {}", have, want),
            Self::Kind { have: None, want } => write!(f, "cannot take {}, nothing is left", want),
            Self::Kind { have: Some(have), want } => write!(f, "cannot take {} off {}", want, have),
            Self::State(s) => write!(f, "not known to be in state {}", s),
        }
    }
}

/// Permission held at a program point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FractionalPermission<'s> {
    space: &'s StateSpace,
    root: StateId,
    kind: PermissionKind,
    fraction: Fraction,
    loans: Vec<Loan>,
    states: Vec<StateId>,
}

impl<'s> FractionalPermission<'s> {
    pub fn new(space: &'s StateSpace, root: StateId, kind: PermissionKind, fraction: Fraction) -> Self {
        Self {
            space,
            root,
            kind,
            fraction,
            loans: Vec::new(),
            states: Vec::new(),
        }
    }

    pub fn space(&self) -> &'s StateSpace {
        self.space
    }

    pub fn root(&self) -> StateId {
        self.root
    }

    /// Kind the permission had before any piece was split off.
    pub fn base_kind(&self) -> PermissionKind {
        self.kind
    }

    /// Kind of what is currently held, `None` if everything was split off.
    pub fn kind(&self) -> Option<PermissionKind> {
        let mut loans = self.loans.iter();
        loans.try_fold(self.kind, |k, loan| k.split_remainder(loan.kind))
    }

    /// Fraction the permission had before any piece was split off.
    pub fn fraction(&self) -> &Fraction {
        &self.fraction
    }

    /// Fraction currently held.
    pub fn held(&self) -> Fraction {
        let loans = self.loans.iter().map(|l| l.fraction.clone());
        loans.fold(self.fraction.clone(), |acc, f| acc - f)
    }

    pub fn loans(&self) -> &[Loan] {
        &self.loans
    }

    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    pub fn is_read_only(&self) -> bool {
        self.kind().map_or(true, |k| k.is_read_only())
    }

    /// Return true if the permission guarantees the object to be in state `s`.
    pub fn is_in_state(&self, s: StateId) -> bool {
        self.space.refines(self.root, s) || self.space.implies(&self.states, s)
    }

    /// Learn that the object is in state `s`.
    ///
    /// Return false if this contradicts what the permission guarantees.
    pub fn learn_state(&mut self, s: StateId) -> bool {
        if self.space.refines(self.root, s) {
            true
        } else if self.space.refines(s, self.root) {
            self.space.learn(&mut self.states, s)
        } else {
            !self.space.are_exclusive(self.root, s)
        }
    }

    /// Replace the guaranteed states below the root.
    pub fn replace_states(&mut self, states: &[StateId]) {
        self.states.clear();
        for s in states {
            self.learn_state(*s);
        }
    }

    pub fn forget_states(&mut self) {
        self.states.clear()
    }

    /// Forget the guaranteed states at or below `node`.
    pub fn forget_states_under(&mut self, node: StateId) {
        let space = self.space;
        self.states.retain(|s| !space.refines(*s, node))
    }

    /// Learn that the object is now in `s`, dropping claims that
    /// do not concern another dimension.
    pub fn reset_state(&mut self, s: StateId) {
        let space = self.space;
        self.states.retain(|c| space.are_orthogonal(*c, s));
        self.learn_state(s);
    }

    /// Read-only permission for what is currently held.
    pub fn purify(&self) -> Option<Self> {
        let mut p = Self::new(self.space, self.root, self.kind()?.purify(), self.held());
        p.states = self.states.clone();
        Some(p)
    }

    /// Check whether `want` can be split off without modifying anything.
    pub fn covers(&self, want: &Self) -> Result<(), SplitError> {
        if self.space != want.space {
            return Err(SplitError::Space);
        }
        if !self.space.refines(want.root, self.root) || !self.is_in_state(want.root) {
            return Err(SplitError::Root {
                have: self.space.name(self.root).into(),
                want: self.space.name(want.root).into(),
            });
        }
        if let Some(s) = want.states.iter().find(|s| !self.is_in_state(**s)) {
            return Err(SplitError::State(self.space.name(*s).into()));
        }
        match self.kind() {
            Some(have) if have.can_split(want.kind) => Ok(()),
            have => Err(SplitError::Kind {
                have,
                want: want.kind,
            }),
        }
    }

    /// Split `want` off the permission and return the remainder.
    ///
    /// The constraints on the wanted fraction are added to `cs`.
    /// The remainder may hold a zero fraction,
    /// in which case splitting anything further off it is unsatisfiable.
    pub fn split(&self, want: &Self, cs: &mut Constraints) -> Result<Self, SplitError> {
        self.covers(want)?;
        cs.permission(&want.fraction);
        cs.le(want.fraction.clone(), self.held());

        let mut rest = self.clone();
        rest.loans.push(Loan {
            kind: want.kind,
            fraction: want.fraction.clone(),
        });
        // the taker may change the state below its root
        if want.kind.is_modifying() {
            let space = self.space;
            rest.states.retain(|s| !space.refines(*s, want.root));
        }
        trace!("split {} off {} leaving {}", want, self, rest);
        Ok(rest)
    }

    /// Merge `given` back if it repays one of the permission's loans.
    ///
    /// Return false if no loan matches.
    pub fn discharge(&mut self, given: &Self) -> bool {
        if self.space != given.space {
            return false;
        }
        let pos = self.loans.iter().position(|l| {
            l.kind == given.kind && l.fraction == given.fraction
        });
        let pos = match pos {
            Some(pos) => pos,
            None => return false,
        };
        self.loans.remove(pos);
        if given.kind.is_modifying() {
            let space = self.space;
            self.states.retain(|s| !space.refines(*s, given.root));
        }
        for s in &given.states {
            self.learn_state(*s);
        }
        trace!("discharged loan of {}, now {}", given, self);
        true
    }

    /// Combine two pieces of the same object into one permission.
    ///
    /// Return `None` if the pieces cannot be combined,
    /// for example because both may write.
    pub fn combine(&self, given: &Self, cs: &mut Constraints) -> Option<Self> {
        if self.space != given.space || self.root != given.root {
            return None;
        }
        if !self.loans.is_empty() || !given.loans.is_empty() {
            return None;
        }
        let kind = self.kind.combine(given.kind)?;
        let sum = self.fraction.clone() + given.fraction.clone();
        cs.le(sum.clone(), Fraction::one());
        let kind = if cs.is_one(sum.clone()) {
            PermissionKind::Unique
        } else {
            kind
        };

        // state guarantees of a writer take precedence
        let (first, second) = if given.kind.is_modifying() {
            (given, self)
        } else {
            (self, given)
        };
        let mut p = Self::new(self.space, self.root, kind, sum);
        p.states = first.states.clone();
        for s in &second.states {
            let mut states = p.states.clone();
            if self.space.learn(&mut states, *s) {
                p.states = states
            }
        }
        Some(p)
    }
}

impl<'s> Display for FractionalPermission<'s> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind() {
            Some(k) => write!(f, "{}", k)?,
            None => write!(f, "none")?,
        }
        write!(f, "({}, {})", self.space.name(self.root), self.held())?;
        if !self.states.is_empty() {
            write!(f, " in {}", self.space.display_claims(&self.states))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::file;
    use PermissionKind::*;

    #[test]
    fn split_merge() {
        let space = file();
        let open = space.lookup("Open").unwrap();
        let mut cs = Constraints::new();
        let have = Permission::new(&space, StateId::ALIVE, Unique)
            .in_states([open])
            .instantiate("x", FractionCreation::Fresh);
        let want = Permission::new(&space, StateId::ALIVE, Full).instantiate("x", FractionCreation::Fresh);

        let mut rest = have.split(&want, &mut cs).unwrap();
        assert_eq!(rest.kind(), Some(Pure));
        assert!(!rest.is_in_state(open));
        assert!(!cs.is_unsatisfiable());

        let mut back = want.clone();
        back.learn_state(open);
        assert!(rest.discharge(&back));
        assert_eq!(rest, have);
    }

    #[test]
    fn split_read_only() {
        let space = file();
        let open = space.lookup("Open").unwrap();
        let mut cs = Constraints::new();
        let have = Permission::new(&space, StateId::ALIVE, Full)
            .in_states([open])
            .instantiate("x", FractionCreation::Named);
        let want = Permission::new(&space, StateId::ALIVE, Immutable).instantiate("y", FractionCreation::Fresh);
        let rest = have.split(&want, &mut cs).unwrap();
        assert_eq!(rest.kind(), Some(Immutable));
        // nobody may write, so the state is still known
        assert!(rest.is_in_state(open));
        assert_eq!(rest.held(), have.fraction().clone() - want.fraction().clone());
    }

    #[test]
    fn split_failures() {
        let space = file();
        let s = |n| space.lookup(n).unwrap();
        let mut cs = Constraints::new();
        let mk = |kind, root, states: &[StateId]| {
            Permission::new(&space, root, kind)
                .in_states(states.iter().copied())
                .instantiate("x", FractionCreation::Fresh)
        };
        let have = mk(Share, StateId::ALIVE, &[s("Open")]);
        let err = have.split(&mk(Full, StateId::ALIVE, &[]), &mut cs).unwrap_err();
        assert_eq!(err, SplitError::Kind { have: Some(Share), want: Full });
        let err = have.split(&mk(Pure, StateId::ALIVE, &[s("Reading")]), &mut cs).unwrap_err();
        assert_eq!(err, SplitError::State("Reading".into()));
        assert!(have.split(&mk(Pure, s("Open"), &[]), &mut cs).is_ok());
        let err = have.split(&mk(Pure, s("Closed"), &[]), &mut cs).unwrap_err();
        assert!(matches!(err, SplitError::Root { .. }));

        let unique = mk(Unique, StateId::ALIVE, &[]);
        let rest = unique.split(&mk(Unique, StateId::ALIVE, &[]), &mut cs).unwrap();
        assert_eq!(rest.kind(), None);
        assert!(rest.split(&mk(Pure, StateId::ALIVE, &[]), &mut cs).is_err());
    }

    #[test]
    fn combination() {
        let space = file();
        let mut cs = Constraints::new();
        let f = Fraction::fresh();
        let full = FractionalPermission::new(&space, StateId::ALIVE, Full, f.clone());
        let pure = FractionalPermission::new(&space, StateId::ALIVE, Pure, Fraction::one() - f);
        let p = full.combine(&pure, &mut cs).unwrap();
        assert_eq!(p.kind(), Some(Unique));

        let g = Fraction::fresh();
        let pure = FractionalPermission::new(&space, StateId::ALIVE, Pure, g);
        assert_eq!(full.combine(&pure, &mut cs).unwrap().kind(), Some(Full));
        assert!(full.combine(&full, &mut cs).is_none());
    }
}
