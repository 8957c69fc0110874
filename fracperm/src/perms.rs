//! Complete permission knowledge for a single location.

use crate::fraction::{Constraints, Fraction};
use crate::perm::{FractionalPermission, SplitError};
use crate::state::{StateId, StateSpace};
use alloc::format;
use alloc::vec::Vec;
use core::fmt::{self, Display};

/// Frame permission currently decomposed into permissions for fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unpacked<'s> {
    /// node below which fields are unpacked
    pub root: StateId,
    pub perm: FractionalPermission<'s>,
}

/// Permissions held for a location.
///
/// *Virtual* permissions describe what a reference may do with the object,
/// *frame* permissions (only held for the receiver) describe what
/// may be assumed about its fields.
/// The constraint store constrains all fractions mentioned by the permissions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FractionalPermissions<'s> {
    virtuals: Vec<FractionalPermission<'s>>,
    frames: Vec<FractionalPermission<'s>>,
    unpacked: Option<Unpacked<'s>>,
    constraints: Constraints,
}

/// Return true if `p` grants at least everything that `q` grants.
fn grants(p: &FractionalPermission, q: &FractionalPermission) -> bool {
    p.space() == q.space()
        && p.space().refines(q.root(), p.root())
        && p.is_in_state(q.root())
        && q.states().iter().all(|s| p.is_in_state(*s))
        && p.kind() >= q.kind()
}

/// Most precise permission granted by both `p` and `q`.
fn join_permission<'s>(
    p: &FractionalPermission<'s>,
    q: &FractionalPermission<'s>,
    cs: &mut Constraints,
) -> Option<FractionalPermission<'s>> {
    if p == q {
        return Some(p.clone());
    }
    if p.space() != q.space() || p.root() != q.root() {
        return None;
    }
    let kind = p.kind()?.meet(q.kind()?);
    let (hp, hq) = (p.held(), q.held());
    let fraction = if hp == hq {
        hp
    } else {
        let h = Fraction::fresh();
        cs.permission(&h);
        cs.le(h.clone(), hp);
        cs.le(h.clone(), hq);
        h
    };
    let mut joined = FractionalPermission::new(p.space(), p.root(), kind, fraction);
    let states = p.space().join_claims(p.states(), q.states());
    joined.replace_states(&states);
    Some(joined)
}

/// Pair permissions with the same root and join them, dropping the rest.
fn join_list<'s>(
    a: &[FractionalPermission<'s>],
    b: &[FractionalPermission<'s>],
    cs: &mut Constraints,
) -> Vec<FractionalPermission<'s>> {
    let mut used = Vec::new();
    let mut joined = Vec::new();
    for p in a {
        let found = b.iter().enumerate().find(|(i, q)| {
            !used.contains(i) && p.space() == q.space() && p.root() == q.root()
        });
        if let Some((i, q)) = found {
            used.push(i);
            joined.extend(join_permission(p, q, cs))
        }
    }
    joined
}

/// Return true if both lists contain the same permissions, regardless of order.
fn same_list(a: &[FractionalPermission], b: &[FractionalPermission]) -> bool {
    let mut rest: Vec<_> = b.iter().collect();
    for p in a {
        match rest.iter().position(|q| *q == p) {
            Some(i) => {
                rest.swap_remove(i);
            }
            None => return false,
        }
    }
    rest.is_empty()
}

impl<'s> FractionalPermissions<'s> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Permissions whose fractions are constrained to denote permissions.
    pub fn from_permissions(
        virtuals: Vec<FractionalPermission<'s>>,
        frames: Vec<FractionalPermission<'s>>,
    ) -> Self {
        let mut constraints = Constraints::new();
        for p in virtuals.iter().chain(frames.iter()) {
            constraints.permission(p.fraction())
        }
        Self {
            virtuals,
            frames,
            unpacked: None,
            constraints,
        }
    }

    pub fn virtuals(&self) -> &[FractionalPermission<'s>] {
        &self.virtuals
    }

    pub fn frames(&self) -> &[FractionalPermission<'s>] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.virtuals.is_empty() && self.frames.is_empty() && self.unpacked.is_none()
    }

    pub fn unpacked(&self) -> Option<&Unpacked<'s>> {
        self.unpacked.as_ref()
    }

    pub fn unpacked_root(&self) -> Option<StateId> {
        self.unpacked.as_ref().map(|u| u.root)
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut Constraints {
        &mut self.constraints
    }

    /// State space of the permissions, if any permission is held.
    pub fn space(&self) -> Option<&'s StateSpace> {
        let unpacked = self.unpacked.iter().map(|u| &u.perm);
        let mut all = self.virtuals.iter().chain(&self.frames).chain(unpacked);
        all.next().map(|p| p.space())
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut FractionalPermission<'s>> {
        let unpacked = self.unpacked.iter_mut().map(|u| &mut u.perm);
        self.virtuals.iter_mut().chain(&mut self.frames).chain(unpacked)
    }

    /// Split a permission off the virtual or frame permissions.
    ///
    /// A held permission that is exactly the wanted one is taken as a whole.
    /// On failure, the permissions become unsatisfiable.
    pub fn split_off(&mut self, want: &FractionalPermission<'s>, frame: bool) -> Result<(), SplitError> {
        let list = if frame { &mut self.frames } else { &mut self.virtuals };
        let exact = list.iter().position(|p| {
            p.loans().is_empty()
                && p.base_kind() == want.base_kind()
                && p.root() == want.root()
                && p.fraction() == want.fraction()
                && p.covers(want).is_ok()
        });
        if let Some(pos) = exact {
            list.remove(pos);
            return Ok(());
        }

        let mut err = SplitError::Missing;
        for i in 0..list.len() {
            match list[i].split(want, &mut self.constraints) {
                Ok(rest) if rest.held() == Fraction::zero() => {
                    list.remove(i);
                    return Ok(());
                }
                Ok(rest) => {
                    list[i] = rest;
                    return Ok(());
                }
                Err(SplitError::Space) => (),
                Err(e) if err == SplitError::Missing => err = e,
                Err(_) => (),
            }
        }
        self.constraints.conflict(format!("{}: {}", want, err));
        Err(err)
    }

    /// Split all permissions of `wanted` off.
    pub fn split_off_all(&mut self, wanted: &Self) -> Result<(), SplitError> {
        self.constraints.concat(&wanted.constraints);
        for p in &wanted.virtuals {
            self.split_off(p, false)?
        }
        for p in &wanted.frames {
            self.split_off(p, true)?
        }
        Ok(())
    }

    /// Add a permission to the virtual or frame permissions.
    ///
    /// The permission repays a loan if possible and
    /// is combined with an existing permission otherwise.
    /// If neither works, it is kept separately.
    pub fn merge_in(&mut self, given: FractionalPermission<'s>, frame: bool) {
        let list = if frame { &mut self.frames } else { &mut self.virtuals };
        let cs = &mut self.constraints;
        if list.iter_mut().any(|p| p.discharge(&given)) {
            return;
        }
        for p in list.iter_mut() {
            if let Some(combined) = p.combine(&given, cs) {
                trace!("combined {} and {} to {}", p, given, combined);
                *p = combined;
                return;
            }
        }

        cs.permission(given.fraction());
        let same_root = list
            .iter()
            .filter(|p| p.space() == given.space() && p.root() == given.root());
        let held: Vec<_> = same_root.map(|p| p.held()).collect();
        if !held.is_empty() {
            let total = held.into_iter().fold(given.held(), |acc, h| acc + h);
            cs.le(total, Fraction::one());
        }
        list.push(given)
    }

    /// Add all permissions of `given`.
    pub fn merge_in_all(&mut self, given: Self) {
        self.constraints.concat(&given.constraints);
        for p in given.virtuals {
            self.merge_in(p, false)
        }
        for p in given.frames {
            self.merge_in(p, true)
        }
    }

    /// Return true if the virtual (or frame) permissions guarantee state `s`.
    ///
    /// While unpacked, the frame is in the unpacked root and
    /// in every state learnt since unpacking.
    pub fn is_in_state(&self, s: StateId, frame: bool) -> bool {
        if frame {
            if let Some(u) = &self.unpacked {
                if u.perm.space().refines(u.root, s) || u.perm.is_in_state(s) {
                    return true;
                }
            }
        }
        let list = if frame { &self.frames } else { &self.virtuals };
        list.iter().any(|p| p.is_in_state(s))
    }

    pub fn is_in_states(&self, states: &[StateId], frame: bool) -> bool {
        states.iter().all(|s| self.is_in_state(*s, frame))
    }

    fn state_conflict(&mut self, s: StateId) {
        if let Some(space) = self.space() {
            let reason = format!("cannot be in state {}", space.name(s));
            self.constraints.conflict(reason)
        }
    }

    /// Learn that the object is in state `s`.
    ///
    /// Return false and become unsatisfiable if this contradicts known states.
    pub fn learn_state(&mut self, s: StateId) -> bool {
        let mut ok = true;
        for p in self.all_mut() {
            ok &= p.learn_state(s)
        }
        if !ok {
            self.state_conflict(s)
        }
        ok
    }

    /// Learn state information that may be invalidated by other references.
    ///
    /// Permissions that let others write take the information
    /// instead of what they claimed before.
    pub fn learn_temporary_state_info(&mut self, s: StateId) -> bool {
        let mut ok = true;
        for p in self.all_mut() {
            if p.kind().map_or(true, |k| k.others_may_write()) {
                p.reset_state(s)
            } else {
                ok &= p.learn_state(s)
            }
        }
        if !ok {
            self.state_conflict(s)
        }
        ok
    }

    /// Learn that the object changed to state `s`.
    pub fn replace_state_info(&mut self, s: StateId) {
        let unpacked = self.unpacked.is_some();
        let list = self.virtuals.iter_mut().chain(&mut self.frames);
        list.for_each(|p| p.reset_state(s));
        if unpacked {
            debug!("replacing state info of an unpacked location")
        }
    }

    /// Forget the states at or below `node`.
    pub fn forget_states_under(&mut self, node: StateId) {
        self.all_mut().for_each(|p| p.forget_states_under(node))
    }

    /// Forget states that other references may have changed.
    pub fn forget_share_and_pure_states(&mut self) {
        for p in self.all_mut() {
            if p.kind().map_or(true, |k| k.others_may_write()) {
                p.forget_states()
            }
        }
    }

    /// Replace all permissions by their read-only counterparts.
    pub fn purify(&mut self) {
        self.virtuals = self.virtuals.iter().filter_map(|p| p.purify()).collect();
        self.frames = self.frames.iter().filter_map(|p| p.purify()).collect();
        if let Some(u) = &mut self.unpacked {
            if let Some(p) = u.perm.purify() {
                u.perm = p
            }
        }
    }

    /// Make sure that fields of the unpacked object may be assigned.
    pub fn make_modifiable(&mut self) -> bool {
        let reason = match &self.unpacked {
            None => "fields assigned while packed",
            Some(u) if u.perm.is_read_only() => "fields assigned with a read-only permission",
            Some(_) => return true,
        };
        self.constraints.conflict(reason);
        false
    }

    /// Decompose the frame permission covering `root`.
    ///
    /// Return false and become unsatisfiable if no frame permission covers `root`.
    ///
    /// # Panics
    ///
    /// If the location is already unpacked.
    pub fn unpack(&mut self, root: StateId) -> bool {
        assert!(self.unpacked.is_none(), "location is already unpacked");
        let pos = self.frames.iter().position(|p| {
            p.space().refines(root, p.root()) && p.is_in_state(root)
        });
        match pos {
            Some(pos) => {
                let perm = self.frames.remove(pos);
                trace!("unpack {} to {}", perm, perm.space().name(root));
                self.unpacked = Some(Unpacked { root, perm });
                true
            }
            None => {
                self.constraints.conflict("no frame permission to unpack");
                false
            }
        }
    }

    /// Fold the unpacked permission back, now guaranteeing `states`.
    ///
    /// # Panics
    ///
    /// If the location is not unpacked.
    pub fn pack(&mut self, states: &[StateId]) {
        let Unpacked { root, mut perm } = match self.unpacked.take() {
            Some(u) => u,
            None => panic!("location is not unpacked"),
        };
        perm.forget_states_under(root);
        for s in states {
            if !perm.learn_state(*s) {
                let reason = format!("cannot pack to {}", perm.space().name(*s));
                self.constraints.conflict(reason)
            }
        }
        trace!("packed to {}", perm);
        self.frames.push(perm)
    }

    /// Record that the location cannot be packed.
    pub fn invalid_pack(&mut self) {
        self.unpacked = None;
        self.constraints.conflict("cannot pack to any state")
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.constraints.is_unsatisfiable()
    }

    /// Return true if these permissions grant everything `other` grants.
    ///
    /// Unsatisfiable permissions grant everything.
    pub fn at_least_as_precise(&self, other: &Self) -> bool {
        if self.is_unsatisfiable() {
            return true;
        } else if other.is_unsatisfiable() {
            return false;
        }
        let covered = |mine: &[FractionalPermission], theirs: &[FractionalPermission]| {
            theirs.iter().all(|q| mine.iter().any(|p| grants(p, q)))
        };
        let unpacked = match (&self.unpacked, &other.unpacked) {
            (None, None) => true,
            (Some(a), Some(b)) => a.root == b.root && grants(&a.perm, &b.perm),
            _ => false,
        };
        unpacked && covered(&self.virtuals, &other.virtuals) && covered(&self.frames, &other.frames)
    }

    /// Permissions granted on both sides.
    ///
    /// # Panics
    ///
    /// If the two sides are unpacked to different roots.
    pub fn join(&self, other: &Self) -> Self {
        if self.is_unsatisfiable() {
            return other.clone();
        } else if other.is_unsatisfiable() {
            return self.clone();
        }
        assert_eq!(
            self.unpacked_root(),
            other.unpacked_root(),
            "joining locations unpacked to different roots"
        );
        let mut constraints = self.constraints.clone();
        constraints.concat(&other.constraints);
        let virtuals = join_list(&self.virtuals, &other.virtuals, &mut constraints);
        let frames = join_list(&self.frames, &other.frames, &mut constraints);
        let unpacked = match (&self.unpacked, &other.unpacked) {
            (Some(a), Some(b)) => join_permission(&a.perm, &b.perm, &mut constraints)
                .map(|perm| Unpacked { root: a.root, perm }),
            _ => None,
        };
        Self {
            virtuals,
            frames,
            unpacked,
            constraints,
        }
    }

    /// Return true if both hold the same permissions, ignoring constraints.
    pub fn same_permissions(&self, other: &Self) -> bool {
        same_list(&self.virtuals, &other.virtuals)
            && same_list(&self.frames, &other.frames)
            && self.unpacked == other.unpacked
    }
}

impl<'s> Display for FractionalPermissions<'s> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let list = |f: &mut fmt::Formatter, ps: &[FractionalPermission]| -> fmt::Result {
            write!(f, "[")?;
            for (i, p) in ps.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", p)?;
            }
            write!(f, "]")
        };
        list(f, &self.virtuals)?;
        if !self.frames.is_empty() {
            write!(f, " frame ")?;
            list(f, &self.frames)?;
        }
        if let Some(u) = &self.unpacked {
            write!(f, " unpacked {} from {}", u.perm.space().name(u.root), u.perm)?;
        }
        if !self.constraints.is_empty() {
            write!(f, " with {}", self.constraints)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::{FractionCreation, Permission};
    use crate::state::tests::file;
    use crate::PermissionKind::{self, *};

    fn perm<'s>(space: &'s StateSpace, kind: PermissionKind, states: &[&str]) -> FractionalPermission<'s> {
        let states = states.iter().map(|s| space.lookup(s).unwrap());
        Permission::new(space, StateId::ALIVE, kind)
            .in_states(states)
            .instantiate("x", FractionCreation::Fresh)
    }

    #[test]
    fn split_merge_roundtrip() {
        let space = file();
        for (have, want) in [(Unique, Full), (Full, Immutable), (Share, Share), (Full, Pure)] {
            let orig = FractionalPermissions::from_permissions([perm(&space, have, &["Open"])].into(), [].into());
            // pieces that may write must report the state they leave the object in
            let wanted = FractionalPermissions::from_permissions([perm(&space, want, &["Open"])].into(), [].into());

            let mut ps = orig.clone();
            ps.split_off_all(&wanted).unwrap();
            assert!(!ps.is_unsatisfiable());
            ps.merge_in_all(wanted);
            assert!(ps.same_permissions(&orig), "{} - {}", have, want);
            assert!(!ps.is_unsatisfiable());
        }
    }

    #[test]
    fn full_into_shares() {
        let space = file();
        let mut ps = FractionalPermissions::from_permissions([perm(&space, Full, &[])].into(), [].into());
        assert!(ps.split_off(&perm(&space, Share, &[]), false).is_err());
        assert!(ps.is_unsatisfiable());
    }

    #[test]
    fn unique_twice() {
        let space = file();
        let unique = perm(&space, Unique, &[]);
        let mut ps = FractionalPermissions::from_permissions([unique.clone()].into(), [].into());
        ps.merge_in(perm(&space, Unique, &[]), false);
        assert!(ps.is_unsatisfiable());

        // giving back a split piece twice cannot create permissions
        let mut ps = FractionalPermissions::from_permissions([unique].into(), [].into());
        let full = perm(&space, Full, &[]);
        ps.split_off(&full, false).unwrap();
        ps.merge_in(full.clone(), false);
        ps.merge_in(full, false);
        assert!(ps.is_unsatisfiable());
    }

    #[test]
    fn states() {
        let space = file();
        let s = |n| space.lookup(n).unwrap();
        let mut ps = FractionalPermissions::from_permissions(
            [perm(&space, Full, &["Open"]), perm(&space, Pure, &["Open"])].into(),
            [].into(),
        );
        assert!(ps.is_in_state(s("Open"), false));
        assert!(ps.learn_state(s("Reading")));
        assert!(ps.is_in_states(&[s("Open"), s("Reading")], false));

        ps.forget_share_and_pure_states();
        assert!(ps.virtuals()[1].states().is_empty());
        assert!(ps.virtuals()[0].is_in_state(s("Reading")));

        ps.replace_state_info(s("Writing"));
        assert!(!ps.is_in_state(s("Reading"), false));
        assert!(ps.is_in_state(s("Writing"), false));

        assert!(ps.learn_temporary_state_info(s("Writing")));
        assert!(!ps.learn_state(s("Closed")));
        assert!(ps.is_unsatisfiable());
    }

    #[test]
    fn unpack_pack() {
        let space = file();
        let s = |n| space.lookup(n).unwrap();
        let orig = FractionalPermissions::from_permissions([].into(), [perm(&space, Full, &["Reading"])].into());
        let mut ps = orig.clone();
        assert!(ps.unpack(s("Open")));
        assert_eq!(ps.unpacked_root(), Some(s("Open")));
        assert!(ps.frames().is_empty());
        assert!(ps.is_in_state(s("Open"), true));
        assert!(ps.make_modifiable());

        ps.pack(&[s("Reading")]);
        assert!(ps.same_permissions(&orig));
        assert!(ps.at_least_as_precise(&orig) && orig.at_least_as_precise(&ps));

        let mut ps = orig.clone();
        assert!(!ps.unpack(s("Closed")));
        assert!(ps.is_unsatisfiable());
    }

    #[test]
    fn take_whole() {
        let space = file();
        let full = perm(&space, Full, &["Open"]);
        let mut ps = FractionalPermissions::from_permissions([full.clone()].into(), [].into());
        ps.split_off(&full, false).unwrap();
        assert!(ps.is_empty());
        assert!(ps.split_off(&full, false).is_err());
    }

    #[test]
    #[should_panic]
    fn pack_packed() {
        let space = file();
        let mut ps = FractionalPermissions::from_permissions([].into(), [perm(&space, Full, &[])].into());
        ps.pack(&[]);
    }

    #[test]
    fn join() {
        let space = file();
        let s = |n| space.lookup(n).unwrap();
        let a = FractionalPermissions::from_permissions([perm(&space, Full, &["Reading"])].into(), [].into());
        let b = FractionalPermissions::from_permissions(
            [perm(&space, Immutable, &["Writing"]), perm(&space, Pure, &[])].into(),
            [].into(),
        );
        let j = a.join(&b);
        assert_eq!(j.virtuals().len(), 1);
        assert_eq!(j.virtuals()[0].kind(), Some(Immutable));
        assert!(j.is_in_state(s("Open"), false));
        assert!(!j.is_in_state(s("Reading"), false));
        assert!(a.at_least_as_precise(&j));
        assert!(!j.at_least_as_precise(&a));
        assert!(!j.is_unsatisfiable());
        let k = b.join(&a);
        assert!(j.at_least_as_precise(&k) && k.at_least_as_precise(&j));

        assert!(a.join(&a).same_permissions(&a));
    }
}
