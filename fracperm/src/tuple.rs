//! Tuple maps: everything known at a program point along a single path.
//!
//! A tuple map assigns permissions to locations and additionally records
//! dynamic facts, pending implications, captured permissions, and
//! the locations that are currently unpacked.
//!
//! Tuple maps are persistent values: cloning is cheap thanks to structural sharing.
//! A frozen tuple map must not be changed any more;
//! use [`TupleMap::mutable_copy`] to obtain a changeable copy.

use crate::diag::{Diagnostic, Phase};
use crate::facts::Facts;
use crate::invariant::Invariants;
use crate::loc::{Args, Loc};
use crate::perm::FractionalPermission;
use crate::perms::{FractionalPermissions, Unpacked};
use crate::sig::{PredicateChecker, PredicateMerger};
use crate::state::{StateId, StateSpace};
use alloc::string::ToString;
use alloc::vec::Vec;
use alloc::{format, vec};
use core::fmt::{self, Display};
use im::{OrdMap, Vector};

/// Immutable HashMap for fast cloning of tuple maps.
type FnvHashMap<K, V> = im::hashmap::HashMap<K, V, fnv::FnvBuildHasher>;

/// Knowledge that becomes available once a boolean is known.
///
/// This is how state tests such as `result == true => full(this) in Open`
/// are represented after a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Implication<'s> {
    pub antecedent: Loc,
    pub value: bool,
    pub merges: Vec<(Loc, FractionalPermissions<'s>)>,
    pub states: Vec<(Loc, StateId)>,
    pub frame_states: Vec<(Loc, StateId)>,
    /// `(loc, true)` if `loc` is null
    pub nulls: Vec<(Loc, bool)>,
    pub values: Vec<(Loc, bool)>,
    pub equalities: Vec<(Loc, Loc, bool)>,
    pub nested: Vec<Implication<'s>>,
    /// the consequence can never hold
    pub impossible: bool,
}

impl<'s> Implication<'s> {
    /// Implication without consequences.
    pub fn new(antecedent: Loc, value: bool) -> Self {
        Self {
            antecedent,
            value,
            merges: Vec::new(),
            states: Vec::new(),
            frame_states: Vec::new(),
            nulls: Vec::new(),
            values: Vec::new(),
            equalities: Vec::new(),
            nested: Vec::new(),
            impossible: false,
        }
    }
}

/// Permissions of `captured` that are held by `capturing`
/// until `capturing` reaches `state`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Release<'s> {
    pub captured: Loc,
    pub capturing: Loc,
    pub state: StateId,
    pub perms: FractionalPermissions<'s>,
}

/// Invariants assumed for an unpacked location and the locations of its fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnpackInfo<'s> {
    pub invariants: &'s Invariants<'s>,
    pub fields: Args,
}

/// Knowledge at a program point along a single path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TupleMap<'s> {
    locs: FnvHashMap<Loc, FractionalPermissions<'s>>,
    unpacked: OrdMap<Loc, UnpackInfo<'s>>,
    facts: Facts,
    implications: Vector<Implication<'s>>,
    releases: Vector<Release<'s>>,
    diagnostics: Vector<Diagnostic>,
    phase: Phase,
    /// a check failed or contradicting facts were learnt
    void: bool,
    frozen: bool,
}

/// States claimed by any permission of a set.
fn claims(perms: &FractionalPermissions) -> Vec<StateId> {
    let unpacked = perms.unpacked().map(|u| &u.perm);
    let all = perms.virtuals().iter().chain(perms.frames()).chain(unpacked);
    let mut claims = Vec::new();
    for p in all {
        for s in core::iter::once(p.root()).chain(p.states().iter().copied()) {
            if !claims.contains(&s) {
                claims.push(s)
            }
        }
    }
    claims
}

/// State chains, starting at `node`, that an object may be in.
///
/// A chain follows a child of every partition of `node` whose states carry invariants.
/// If the permission knows the child, only that child is followed,
/// unless `branch` is set, in which case all children are candidates.
/// Partitions without invariants are only followed if the child is known.
fn decompositions(
    space: &StateSpace,
    node: StateId,
    perm: &FractionalPermission,
    invariants: &Invariants,
    branch: bool,
) -> Vec<Vec<StateId>> {
    let mut chains = vec![vec![node]];
    for part in space.partitions(node) {
        let relevant = part.iter().any(|c| invariants.has_invariants_under(*c));
        let known = part.iter().copied().find(|c| perm.is_in_state(*c));
        let next = match known {
            Some(c) if !(branch && relevant) => vec![c],
            _ if relevant => part,
            _ => continue,
        };
        let mut product = Vec::new();
        for c in next {
            for sub in decompositions(space, c, perm, invariants, branch) {
                for chain in &chains {
                    let mut chain = chain.clone();
                    chain.extend(sub.iter().copied());
                    product.push(chain)
                }
            }
        }
        chains = product;
    }
    chains
}

/// Elements contained in both vectors.
fn common<A: Clone + PartialEq>(a: &Vector<A>, b: &Vector<A>) -> Vector<A> {
    a.iter().filter(|x| b.contains(x)).cloned().collect()
}

/// Chain from `root` to the given target states.
fn chain_to(space: &StateSpace, root: StateId, targets: &[StateId]) -> Vec<StateId> {
    let mut chain = vec![root];
    for t in targets {
        let path: Vec<_> = if space.refines(*t, root) {
            let above = space.ancestors(*t).take_while(|s| *s != root);
            above.filter(|s| !space.is_dimension(*s)).collect()
        } else {
            vec![*t]
        };
        for s in path.into_iter().rev() {
            if !chain.contains(&s) {
                chain.push(s)
            }
        }
    }
    chain
}

/// All state chains to try when unpacking from or packing to `u`.
fn candidates(invariants: &Invariants, u: &Unpacked, targets: Option<&[StateId]>) -> Vec<Vec<StateId>> {
    let space = invariants.space();
    let above = invariants.states_between(u.perm.root(), u.root);
    let chains = match targets {
        Some(targets) => vec![chain_to(space, u.root, targets)],
        None => decompositions(space, u.root, &u.perm, invariants, true),
    };
    let prefix = |chain: Vec<StateId>| -> Vec<StateId> { above.iter().copied().chain(chain).collect() };
    chains.into_iter().map(prefix).collect()
}

impl<'s> TupleMap<'s> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Changeable copy of the tuple map.
    pub fn mutable_copy(&self) -> Self {
        let mut t = self.clone();
        t.frozen = false;
        t
    }

    fn assert_mutable(&self) {
        assert!(!self.frozen, "changing a frozen tuple map");
    }

    /// Permissions for a location, empty if nothing is known.
    pub fn get(&self, loc: Loc) -> FractionalPermissions<'s> {
        self.locs.get(&loc).cloned().unwrap_or_default()
    }

    pub fn put(&mut self, loc: Loc, perms: FractionalPermissions<'s>) {
        self.assert_mutable();
        self.locs.insert(loc, perms);
    }

    /// Locations with permissions, in ascending order.
    pub fn locations(&self) -> Vec<Loc> {
        let mut locs: Vec<_> = self.locs.keys().copied().collect();
        locs.sort();
        locs
    }

    pub fn facts(&self) -> &Facts {
        &self.facts
    }

    pub fn implications(&self) -> impl Iterator<Item = &Implication<'s>> {
        self.implications.iter()
    }

    pub fn releases(&self) -> impl Iterator<Item = &Release<'s>> {
        self.releases.iter()
    }

    /// Failed checks since the diagnostics were last cleared.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn clear_diagnostics(&mut self) {
        self.assert_mutable();
        self.diagnostics.clear()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Set the kind of checks that are performed from now on.
    pub fn set_phase(&mut self, phase: Phase) {
        self.assert_mutable();
        self.phase = phase
    }

    pub fn unpacked(&self, loc: Loc) -> Option<&UnpackInfo<'s>> {
        self.unpacked.get(&loc)
    }

    pub fn is_unpacked(&self, loc: Loc) -> bool {
        self.unpacked.contains_key(&loc)
    }

    /// Record that the path cannot be taken.
    pub fn mark_void(&mut self) {
        self.assert_mutable();
        self.void = true
    }

    pub fn is_void(&self) -> bool {
        self.void
    }

    /// Return true if the path cannot be taken.
    pub fn is_unsatisfiable(&self) -> bool {
        self.void || self.locs.values().any(|p| p.is_unsatisfiable())
    }

    /// Record a failed check; always returns false.
    fn fail(&mut self, location: Loc, required: impl Display, actual: impl Display) -> bool {
        let diag = Diagnostic {
            location,
            phase: self.phase,
            required: required.to_string(),
            actual: actual.to_string(),
        };
        debug!("{}", diag);
        self.diagnostics.push_back(diag);
        self.void = true;
        false
    }

    fn update(&mut self, loc: Loc, f: impl FnOnce(&mut FractionalPermissions<'s>) -> bool) -> bool {
        self.assert_mutable();
        let mut perms = self.get(loc);
        let ok = f(&mut perms);
        self.locs.insert(loc, perms);
        ok
    }

    /// Take permissions away from a location.
    pub fn split_off(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool {
        self.assert_mutable();
        let mut have = self.get(loc);
        let actual = have.to_string();
        let ok = have.split_off_all(perms).is_ok() && !have.is_unsatisfiable();
        self.locs.insert(loc, have);
        ok || self.fail(loc, perms, actual)
    }

    /// Check that permissions could be taken away from a location.
    pub fn check_available(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool {
        let mut have = self.get(loc);
        let ok = have.split_off_all(perms).is_ok() && !have.is_unsatisfiable();
        ok || self.fail(loc, perms, self.get(loc))
    }

    pub fn check_states(&mut self, loc: Loc, states: &[StateId], frame: bool) -> bool {
        let perms = self.get(loc);
        if perms.is_in_states(states, frame) {
            return true;
        }
        let required = match perms.space() {
            Some(space) => format!("in {}", space.display_claims(states)),
            None => format!("in {} states", states.len()),
        };
        self.fail(loc, required, perms)
    }

    pub fn check_null(&mut self, loc: Loc, null: bool) -> bool {
        let known = self.facts.is_null(loc);
        let show = |n: Option<bool>| match n {
            Some(true) => "null",
            Some(false) => "non-null",
            None => "unknown",
        };
        known == Some(null) || self.fail(loc, show(Some(null)), show(known))
    }

    pub fn check_bool(&mut self, loc: Loc, value: bool) -> bool {
        let known = self.facts.bool_value(loc);
        let show = |b: Option<bool>| b.map_or("unknown".to_string(), |b| b.to_string());
        known == Some(value) || self.fail(loc, value, show(known))
    }

    pub fn check_equal(&mut self, a: Loc, b: Loc, equal: bool) -> bool {
        let known = self.facts.are_equal(a, b);
        let show = |e: Option<bool>| match e {
            Some(true) => format!("{} == {}", a, b),
            Some(false) => format!("{} != {}", a, b),
            None => format!("{} and {} unrelated", a, b),
        };
        known == Some(equal) || self.fail(a, show(Some(equal)), show(known))
    }

    /// Check the consequences of an implication whose antecedent is known to hold.
    ///
    /// An implication whose antecedent is unknown cannot be checked and fails.
    pub fn check_implication(&mut self, imp: &Implication<'s>) -> bool {
        match self.facts.bool_value(imp.antecedent) {
            None => self.fail(imp.antecedent, imp.value, "unknown"),
            Some(v) if v == imp.value => {
                if imp.impossible {
                    return self.fail(imp.antecedent, "satisfiable consequence", "false");
                }
                let mut ok = true;
                for (loc, null) in &imp.nulls {
                    ok &= self.check_null(*loc, *null)
                }
                for (loc, value) in &imp.values {
                    ok &= self.check_bool(*loc, *value)
                }
                for (loc, s) in &imp.states {
                    ok &= self.check_states(*loc, &[*s], false)
                }
                for (loc, s) in &imp.frame_states {
                    ok &= self.check_states(*loc, &[*s], true)
                }
                for (loc, perms) in &imp.merges {
                    ok &= self.split_off(*loc, perms)
                }
                for (a, b, equal) in &imp.equalities {
                    ok &= self.check_equal(*a, *b, *equal)
                }
                for nested in &imp.nested {
                    ok &= self.check_implication(nested)
                }
                ok
            }
            Some(_) => true,
        }
    }

    pub fn merge_in(&mut self, loc: Loc, perms: FractionalPermissions<'s>) {
        self.update(loc, |have| {
            have.merge_in_all(perms);
            true
        });
    }

    pub fn learn_state(&mut self, loc: Loc, s: StateId) -> bool {
        self.update(loc, |perms| perms.learn_state(s))
    }

    pub fn learn_temporary_state_info(&mut self, loc: Loc, s: StateId) -> bool {
        self.update(loc, |perms| perms.learn_temporary_state_info(s))
    }

    pub fn replace_state_info(&mut self, loc: Loc, s: StateId) {
        self.update(loc, |perms| {
            perms.replace_state_info(s);
            true
        });
    }

    /// Forget states that other references may have changed, at all locations.
    pub fn forget_share_and_pure_states(&mut self) {
        for loc in self.locations() {
            self.update(loc, |perms| {
                perms.forget_share_and_pure_states();
                true
            });
        }
    }

    pub fn purify(&mut self, loc: Loc) {
        self.update(loc, |perms| {
            perms.purify();
            true
        });
    }

    /// Require that fields of the unpacked location may be assigned.
    pub fn make_modifiable(&mut self, loc: Loc) -> bool {
        let actual = self.get(loc);
        self.update(loc, |perms| perms.make_modifiable())
            || self.fail(loc, "modifying unpacked permission", actual)
    }

    /// Merge the consequences of implications decided by the facts.
    fn fire_implications(&mut self) {
        let (decided, pending) = self
            .implications
            .iter()
            .cloned()
            .partition::<Vector<_>, _>(|imp| self.facts.bool_value(imp.antecedent).is_some());
        self.implications = pending;
        for imp in decided {
            if self.facts.bool_value(imp.antecedent) != Some(imp.value) {
                continue;
            }
            trace!("implication on {} holds", imp.antecedent);
            if imp.impossible {
                self.void = true;
                continue;
            }
            for (loc, perms) in imp.merges {
                self.merge_in(loc, perms)
            }
            for (loc, s) in imp.states.into_iter().chain(imp.frame_states) {
                self.learn_state(loc, s);
            }
            for (loc, null) in imp.nulls {
                self.learn_null(loc, null);
            }
            for (a, b, equal) in imp.equalities {
                self.learn_equal(a, b, equal);
            }
            for nested in imp.nested {
                self.add_implication(nested)
            }
            for (loc, value) in imp.values {
                self.learn_bool(loc, value);
            }
        }
    }

    /// Learn the value of a boolean, firing implications depending on it.
    ///
    /// Return false and void the tuple map if this contradicts known facts.
    pub fn learn_bool(&mut self, loc: Loc, value: bool) -> bool {
        self.assert_mutable();
        if !self.facts.learn_bool(loc, value) {
            self.void = true;
            return false;
        }
        self.fire_implications();
        true
    }

    pub fn learn_null(&mut self, loc: Loc, null: bool) -> bool {
        self.assert_mutable();
        let ok = self.facts.learn_null(loc, null);
        self.void |= !ok;
        ok
    }

    pub fn learn_equal(&mut self, a: Loc, b: Loc, equal: bool) -> bool {
        self.assert_mutable();
        let ok = self.facts.learn_equal(a, b, equal);
        self.void |= !ok;
        ok
    }

    pub fn add_implication(&mut self, imp: Implication<'s>) {
        self.assert_mutable();
        if !self.implications.contains(&imp) {
            self.implications.push_back(imp)
        }
        self.fire_implications()
    }

    pub fn add_release(&mut self, release: Release<'s>) {
        self.assert_mutable();
        self.releases.push_back(release)
    }

    /// Give back the permissions captured by `capturing`.
    ///
    /// Permissions are only released if `capturing` is in the releasing state,
    /// unless `force` is set.
    pub fn release_captured(&mut self, capturing: Loc, force: bool) {
        self.assert_mutable();
        let perms = self.get(capturing);
        let (ready, held) = self.releases.iter().cloned().partition::<Vector<_>, _>(|r| {
            r.capturing == capturing && (force || r.state == StateId::ALIVE || perms.is_in_state(r.state, false))
        });
        self.releases = held;
        for r in ready {
            trace!("release {} from {}", r.captured, r.capturing);
            self.merge_in(r.captured, r.perms)
        }
    }

    /// Learn what happened to permissions that a callee only borrowed.
    pub fn learn_borrowed(&mut self, loc: Loc, post: &FractionalPermissions<'s>) {
        self.update(loc, |have| {
            for p in post.virtuals().iter().chain(post.frames()) {
                if !p.is_read_only() {
                    have.forget_states_under(p.root())
                }
                for s in core::iter::once(p.root()).chain(p.states().iter().copied()) {
                    have.learn_state(s);
                }
            }
            true
        });
    }

    /// Unpack `loc` to `root`, assuming the invariants of the states it may be in.
    ///
    /// Several tuple maps are returned if the object may be in one of several
    /// states with different invariants.
    ///
    /// # Panics
    ///
    /// If the location is already unpacked.
    pub fn unpack(&self, loc: Loc, root: StateId, invariants: &'s Invariants<'s>, fields: &Args) -> Vec<Self> {
        let mut base = self.mutable_copy();
        let mut perms = base.get(loc);
        let actual = perms.to_string();
        let ok = perms.unpack(root);
        let u = perms.unpacked().cloned();
        base.locs.insert(loc, perms);
        let u = match u {
            Some(u) if ok => u,
            _ => {
                let required = format!("frame permission for {}", invariants.space().name(root));
                base.fail(loc, required, actual);
                return vec![base];
            }
        };
        let info = UnpackInfo {
            invariants,
            fields: fields.clone(),
        };
        base.unpacked.insert(loc, info);

        let purify = u.perm.is_read_only();
        let above = invariants.states_between(u.perm.root(), u.root);
        let space = invariants.space();
        let chains = decompositions(space, root, &u.perm, invariants, false);
        chains
            .into_iter()
            .map(|chain| {
                let mut t = base.clone();
                for s in &chain {
                    t.learn_state(loc, *s);
                }
                for s in above.iter().chain(&chain) {
                    if let Some(inv) = invariants.get(*s) {
                        inv.merger.merge_in_predicate(fields, &mut t, purify)
                    }
                }
                t
            })
            .collect()
    }

    fn try_pack(&self, loc: Loc, info: &UnpackInfo<'s>, chain: &[StateId], purify: bool) -> Option<Self> {
        let mut t = self.mutable_copy();
        let phase = t.phase;
        t.phase = Phase::Invariant;
        let mut ok = true;
        for s in chain {
            if let Some(inv) = info.invariants.get(*s) {
                if inv.checker.is_impossible() {
                    debug!("no object can be in {}", info.invariants.space().name(*s));
                    return None;
                }
                ok &= inv.checker.split_off_predicate(&info.fields, &mut t, purify)
            }
        }
        t.phase = phase;
        if !ok || t.void {
            return Some(t);
        }
        t.update(loc, |perms| {
            perms.pack(chain);
            true
        });
        t.finish_pack(loc, &info.fields);
        Some(t)
    }

    fn finish_pack(&mut self, loc: Loc, fields: &Args) {
        self.unpacked.remove(&loc);
        for field in fields.values() {
            self.facts.forget(*field);
            let empty = self.locs.get(field).map_or(false, |p| p.is_empty() && !p.is_unsatisfiable());
            if empty {
                self.locs.remove(field);
            }
        }
        let is_field = |l: &Loc| fields.values().any(|f| f == l);
        let imps = self.implications.iter().filter(|imp| !is_field(&imp.antecedent));
        self.implications = imps.cloned().collect();
    }

    /// Pack `loc`, checking the invariants of the states it is packed to.
    ///
    /// If `states` is given, the object is packed to these states;
    /// otherwise, every combination of states whose invariants hold is returned.
    /// If no state can be packed to, a single void tuple map is returned.
    ///
    /// # Panics
    ///
    /// If the location is not unpacked.
    pub fn pack(&self, loc: Loc, states: Option<&[StateId]>) -> Vec<Self> {
        let info = match self.unpacked.get(&loc) {
            Some(info) => info.clone(),
            None => panic!("location {} is not unpacked", loc),
        };
        let perms = self.get(loc);
        let u = match perms.unpacked() {
            Some(u) => u.clone(),
            None => panic!("location {} has no unpacked permission", loc),
        };
        let purify = u.perm.is_read_only();

        let mut packed = Vec::new();
        let mut failed = None;
        for chain in candidates(info.invariants, &u, states) {
            match self.try_pack(loc, &info, &chain, purify) {
                Some(t) if !t.void => packed.push(t),
                Some(t) => {
                    let space = info.invariants.space();
                    debug!("cannot pack {} to {}", loc, space.display_claims(&chain));
                    failed.get_or_insert(t);
                }
                None => (),
            }
        }
        if !packed.is_empty() {
            return packed;
        }

        let mut t = match failed {
            Some(t) => t,
            None => {
                let mut t = self.mutable_copy();
                t.fail(loc, "packable state", "none");
                t
            }
        };
        t.update(loc, |perms| {
            perms.invalid_pack();
            false
        });
        t.unpacked.remove(&loc);
        vec![t]
    }

    /// States that `other` claims for `loc` below `root`.
    fn frame_claims(&self, loc: Loc, root: StateId) -> Option<Vec<StateId>> {
        let perms = self.get(loc);
        let space = perms.space()?;
        let frames = perms.frames().iter().chain(perms.unpacked().map(|u| &u.perm));
        let mut states = Vec::new();
        for p in frames {
            for s in p.states() {
                if *s != root && space.refines(*s, root) {
                    space.learn(&mut states, *s);
                }
            }
        }
        (!states.is_empty()).then_some(states)
    }

    /// Location unpacked differently on both sides, if any.
    fn unpack_mismatch(&self, other: &Self) -> Option<Loc> {
        let keys = self.unpacked.keys().chain(other.unpacked.keys());
        keys.copied()
            .find(|l| self.get(*l).unpacked_root() != other.get(*l).unpacked_root())
    }

    /// Pack `loc` in `self` towards what `other` knows about it.
    fn pack_towards(&self, loc: Loc, other: &Self) -> Vec<Self> {
        let root = self.get(loc).unpacked_root();
        let targets = root.and_then(|root| other.frame_claims(loc, root));
        if let Some(targets) = targets {
            let packed = self.pack(loc, Some(&targets));
            if packed.iter().any(|t| !t.void) {
                return packed;
            }
        }
        self.pack(loc, None)
    }

    /// Knowledge that holds on both paths.
    ///
    /// Several tuple maps are returned if the two paths
    /// know locations to be in mutually exclusive states.
    pub fn join(&self, other: &Self) -> Vec<Self> {
        if self.is_unsatisfiable() {
            return vec![other.mutable_copy()];
        } else if other.is_unsatisfiable() {
            return vec![self.mutable_copy()];
        }

        if let Some(loc) = self.unpack_mismatch(other) {
            return if self.is_unpacked(loc) {
                let packed = self.pack_towards(loc, other);
                packed.iter().flat_map(|t| t.join(other)).collect()
            } else {
                let packed = other.pack_towards(loc, self);
                packed.iter().flat_map(|t| self.join(t)).collect()
            };
        }

        let exclusive = self.locs.iter().any(|(loc, mine)| {
            let theirs = match other.locs.get(loc) {
                Some(theirs) => theirs,
                None => return false,
            };
            match (mine.space(), theirs.space()) {
                (Some(a), Some(b)) if a == b => a.conflict(&claims(mine), &claims(theirs)),
                _ => false,
            }
        });
        if exclusive {
            return vec![self.mutable_copy(), other.mutable_copy()];
        }

        let mut t = TupleMap {
            phase: self.phase,
            facts: self.facts.join(&other.facts),
            ..TupleMap::default()
        };
        for (loc, mine) in self.locs.iter() {
            if let Some(theirs) = other.locs.get(loc) {
                t.locs.insert(*loc, mine.join(theirs));
            }
        }
        t.unpacked = self.unpacked.clone();
        t.implications = common(&self.implications, &other.implications);
        t.releases = common(&self.releases, &other.releases);
        t.diagnostics = self.diagnostics.clone();
        for d in other.diagnostics.iter() {
            if !t.diagnostics.contains(d) {
                t.diagnostics.push_back(d.clone())
            }
        }
        vec![t]
    }

    /// Return true if this tuple map knows everything that `other` knows.
    ///
    /// Unsatisfiable tuple maps know everything.
    pub fn at_least_as_precise(&self, other: &Self) -> bool {
        if self.is_unsatisfiable() {
            return true;
        } else if other.is_unsatisfiable() {
            return false;
        }
        self.unpacked.keys().eq(other.unpacked.keys())
            && other.locs.iter().all(|(loc, p)| self.get(*loc).at_least_as_precise(p))
            && self.facts.at_least_as_precise(&other.facts)
            && other.implications.iter().all(|i| self.implications.contains(i))
    }
}

impl<'s> PredicateChecker<'s> for TupleMap<'s> {
    fn split_off(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool {
        TupleMap::split_off(self, loc, perms)
    }

    fn check_available(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool {
        TupleMap::check_available(self, loc, perms)
    }

    fn check_states(&mut self, loc: Loc, states: &[StateId], frame: bool) -> bool {
        TupleMap::check_states(self, loc, states, frame)
    }

    fn check_null(&mut self, loc: Loc, null: bool) -> bool {
        TupleMap::check_null(self, loc, null)
    }

    fn check_bool(&mut self, loc: Loc, value: bool) -> bool {
        TupleMap::check_bool(self, loc, value)
    }

    fn check_equal(&mut self, a: Loc, b: Loc, equal: bool) -> bool {
        TupleMap::check_equal(self, a, b, equal)
    }

    fn check_implication(&mut self, imp: &Implication<'s>) -> bool {
        TupleMap::check_implication(self, imp)
    }

    fn fail_impossible(&mut self, loc: Loc) -> bool {
        self.fail(loc, "satisfiable predicate", "false")
    }
}

impl<'s> PredicateMerger<'s> for TupleMap<'s> {
    fn merge_in(&mut self, loc: Loc, perms: FractionalPermissions<'s>) {
        TupleMap::merge_in(self, loc, perms)
    }

    fn learn_borrowed(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) {
        TupleMap::learn_borrowed(self, loc, perms)
    }

    fn learn_states(&mut self, loc: Loc, states: &[StateId], _frame: bool) {
        for s in states {
            self.learn_state(loc, *s);
        }
    }

    fn learn_null(&mut self, loc: Loc, null: bool) {
        TupleMap::learn_null(self, loc, null);
    }

    fn learn_bool(&mut self, loc: Loc, value: bool) {
        TupleMap::learn_bool(self, loc, value);
    }

    fn learn_equal(&mut self, a: Loc, b: Loc, equal: bool) {
        TupleMap::learn_equal(self, a, b, equal);
    }

    fn add_implication(&mut self, imp: Implication<'s>) {
        TupleMap::add_implication(self, imp)
    }

    fn add_release(&mut self, release: Release<'s>) {
        TupleMap::add_release(self, release)
    }

    fn release(&mut self, capturing: Loc) {
        self.release_captured(capturing, false)
    }

    fn mark_impossible(&mut self) {
        self.mark_void()
    }
}

impl<'s> Display for TupleMap<'s> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.void {
            return write!(f, "void");
        }
        write!(f, "{{")?;
        for (i, loc) in self.locations().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", loc, self.get(loc))?;
        }
        write!(f, "}}")?;
        if !self.facts.is_empty() {
            write!(f, " where {}", self.facts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::perm::{FractionCreation, Permission};
    use crate::sig::Spaces;
    use crate::state::tests::file;
    use crate::PermissionKind::{self, *};
    use crate::ParseCache;
    use alloc::string::String;

    pub const THIS: Loc = Loc(0);
    pub const HANDLE: Loc = Loc(1);

    fn perms<'s>(space: &'s StateSpace, kind: PermissionKind, states: &[&str], frame: bool) -> FractionalPermissions<'s> {
        let states = states.iter().map(|s| space.lookup(s).unwrap());
        let p = Permission::new(space, StateId::ALIVE, kind)
            .in_states(states)
            .instantiate("x", FractionCreation::Fresh);
        if frame {
            FractionalPermissions::from_permissions(Vec::new(), vec![p])
        } else {
            FractionalPermissions::from_permissions(vec![p], Vec::new())
        }
    }

    /// File invariants: an open file holds its handle, a closed one does not.
    pub fn invariants<'s>(file: &'s StateSpace, stream: &'s StateSpace) -> Invariants<'s> {
        let fields: Spaces = [(String::from("handle"), stream)].into();
        let mut invs = Invariants::new(file);
        let mut cache = ParseCache::default();
        invs.declare("Open", "unique(handle) * handle != null", &fields, &mut cache).unwrap();
        invs.declare("Closed", "handle == null", &fields, &mut cache).unwrap();
        invs
    }

    pub fn fields() -> Args {
        [(String::from("handle"), HANDLE)].into()
    }

    #[test]
    fn split_fails() {
        let space = file();
        let mut t = TupleMap::new();
        t.put(THIS, perms(&space, Full, &[], false));
        assert!(t.split_off(THIS, &perms(&space, Pure, &[], false)));
        assert!(!t.is_unsatisfiable());
        assert!(!t.split_off(THIS, &perms(&space, Share, &[], false)));
        assert!(t.is_unsatisfiable());
        let diag: Vec<_> = t.diagnostics().collect();
        assert_eq!(diag.len(), 1);
        assert_eq!(diag[0].location, THIS);
        assert_eq!(diag[0].phase, Phase::Precondition);
    }

    #[test]
    fn available() {
        let space = file();
        let mut t = TupleMap::new();
        t.put(THIS, perms(&space, Immutable, &["Open"], false));
        let before = t.get(THIS);
        assert!(t.check_available(THIS, &perms(&space, Immutable, &[], false)));
        assert_eq!(t.get(THIS), before);
        assert!(t.check_states(THIS, &[space.lookup("Open").unwrap()], false));
        assert!(!t.check_states(THIS, &[space.lookup("Reading").unwrap()], false));
        assert!(t.is_void());
    }

    #[test]
    fn implications() {
        let space = file();
        let result = Loc(5);
        let mut t = TupleMap::new();
        t.put(THIS, perms(&space, Pure, &[], false));
        let mut imp = Implication::new(result, true);
        imp.merges.push((THIS, perms(&space, Full, &[], false)));
        imp.states.push((THIS, space.lookup("Open").unwrap()));
        t.add_implication(imp.clone());
        assert_eq!(t.implications().count(), 1);

        let mut no = t.clone();
        assert!(!no.check_implication(&imp));
        assert!(no.learn_bool(result, false));
        assert_eq!(no.implications().count(), 0);
        assert!(!no.get(THIS).is_in_state(space.lookup("Open").unwrap(), false));

        assert!(t.learn_bool(result, true));
        assert!(t.get(THIS).is_in_state(space.lookup("Open").unwrap(), false));
        assert!(t.split_off(THIS, &perms(&space, Full, &[], false)));
        assert!(!t.learn_bool(result, false));
        assert!(t.is_unsatisfiable());
    }

    #[test]
    fn implication_facts() {
        let (b, x, y) = (Loc(5), Loc(6), Loc(7));
        let mut imp = Implication::new(b, false);
        imp.values.push((x, true));
        imp.equalities.push((x, y, false));
        let mut t = TupleMap::new();
        t.add_implication(imp.clone());
        assert_eq!(t.facts().bool_value(x), None);
        assert!(t.learn_bool(b, false));
        assert_eq!(t.facts().bool_value(x), Some(true));
        assert_eq!(t.facts().are_equal(x, y), Some(false));
        assert!(t.check_implication(&imp));

        let mut u = TupleMap::new();
        u.learn_bool(b, false);
        u.learn_bool(x, false);
        assert!(!u.check_implication(&imp));
        assert!(u.is_void());
        assert_eq!(u.diagnostics().count(), 2);
    }

    #[test]
    fn releases() {
        let space = file();
        let (captured, capturing) = (Loc(3), Loc(4));
        let mut t = TupleMap::new();
        t.put(capturing, perms(&space, Unique, &["Open"], false));
        t.add_release(Release {
            captured,
            capturing,
            state: space.lookup("Closed").unwrap(),
            perms: perms(&space, Full, &[], false),
        });
        t.release_captured(capturing, false);
        assert_eq!(t.releases().count(), 1);
        assert!(t.get(captured).is_empty());

        t.replace_state_info(capturing, space.lookup("Closed").unwrap());
        t.release_captured(capturing, false);
        assert_eq!(t.releases().count(), 0);
        assert_eq!(t.get(captured).virtuals()[0].kind(), Some(Full));
    }

    #[test]
    fn unpack_pack() {
        let (space, stream) = (file(), StateSpace::trivial("Stream"));
        let invs = invariants(&space, &stream);
        let s = |n| space.lookup(n).unwrap();
        let mut t = TupleMap::new();
        t.put(THIS, perms(&space, Full, &["Open"], true));

        let unpacked = t.unpack(THIS, StateId::ALIVE, &invs, &fields());
        assert_eq!(unpacked.len(), 1);
        let u = &unpacked[0];
        assert!(u.is_unpacked(THIS));
        assert_eq!(u.facts().is_null(HANDLE), Some(false));
        assert_eq!(u.get(HANDLE).virtuals()[0].kind(), Some(Unique));

        let packed = u.pack(THIS, None);
        assert_eq!(packed.len(), 1);
        let p = &packed[0];
        assert!(!p.is_unpacked(THIS));
        assert!(p.get(THIS).is_in_state(s("Open"), true));
        assert!(p.at_least_as_precise(&t) && t.at_least_as_precise(p));

        // giving the handle away prevents packing to Open
        let mut u = u.clone();
        assert!(u.split_off(HANDLE, &perms(&stream, Full, &[], false)));
        let packed = u.pack(THIS, Some(&[s("Open")]));
        assert_eq!(packed.len(), 1);
        assert!(packed[0].is_unsatisfiable());
        assert_eq!(packed[0].diagnostics().last().map(|d| d.phase), Some(Phase::Invariant));
    }

    #[test]
    fn unpack_unknown_state() {
        let (space, stream) = (file(), StateSpace::trivial("Stream"));
        let invs = invariants(&space, &stream);
        let mut t = TupleMap::new();
        t.put(THIS, perms(&space, Full, &[], true));
        let unpacked = t.unpack(THIS, StateId::ALIVE, &invs, &fields());
        assert_eq!(unpacked.len(), 2);
        assert!(unpacked.iter().all(|u| !u.is_unsatisfiable()));

        let (open, closed) = (space.lookup("Open").unwrap(), space.lookup("Closed").unwrap());
        assert!(unpacked[0].get(THIS).is_in_state(open, true));
        assert!(unpacked[1].get(THIS).is_in_state(closed, true));

        // the branch is known while unpacked
        let mut u = unpacked[0].clone();
        assert!(u.check_states(THIS, &[open], true));
        assert!(!u.is_void());
        assert!(!u.check_states(THIS, &[closed], true));
        assert!(u.is_void());

        // without its handle, an open file can be packed to no state
        let mut u = unpacked[0].clone();
        assert!(u.split_off(HANDLE, &perms(&stream, Unique, &[], false)));
        let packed = u.pack(THIS, None);
        assert_eq!(packed.len(), 1);
        assert!(packed[0].is_unsatisfiable());
        assert!(!packed[0].is_unpacked(THIS));
    }

    #[test]
    #[should_panic]
    fn pack_packed() {
        let space = file();
        let mut t = TupleMap::new();
        t.put(THIS, perms(&space, Full, &[], true));
        t.pack(THIS, None);
    }

    #[test]
    fn join_exclusive() {
        let space = file();
        let mut a = TupleMap::new();
        a.put(THIS, perms(&space, Full, &["Open"], true));
        let mut b = TupleMap::new();
        b.put(THIS, perms(&space, Full, &["Closed"], true));
        assert_eq!(a.join(&b).len(), 2);

        let mut c = TupleMap::new();
        c.put(THIS, perms(&space, Immutable, &["Open"], true));
        let j = a.join(&c);
        assert_eq!(j.len(), 1);
        assert!(a.at_least_as_precise(&j[0]) && c.at_least_as_precise(&j[0]));
        assert!(j[0].get(THIS).is_in_state(space.lookup("Open").unwrap(), true));
    }

    #[test]
    fn join_unpacked() {
        let (space, stream) = (file(), StateSpace::trivial("Stream"));
        let invs = invariants(&space, &stream);
        let mut t = TupleMap::new();
        t.put(THIS, perms(&space, Full, &["Open"], true));
        let u = t.unpack(THIS, StateId::ALIVE, &invs, &fields()).remove(0);
        let j = u.join(&t);
        assert_eq!(j.len(), 1);
        assert!(!j[0].is_unpacked(THIS));
        assert!(j[0].get(THIS).is_in_state(space.lookup("Open").unwrap(), true));
    }
}
