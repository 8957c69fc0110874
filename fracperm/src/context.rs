//! Disjunctive contexts, the abstract values at program points.
//!
//! A context is either a single tuple map ([`Context::Tensor`]),
//! a choice among alternatives of which one holds ([`Context::Choice`]), or
//! a collection of contexts that all hold ([`Context::All`]).
//! The empty choice is the *impossible* context, reached by paths that
//! cannot satisfy their contracts; the empty collection is the *vacuous*
//! context, which knows everything and is the neutral element of [`Context::join`].
//!
//! Contexts are persistent values: all operations return new contexts.
//! Tuple maps of a frozen context are never changed.

use crate::call::Call;
use crate::diag::{Diagnostic, Phase};
use crate::invariant::Invariants;
use crate::loc::{Args, Loc};
use crate::sig::{Postcondition, Precondition};
use crate::state::StateId;
use crate::tuple::TupleMap;
use alloc::{vec, vec::Vec};
use core::fmt::{self, Display};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Context<'s> {
    Tensor(TupleMap<'s>),
    Choice(Vec<Context<'s>>),
    All(Vec<Context<'s>>),
}

use Context::*;

/// Structural traversal of a context.
pub trait ContextVisitor<'s> {
    type Output;
    fn tensor(&mut self, tuple: &TupleMap<'s>) -> Self::Output;
    fn choice(&mut self, elems: &[Context<'s>]) -> Self::Output;
    fn all(&mut self, elems: &[Context<'s>]) -> Self::Output;
}

/// Collect the diagnostics of failed paths.
///
/// A choice reports its failures only if no alternative succeeded.
struct Diagnostics;

impl<'s> ContextVisitor<'s> for Diagnostics {
    type Output = Vec<Diagnostic>;

    fn tensor(&mut self, tuple: &TupleMap<'s>) -> Self::Output {
        tuple.diagnostics().cloned().collect()
    }

    fn choice(&mut self, elems: &[Context<'s>]) -> Self::Output {
        if elems.iter().all(|e| e.is_impossible()) {
            self.all(elems)
        } else {
            Vec::new()
        }
    }

    fn all(&mut self, elems: &[Context<'s>]) -> Self::Output {
        let mut diags = Vec::new();
        for d in elems.iter().flat_map(|e| e.dispatch(self)) {
            if !diags.contains(&d) {
                diags.push(d)
            }
        }
        diags
    }
}

/// Keep only elements that are not dominated by another element.
///
/// Of two elements dominating each other, the first one is kept.
fn prune<'s>(elems: Vec<Context<'s>>, dominates: impl Fn(&Context<'s>, &Context<'s>) -> bool) -> Vec<Context<'s>> {
    let mut kept: Vec<Context<'s>> = Vec::new();
    for e in elems {
        if kept.iter().any(|k| dominates(k, &e)) {
            continue;
        }
        kept.retain(|k| !dominates(&e, k));
        kept.push(e)
    }
    kept
}

/// Flatten elements that are of the same kind as their parent.
fn flatten<'s>(elems: &[Context<'s>], choice: bool) -> Vec<Context<'s>> {
    let mut flat = Vec::new();
    for e in elems {
        match e.compact(false) {
            Choice(inner) if choice => flat.extend(inner),
            All(inner) if !choice => flat.extend(inner),
            e => flat.push(e),
        }
    }
    flat
}

/// Alternatives that are not impossible.
fn live<'a, 's>(elems: &'a [Context<'s>]) -> impl Iterator<Item = &'a Context<'s>> {
    elems.iter().filter(|e| !e.is_impossible())
}

/// Prepare a tuple map for an operation that reports diagnostics.
fn prepare<'s>(tuple: &TupleMap<'s>, phase: Phase) -> TupleMap<'s> {
    let mut tuple = tuple.mutable_copy();
    tuple.clear_diagnostics();
    tuple.set_phase(phase);
    tuple
}

fn reset_phase(mut tuples: Vec<TupleMap>) -> Vec<TupleMap> {
    tuples.iter_mut().for_each(|t| t.set_phase(Phase::default()));
    tuples
}

impl<'s> Context<'s> {
    /// The context of paths that cannot be taken.
    pub fn impossible() -> Self {
        Choice(Vec::new())
    }

    /// The context that knows everything.
    pub fn vacuous() -> Self {
        All(Vec::new())
    }

    /// Context at the beginning of a method body.
    pub fn initial(pre: &Precondition<'s>, args: &Args) -> Self {
        let mut tuple = TupleMap::new();
        pre.merge_in_predicate(args, &mut tuple);
        Tensor(tuple)
    }

    pub fn dispatch<V: ContextVisitor<'s>>(&self, visitor: &mut V) -> V::Output {
        match self {
            Tensor(t) => visitor.tensor(t),
            Choice(elems) => visitor.choice(elems),
            All(elems) => visitor.all(elems),
        }
    }

    /// Return true if no path can reach this context.
    pub fn is_impossible(&self) -> bool {
        match self {
            Tensor(t) => t.is_unsatisfiable(),
            Choice(elems) => elems.iter().all(|e| e.is_impossible()),
            All(elems) => elems.iter().any(|e| e.is_impossible()),
        }
    }

    pub fn is_vacuous(&self) -> bool {
        matches!(self, All(elems) if elems.is_empty())
    }

    /// Make all tuple maps of the context unchangeable.
    pub fn freeze(self) -> Self {
        match self {
            Tensor(t) => Tensor(t.freeze()),
            Choice(elems) => Choice(elems.into_iter().map(|e| e.freeze()).collect()),
            All(elems) => All(elems.into_iter().map(|e| e.freeze()).collect()),
        }
    }

    pub fn is_frozen(&self) -> bool {
        match self {
            Tensor(t) => t.is_frozen(),
            Choice(elems) | All(elems) => elems.iter().all(|e| e.is_frozen()),
        }
    }

    pub fn mutable_copy(&self) -> Self {
        self.map_tuples(&mut |t| vec![t.mutable_copy()])
    }

    /// Replace every tuple map by the choice of the tuple maps that `f` yields.
    fn map_tuples<F>(&self, f: &mut F) -> Self
    where
        F: FnMut(&TupleMap<'s>) -> Vec<TupleMap<'s>>,
    {
        match self {
            Tensor(t) => {
                let mut tuples = f(t);
                match tuples.pop() {
                    Some(t) if tuples.is_empty() => Tensor(t),
                    last => Choice(tuples.into_iter().chain(last).map(Tensor).collect()),
                }
            }
            Choice(elems) => Choice(elems.iter().map(|e| e.map_tuples(f)).collect()),
            All(elems) => All(elems.iter().map(|e| e.map_tuples(f)).collect()),
        }
    }

    /// Return true if this context knows at least as much as `other`.
    ///
    /// The impossible and the vacuous context know everything.
    pub fn at_least_as_precise(&self, other: &Self) -> bool {
        if self.is_impossible() || self.is_vacuous() {
            return true;
        } else if other.is_impossible() {
            return false;
        }
        match (self, other) {
            (_, Choice(others)) => live(others).all(|o| self.at_least_as_precise(o)),
            (All(elems), _) => elems.iter().all(|e| e.at_least_as_precise(other)),
            (_, All(others)) => others.iter().any(|o| self.at_least_as_precise(o)),
            (Choice(elems), Tensor(_)) => live(elems).any(|e| e.at_least_as_precise(other)),
            (Tensor(a), Tensor(b)) => a.at_least_as_precise(b),
        }
    }

    /// Simplify the context.
    ///
    /// Nested contexts of the same kind are flattened and
    /// contexts with a single element are replaced by that element.
    /// A choice drops impossible alternatives and keeps
    /// the more precise of two comparable alternatives, whereas
    /// a collection is impossible if any of its elements is and keeps
    /// the less precise of two comparable elements.
    pub fn compact(&self, freeze: bool) -> Self {
        let compacted = match self {
            Tensor(t) => Tensor(t.clone()),
            Choice(elems) => {
                let mut elems = flatten(elems, true);
                elems.retain(|e| !e.is_impossible());
                let mut elems = prune(elems, |a, b| a.at_least_as_precise(b));
                match elems.pop() {
                    Some(e) if elems.is_empty() => e,
                    last => Choice(elems.into_iter().chain(last).collect()),
                }
            }
            All(elems) => {
                let elems = flatten(elems, false);
                if elems.iter().any(|e| e.is_impossible()) {
                    Self::impossible()
                } else {
                    let elems = elems.into_iter().filter(|e| !e.is_vacuous()).collect();
                    let mut elems = prune(elems, |a, b| b.at_least_as_precise(a));
                    match elems.pop() {
                        Some(e) if elems.is_empty() => e,
                        last => All(elems.into_iter().chain(last).collect()),
                    }
                }
            }
        };
        if freeze {
            compacted.freeze()
        } else {
            compacted
        }
    }

    /// Context that holds after either of the two contexts.
    ///
    /// ~~~
    /// # use fracperm::Context;
    /// let i = Context::impossible();
    /// let v = Context::vacuous();
    /// assert_eq!(i.join(&v), v);
    /// assert!(i.join(&i).is_impossible());
    /// ~~~
    pub fn join(&self, other: &Self) -> Self {
        if self.is_impossible() || self.is_vacuous() {
            return other.mutable_copy();
        } else if other.is_impossible() || other.is_vacuous() {
            return self.mutable_copy();
        }
        let joined = match (self, other) {
            (Choice(elems), _) => Choice(elems.iter().map(|e| e.join(other)).collect()),
            (All(elems), _) => All(elems.iter().map(|e| e.join(other)).collect()),
            (_, Choice(elems)) => Choice(elems.iter().map(|e| self.join(e)).collect()),
            (_, All(elems)) => All(elems.iter().map(|e| self.join(e)).collect()),
            (Tensor(a), Tensor(b)) => {
                let mut tuples = a.join(b);
                match tuples.pop() {
                    Some(t) if tuples.is_empty() => Tensor(t),
                    last => Choice(tuples.into_iter().chain(last).map(Tensor).collect()),
                }
            }
        };
        joined.compact(false)
    }

    /// Diagnostics of the paths that failed.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.dispatch(&mut Diagnostics)
    }

    /// Apply `f` to every tuple map prepared for `phase`,
    /// returning the compacted result and the diagnostics of failed checks.
    fn handle<F>(&self, phase: Phase, mut f: F) -> (Self, Vec<Diagnostic>)
    where
        F: FnMut(TupleMap<'s>) -> Vec<TupleMap<'s>>,
    {
        let result = self.map_tuples(&mut |t| reset_phase(f(prepare(t, phase))));
        let diags = result.diagnostics();
        (result.compact(false), diags)
    }

    /// Check a call and add its effects.
    pub fn handle_call(&self, call: &Call<'_, 's>) -> (Self, Vec<Diagnostic>) {
        self.handle(Phase::Precondition, |t| call.apply(&t))
    }

    /// Make the field `field` of `loc` accessible, unpacking `loc` if necessary.
    ///
    /// Writing to the field additionally requires a modifying permission.
    pub fn handle_field_access(
        &self,
        loc: Loc,
        field: &str,
        assign: bool,
        invariants: &'s Invariants<'s>,
        fields: &Args,
    ) -> (Self, Vec<Diagnostic>) {
        let space = invariants.space();
        let root = match space.field_root(field) {
            Some(root) => root,
            None => {
                warn!("{} has no field {}", space, field);
                return (self.mutable_copy(), Vec::new());
            }
        };
        self.handle(Phase::FieldAccess, |t| {
            let mut tuples = match t.get(loc).unpacked_root() {
                Some(r) if space.refines(root, r) => vec![t],
                Some(r) => {
                    let common = space.common_ancestor(r, root);
                    let packed = t.pack(loc, None).into_iter();
                    let unpack = |p: TupleMap<'s>| {
                        if p.is_void() {
                            vec![p]
                        } else {
                            p.unpack(loc, common, invariants, fields)
                        }
                    };
                    packed.flat_map(unpack).collect()
                }
                None => t.unpack(loc, root, invariants, fields),
            };
            if assign {
                for t in tuples.iter_mut().filter(|t| !t.is_void()) {
                    t.make_modifiable(loc);
                }
            }
            tuples
        })
    }

    /// Pack `loc` before returning, to `states` if given.
    pub fn pack_for_return(&self, loc: Loc, states: &[StateId]) -> (Self, Vec<Diagnostic>) {
        let target = (!states.is_empty()).then_some(states);
        self.handle(Phase::Postcondition, |t| {
            if t.is_unpacked(loc) {
                t.pack(loc, target)
            } else {
                vec![t]
            }
        })
    }

    /// Check the postcondition at the end of a method body.
    pub fn check_postcondition(&self, post: &Postcondition<'s>, args: &Args) -> (Self, Vec<Diagnostic>) {
        self.handle(Phase::Postcondition, |mut t| {
            if !post.split_off_predicate(args, &mut t) && !t.is_void() {
                t.mark_void()
            }
            vec![t]
        })
    }

    /// Unpack `loc` to `root` in every tuple map.
    pub fn unpack(&self, loc: Loc, root: StateId, invariants: &'s Invariants<'s>, fields: &Args) -> Self {
        let (c, _) = self.handle(Phase::FieldAccess, |t| t.unpack(loc, root, invariants, fields));
        c
    }

    /// Pack `loc` in every tuple map where it is unpacked.
    pub fn pack(&self, loc: Loc, states: Option<&[StateId]>) -> Self {
        let (c, _) = self.handle(Phase::Invariant, |t| {
            if t.is_unpacked(loc) {
                t.pack(loc, states)
            } else {
                vec![t]
            }
        });
        c
    }

    /// Learn the value of a boolean, such as the outcome of a branch condition.
    pub fn learn_bool(&self, loc: Loc, value: bool) -> Self {
        let learn = |mut t: TupleMap<'s>| {
            t.learn_bool(loc, value);
            vec![t]
        };
        self.handle(Phase::default(), learn).0
    }
}

impl<'s> Display for Context<'s> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (name, elems) = match self {
            Tensor(t) => return t.fmt(f),
            Choice(elems) => ("choice", elems),
            All(elems) => ("all", elems),
        };
        write!(f, "{}[", name)?;
        for (i, e) in elems.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::{FractionCreation, Permission};
    use crate::perms::FractionalPermissions;
    use crate::sig::{parse_signature, SignatureOptions, Spaces};
    use alloc::string::String;
    use crate::state::tests::file;
    use crate::state::StateSpace;
    use crate::tuple::tests::{fields, invariants, HANDLE, THIS};
    use crate::PermissionKind::{self, *};

    fn packed<'s>(space: &'s StateSpace, kind: PermissionKind, state: &str) -> Context<'s> {
        let p = Permission::new(space, StateId::ALIVE, kind)
            .in_states(space.lookup(state))
            .instantiate("this", FractionCreation::Named);
        let mut t = TupleMap::new();
        t.put(THIS, FractionalPermissions::from_permissions(Vec::new(), vec![p]));
        Tensor(t)
    }

    fn equivalent<'a>(a: &Context<'a>, b: &Context<'a>) -> bool {
        a.at_least_as_precise(b) && b.at_least_as_precise(a)
    }

    #[test]
    fn join_siblings() {
        let space = file();
        let open = packed(&space, Full, "Open");
        let closed = packed(&space, Full, "Closed");
        let j = open.join(&closed);
        match &j {
            Choice(elems) => assert_eq!(elems.len(), 2),
            _ => panic!("expected choice, got {}", j),
        }
        assert!(j.at_least_as_precise(&open) || open.at_least_as_precise(&j));
        assert!(equivalent(&j, &closed.join(&open)));
    }

    #[test]
    fn join_laws() {
        let space = file();
        let a = packed(&space, Full, "Open");
        let b = packed(&space, Immutable, "Open");
        let c = Choice(vec![packed(&space, Pure, "Reading"), packed(&space, Immutable, "Writing")]);
        assert!(equivalent(&a.join(&b), &b.join(&a)));
        assert!(equivalent(&a.join(&c), &c.join(&a)));
        assert!(equivalent(&a.join(&b).join(&c), &a.join(&b.join(&c))));
        assert!(a.at_least_as_precise(&a.join(&b)));
        assert_eq!(a.join(&Context::impossible()), a);
        assert_eq!(Context::vacuous().join(&a), a);
    }

    #[test]
    fn upper_bound() {
        let space = file();
        let a = packed(&space, Full, "Open");
        let b = packed(&space, Immutable, "Open");
        let all = All(vec![a.clone(), packed(&space, Pure, "Reading")]);
        let (imp, vac) = (Context::impossible(), Context::vacuous());
        let values = [&a, &b, &all, &imp, &vac];
        for x in values {
            assert!(x.at_least_as_precise(x), "{} is not reflexive", x);
            for y in values {
                let j = x.join(y);
                assert!(x.at_least_as_precise(&j), "{} above {}", j, x);
                assert!(y.at_least_as_precise(&j), "{} above {}", j, y);
            }
        }

        assert!(imp.at_least_as_precise(&a) && !a.at_least_as_precise(&imp));
        assert!(equivalent(&imp, &vac));
        let mut void = TupleMap::new();
        void.mark_void();
        assert!(Tensor(void.clone()).at_least_as_precise(&a));
        assert!(!a.at_least_as_precise(&Tensor(void)));
    }

    #[test]
    fn join_laws_all() {
        let space = file();
        let a = packed(&space, Full, "Open");
        let b = packed(&space, Immutable, "Open");
        let all = All(vec![a.clone(), packed(&space, Pure, "Reading")]);
        assert!(equivalent(&all.join(&b), &b.join(&all)));
        assert!(equivalent(&all.join(&a), &a.join(&all)));
        assert!(equivalent(&a.join(&b).join(&all), &a.join(&b.join(&all))));
        assert!(equivalent(&all.join(&a).join(&b), &all.join(&a.join(&b))));
        assert!(equivalent(&all.join(&all), &all.join(&a)));

        // every element of a collection is at least as precise as the collection
        assert!(a.at_least_as_precise(&all) && !all.at_least_as_precise(&a));
    }

    #[test]
    fn compact_all() {
        let space = file();
        let a = packed(&space, Full, "Open");
        let b = packed(&space, Immutable, "Open");
        let r = packed(&space, Pure, "Reading");
        let nested = All(vec![
            All(vec![a.clone(), r.clone()]),
            Choice(vec![b.clone(), a.clone()]),
            Context::vacuous(),
        ]);
        let c = nested.compact(false);
        assert_eq!(c, All(vec![a.clone(), r.clone()]));
        assert_eq!(c.compact(false), c);
        assert_eq!(c.compact(true), c.clone().freeze());
        assert!(equivalent(&nested, &c));
    }

    #[test]
    fn compact() {
        let space = file();
        let a = packed(&space, Full, "Open");
        let b = packed(&space, Pure, "Open");
        let mut void = TupleMap::new();
        void.mark_void();

        let nested = Choice(vec![Choice(vec![a.clone(), Tensor(void.clone())]), b.clone()]);
        let c = nested.compact(true);
        assert_eq!(c, a.clone().freeze());
        assert!(c.is_frozen() && !c.mutable_copy().is_frozen());
        assert_eq!(c.compact(true), c);

        let all = All(vec![a.clone(), All(vec![b.clone(), Context::vacuous()])]);
        assert_eq!(all.compact(false), b);
        assert_eq!(all.compact(false).compact(false), b);
        assert!(All(vec![a.clone(), Tensor(void)]).compact(false).is_impossible());
        assert!(Context::impossible().is_impossible());
        assert!(!Context::vacuous().is_impossible());
    }

    #[test]
    fn field_access() {
        let (space, stream) = (file(), StateSpace::trivial("Stream"));
        let invs = invariants(&space, &stream);
        let fields = fields();

        let (c, diags) = packed(&space, Full, "Open").handle_field_access(THIS, "handle", true, &invs, &fields);
        assert!(diags.is_empty());
        match &c {
            Tensor(t) => {
                assert!(t.is_unpacked(THIS));
                assert_eq!(t.get(HANDLE).virtuals()[0].kind(), Some(Unique));
            }
            _ => panic!("expected tensor, got {}", c),
        }
        let (back, diags) = c.pack_for_return(THIS, &[]);
        assert!(diags.is_empty());
        assert!(equivalent(&back, &packed(&space, Full, "Open")));

        let (c, diags) = packed(&space, Immutable, "Open").handle_field_access(THIS, "handle", true, &invs, &fields);
        assert!(c.is_impossible());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].phase, Phase::FieldAccess);
        assert_eq!(diags[0].location, THIS);
    }

    #[test]
    fn false_postcondition() {
        let space = file();
        let spaces: Spaces = [(String::from("this"), &space)].into();
        let (_, post) = parse_signature("", "false", &spaces, &SignatureOptions::default()).unwrap();
        let args: Args = [(String::from("this"), THIS)].into();
        let (c, diags) = packed(&space, Full, "Open").check_postcondition(&post, &args);
        assert!(c.is_impossible());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].phase, Phase::Postcondition);

        let (_, post) = parse_signature("", "pure(this) in Open", &spaces, &SignatureOptions::default()).unwrap();
        let (c, diags) = packed(&space, Full, "Open").check_postcondition(&post, &args);
        assert!(!c.is_impossible() && diags.is_empty());
    }

    #[test]
    fn branch_condition() {
        let space = file();
        let c = packed(&space, Full, "Open");
        let t = c.learn_bool(Loc(7), true);
        assert!(t.at_least_as_precise(&c) && !c.at_least_as_precise(&t));
        assert!(t.learn_bool(Loc(7), false).is_impossible());
    }
}
