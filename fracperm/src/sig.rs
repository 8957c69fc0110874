//! Method signatures and the predicates they consist of.
//!
//! A [`Predicate`] is a permission expression whose names have been
//! resolved to state spaces and whose permissions have been assigned fractions.
//! Predicates are checked against and merged into a program point
//! via the [`PredicateChecker`] and [`PredicateMerger`] callbacks,
//! given a mapping from names to locations.

use crate::cache::ParseCache;
use crate::error::Error;
use crate::fraction::{Fraction, Ratio};
use crate::loc::{Args, Loc, THIS};
use crate::perm::{FractionCreation, FractionalPermission, Permission};
use crate::perms::FractionalPermissions;
use crate::state::{StateId, StateSpace, ALIVE};
use crate::tuple::{Implication, Release};
use crate::visit::{ImplicationVisitor, Mode, PermVisitor, StateInfoVisitor};
use crate::PermissionKind;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use perm_parse::Expr;

/// State spaces of the names in an expression.
pub type Spaces<'s> = BTreeMap<String, &'s StateSpace>;

/// Callbacks to check a predicate at a program point.
///
/// Every method returns false if the check failed.
pub trait PredicateChecker<'s> {
    /// Take the permissions away from a location.
    fn split_off(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool;
    /// Check that the permissions are available, without taking them.
    fn check_available(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool;
    fn check_states(&mut self, loc: Loc, states: &[StateId], frame: bool) -> bool;
    fn check_null(&mut self, loc: Loc, null: bool) -> bool;
    fn check_bool(&mut self, loc: Loc, value: bool) -> bool;
    fn check_equal(&mut self, a: Loc, b: Loc, equal: bool) -> bool;
    fn check_implication(&mut self, imp: &Implication<'s>) -> bool;
    /// Record that a predicate that can never hold was required at `loc`.
    fn fail_impossible(&mut self, loc: Loc) -> bool;
}

/// Callbacks to add a predicate to a program point.
pub trait PredicateMerger<'s> {
    fn merge_in(&mut self, loc: Loc, perms: FractionalPermissions<'s>);
    /// Learn what happened to permissions that were only lent to a callee.
    fn learn_borrowed(&mut self, loc: Loc, perms: &FractionalPermissions<'s>);
    fn learn_states(&mut self, loc: Loc, states: &[StateId], frame: bool);
    fn learn_null(&mut self, loc: Loc, null: bool);
    fn learn_bool(&mut self, loc: Loc, value: bool);
    fn learn_equal(&mut self, a: Loc, b: Loc, equal: bool);
    fn add_implication(&mut self, imp: Implication<'s>);
    fn add_release(&mut self, release: Release<'s>);
    /// Give back permissions captured by an object.
    fn release(&mut self, capturing: Loc);
    /// Record that the predicate can never hold.
    fn mark_impossible(&mut self);
}

/// Requirements of a predicate on a single name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamInfo<'s> {
    pub virtuals: Vec<FractionalPermission<'s>>,
    pub frames: Vec<FractionalPermission<'s>>,
    /// states required without a permission
    pub states: Vec<StateId>,
    pub frame_states: Vec<StateId>,
    pub null: Option<bool>,
    pub value: Option<bool>,
}

impl<'s> ParamInfo<'s> {
    pub fn has_permissions(&self) -> bool {
        !self.virtuals.is_empty() || !self.frames.is_empty()
    }

    pub fn permissions(&self) -> FractionalPermissions<'s> {
        FractionalPermissions::from_permissions(self.virtuals.clone(), self.frames.clone())
    }

    /// Return true if both require permissions of the same kinds and roots.
    fn same_kinds(&self, other: &Self) -> bool {
        let key = |p: &FractionalPermission<'s>| (p.base_kind(), p.root());
        let keys = |ps: &[FractionalPermission<'s>]| {
            let mut keys: Vec<_> = ps.iter().map(key).collect();
            keys.sort_by_key(|(k, r)| (*k as u8, *r));
            keys
        };
        keys(&self.virtuals) == keys(&other.virtuals) && keys(&self.frames) == keys(&other.frames)
    }

    fn purify(&mut self) {
        let purify = |ps: &mut Vec<FractionalPermission<'s>>| {
            *ps = ps.iter().filter_map(|p| p.purify()).collect();
        };
        purify(&mut self.virtuals);
        purify(&mut self.frames);
    }
}

/// Permission expression resolved against state spaces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Predicate<'s> {
    pub params: BTreeMap<String, ParamInfo<'s>>,
    /// `(a, b, true)` if `a == b` is required, `(a, b, false)` if `a != b`
    pub equalities: Vec<(String, String, bool)>,
    /// antecedent name, its value, and the consequence
    pub implications: Vec<(String, bool, Predicate<'s>)>,
    pub impossible: bool,
    /// parts of the expression that were skipped
    pub ignored: Vec<String>,
}

/// Fractions assigned to permissions of one or more related predicates.
///
/// Permissions of the same name, frame flag, root, and kind
/// receive the same fraction, such that a postcondition returns
/// exactly what a precondition took.
struct Fractions {
    creation: FractionCreation,
    made: Vec<((String, bool, StateId, PermissionKind), Fraction)>,
}

impl Fractions {
    fn new(creation: FractionCreation) -> Self {
        Self {
            creation,
            made: Vec::new(),
        }
    }

    fn instantiate<'s>(&mut self, owner: &str, frame: bool, p: &Permission<'s>) -> FractionalPermission<'s> {
        let key = (owner.to_string(), frame, p.root, p.kind);
        if p.fraction.is_none() {
            if let Some((_, f)) = self.made.iter().find(|(k, _)| *k == key) {
                let mut p = p.clone();
                p.fraction = Some(f.clone());
                return p.instantiate(owner, self.creation);
            }
        }
        let owner = if frame { format!("{}!fr", owner) } else { owner.to_string() };
        let fp = p.instantiate(&owner, self.creation);
        self.made.push((key, fp.fraction().clone()));
        fp
    }
}

fn lookup(space: &StateSpace, state: &str) -> Result<StateId, Error> {
    space.lookup(state).ok_or_else(|| Error::UnknownState {
        space: space.ty().to_string(),
        state: state.to_string(),
    })
}

fn fraction(f: &perm_parse::Fraction<String>) -> Fraction {
    use perm_parse::Fraction as F;
    match f {
        F::Zero => Fraction::zero(),
        F::One => Fraction::one(),
        F::Ratio(n, d) => Fraction::constant(Ratio::new((*n).into(), (*d).into())),
        F::Named(x) => Fraction::named(x.clone()),
    }
}

/// Settings shared by all parts of a predicate under construction.
struct Resolver<'a, 's> {
    mode: Mode,
    spaces: &'a Spaces<'s>,
    frame_to_virtual: bool,
    fractions: &'a mut Fractions,
}

impl<'a, 's> Resolver<'a, 's> {
    fn permission(
        &self,
        space: &'s StateSpace,
        perm: &perm_parse::Perm<String>,
        extra: &[String],
    ) -> Result<Permission<'s>, Error> {
        let root_name = perm.root.as_deref().unwrap_or(ALIVE);
        let root = lookup(space, root_name)?;
        let mut p = Permission::new(space, root, perm.kind.into());
        for s in &perm.states {
            p = p.in_states([lookup(space, s)?]);
        }
        // refine permissions without states
        if perm.states.is_empty() {
            for s in extra {
                let s = lookup(space, s)?;
                if space.refines(s, root) {
                    p = p.in_states([s])
                }
            }
        }
        for (node, f) in &perm.fractions {
            if node == root_name {
                p.fraction = Some(fraction(f))
            } else {
                debug!("ignoring fraction for {} in {}", node, root_name)
            }
        }
        Ok(p)
    }

    fn predicate(&mut self, expr: &Expr<String>, extra: &[Expr<String>]) -> Result<Predicate<'s>, Error> {
        let mut perms = PermVisitor::new(self.mode);
        expr.accept(&mut perms)?;
        let mut info = StateInfoVisitor::default();
        expr.accept(&mut info);
        extra.iter().for_each(|e| e.accept(&mut info));
        let mut imps = ImplicationVisitor::default();
        expr.accept(&mut imps);

        let mut pred = Predicate {
            equalities: perms.equalities,
            impossible: perms.impossible,
            ..Predicate::default()
        };
        pred.ignored.extend(perms.ignored);
        pred.ignored.extend(imps.ignored);

        let mut names: BTreeSet<String> = perms.names.keys().cloned().collect();
        names.extend(info.states.keys().map(|(n, _)| n.clone()));
        for name in names {
            let atoms = perms.names.remove(&name).unwrap_or_default();
            let mut param = ParamInfo {
                null: atoms.null,
                value: atoms.value,
                ..ParamInfo::default()
            };
            let virtual_states = info.states.get(&(name.clone(), false)).cloned().unwrap_or_default();
            let frame_states = info.states.get(&(name.clone(), true)).cloned().unwrap_or_default();
            let space = match self.spaces.get(&name) {
                Some(space) => *space,
                None => {
                    if !atoms.perms.is_empty() || !virtual_states.is_empty() || !frame_states.is_empty() {
                        warn!("no state space for {}, ignoring its permissions", name)
                    }
                    pred.params.insert(name, param);
                    continue;
                }
            };
            for perm in &atoms.perms {
                let frame = perm.target.is_frame();
                let extra = if frame { &frame_states } else { &virtual_states };
                let p = self.permission(space, perm, extra)?;
                let fp = self.fractions.instantiate(&name, frame, &p);
                if frame && !self.frame_to_virtual {
                    param.frames.push(fp)
                } else {
                    param.virtuals.push(fp)
                }
            }
            for s in &virtual_states {
                param.states.push(lookup(space, s)?)
            }
            for s in &frame_states {
                param.frame_states.push(lookup(space, s)?)
            }
            pred.params.insert(name, param);
        }

        for (ante, value, then) in imps.implications {
            let then = self.predicate(&then, &[])?;
            pred.implications.push((ante, value, then))
        }
        Ok(pred)
    }
}

/// Build a predicate from parsed expressions.
///
/// The extra expressions only contribute state information.
fn resolve<'s>(
    expr: &Expr<String>,
    extra: &[Expr<String>],
    mode: Mode,
    spaces: &Spaces<'s>,
    frame_to_virtual: bool,
    fractions: &mut Fractions,
) -> Result<Predicate<'s>, Error> {
    let mut resolver = Resolver {
        mode,
        spaces,
        frame_to_virtual,
        fractions,
    };
    resolver.predicate(expr, extra)
}

impl<'s> Predicate<'s> {
    /// Build a predicate over fields, for state invariants.
    pub(crate) fn for_fields(expr: &Expr<String>, spaces: &Spaces<'s>) -> Result<Self, Error> {
        let mut fractions = Fractions::new(FractionCreation::Fresh);
        resolve(expr, &[], Mode::Fields, spaces, false, &mut fractions)
    }

    pub fn param(&self, name: &str) -> Option<&ParamInfo<'s>> {
        self.params.get(name)
    }

    /// Read-only counterpart of the predicate.
    pub fn purify(&self) -> Self {
        let mut pred = self.clone();
        pred.params.values_mut().for_each(|p| p.purify());
        for (_, _, then) in &mut pred.implications {
            *then = then.purify()
        }
        pred
    }

    /// Implications with names replaced by locations.
    ///
    /// Implications whose antecedent has no location are dropped.
    pub fn instantiate_implications(&self, args: &Args) -> Vec<Implication<'s>> {
        let mut imps = Vec::new();
        for (ante, value, then) in &self.implications {
            let antecedent = match args.get(ante) {
                Some(loc) => *loc,
                None => {
                    debug!("no location for implication antecedent {}", ante);
                    continue;
                }
            };
            let mut imp = Implication::new(antecedent, *value);
            imp.impossible = then.impossible;
            for (name, info) in &then.params {
                let loc = match args.get(name) {
                    Some(loc) => *loc,
                    None => {
                        debug!("no location for {} in implication", name);
                        continue;
                    }
                };
                if info.has_permissions() {
                    imp.merges.push((loc, info.permissions()))
                }
                imp.states.extend(info.states.iter().map(|s| (loc, *s)));
                imp.frame_states.extend(info.frame_states.iter().map(|s| (loc, *s)));
                imp.nulls.extend(info.null.map(|n| (loc, n)));
                imp.values.extend(info.value.map(|v| (loc, v)));
            }
            for (a, b, equal) in &then.equalities {
                if let (Some(a), Some(b)) = (args.get(a), args.get(b)) {
                    imp.equalities.push((*a, *b, *equal))
                }
            }
            imp.nested = then.instantiate_implications(args);
            imps.push(imp)
        }
        imps
    }

    /// Check the predicate, taking the permissions it requires.
    ///
    /// Names in `borrowed` are only checked for their permissions.
    /// Return false if some check failed; all checks are performed regardless.
    pub fn split_off<C: PredicateChecker<'s>>(&self, args: &Args, checker: &mut C, borrowed: &BTreeSet<String>) -> bool {
        if self.impossible {
            let receiver = args.get(THIS).or_else(|| args.values().next());
            return checker.fail_impossible(receiver.copied().unwrap_or(Loc(0)));
        }
        let mut ok = true;
        for (name, info) in &self.params {
            let loc = match args.get(name) {
                Some(loc) => *loc,
                None => {
                    debug!("no location for {}", name);
                    continue;
                }
            };
            if let Some(null) = info.null {
                ok &= checker.check_null(loc, null)
            }
            if let Some(value) = info.value {
                ok &= checker.check_bool(loc, value)
            }
            if !info.states.is_empty() {
                ok &= checker.check_states(loc, &info.states, false)
            }
            if !info.frame_states.is_empty() {
                ok &= checker.check_states(loc, &info.frame_states, true)
            }
            if info.has_permissions() {
                let perms = info.permissions();
                ok &= if borrowed.contains(name) {
                    checker.check_available(loc, &perms)
                } else {
                    checker.split_off(loc, &perms)
                }
            }
        }
        for (a, b, equal) in &self.equalities {
            if let (Some(a), Some(b)) = (args.get(a), args.get(b)) {
                ok &= checker.check_equal(*a, *b, *equal)
            }
        }
        for imp in self.instantiate_implications(args) {
            ok &= checker.check_implication(&imp)
        }
        ok
    }

    /// Add the predicate to a program point.
    ///
    /// Names in `borrowed` only contribute state information.
    pub fn merge_in<M: PredicateMerger<'s>>(&self, args: &Args, merger: &mut M, borrowed: &BTreeSet<String>) {
        if self.impossible {
            merger.mark_impossible();
            return;
        }
        for (name, info) in &self.params {
            let loc = match args.get(name) {
                Some(loc) => *loc,
                None => {
                    debug!("no location for {}", name);
                    continue;
                }
            };
            if info.has_permissions() {
                if borrowed.contains(name) {
                    merger.learn_borrowed(loc, &info.permissions())
                } else {
                    merger.merge_in(loc, info.permissions())
                }
            }
            if !info.states.is_empty() {
                merger.learn_states(loc, &info.states, false)
            }
            if !info.frame_states.is_empty() {
                merger.learn_states(loc, &info.frame_states, true)
            }
            if let Some(null) = info.null {
                merger.learn_null(loc, null)
            }
            if let Some(value) = info.value {
                merger.learn_bool(loc, value)
            }
        }
        for (a, b, equal) in &self.equalities {
            if let (Some(a), Some(b)) = (args.get(a), args.get(b)) {
                merger.learn_equal(*a, *b, *equal)
            }
        }
        for imp in self.instantiate_implications(args) {
            merger.add_implication(imp)
        }
    }
}

/// Settings for interpreting a signature.
#[derive(Clone, Debug, Default)]
pub struct SignatureOptions {
    /// name fractions after parameters, as done when analysing the method body
    pub for_analyzing_body: bool,
    /// treat frame permissions as virtual permissions
    pub frame_to_virtual: bool,
    /// drop virtual permissions of the receiver
    pub ignore_receiver_virtual: bool,
    /// drop all requirements on the receiver in the precondition, as for constructors
    pub no_receiver_pre: bool,
    /// parameters whose permissions are captured, with the state of
    /// the capturing object in which they are released
    pub captured: BTreeMap<String, String>,
    /// name of the capturing object, [`THIS`] if not given
    pub capturing: Option<String>,
    /// objects whose captured permissions are released by the call
    pub released: BTreeSet<String>,
    /// additional state information for the precondition
    pub extra_pre: Option<String>,
    /// additional state information for the postcondition
    pub extra_post: Option<String>,
    /// parameters that are never considered borrowed
    pub not_borrowed: BTreeSet<String>,
}

/// Permissions captured by a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capture<'s> {
    pub captured: String,
    pub capturing: String,
    /// state of the capturing object that releases the permissions
    pub state: StateId,
    pub perms: FractionalPermissions<'s>,
}

/// Requirements of a method on its caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Precondition<'s> {
    pred: Predicate<'s>,
    borrowed: BTreeSet<String>,
}

/// Guarantees of a method to its caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Postcondition<'s> {
    pred: Predicate<'s>,
    borrowed: BTreeSet<String>,
    captures: Vec<Capture<'s>>,
    released: BTreeSet<String>,
}

impl<'s> Precondition<'s> {
    pub fn predicate(&self) -> &Predicate<'s> {
        &self.pred
    }

    pub fn param(&self, name: &str) -> Option<&ParamInfo<'s>> {
        self.pred.param(name)
    }

    pub fn is_impossible(&self) -> bool {
        self.pred.impossible
    }

    /// Parameters that keep their permissions during the call.
    pub fn borrowed(&self) -> &BTreeSet<String> {
        &self.borrowed
    }

    /// Check the precondition at a call site.
    pub fn split_off_predicate<C: PredicateChecker<'s>>(&self, args: &Args, checker: &mut C) -> bool {
        self.pred.split_off(args, checker, &self.borrowed)
    }

    /// Assume the precondition at the beginning of a method body.
    pub fn merge_in_predicate<M: PredicateMerger<'s>>(&self, args: &Args, merger: &mut M) {
        self.pred.merge_in(args, merger, &BTreeSet::new())
    }
}

impl<'s> Postcondition<'s> {
    pub fn predicate(&self) -> &Predicate<'s> {
        &self.pred
    }

    pub fn param(&self, name: &str) -> Option<&ParamInfo<'s>> {
        self.pred.param(name)
    }

    pub fn is_impossible(&self) -> bool {
        self.pred.impossible
    }

    pub fn captures(&self) -> &[Capture<'s>] {
        &self.captures
    }

    /// Add the postcondition at a call site.
    pub fn merge_in_predicate<M: PredicateMerger<'s>>(&self, args: &Args, merger: &mut M) {
        self.pred.merge_in(args, merger, &self.borrowed);
        if self.pred.impossible {
            return;
        }
        for c in &self.captures {
            match (args.get(&c.captured), args.get(&c.capturing)) {
                (Some(captured), Some(capturing)) => merger.add_release(Release {
                    captured: *captured,
                    capturing: *capturing,
                    state: c.state,
                    perms: c.perms.clone(),
                }),
                _ => debug!("no location for capture of {} by {}", c.captured, c.capturing),
            }
        }
        for name in &self.released {
            match args.get(name) {
                Some(loc) => merger.release(*loc),
                None => debug!("no location for released {}", name),
            }
        }
    }

    /// Check the postcondition at the end of a method body.
    pub fn split_off_predicate<C: PredicateChecker<'s>>(&self, args: &Args, checker: &mut C) -> bool {
        self.pred.split_off(args, checker, &BTreeSet::new())
    }
}

/// Parse a pre- and postcondition using a parse cache.
pub fn parse_signature_with<'s>(
    cache: &mut ParseCache,
    pre: &str,
    post: &str,
    spaces: &Spaces<'s>,
    options: &SignatureOptions,
) -> Result<(Precondition<'s>, Postcondition<'s>), Error> {
    let extra = |text: &Option<String>, cache: &mut ParseCache| -> Result<Vec<Expr<String>>, Error> {
        text.iter().map(|t| cache.parse(t)).collect()
    };
    let (pre_expr, post_expr) = (cache.parse(pre)?, cache.parse(post)?);
    let (pre_extra, post_extra) = (extra(&options.extra_pre, cache)?, extra(&options.extra_post, cache)?);

    let creation = if options.for_analyzing_body {
        FractionCreation::Named
    } else {
        FractionCreation::Fresh
    };
    let mut fractions = Fractions::new(creation);
    let ftv = options.frame_to_virtual;
    let mut pre = resolve(&pre_expr, &pre_extra, Mode::Params, spaces, ftv, &mut fractions)?;
    let mut post = resolve(&post_expr, &post_extra, Mode::Params, spaces, ftv, &mut fractions)?;

    if options.no_receiver_pre {
        pre.params.remove(THIS);
    }
    if options.ignore_receiver_virtual {
        for pred in [&mut pre, &mut post] {
            if let Some(this) = pred.params.get_mut(THIS) {
                this.virtuals.clear()
            }
        }
    }

    let capturing = options.capturing.as_deref().unwrap_or(THIS);
    let mut captures = Vec::new();
    for (captured, state) in &options.captured {
        let perms = match pre.param(captured) {
            Some(info) if info.has_permissions() => {
                let mut perms = info.permissions();
                perms.forget_states_under(StateId::ALIVE);
                perms
            }
            _ => {
                warn!("captured {} has no permissions", captured);
                continue;
            }
        };
        let state = match spaces.get(capturing) {
            Some(space) => lookup(space, state)?,
            None => StateId::ALIVE,
        };
        captures.push(Capture {
            captured: captured.clone(),
            capturing: capturing.to_string(),
            state,
            perms,
        })
    }

    let borrowed: BTreeSet<String> = pre
        .params
        .iter()
        .filter(|(name, info)| {
            info.has_permissions()
                && !options.captured.contains_key(*name)
                && !options.not_borrowed.contains(*name)
                && post.param(name).map_or(false, |p| p.same_kinds(info))
        })
        .map(|(name, _)| name.clone())
        .collect();
    trace!("borrowed: {:?}", borrowed);

    let pre = Precondition {
        pred: pre,
        borrowed: borrowed.clone(),
    };
    let post = Postcondition {
        pred: post,
        borrowed,
        captures,
        released: options.released.clone(),
    };
    Ok((pre, post))
}

/// Parse a pre- and postcondition.
///
/// Names in the conditions are resolved to the state spaces given by `spaces`;
/// permissions of names without state space are ignored.
///
/// ~~~
/// # use fracperm::state::StateSpaceBuilder;
/// # use fracperm::sig::{parse_signature, SignatureOptions, Spaces};
/// # use fracperm::PermissionKind;
/// let mut b = StateSpaceBuilder::new("File");
/// b.state("Open", "alive")?;
/// let file = b.build();
/// let spaces: Spaces = [("this".to_string(), &file), ("#0".to_string(), &file)].into();
///
/// let opts = SignatureOptions::default();
/// let (pre, post) = parse_signature("unique(this) * full(#0) in Open", "unique(this)", &spaces, &opts)?;
/// assert_eq!(pre.param("this").unwrap().virtuals[0].kind(), Some(PermissionKind::Unique));
/// assert!(pre.param("#0").unwrap().virtuals[0].is_in_state(file.lookup("Open").unwrap()));
/// assert!(pre.borrowed().contains("this"));
/// # Ok::<_, fracperm::Error>(())
/// ~~~
pub fn parse_signature<'s>(
    pre: &str,
    post: &str,
    spaces: &Spaces<'s>,
    options: &SignatureOptions,
) -> Result<(Precondition<'s>, Postcondition<'s>), Error> {
    parse_signature_with(&mut ParseCache::new(0), pre, post, spaces, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraction::Var;
    use crate::state::tests::file;
    use crate::tuple::TupleMap;

    fn spaces(space: &StateSpace) -> Spaces {
        [(String::from("this"), space), (String::from("#0"), space)].into()
    }

    fn args() -> Args {
        [(String::from("this"), Loc(0)), (String::from("#0"), Loc(1))].into()
    }

    #[test]
    fn impossible() -> Result<(), Error> {
        let space = file();
        let opts = SignatureOptions::default();
        let (pre, post) = parse_signature("false", "false", &spaces(&space), &opts)?;
        assert!(pre.is_impossible() && post.is_impossible());

        let mut t = TupleMap::new();
        assert!(!pre.split_off_predicate(&args(), &mut t));
        assert!(t.is_void());
        let diags: Vec<_> = t.diagnostics().collect();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].location, Loc(0));

        let mut t = TupleMap::new();
        post.merge_in_predicate(&args(), &mut t);
        assert!(t.is_unsatisfiable());
        assert_eq!(t.diagnostics().count(), 0);
        Ok(())
    }

    #[test]
    fn implication_consequences() -> Result<(), Error> {
        let space = file();
        let opts = SignatureOptions::default();
        let args: Args = [(String::from("b"), Loc(3)), (String::from("x"), Loc(4))].into();
        let (pre, post) = parse_signature("b == true => x != null", "b == true => x != null", &spaces(&space), &opts)?;
        let imps = pre.predicate().instantiate_implications(&args);
        assert_eq!(imps.len(), 1);
        assert_eq!(imps[0].nulls, [(Loc(4), false)]);

        let mut t = TupleMap::new();
        t.learn_bool(Loc(3), true);
        t.learn_null(Loc(4), true);
        assert!(!pre.split_off_predicate(&args, &mut t));
        assert!(t.is_void());
        assert_eq!(t.diagnostics().next().map(|d| d.location), Some(Loc(4)));

        // the consequence is learnt once the antecedent is known
        let mut t = TupleMap::new();
        post.merge_in_predicate(&args, &mut t);
        assert_eq!(t.facts().is_null(Loc(4)), None);
        t.learn_bool(Loc(3), true);
        assert_eq!(t.facts().is_null(Loc(4)), Some(false));
        assert!(pre.split_off_predicate(&args, &mut t));
        Ok(())
    }

    #[test]
    fn nested_implications() -> Result<(), Error> {
        let space = file();
        let opts = SignatureOptions::default();
        let args: Args = [(String::from("a"), Loc(3)), (String::from("b"), Loc(4)), (String::from("x"), Loc(5))].into();
        let (_, post) = parse_signature("", "a == true => b == false => x == null", &spaces(&space), &opts)?;

        let mut t = TupleMap::new();
        post.merge_in_predicate(&args, &mut t);
        t.learn_bool(Loc(3), true);
        assert_eq!(t.facts().is_null(Loc(5)), None);
        t.learn_bool(Loc(4), false);
        assert_eq!(t.facts().is_null(Loc(5)), Some(true));

        let (_, post) = parse_signature("", "a == true => false", &spaces(&space), &opts)?;
        let mut t = TupleMap::new();
        post.merge_in_predicate(&args, &mut t);
        assert!(!t.is_unsatisfiable());
        t.learn_bool(Loc(3), true);
        assert!(t.is_unsatisfiable());
        Ok(())
    }

    #[test]
    fn borrowed() -> Result<(), Error> {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions::default();
        let (pre, _) = parse_signature("full(this) in Open * full(#0)", "full(this) in Closed", &spaces, &opts)?;
        assert!(pre.borrowed().contains("this"));
        assert!(!pre.borrowed().contains("#0"));

        let (pre, _) = parse_signature("full(this)", "pure(this)", &spaces, &opts)?;
        assert!(pre.borrowed().is_empty());

        let opts = SignatureOptions {
            not_borrowed: [String::from("this")].into(),
            ..SignatureOptions::default()
        };
        let (pre, _) = parse_signature("full(this)", "full(this)", &spaces, &opts)?;
        assert!(pre.borrowed().is_empty());
        Ok(())
    }

    #[test]
    fn shared_fractions() -> Result<(), Error> {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions::default();
        let (pre, post) = parse_signature("share(this)", "share(this) in Open", &spaces, &opts)?;
        let fraction = |info: Option<&ParamInfo>| info.unwrap().virtuals[0].fraction().clone();
        assert_eq!(fraction(pre.param("this")), fraction(post.param("this")));

        let opts = SignatureOptions {
            for_analyzing_body: true,
            ..SignatureOptions::default()
        };
        let (pre, _) = parse_signature("share(this) * unique(#0)", "", &spaces, &opts)?;
        let named = Fraction::var(Var::Named("this.alive".into()));
        assert_eq!(fraction(pre.param("this")), named);
        assert_eq!(fraction(pre.param("#0")), Fraction::one());
        Ok(())
    }

    #[test]
    fn frames() -> Result<(), Error> {
        let space = file();
        let spaces = spaces(&space);
        let (pre, _) = parse_signature("full(this!fr) in Open", "", &spaces, &SignatureOptions::default())?;
        let this = pre.param("this").unwrap();
        assert_eq!((this.virtuals.len(), this.frames.len()), (0, 1));

        let opts = SignatureOptions {
            frame_to_virtual: true,
            ..SignatureOptions::default()
        };
        let (pre, _) = parse_signature("full(this!fr) in Open", "", &spaces, &opts)?;
        let this = pre.param("this").unwrap();
        assert_eq!((this.virtuals.len(), this.frames.len()), (1, 0));
        assert!(this.virtuals[0].is_in_state(space.lookup("Open").unwrap()));
        Ok(())
    }

    #[test]
    fn captures() -> Result<(), Error> {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions {
            captured: [(String::from("#0"), String::from("Closed"))].into(),
            ..SignatureOptions::default()
        };
        let (pre, post) = parse_signature("unique(this) * full(#0) in Open", "unique(this)", &spaces, &opts)?;
        assert!(!pre.borrowed().contains("#0"));
        let capture = &post.captures()[0];
        assert_eq!((capture.captured.as_str(), capture.capturing.as_str()), ("#0", THIS));
        assert_eq!(capture.state, space.lookup("Closed").unwrap());

        let mut t = TupleMap::new();
        post.merge_in_predicate(&args(), &mut t);
        let release = t.releases().next().unwrap();
        assert_eq!((release.captured, release.capturing), (Loc(1), Loc(0)));
        Ok(())
    }

    #[test]
    fn errors() {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions::default();
        let sig = |pre| parse_signature(pre, "", &spaces, &opts).err();
        assert!(matches!(sig("full(this) in Nowhere"), Some(Error::UnknownState { .. })));
        assert!(matches!(sig("full(this"), Some(Error::Parse { .. })));
    }

    #[test]
    fn extra_states() -> Result<(), Error> {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions {
            extra_pre: Some(String::from("this in Reading")),
            ..SignatureOptions::default()
        };
        let (pre, _) = parse_signature("full(this, Open)", "", &spaces, &opts)?;
        let this = pre.param("this").unwrap();
        assert!(this.virtuals[0].is_in_state(space.lookup("Reading").unwrap()));
        Ok(())
    }
}
