//! Checking a method call against a tuple map.
//!
//! A call passes through four stages:
//!
//! 1. split the precondition off the caller's permissions,
//!    delaying checks on an unpacked receiver;
//! 2. pack the receiver if checks were delayed, then perform them;
//! 3. forget states that the callee may have changed;
//! 4. merge the postcondition.
//!
//! Stage 2 may yield several alternatives, one for every state
//! the receiver can be packed to.

use crate::diag::Phase;
use crate::loc::{Args, Loc};
use crate::perms::FractionalPermissions;
use crate::sig::{PredicateChecker, Postcondition, Precondition};
use crate::state::StateId;
use crate::tuple::{Implication, TupleMap};
use alloc::{vec, vec::Vec};

/// A call site: the callee's signature and the locations of its arguments.
pub struct Call<'a, 's> {
    pub pre: &'a Precondition<'s>,
    pub post: &'a Postcondition<'s>,
    pub args: &'a Args,
    /// location of the receiver, if the callee has one
    pub receiver: Option<Loc>,
}

/// Check on the receiver that has to wait until the receiver is packed.
#[derive(Clone, Debug)]
enum Delayed<'s> {
    Split(Loc, FractionalPermissions<'s>),
    Available(Loc, FractionalPermissions<'s>),
    States(Loc, Vec<StateId>, bool),
}

/// Intermediate result passed between the stages of a call.
#[derive(Clone, Debug)]
pub struct CallState<'s> {
    pub tuple: TupleMap<'s>,
    delayed: Vec<Delayed<'s>>,
    /// all checks so far succeeded
    pub ok: bool,
}

/// Checker that delays checks on an unpacked receiver.
struct CallChecker<'t, 's> {
    tuple: &'t mut TupleMap<'s>,
    receiver: Option<Loc>,
    delayed: Vec<Delayed<'s>>,
}

impl<'t, 's> CallChecker<'t, 's> {
    fn delays(&self, loc: Loc) -> bool {
        self.receiver == Some(loc) && self.tuple.is_unpacked(loc)
    }
}

impl<'t, 's> PredicateChecker<'s> for CallChecker<'t, 's> {
    fn split_off(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool {
        if self.delays(loc) {
            self.delayed.push(Delayed::Split(loc, perms.clone()));
            return true;
        }
        self.tuple.split_off(loc, perms)
    }

    fn check_available(&mut self, loc: Loc, perms: &FractionalPermissions<'s>) -> bool {
        if self.delays(loc) {
            self.delayed.push(Delayed::Available(loc, perms.clone()));
            return true;
        }
        self.tuple.check_available(loc, perms)
    }

    fn check_states(&mut self, loc: Loc, states: &[StateId], frame: bool) -> bool {
        if self.delays(loc) {
            self.delayed.push(Delayed::States(loc, states.to_vec(), frame));
            return true;
        }
        self.tuple.check_states(loc, states, frame)
    }

    fn check_null(&mut self, loc: Loc, null: bool) -> bool {
        self.tuple.check_null(loc, null)
    }

    fn check_bool(&mut self, loc: Loc, value: bool) -> bool {
        self.tuple.check_bool(loc, value)
    }

    fn check_equal(&mut self, a: Loc, b: Loc, equal: bool) -> bool {
        self.tuple.check_equal(a, b, equal)
    }

    fn check_implication(&mut self, imp: &Implication<'s>) -> bool {
        self.tuple.check_implication(imp)
    }

    fn fail_impossible(&mut self, loc: Loc) -> bool {
        self.tuple.fail_impossible(loc)
    }
}

impl<'s> Delayed<'s> {
    fn apply(&self, tuple: &mut TupleMap<'s>) -> bool {
        match self {
            Self::Split(loc, perms) => tuple.split_off(*loc, perms),
            Self::Available(loc, perms) => tuple.check_available(*loc, perms),
            Self::States(loc, states, frame) => tuple.check_states(*loc, states, *frame),
        }
    }

    /// States that the receiver has to be packed to.
    fn states(&self) -> Vec<StateId> {
        match self {
            Self::Split(_, perms) | Self::Available(_, perms) => {
                let all = perms.virtuals().iter().chain(perms.frames());
                all.flat_map(|p| p.states().iter().copied()).collect()
            }
            Self::States(_, states, _) => states.clone(),
        }
    }
}

impl<'a, 's> Call<'a, 's> {
    /// Split the precondition off.
    pub fn split_pre(&self, tuple: &TupleMap<'s>) -> CallState<'s> {
        let mut tuple = tuple.mutable_copy();
        tuple.clear_diagnostics();
        tuple.set_phase(Phase::Precondition);
        let mut checker = CallChecker {
            tuple: &mut tuple,
            receiver: self.receiver,
            delayed: Vec::new(),
        };
        let ok = self.pre.split_off_predicate(self.args, &mut checker);
        let delayed = checker.delayed;
        CallState { tuple, delayed, ok }
    }

    /// Pack the receiver for the delayed checks and perform them.
    ///
    /// Alternatives that fail the checks are discarded,
    /// unless all alternatives fail.
    pub fn pack_if_needed(&self, state: CallState<'s>) -> Vec<CallState<'s>> {
        let receiver = match self.receiver {
            Some(receiver) if !state.delayed.is_empty() => receiver,
            _ => return vec![state],
        };
        let mut states: Vec<StateId> = state.delayed.iter().flat_map(|d| d.states()).collect();
        states.sort();
        states.dedup();
        let target = (!states.is_empty()).then_some(&states[..]);
        debug!("packing receiver {} for call", receiver);

        let alternatives: Vec<_> = state
            .tuple
            .pack(receiver, target)
            .into_iter()
            .map(|mut tuple| {
                tuple.set_phase(Phase::Precondition);
                let mut ok = state.ok && !tuple.is_void();
                for d in &state.delayed {
                    ok &= d.apply(&mut tuple)
                }
                CallState {
                    tuple,
                    delayed: Vec::new(),
                    ok,
                }
            })
            .collect();
        if alternatives.iter().any(|a| a.ok) {
            alternatives.into_iter().filter(|a| a.ok).collect()
        } else {
            alternatives
        }
    }

    /// Forget what the callee may have changed.
    pub fn forget_effects(&self, mut state: CallState<'s>) -> CallState<'s> {
        state.tuple.forget_share_and_pure_states();
        state
    }

    /// Add the postcondition.
    pub fn merge_post(&self, mut state: CallState<'s>) -> CallState<'s> {
        self.post.merge_in_predicate(self.args, &mut state.tuple);
        state
    }

    /// Run all stages of the call, yielding one tuple map per alternative.
    ///
    /// Alternatives whose checks failed are void.
    pub fn apply(&self, tuple: &TupleMap<'s>) -> Vec<TupleMap<'s>> {
        let state = self.split_pre(tuple);
        self.pack_if_needed(state)
            .into_iter()
            .map(|mut state| {
                if !state.ok && !state.tuple.is_void() {
                    state.tuple.mark_void()
                }
                state
            })
            .map(|state| self.forget_effects(state))
            .map(|state| self.merge_post(state))
            .map(|state| state.tuple)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::{parse_signature, SignatureOptions, Spaces};
    use crate::state::tests::file;
    use crate::state::StateSpace;
    use crate::tuple::tests::{fields, invariants, HANDLE, THIS};
    use crate::Context;
    use crate::PermissionKind::*;
    use alloc::string::String;

    fn spaces<'s>(space: &'s StateSpace) -> Spaces<'s> {
        [(String::from("this"), space), (String::from("#0"), space)].into()
    }

    fn args() -> Args {
        [(String::from("this"), THIS), (String::from("#0"), Loc(2))].into()
    }

    #[test]
    fn borrowed() {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions::default();
        let (pre, post) = parse_signature("full(this) in Open", "full(this) in Closed", &spaces, &opts).unwrap();
        let (init, _) = parse_signature("unique(this) in Open", "", &spaces, &opts).unwrap();

        let mut t = TupleMap::new();
        init.merge_in_predicate(&args(), &mut t);
        let args = args();
        let call = Call {
            pre: &pre,
            post: &post,
            args: &args,
            receiver: Some(THIS),
        };
        let after = call.apply(&t);
        assert_eq!(after.len(), 1);
        let perms = after[0].get(THIS);
        assert!(!after[0].is_unsatisfiable());
        assert_eq!(perms.virtuals()[0].kind(), Some(Unique));
        assert!(perms.is_in_state(space.lookup("Closed").unwrap(), false));
    }

    #[test]
    fn consumed() {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions::default();
        let (pre, post) = parse_signature("full(#0)", "", &spaces, &opts).unwrap();
        let (init, _) = parse_signature("full(#0)", "", &spaces, &opts).unwrap();

        let mut t = TupleMap::new();
        init.merge_in_predicate(&args(), &mut t);
        let args = args();
        let call = Call {
            pre: &pre,
            post: &post,
            args: &args,
            receiver: None,
        };
        let once = call.apply(&t);
        assert!(!once[0].is_unsatisfiable());
        let twice = call.apply(&once[0]);
        assert!(twice[0].is_unsatisfiable());
        assert_eq!(twice[0].diagnostics().count(), 1);
    }

    #[test]
    fn false_precondition() {
        let space = file();
        let spaces = spaces(&space);
        let opts = SignatureOptions::default();
        let (init, _) = parse_signature("unique(#0) in Open", "", &spaces, &opts).unwrap();
        let (pre, post) = parse_signature("false", "full(#0)", &spaces, &opts).unwrap();

        let mut t = TupleMap::new();
        init.merge_in_predicate(&args(), &mut t);
        let args = args();
        let call = Call {
            pre: &pre,
            post: &post,
            args: &args,
            receiver: None,
        };
        let state = call.split_pre(&t);
        assert!(!state.ok);
        let after = call.apply(&t);
        assert_eq!(after.len(), 1);
        assert!(after[0].is_unsatisfiable());
        assert_eq!(after[0].diagnostics().count(), 1);

        let (ctx, diags) = Context::Tensor(t).handle_call(&call);
        assert!(ctx.is_impossible());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].phase, Phase::Precondition);
    }

    #[test]
    fn unpacked_receiver() {
        let (space, stream) = (file(), StateSpace::trivial("Stream"));
        let invs = invariants(&space, &stream);
        let spaces = spaces(&space);
        let opts = SignatureOptions::default();
        let (init, _) = parse_signature("full(this!fr) in Open", "", &spaces, &opts).unwrap();
        let (pre, post) = parse_signature("pure(this!fr) in Open", "pure(this!fr)", &spaces, &opts).unwrap();

        let mut t = TupleMap::new();
        init.merge_in_predicate(&args(), &mut t);
        let t = t.unpack(THIS, crate::StateId::ALIVE, &invs, &fields()).remove(0);
        assert!(t.is_unpacked(THIS));

        let args = args();
        let call = Call {
            pre: &pre,
            post: &post,
            args: &args,
            receiver: Some(THIS),
        };
        let after = call.apply(&t);
        assert_eq!(after.len(), 1);
        assert!(!after[0].is_unpacked(THIS));
        assert!(!after[0].is_unsatisfiable());
        assert!(after[0].get(HANDLE).is_empty());
    }
}
