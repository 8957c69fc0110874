//! State invariants, relating the state of an object to its fields.
//!
//! An invariant declared for a state describes the permissions and states
//! of fields that hold whenever the object is in that state.
//! Unpacking an object *merges* the invariants into the field locations;
//! packing it *checks* them and takes the field permissions back.

use crate::cache::ParseCache;
use crate::error::Error;
use crate::loc::Args;
use crate::sig::{Predicate, PredicateChecker, PredicateMerger, Spaces};
use crate::state::{StateId, StateSpace};
use alloc::collections::BTreeMap;
use alloc::string::ToString;
use alloc::vec::Vec;

/// Adds the invariant of a state to the fields of an unpacked object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantMerger<'s>(Predicate<'s>);

/// Takes the invariant of a state from the fields of an object being packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantChecker<'s>(Predicate<'s>);

impl<'s> InvariantMerger<'s> {
    /// Merge the invariant into the field locations given by `fields`.
    ///
    /// With `purify`, only read-only permissions are merged,
    /// as is the case when the object is unpacked from a read-only permission.
    pub fn merge_in_predicate<M: PredicateMerger<'s>>(&self, fields: &Args, merger: &mut M, purify: bool) {
        let empty = Default::default();
        if purify {
            self.0.purify().merge_in(fields, merger, &empty)
        } else {
            self.0.merge_in(fields, merger, &empty)
        }
    }
}

impl<'s> InvariantChecker<'s> {
    /// Check the invariant on the field locations given by `fields`.
    pub fn split_off_predicate<C: PredicateChecker<'s>>(&self, fields: &Args, checker: &mut C, purify: bool) -> bool {
        let empty = Default::default();
        if purify {
            self.0.purify().split_off(fields, checker, &empty)
        } else {
            self.0.split_off(fields, checker, &empty)
        }
    }

    /// Return true if no object can be in the state.
    pub fn is_impossible(&self) -> bool {
        self.0.impossible
    }
}

/// Parse an invariant over fields using a parse cache.
pub fn parse_invariant_with<'s>(
    cache: &mut ParseCache,
    text: &str,
    field_spaces: &Spaces<'s>,
) -> Result<(InvariantMerger<'s>, InvariantChecker<'s>), Error> {
    let expr = cache.parse(text)?;
    let pred = Predicate::for_fields(&expr, field_spaces)?;
    Ok((InvariantMerger(pred.clone()), InvariantChecker(pred)))
}

/// Parse an invariant over fields.
///
/// Names in the invariant must be fields;
/// mentioning parameters, the receiver, or the result is an error.
pub fn parse_invariant<'s>(
    text: &str,
    field_spaces: &Spaces<'s>,
) -> Result<(InvariantMerger<'s>, InvariantChecker<'s>), Error> {
    parse_invariant_with(&mut ParseCache::new(0), text, field_spaces)
}

/// Invariant of a single state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invariant<'s> {
    pub merger: InvariantMerger<'s>,
    pub checker: InvariantChecker<'s>,
}

/// Invariants declared for the states of a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invariants<'s> {
    space: &'s StateSpace,
    states: BTreeMap<StateId, Invariant<'s>>,
}

impl<'s> Invariants<'s> {
    pub fn new(space: &'s StateSpace) -> Self {
        Self {
            space,
            states: BTreeMap::new(),
        }
    }

    pub fn space(&self) -> &'s StateSpace {
        self.space
    }

    /// Declare the invariant for a state.
    ///
    /// ~~~
    /// # use fracperm::state::StateSpaceBuilder;
    /// # use fracperm::invariant::Invariants;
    /// # use fracperm::{sig::Spaces, ParseCache, StateSpace};
    /// let mut b = StateSpaceBuilder::new("File");
    /// b.state("Open", "alive")?;
    /// b.field("handle", "Open")?;
    /// let file = b.build();
    /// let stream = StateSpace::trivial("Stream");
    /// let fields: Spaces = [("handle".to_string(), &stream)].into();
    ///
    /// let mut invs = Invariants::new(&file);
    /// invs.declare("Open", "full(handle) * handle != null", &fields, &mut ParseCache::default())?;
    /// assert!(invs.get(file.lookup("Open").unwrap()).is_some());
    /// assert!(invs.declare("Open", "full(#0)", &fields, &mut ParseCache::default()).is_err());
    /// # Ok::<_, fracperm::Error>(())
    /// ~~~
    pub fn declare(
        &mut self,
        state: &str,
        text: &str,
        field_spaces: &Spaces<'s>,
        cache: &mut ParseCache,
    ) -> Result<(), Error> {
        let id = self.space.lookup(state).ok_or_else(|| Error::UnknownState {
            space: self.space.ty().to_string(),
            state: state.to_string(),
        })?;
        let (merger, checker) = cache.parse_invariant(text, field_spaces)?;
        self.states.insert(id, Invariant { merger, checker });
        Ok(())
    }

    pub fn insert(&mut self, state: StateId, merger: InvariantMerger<'s>, checker: InvariantChecker<'s>) {
        self.states.insert(state, Invariant { merger, checker });
    }

    pub fn get(&self, state: StateId) -> Option<&Invariant<'s>> {
        self.states.get(&state)
    }

    /// States strictly above `node` up to and including `top`, outermost first.
    ///
    /// These are the states an object unpacked at `node` from a permission
    /// rooted at `top` is known to be in.
    pub fn states_between(&self, top: StateId, node: StateId) -> Vec<StateId> {
        let space = self.space;
        let mut states: Vec<_> = space
            .ancestors(node)
            .skip(1)
            .take_while(|s| space.refines(*s, top))
            .filter(|s| !space.is_dimension(*s))
            .collect();
        states.reverse();
        states
    }

    /// Return true if some state at or below `node` has an invariant.
    pub fn has_invariants_under(&self, node: StateId) -> bool {
        self.states.keys().any(|s| self.space.refines(*s, node))
    }
}
