//! Hierarchies of typestates.
//!
//! Every type declares a tree of named states rooted at [`ALIVE`].
//! The children of a state are either states, which exclude each other, or
//! *dimensions*, which partition the state into orthogonal sub-hierarchies:
//! an object is in exactly one state of every dimension of a state it is in.
//! Furthermore, a field can be declared to be materialised under a state,
//! meaning that its value only matters when the object is in that state.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::{self, Display};
use fnv::FnvHashMap;

/// Name of the root state of every state space.
pub const ALIVE: &str = "alive";

/// Index of a node in a state space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u32);

impl StateId {
    /// The root of every state space.
    pub const ALIVE: StateId = StateId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    UnknownState(String),
    DuplicateState(String),
    DuplicateField(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownState(s) => write!(f, "unknown state {}", s),
            Self::DuplicateState(s) => write!(f, "state {} declared twice", s),
            Self::DuplicateField(s) => write!(f, "field {} declared twice", s),
        }
    }
}

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<StateId>,
    dimension: bool,
    children: Vec<StateId>,
}

/// State hierarchy of a type.
///
/// State spaces are immutable once built and
/// are identified by the name of the type they belong to.
#[derive(Debug)]
pub struct StateSpace {
    ty: String,
    nodes: Vec<Node>,
    names: FnvHashMap<String, StateId>,
    fields: FnvHashMap<String, StateId>,
}

impl PartialEq for StateSpace {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other) || self.ty == other.ty
    }
}

impl Eq for StateSpace {}

/// Incremental construction of a state space.
///
/// ~~~
/// # use fracperm::state::{StateSpaceBuilder, Error};
/// let mut b = StateSpaceBuilder::new("File");
/// let open = b.state("Open", "alive")?;
/// let closed = b.state("Closed", "alive")?;
/// b.field("handle", "Open")?;
/// let space = b.build();
///
/// assert!(space.are_exclusive(open, closed));
/// assert_eq!(space.field_root("handle"), Some(open));
/// # Ok::<_, Error>(())
/// ~~~
pub struct StateSpaceBuilder(StateSpace);

impl StateSpaceBuilder {
    pub fn new(ty: impl Into<String>) -> Self {
        let root = Node {
            name: ALIVE.to_string(),
            parent: None,
            dimension: false,
            children: Vec::new(),
        };
        let mut names = FnvHashMap::default();
        names.insert(ALIVE.to_string(), StateId::ALIVE);
        Self(StateSpace {
            ty: ty.into(),
            nodes: Vec::from([root]),
            names,
            fields: Default::default(),
        })
    }

    fn node(&mut self, name: &str, parent: &str, dimension: bool) -> Result<StateId, Error> {
        let space = &mut self.0;
        let parent = space.lookup_or_err(parent)?;
        if space.names.contains_key(name) {
            return Err(Error::DuplicateState(name.to_string()));
        }
        let id = StateId(space.nodes.len() as u32);
        space.nodes.push(Node {
            name: name.to_string(),
            parent: Some(parent),
            dimension,
            children: Vec::new(),
        });
        space.nodes[parent.index()].children.push(id);
        space.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declare a state refining `parent`, which may be a state or a dimension.
    pub fn state(&mut self, name: &str, parent: &str) -> Result<StateId, Error> {
        self.node(name, parent, false)
    }

    /// Declare an orthogonal dimension of the state `parent`.
    pub fn dimension(&mut self, name: &str, parent: &str) -> Result<StateId, Error> {
        self.node(name, parent, true)
    }

    /// Declare that `field` is materialised under `node`.
    pub fn field(&mut self, field: &str, node: &str) -> Result<(), Error> {
        let node = self.0.lookup_or_err(node)?;
        match self.0.fields.insert(field.to_string(), node) {
            Some(_) => Err(Error::DuplicateField(field.to_string())),
            None => Ok(()),
        }
    }

    pub fn build(self) -> StateSpace {
        self.0
    }
}

impl StateSpace {
    /// A state space consisting only of [`ALIVE`].
    pub fn trivial(ty: impl Into<String>) -> Self {
        StateSpaceBuilder::new(ty).build()
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }

    pub fn root(&self) -> StateId {
        StateId::ALIVE
    }

    pub fn lookup(&self, name: &str) -> Option<StateId> {
        self.names.get(name).copied()
    }

    fn lookup_or_err(&self, name: &str) -> Result<StateId, Error> {
        self.lookup(name)
            .ok_or_else(|| Error::UnknownState(name.to_string()))
    }

    pub fn name(&self, s: StateId) -> &str {
        &self.nodes[s.index()].name
    }

    pub fn parent(&self, s: StateId) -> Option<StateId> {
        self.nodes[s.index()].parent
    }

    pub fn is_dimension(&self, s: StateId) -> bool {
        self.nodes[s.index()].dimension
    }

    /// Direct children (states and dimensions) of a node.
    pub fn children(&self, s: StateId) -> &[StateId] {
        &self.nodes[s.index()].children
    }

    /// Dimensions directly below a state.
    pub fn dimensions(&self, s: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.children(s)
            .iter()
            .copied()
            .filter(|c| self.is_dimension(*c))
    }

    /// Partitions of a node into mutually exclusive states.
    ///
    /// The states directly below a state form one partition,
    /// as do the states of every dimension below it.
    pub fn partitions(&self, s: StateId) -> Vec<Vec<StateId>> {
        let states = |n| -> Vec<StateId> {
            let children = self.children(n).iter().copied();
            children.filter(|c| !self.is_dimension(*c)).collect()
        };
        let mut parts = Vec::new();
        let direct = states(s);
        if !direct.is_empty() {
            parts.push(direct)
        }
        if !self.is_dimension(s) {
            parts.extend(self.dimensions(s).map(states).filter(|p| !p.is_empty()))
        }
        parts
    }

    /// All states (not dimensions) of the space, root first.
    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        (0..self.nodes.len() as u32)
            .map(StateId)
            .filter(|s| !self.is_dimension(*s))
    }

    /// All states refining `root`, including `root` if it is a state.
    pub fn states_under(&self, root: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.states().filter(move |s| self.refines(*s, root))
    }

    /// The node itself, followed by its ancestors up to the root.
    pub fn ancestors(&self, s: StateId) -> impl Iterator<Item = StateId> + '_ {
        core::iter::successors(Some(s), |s| self.parent(*s))
    }

    /// Return true if `a` is `b` or nested below `b`.
    pub fn refines(&self, a: StateId, b: StateId) -> bool {
        self.ancestors(a).any(|s| s == b)
    }

    /// Lowest common ancestor node of two nodes.
    fn lca(&self, a: StateId, b: StateId) -> StateId {
        let above_a: Vec<_> = self.ancestors(a).collect();
        self.ancestors(b)
            .find(|s| above_a.contains(s))
            .unwrap_or(StateId::ALIVE)
    }

    /// Child of `ancestor` on the path to `s`.
    fn child_towards(&self, ancestor: StateId, s: StateId) -> Option<StateId> {
        self.ancestors(s).find(|n| self.parent(*n) == Some(ancestor))
    }

    /// Most precise state that both given states refine.
    pub fn common_ancestor(&self, a: StateId, b: StateId) -> StateId {
        let lca = self.lca(a, b);
        self.ancestors(lca)
            .find(|s| !self.is_dimension(*s))
            .unwrap_or(StateId::ALIVE)
    }

    /// Return true if an object can be in both states because
    /// they belong to different dimensions.
    pub fn are_orthogonal(&self, a: StateId, b: StateId) -> bool {
        if self.refines(a, b) || self.refines(b, a) {
            return false;
        }
        let lca = self.lca(a, b);
        if self.is_dimension(lca) {
            return false;
        }
        let dim = |s| self.child_towards(lca, s).map_or(false, |c| self.is_dimension(c));
        dim(a) || dim(b)
    }

    /// Return true if an object can never be in both states.
    pub fn are_exclusive(&self, a: StateId, b: StateId) -> bool {
        !self.refines(a, b) && !self.refines(b, a) && !self.are_orthogonal(a, b)
    }

    /// Node below which a field is materialised.
    pub fn field_root(&self, field: &str) -> Option<StateId> {
        self.fields.get(field).copied()
    }

    /// Fields materialised at or below a node.
    pub fn fields_under(&self, root: StateId) -> impl Iterator<Item = &str> + '_ {
        self.fields
            .iter()
            .filter(move |(_, n)| self.refines(**n, root))
            .map(|(f, _)| f.as_str())
    }

    /// Return true if the state claims imply being in state `s`.
    pub fn implies(&self, claims: &[StateId], s: StateId) -> bool {
        claims.iter().any(|c| self.refines(*c, s))
    }

    /// Add `s` to a set of claimed states, keeping only the most precise claims.
    ///
    /// Return false if `s` contradicts one of the claims.
    pub fn learn(&self, claims: &mut Vec<StateId>, s: StateId) -> bool {
        if self.implies(claims, s) {
            return true;
        }
        if claims.iter().any(|c| self.are_exclusive(*c, s)) {
            return false;
        }
        claims.retain(|c| !self.refines(s, *c));
        claims.push(s);
        claims.sort();
        true
    }

    /// Return true if some claim of `a` excludes some claim of `b`.
    pub fn conflict(&self, a: &[StateId], b: &[StateId]) -> bool {
        a.iter()
            .any(|x| b.iter().any(|y| self.are_exclusive(*x, *y)))
    }

    /// Most precise claims implied by both given claims.
    pub fn join_claims(&self, a: &[StateId], b: &[StateId]) -> Vec<StateId> {
        let mut joined: Vec<StateId> = Vec::new();
        for x in a {
            for y in b {
                let j = if self.are_orthogonal(*x, *y) {
                    continue;
                } else {
                    self.common_ancestor(*x, *y)
                };
                if j != StateId::ALIVE && !joined.contains(&j) {
                    joined.push(j)
                }
            }
        }
        // keep only the most precise claims
        let all = joined.clone();
        joined.retain(|j| !all.iter().any(|k| k != j && self.refines(*k, *j)));
        joined.sort();
        joined
    }

    /// Render a set of claims as state names.
    pub fn display_claims<'a>(&'a self, claims: &'a [StateId]) -> impl Display + 'a {
        Claims(self, claims)
    }
}

struct Claims<'a>(&'a StateSpace, &'a [StateId]);

impl<'a> Display for Claims<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut iter = self.1.iter();
        if let Some(s) = iter.next() {
            write!(f, "{}", self.0.name(*s))?;
        }
        iter.try_for_each(|s| write!(f, ", {}", self.0.name(*s)))
    }
}

impl Display for StateSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.ty)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// File with states Open/Closed, Open having dimensions Mode and Pos.
    pub fn file() -> StateSpace {
        let mut b = StateSpaceBuilder::new("File");
        b.state("Open", ALIVE).unwrap();
        b.state("Closed", ALIVE).unwrap();
        b.dimension("Mode", "Open").unwrap();
        b.state("Reading", "Mode").unwrap();
        b.state("Writing", "Mode").unwrap();
        b.dimension("Pos", "Open").unwrap();
        b.state("Start", "Pos").unwrap();
        b.state("End", "Pos").unwrap();
        b.field("handle", "Open").unwrap();
        b.field("name", ALIVE).unwrap();
        b.build()
    }

    #[test]
    fn refinement() {
        let f = file();
        let s = |n| f.lookup(n).unwrap();
        assert!(f.refines(s("Reading"), s("Open")));
        assert!(f.refines(s("Reading"), s(ALIVE)));
        assert!(f.refines(s("Open"), s("Open")));
        assert!(!f.refines(s("Open"), s("Reading")));
        assert_eq!(f.ancestors(s("End")).count(), 4);
        assert_eq!(f.states_under(s("Open")).count(), 5);
        assert_eq!(f.partitions(s("Open")).len(), 2);
        assert_eq!(f.partitions(s(ALIVE)), [[s("Open"), s("Closed")]]);
    }

    #[test]
    fn orthogonality() {
        let f = file();
        let s = |n| f.lookup(n).unwrap();
        assert!(f.are_orthogonal(s("Reading"), s("Start")));
        assert!(f.are_exclusive(s("Reading"), s("Writing")));
        assert!(f.are_exclusive(s("Open"), s("Closed")));
        assert!(f.are_exclusive(s("Reading"), s("Closed")));
        assert!(!f.are_exclusive(s("Reading"), s("Open")));
        assert_eq!(f.common_ancestor(s("Reading"), s("Writing")), s("Open"));
        assert_eq!(f.common_ancestor(s("Reading"), s("Closed")), StateId::ALIVE);
    }

    #[test]
    fn claims() {
        let f = file();
        let s = |n| f.lookup(n).unwrap();
        let mut c = Vec::new();
        assert!(f.learn(&mut c, s("Open")));
        assert!(f.learn(&mut c, s("Reading")));
        assert!(f.learn(&mut c, s("End")));
        assert_eq!(c, [s("Reading"), s("End")]);
        assert!(f.implies(&c, s("Open")));
        assert!(!f.learn(&mut c, s("Closed")));
        assert!(f.conflict(&c, &[s("Writing")]));

        let joined = f.join_claims(&c, &[s("Writing"), s("End")]);
        assert_eq!(joined, [s("End")]);
        let joined = f.join_claims(&[s("Reading")], &[s("Writing")]);
        assert_eq!(joined, [s("Open")]);
    }

    #[test]
    fn errors() {
        let mut b = StateSpaceBuilder::new("T");
        assert_eq!(b.state("A", "B"), Err(Error::UnknownState("B".into())));
        b.state("A", ALIVE).unwrap();
        assert_eq!(b.state("A", ALIVE), Err(Error::DuplicateState("A".into())));
        b.field("f", "A").unwrap();
        assert_eq!(b.field("f", "A"), Err(Error::DuplicateField("f".into())));
    }
}
