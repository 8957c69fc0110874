//! Abstract syntax of permission expressions.

use alloc::{boxed::Box, vec::Vec};
use core::fmt::{self, Display};

/// Permission kinds as written in annotations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Unique,
    Full,
    Share,
    Immutable,
    Pure,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::Unique,
        Kind::Full,
        Kind::Share,
        Kind::Immutable,
        Kind::Pure,
    ];

    /// Recognise a kind keyword (`imm` abbreviates `immutable`).
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "unique" => Some(Self::Unique),
            "full" => Some(Self::Full),
            "share" => Some(Self::Share),
            "immutable" | "imm" => Some(Self::Immutable),
            "pure" => Some(Self::Pure),
            _ => None,
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unique => "unique",
            Self::Full => "full",
            Self::Share => "share",
            Self::Immutable => "immutable",
            Self::Pure => "pure",
        }
        .fmt(f)
    }
}

/// Reference to an object: a name, the frame view of a name, or a positional parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ref<S> {
    /// `this`, `result`, a parameter or field name
    Name(S),
    /// `this!fr`
    Frame(S),
    /// `#n`
    Param(usize),
}

impl<S> Ref<S> {
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame(_))
    }

    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> Ref<T> {
        match self {
            Self::Name(s) => Ref::Name(f(s)),
            Self::Frame(s) => Ref::Frame(f(s)),
            Self::Param(n) => Ref::Param(n),
        }
    }
}

/// Operand of an (in)equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Primary<S> {
    Ref(Ref<S>),
    Null,
    Bool(bool),
}

/// Fraction annotation of a permission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fraction<S> {
    Zero,
    One,
    /// `n/d`
    Ratio(u32, u32),
    /// universally quantified fraction variable
    Named(S),
}

/// Permission atom `kind(ref, root, node = fraction, ...) in s1, s2`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Perm<S> {
    pub kind: Kind,
    pub target: Ref<S>,
    /// root state node, `alive` if omitted
    pub root: Option<S>,
    pub fractions: Vec<(S, Fraction<S>)>,
    /// states guaranteed in addition to the root
    pub states: Vec<S>,
}

/// Implication `ref == value => then`.
///
/// The antecedent always mentions exactly one reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Implication<S> {
    pub antecedent: Ref<S>,
    pub value: bool,
    pub then: Box<Expr<S>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr<S> {
    /// `true` (no requirement) or `false` (impossible)
    Bool(bool),
    Perm(Perm<S>),
    /// `ref in s1, s2`
    InState(Ref<S>, Vec<S>),
    Eq(Primary<S>, Primary<S>),
    Ne(Primary<S>, Primary<S>),
    Implies(Implication<S>),
    /// `l * r`
    Tensor(Box<Self>, Box<Self>),
    /// `l & r`
    With(Box<Self>, Box<Self>),
    /// `l | r`
    Alt(Box<Self>, Box<Self>),
}

/// Consumer of expressions, with one method per node kind.
pub trait Visitor<S> {
    type Output;

    fn truth(&mut self, b: bool) -> Self::Output;
    fn perm(&mut self, perm: &Perm<S>) -> Self::Output;
    fn in_state(&mut self, r: &Ref<S>, states: &[S]) -> Self::Output;
    fn equals(&mut self, l: &Primary<S>, r: &Primary<S>) -> Self::Output;
    fn not_equals(&mut self, l: &Primary<S>, r: &Primary<S>) -> Self::Output;
    fn implies(&mut self, imp: &Implication<S>) -> Self::Output;
    fn tensor(&mut self, l: &Expr<S>, r: &Expr<S>) -> Self::Output;
    fn with(&mut self, l: &Expr<S>, r: &Expr<S>) -> Self::Output;
    fn alt(&mut self, l: &Expr<S>, r: &Expr<S>) -> Self::Output;
}

impl<S> Expr<S> {
    pub fn accept<V: Visitor<S>>(&self, v: &mut V) -> V::Output {
        match self {
            Self::Bool(b) => v.truth(*b),
            Self::Perm(p) => v.perm(p),
            Self::InState(r, states) => v.in_state(r, states),
            Self::Eq(l, r) => v.equals(l, r),
            Self::Ne(l, r) => v.not_equals(l, r),
            Self::Implies(imp) => v.implies(imp),
            Self::Tensor(l, r) => v.tensor(l, r),
            Self::With(l, r) => v.with(l, r),
            Self::Alt(l, r) => v.alt(l, r),
        }
    }

    /// Return true if the expression is the literal `false`.
    pub fn is_impossible(&self) -> bool {
        matches!(self, Self::Bool(false))
    }

    /// Binding strength, used to print with minimal parentheses.
    fn prec(&self) -> u8 {
        match self {
            Self::Implies(_) => 0,
            Self::Alt(..) => 1,
            Self::Tensor(..) | Self::With(..) => 2,
            _ => 3,
        }
    }
}

impl<S: Display> Display for Ref<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Name(s) => s.fmt(f),
            Self::Frame(s) => write!(f, "{}!fr", s),
            Self::Param(n) => write!(f, "#{}", n),
        }
    }
}

impl<S: Display> Display for Primary<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ref(r) => r.fmt(f),
            Self::Null => "null".fmt(f),
            Self::Bool(b) => b.fmt(f),
        }
    }
}

impl<S: Display> Display for Fraction<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Zero => "zero".fmt(f),
            Self::One => "one".fmt(f),
            Self::Ratio(n, d) => write!(f, "{}/{}", n, d),
            Self::Named(s) => s.fmt(f),
        }
    }
}

fn states<S: Display>(f: &mut fmt::Formatter, states: &[S]) -> fmt::Result {
    let mut iter = states.iter();
    if let Some(s) = iter.next() {
        write!(f, " in {}", s)?;
    }
    iter.try_for_each(|s| write!(f, ", {}", s))
}

impl<S: Display> Display for Perm<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({}", self.kind, self.target)?;
        if let Some(root) = &self.root {
            write!(f, ", {}", root)?;
        }
        for (node, frac) in &self.fractions {
            write!(f, ", {} = {}", node, frac)?;
        }
        write!(f, ")")?;
        states(f, &self.states)
    }
}

impl<S: Display> Expr<S> {
    fn fmt_child(&self, f: &mut fmt::Formatter, child: &Self, strict: bool) -> fmt::Result {
        let (p, c) = (self.prec(), child.prec());
        if c < p || (strict && c == p) {
            write!(f, "({})", child)
        } else {
            child.fmt(f)
        }
    }

    fn fmt_binary(&self, f: &mut fmt::Formatter, l: &Self, op: &str, r: &Self) -> fmt::Result {
        self.fmt_child(f, l, false)?;
        write!(f, " {} ", op)?;
        self.fmt_child(f, r, true)
    }
}

impl<S: Display> Display for Expr<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bool(b) => b.fmt(f),
            Self::Perm(p) => p.fmt(f),
            Self::InState(r, ss) => {
                r.fmt(f)?;
                states(f, ss)
            }
            Self::Eq(l, r) => write!(f, "{} == {}", l, r),
            Self::Ne(l, r) => write!(f, "{} != {}", l, r),
            Self::Implies(imp) => {
                write!(f, "{} == {} => {}", imp.antecedent, imp.value, imp.then)
            }
            Self::Tensor(l, r) => self.fmt_binary(f, l, "*", r),
            Self::With(l, r) => self.fmt_binary(f, l, "&", r),
            Self::Alt(l, r) => self.fmt_binary(f, l, "|", r),
        }
    }
}
