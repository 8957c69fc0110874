//! Common error type.

use crate::state::Error as StateError;
use alloc::string::String;
use core::fmt::{self, Display};
use perm_parse::Error as ParseError;

/// Error in an annotation or a state declaration.
///
/// These are errors in the user's annotations,
/// as opposed to failed checks, which are reported as diagnostics.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Parse { text: String, error: ParseError },
    State(StateError),
    /// state name not declared by the type of a reference
    UnknownState { space: String, state: String },
    /// parameter (`#n` or `this`) mentioned in a state invariant
    ParamInInvariant(String),
    /// antecedent of an implication that is not a known name
    UnknownAntecedent(String),
}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        Self::State(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Parse { text, error } => write!(f, "\"{}\" did not parse: {}", text, error),
            Self::State(e) => e.fmt(f),
            Self::UnknownState { space, state } => write!(f, "{} has no state {}", space, state),
            Self::ParamInInvariant(p) => write!(f, "parameter {} used in state invariant", p),
            Self::UnknownAntecedent(a) => write!(f, "unknown implication antecedent {}", a),
        }
    }
}
