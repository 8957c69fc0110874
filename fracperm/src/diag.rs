//! Descriptions of failed checks.

use crate::Loc;
use alloc::string::String;
use core::fmt::{self, Display};

/// Kind of check that failed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Precondition,
    Postcondition,
    Invariant,
    FieldAccess,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Precondition => "precondition",
            Self::Postcondition => "postcondition",
            Self::Invariant => "invariant",
            Self::FieldAccess => "field access",
        }
        .fmt(f)
    }
}

/// Failed check at a location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: Loc,
    pub phase: Phase,
    /// what was required, such as a permission or a state
    pub required: String,
    /// what was available
    pub actual: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} violated at {}: required {}, but found {}",
            self.phase, self.location, self.required, self.actual
        )
    }
}
