//! Object locations and the names that refer to them.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use core::fmt::{self, Display};

/// Name of the receiver in permission expressions.
pub const THIS: &str = "this";
/// Name of the returned object in permission expressions.
pub const RESULT: &str = "result";

/// Name of the `n`-th positional parameter, such as `#0`.
pub fn param(n: usize) -> String {
    format!("#{}", n)
}

/// Abstract object location, as determined by the surrounding analysis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loc(pub u32);

impl Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Mapping from names in permission expressions to locations.
///
/// Names are [`THIS`], [`RESULT`], parameter names,
/// positional parameters (see [`param`]), or field names.
pub type Args = BTreeMap<String, Loc>;
