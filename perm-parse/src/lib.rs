//! Parser for permission and typestate annotations.
//!
//! A permission expression combines
//! permission atoms such as `full(this, Open) in Ready`,
//! state tests such as `x in Closed`,
//! (in)equalities such as `#0 != null`, and
//! implications such as `result == true => full(this) in Open`
//! with the connectives `*` (also `tens`), `&` (also `with`), and
//! `|` (also `+` or `alt`).
//!
//! Example usage:
//!
//! ~~~
//! use perm_parse::{Expr, Error};
//!
//! let e: Expr<String> = perm_parse::parse("unique(this) * full(#0) in Open")?;
//! assert_eq!(e.to_string(), "unique(this) * full(#0) in Open");
//!
//! assert!(perm_parse::parse::<&str>("false")?.is_impossible());
//! assert_eq!(perm_parse::parse_error("full(this"), Some(Error::ExpectedComma));
//! # Ok::<_, Error>(())
//! ~~~
#![no_std]

extern crate alloc;

pub mod expr;
pub mod lex;
mod parse;

pub use expr::{Expr, Fraction, Implication, Kind, Perm, Primary, Ref, Visitor};
pub use lex::Token;
pub use parse::{Error, Result};

use core::ops::Range;
use logos::Logos;

/// Lex a string, omitting whitespace, and yield tokens with their byte ranges.
pub fn lex(s: &str) -> impl Iterator<Item = (Token<'_>, Range<usize>)> {
    Token::lexer(s)
        .spanned()
        .filter(|(token, _)| *token != Token::Space)
}

/// Parse a permission expression.
pub fn parse<'s, S: From<&'s str>>(s: &'s str) -> Result<Expr<S>> {
    if let Some((_, span)) = lex(s).find(|(token, _)| *token == Token::Error) {
        return Err(Error::Lex(span.start));
    }
    Expr::parse(lex(s).map(|(token, _)| token))
}

/// Return true if the string is a well-formed permission expression.
///
/// This is different from the expression being satisfiable:
///
/// ~~~
/// assert!(perm_parse::will_parse("false"));
/// assert!(!perm_parse::will_parse("full(this) *"));
/// ~~~
pub fn will_parse(s: &str) -> bool {
    parse_error(s).is_none()
}

/// Return the reason why a string is not a well-formed permission expression.
pub fn parse_error(s: &str) -> Option<Error> {
    parse::<&str>(s).err()
}
