//! Parsing of permission expressions.
//!
//! The parser keeps a stack of pending continuations
//! (open parentheses, binary operators waiting for their right-hand side,
//! implications waiting for their consequence)
//! and reduces it whenever an operator of lower binding strength,
//! a closing parenthesis, or the end of input is encountered.

use crate::expr::{Expr, Fraction, Implication, Kind, Perm, Primary, Ref};
use crate::Token;
use alloc::{boxed::Box, vec::Vec};
use core::fmt::{self, Display};
use core::iter::Peekable;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// unrecognised character at the given byte offset
    Lex(usize),
    EmptyInput,
    ExpectedAtom,
    ExpectedRef,
    ExpectedState,
    ExpectedFraction,
    ExpectedOperator,
    ExpectedComma,
    ExpectedRPar,
    UnknownKind,
    UnclosedLPar,
    UnmatchedRPar,
    /// the left-hand side of `=>` is not of the shape `ref == true/false`
    InvalidAntecedent,
    /// denominator of a fraction is zero or smaller than its numerator
    InvalidFraction,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Lex(pos) => write!(f, "unrecognised character at offset {}", pos),
            Self::EmptyInput => "empty expression".fmt(f),
            Self::ExpectedAtom => "expected permission, state test or `(`".fmt(f),
            Self::ExpectedRef => "expected reference".fmt(f),
            Self::ExpectedState => "expected state name".fmt(f),
            Self::ExpectedFraction => "expected fraction".fmt(f),
            Self::ExpectedOperator => "expected operator".fmt(f),
            Self::ExpectedComma => "expected `,` or `)`".fmt(f),
            Self::ExpectedRPar => "expected `)`".fmt(f),
            Self::UnknownKind => "unknown permission kind".fmt(f),
            Self::UnclosedLPar => "unclosed `(`".fmt(f),
            Self::UnmatchedRPar => "unmatched `)`".fmt(f),
            Self::InvalidAntecedent => "implication antecedent must be `ref == bool`".fmt(f),
            Self::InvalidFraction => "invalid fraction".fmt(f),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Op {
    Tensor,
    With,
    Alt,
}

impl Op {
    fn prec(self) -> u8 {
        match self {
            Self::Alt => 1,
            Self::Tensor | Self::With => 2,
        }
    }

    fn apply<S>(self, l: Expr<S>, r: Expr<S>) -> Expr<S> {
        let (l, r) = (Box::new(l), Box::new(r));
        match self {
            Self::Tensor => Expr::Tensor(l, r),
            Self::With => Expr::With(l, r),
            Self::Alt => Expr::Alt(l, r),
        }
    }
}

#[derive(Debug)]
enum Cont<S> {
    LPar,
    /// `l op`
    Binary(Expr<S>, Op),
    /// `ref == value =>`
    Implies(Ref<S>, bool),
}

/// What follows a complete operand.
enum Loop<S> {
    /// `op`, the operand is to be pushed as left-hand side
    Operator(Expr<S>, Op),
    /// `)`
    Close(Expr<S>),
    /// `=>`
    Implies(Expr<S>),
    End(Expr<S>),
}

struct Ctx<S> {
    stack: Vec<Cont<S>>,
}

impl<S> Ctx<S> {
    /// Pop binary operators binding at least as strongly as `prec`.
    fn reduce_ops(&mut self, mut e: Expr<S>, prec: u8) -> Expr<S> {
        while let Some(Cont::Binary(_, op)) = self.stack.last() {
            if op.prec() < prec {
                break;
            }
            if let Some(Cont::Binary(l, op)) = self.stack.pop() {
                e = op.apply(l, e)
            }
        }
        e
    }

    /// Pop everything up to and including the innermost open parenthesis.
    ///
    /// Return true if such a parenthesis was found.
    fn reduce_all(&mut self, mut e: Expr<S>) -> (bool, Expr<S>) {
        while let Some(cont) = self.stack.pop() {
            e = match cont {
                Cont::LPar => return (true, e),
                Cont::Binary(l, op) => op.apply(l, e),
                Cont::Implies(antecedent, value) => Expr::Implies(Implication {
                    antecedent,
                    value,
                    then: Box::new(e),
                }),
            }
        }
        (false, e)
    }
}

fn reference<'s, S, I>(first: Token<'s>, iter: &mut Peekable<I>) -> Result<Ref<S>>
where
    S: From<&'s str>,
    I: Iterator<Item = Token<'s>>,
{
    match first {
        Token::Ident(name) => {
            if iter.next_if_eq(&Token::Frame).is_some() {
                Ok(Ref::Frame(name.into()))
            } else {
                Ok(Ref::Name(name.into()))
            }
        }
        Token::Hash => match iter.next() {
            Some(Token::Number(n)) => n.parse().map(Ref::Param).map_err(|_| Error::ExpectedRef),
            _ => Err(Error::ExpectedRef),
        },
        _ => Err(Error::ExpectedRef),
    }
}

fn number(n: &str) -> Result<u32> {
    n.parse().map_err(|_| Error::InvalidFraction)
}

fn fraction<'s, S, I>(iter: &mut Peekable<I>) -> Result<Fraction<S>>
where
    S: From<&'s str>,
    I: Iterator<Item = Token<'s>>,
{
    match iter.next() {
        Some(Token::One) => Ok(Fraction::One),
        Some(Token::Zero) => Ok(Fraction::Zero),
        Some(Token::Ident(x)) => Ok(Fraction::Named(x.into())),
        Some(Token::Number(n)) => {
            let n = number(n)?;
            let d = match iter.next_if_eq(&Token::Slash) {
                None => 1,
                Some(_) => match iter.next() {
                    Some(Token::Number(d)) => number(d)?,
                    _ => return Err(Error::ExpectedFraction),
                },
            };
            match (n, d) {
                (_, 0) => Err(Error::InvalidFraction),
                (0, _) => Ok(Fraction::Zero),
                (n, d) if n == d => Ok(Fraction::One),
                (n, d) if n < d => Ok(Fraction::Ratio(n, d)),
                _ => Err(Error::InvalidFraction),
            }
        }
        _ => Err(Error::ExpectedFraction),
    }
}

/// Parse a comma-separated list of state names following `in`.
fn states<'s, S, I>(iter: &mut Peekable<I>) -> Result<Vec<S>>
where
    S: From<&'s str>,
    I: Iterator<Item = Token<'s>>,
{
    let mut states = Vec::new();
    loop {
        match iter.next() {
            Some(Token::Ident(s)) => states.push(s.into()),
            _ => return Err(Error::ExpectedState),
        }
        if iter.next_if_eq(&Token::Comma).is_none() {
            return Ok(states);
        }
    }
}

/// Parse the arguments of a permission atom after `kind(`.
fn perm<'s, S, I>(kind: Kind, iter: &mut Peekable<I>) -> Result<Perm<S>>
where
    S: From<&'s str>,
    I: Iterator<Item = Token<'s>>,
{
    let target = reference(iter.next().ok_or(Error::ExpectedRef)?, iter)?;
    let mut root = None;
    let mut fractions = Vec::new();
    loop {
        match iter.next() {
            Some(Token::RPar) => break,
            Some(Token::Comma) => (),
            _ => return Err(Error::ExpectedComma),
        }
        match iter.next() {
            Some(Token::Ident(node)) => {
                if iter.next_if_eq(&Token::Assign).is_some() {
                    fractions.push((node.into(), fraction(iter)?))
                } else if root.is_none() && fractions.is_empty() {
                    root = Some(node.into())
                } else {
                    return Err(Error::ExpectedComma);
                }
            }
            _ => return Err(Error::ExpectedState),
        }
    }
    let states = match iter.next_if_eq(&Token::In) {
        Some(_) => states(iter)?,
        None => Vec::new(),
    };
    Ok(Perm {
        kind,
        target,
        root,
        fractions,
        states,
    })
}

fn primary<'s, S, I>(token: Token<'s>, iter: &mut Peekable<I>) -> Result<Primary<S>>
where
    S: From<&'s str>,
    I: Iterator<Item = Token<'s>>,
{
    match token {
        Token::Null => Ok(Primary::Null),
        Token::True => Ok(Primary::Bool(true)),
        Token::False => Ok(Primary::Bool(false)),
        tok => reference(tok, iter).map(Primary::Ref),
    }
}

/// Parse an atom that is not a parenthesised expression.
fn atom<'s, S, I>(token: Token<'s>, iter: &mut Peekable<I>) -> Result<Expr<S>>
where
    S: From<&'s str>,
    I: Iterator<Item = Token<'s>>,
{
    if let Token::Ident(name) = token {
        if iter.next_if_eq(&Token::LPar).is_some() {
            let kind = Kind::from_keyword(name).ok_or(Error::UnknownKind)?;
            return perm(kind, iter).map(Expr::Perm);
        }
    }
    if !matches!(
        token,
        Token::Ident(_) | Token::Hash | Token::Null | Token::True | Token::False
    ) {
        return Err(Error::ExpectedAtom);
    }
    let l = primary(token, iter)?;
    match (l, iter.peek().cloned()) {
        (l, Some(op @ Token::EqEq)) | (l, Some(op @ Token::NotEq)) => {
            iter.next();
            let eq = op == Token::EqEq;
            let r = primary(iter.next().ok_or(Error::ExpectedAtom)?, iter)?;
            Ok(if eq { Expr::Eq(l, r) } else { Expr::Ne(l, r) })
        }
        (Primary::Ref(r), Some(Token::In)) => {
            iter.next();
            Ok(Expr::InState(r, states(iter)?))
        }
        (Primary::Bool(b), _) => Ok(Expr::Bool(b)),
        _ => Err(Error::ExpectedOperator),
    }
}

/// Turn the operand preceding `=>` into an antecedent.
fn antecedent<S>(e: Expr<S>) -> Result<(Ref<S>, bool)> {
    match e {
        Expr::Eq(Primary::Ref(r), Primary::Bool(b)) | Expr::Eq(Primary::Bool(b), Primary::Ref(r)) => {
            Ok((r, b))
        }
        Expr::Ne(Primary::Ref(r), Primary::Bool(b)) | Expr::Ne(Primary::Bool(b), Primary::Ref(r)) => {
            Ok((r, !b))
        }
        _ => Err(Error::InvalidAntecedent),
    }
}

impl<S> Expr<S> {
    /// Parse a sequence of tokens (without whitespace) into an expression.
    pub fn parse<'s, I>(iter: I) -> Result<Self>
    where
        S: From<&'s str>,
        I: Iterator<Item = Token<'s>>,
    {
        let mut iter = iter.peekable();
        let mut ctx = Ctx { stack: Vec::new() };
        if iter.peek().is_none() {
            return Err(Error::EmptyInput);
        }

        loop {
            // operand
            let e = match iter.next() {
                Some(Token::LPar) => {
                    ctx.stack.push(Cont::LPar);
                    continue;
                }
                Some(tok) => atom(tok, &mut iter)?,
                None => return Err(Error::ExpectedAtom),
            };
            let mut next = Self::after(e, &mut iter)?;

            // what follows the operand
            loop {
                match next {
                    Loop::Operator(e, op) => {
                        let e = ctx.reduce_ops(e, op.prec());
                        ctx.stack.push(Cont::Binary(e, op));
                        break;
                    }
                    Loop::Implies(e) => {
                        let (r, b) = antecedent(e)?;
                        ctx.stack.push(Cont::Implies(r, b));
                        break;
                    }
                    Loop::Close(e) => match ctx.reduce_all(e) {
                        (true, e) => next = Self::after(e, &mut iter)?,
                        (false, _) => return Err(Error::UnmatchedRPar),
                    },
                    Loop::End(e) => {
                        return match ctx.reduce_all(e) {
                            (true, _) => Err(Error::UnclosedLPar),
                            (false, e) => Ok(e),
                        }
                    }
                }
            }
        }
    }

    fn after<'s, I>(e: Self, iter: &mut Peekable<I>) -> Result<Loop<S>>
    where
        I: Iterator<Item = Token<'s>>,
    {
        Ok(match iter.next() {
            None => Loop::End(e),
            Some(Token::RPar) => Loop::Close(e),
            Some(Token::Tensor) => Loop::Operator(e, Op::Tensor),
            Some(Token::With) => Loop::Operator(e, Op::With),
            Some(Token::Alt) => Loop::Operator(e, Op::Alt),
            Some(Token::Implies) => Loop::Implies(e),
            Some(_) => return Err(Error::ExpectedOperator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::{String, ToString};

    fn parse(s: &str) -> Result<Expr<&str>> {
        crate::parse(s)
    }

    fn roundtrip(s: &str) -> String {
        parse(s).unwrap().to_string()
    }

    #[test]
    fn positive() -> Result<()> {
        parse("unique(this)")?;
        parse("unique(this) * full(#0) in Open")?;
        parse("full(this!fr, Open) in Ready, Idle")?;
        parse("share(x, alive, alive = 1/2) & pure(y)")?;
        parse("(a in Open | b in Closed) tens c != null")?;
        parse("result == true => full(this) in Open")?;
        parse("((((pure(#12)))))")?;
        parse("false")?;
        parse("true * x == false")?;
        Ok(())
    }

    #[test]
    fn negative() {
        use Error::*;
        let err = |s| parse(s).unwrap_err();
        assert_eq!(err(""), EmptyInput);
        assert_eq!(err("full"), ExpectedOperator);
        assert_eq!(err("fool(this)"), UnknownKind);
        assert_eq!(err("full(this"), ExpectedComma);
        assert_eq!(err("full(this, A, B)"), ExpectedComma);
        assert_eq!(err("full(this) in"), ExpectedState);
        assert_eq!(err("(full(this)"), UnclosedLPar);
        assert_eq!(err("full(this))"), UnmatchedRPar);
        assert_eq!(err("full(this) *"), ExpectedAtom);
        assert_eq!(err("full(this) pure(x)"), ExpectedOperator);
        assert_eq!(err("x in A => full(this)"), InvalidAntecedent);
        assert_eq!(err("x == null => full(this)"), InvalidAntecedent);
        assert_eq!(err("full(this, x = 3/2)"), InvalidFraction);
        assert_eq!(err("full(this, x = 1/0)"), InvalidFraction);
        assert_eq!(err("full(#x)"), ExpectedRef);
        assert_eq!(err("x ? y"), Lex(2));
    }

    #[test]
    fn structure() -> Result<()> {
        let e = parse("unique(this) * full(#0) in Open")?;
        let (l, r) = match e {
            Expr::Tensor(l, r) => (l, r),
            _ => panic!("tensor expected"),
        };
        match *l {
            Expr::Perm(p) => {
                assert_eq!(p.kind, Kind::Unique);
                assert_eq!(p.target, Ref::Name("this"));
            }
            _ => panic!("permission expected"),
        }
        match *r {
            Expr::Perm(p) => {
                assert_eq!(p.kind, Kind::Full);
                assert_eq!(p.target, Ref::Param(0));
                assert_eq!(p.states, ["Open"]);
            }
            _ => panic!("permission expected"),
        }

        let e = parse("a == true => full(x) * pure(y)")?;
        match e {
            Expr::Implies(imp) => {
                assert_eq!(imp.antecedent, Ref::Name("a"));
                assert!(imp.value);
                assert!(matches!(*imp.then, Expr::Tensor(..)));
            }
            _ => panic!("implication expected"),
        }

        assert_eq!(parse("a != false => x in S")?, parse("a == true => x in S")?);
        Ok(())
    }

    #[test]
    fn precedence() {
        assert_eq!(roundtrip("a in A | b in B * c in C"), "a in A | b in B * c in C");
        assert_eq!(roundtrip("(a in A | b in B) * c in C"), "(a in A | b in B) * c in C");
        assert_eq!(roundtrip("a in A * (b in B & c in C)"), "a in A * (b in B & c in C)");
        assert_eq!(roundtrip("a in A * b in B & c in C"), "a in A * b in B & c in C");
        assert_eq!(
            roundtrip("x in S * (f == true => pure(f))"),
            "x in S * (f == true => pure(f))"
        );
        assert_eq!(
            roundtrip("full(this!fr,Open,Open=1/2)in A,B"),
            "full(this!fr, Open, Open = 1/2) in A, B"
        );
        assert_eq!(roundtrip("imm(x, alive = 2/2)"), "immutable(x, alive = one)");
    }
}
