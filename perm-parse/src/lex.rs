use core::fmt::{self, Display};
use logos::Logos;

#[derive(Logos, Clone, Debug, PartialEq, Eq)]
pub enum Token<'s> {
    #[token("(")]
    LPar,

    #[token(")")]
    RPar,

    #[token(",")]
    Comma,

    #[token("#")]
    Hash,

    /// Frame view suffix, as in `this!fr`
    #[token("!fr")]
    Frame,

    #[token("=")]
    Assign,

    #[token("/")]
    Slash,

    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token("=>")]
    #[token("implies")]
    Implies,

    #[token("*")]
    #[token("tens")]
    Tensor,

    #[token("&")]
    #[token("with")]
    With,

    #[token("|")]
    #[token("+")]
    #[token("alt")]
    Alt,

    #[token("in")]
    In,

    #[token("null")]
    Null,

    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("one")]
    One,

    #[token("zero")]
    Zero,

    #[regex("[A-Za-z_][A-Za-z0-9_]*")]
    Ident(&'s str),

    #[regex("[0-9]+")]
    Number(&'s str),

    #[regex(r"[ \t\r\n\f]+")]
    Space,

    #[error]
    Error,
}

impl<'s> Display for Token<'s> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LPar => "(",
            Self::RPar => ")",
            Self::Comma => ",",
            Self::Hash => "#",
            Self::Frame => "!fr",
            Self::Assign => "=",
            Self::Slash => "/",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Implies => "=>",
            Self::Tensor => "*",
            Self::With => "&",
            Self::Alt => "|",
            Self::In => "in",
            Self::Null => "null",
            Self::True => "true",
            Self::False => "false",
            Self::One => "one",
            Self::Zero => "zero",
            Self::Ident(s) | Self::Number(s) => s,
            Self::Space => " ",
            Self::Error => return Err(Default::default()),
        };
        s.fmt(f)
    }
}

#[test]
fn aliases() {
    let lex = |s| crate::lex(s).map(|(tok, _)| tok).collect::<alloc::vec::Vec<_>>();
    use Token::*;
    assert_eq!(lex("a tens b * c"), [Ident("a"), Tensor, Ident("b"), Tensor, Ident("c")]);
    assert_eq!(lex("a alt b + c | d").iter().filter(|t| **t == Alt).count(), 3);
    assert_eq!(lex("x==true=>y"), [Ident("x"), EqEq, True, Implies, Ident("y")]);
    assert_eq!(lex("this!fr"), [Ident("this"), Frame]);
    assert_eq!(lex("#12"), [Hash, Number("12")]);
    // keywords are not prefixes of identifiers
    assert_eq!(lex("inside"), [Ident("inside")]);
    assert_eq!(lex("x ? y")[1], Error);
}
