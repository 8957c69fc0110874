//! Visitors that extract requirements from permission expressions.
//!
//! Every visitor understands conjunctions (`*` and `&`) of the atoms it is
//! interested in. Other connectives are skipped with a warning.

use crate::error::Error;
use crate::loc::{self, RESULT, THIS};
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use perm_parse::{Expr, Implication, Perm, Primary, Ref, Visitor};

/// How names in an expression are interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// names denote the receiver, parameters, and the result of a method
    Params,
    /// names denote fields, as in state invariants
    Fields,
}

/// Name under which a reference is stored, and whether it is a frame reference.
pub fn ref_name(r: &Ref<String>) -> (String, bool) {
    match r {
        Ref::Name(n) => (n.clone(), false),
        Ref::Frame(n) => (n.clone(), true),
        Ref::Param(n) => (loc::param(*n), false),
    }
}

fn check_mode(mode: Mode, r: &Ref<String>) -> Result<(), Error> {
    let (name, frame) = ref_name(r);
    let param = matches!(r, Ref::Param(_)) || name == THIS || name == RESULT;
    if mode == Mode::Fields && (frame || param) {
        Err(Error::ParamInInvariant(r.to_string()))
    } else {
        Ok(())
    }
}

/// Atoms of an expression concerning a single name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameAtoms {
    pub perms: Vec<Perm<String>>,
    /// whether the name is required to be null
    pub null: Option<bool>,
    /// value that a boolean name is required to have
    pub value: Option<bool>,
}

/// Collects permissions and facts per name.
///
/// Implications and state tests are left to
/// [`ImplicationVisitor`] and [`StateInfoVisitor`].
#[derive(Debug)]
pub struct PermVisitor {
    mode: Mode,
    pub names: BTreeMap<String, NameAtoms>,
    /// `(a, b, true)` if `a == b` is required, `(a, b, false)` if `a != b`
    pub equalities: Vec<(String, String, bool)>,
    /// true if the expression can never hold
    pub impossible: bool,
    /// skipped parts of the expression
    pub ignored: Vec<String>,
}

impl PermVisitor {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            names: BTreeMap::new(),
            equalities: Vec::new(),
            impossible: false,
            ignored: Vec::new(),
        }
    }

    fn name(&mut self, r: &Ref<String>) -> Result<&mut NameAtoms, Error> {
        check_mode(self.mode, r)?;
        Ok(self.names.entry(ref_name(r).0).or_default())
    }

    fn fact(&mut self, l: &Primary<String>, r: &Primary<String>, eq: bool) -> Result<(), Error> {
        use Primary::{Bool, Null};
        let learn = |known: &mut Option<bool>, value| match known {
            Some(v) => *v == value,
            None => {
                *known = Some(value);
                true
            }
        };
        let consistent = match (l, r) {
            (Primary::Ref(x), Null) | (Null, Primary::Ref(x)) => learn(&mut self.name(x)?.null, eq),
            (Primary::Ref(x), Bool(b)) | (Bool(b), Primary::Ref(x)) => {
                learn(&mut self.name(x)?.value, *b == eq)
            }
            (Primary::Ref(x), Primary::Ref(y)) => {
                check_mode(self.mode, x)?;
                check_mode(self.mode, y)?;
                let (x, y) = (ref_name(x).0, ref_name(y).0);
                self.equalities.push((x, y, eq));
                true
            }
            (l, r) => (l == r) == eq,
        };
        if !consistent {
            self.impossible = true
        }
        Ok(())
    }
}

fn ignore(ignored: &mut Vec<String>, l: &Expr<String>, r: &Expr<String>) {
    let e = format!("{} | {}", l, r);
    warn!("ignoring disjunction {}", e);
    ignored.push(e)
}

impl Visitor<String> for PermVisitor {
    type Output = Result<(), Error>;

    fn truth(&mut self, b: bool) -> Self::Output {
        self.impossible |= !b;
        Ok(())
    }

    fn perm(&mut self, perm: &Perm<String>) -> Self::Output {
        self.name(&perm.target)?.perms.push(perm.clone());
        Ok(())
    }

    fn in_state(&mut self, r: &Ref<String>, _: &[String]) -> Self::Output {
        check_mode(self.mode, r)
    }

    fn equals(&mut self, l: &Primary<String>, r: &Primary<String>) -> Self::Output {
        self.fact(l, r, true)
    }

    fn not_equals(&mut self, l: &Primary<String>, r: &Primary<String>) -> Self::Output {
        self.fact(l, r, false)
    }

    fn implies(&mut self, imp: &Implication<String>) -> Self::Output {
        check_mode(self.mode, &imp.antecedent)
    }

    fn tensor(&mut self, l: &Expr<String>, r: &Expr<String>) -> Self::Output {
        l.accept(self)?;
        r.accept(self)
    }

    fn with(&mut self, l: &Expr<String>, r: &Expr<String>) -> Self::Output {
        l.accept(self)?;
        r.accept(self)
    }

    fn alt(&mut self, l: &Expr<String>, r: &Expr<String>) -> Self::Output {
        ignore(&mut self.ignored, l, r);
        Ok(())
    }
}

/// Collects the states that references are required to be in.
///
/// States of permission atoms are not collected.
#[derive(Debug, Default)]
pub struct StateInfoVisitor {
    /// states per name and frame flag
    pub states: BTreeMap<(String, bool), Vec<String>>,
    pub ignored: Vec<String>,
}

impl Visitor<String> for StateInfoVisitor {
    type Output = ();

    fn truth(&mut self, _: bool) {}
    fn perm(&mut self, _: &Perm<String>) {}
    fn equals(&mut self, _: &Primary<String>, _: &Primary<String>) {}
    fn not_equals(&mut self, _: &Primary<String>, _: &Primary<String>) {}
    fn implies(&mut self, _: &Implication<String>) {}

    fn in_state(&mut self, r: &Ref<String>, states: &[String]) {
        let entry = self.states.entry(ref_name(r)).or_default();
        entry.extend(states.iter().cloned())
    }

    fn tensor(&mut self, l: &Expr<String>, r: &Expr<String>) {
        l.accept(self);
        r.accept(self)
    }

    fn with(&mut self, l: &Expr<String>, r: &Expr<String>) {
        l.accept(self);
        r.accept(self)
    }

    fn alt(&mut self, l: &Expr<String>, r: &Expr<String>) {
        ignore(&mut self.ignored, l, r)
    }
}

/// Collects the implications of an expression.
#[derive(Debug, Default)]
pub struct ImplicationVisitor {
    /// antecedent name, its value, and the consequence
    pub implications: Vec<(String, bool, Expr<String>)>,
    pub ignored: Vec<String>,
}

impl Visitor<String> for ImplicationVisitor {
    type Output = ();

    fn truth(&mut self, _: bool) {}
    fn perm(&mut self, _: &Perm<String>) {}
    fn in_state(&mut self, _: &Ref<String>, _: &[String]) {}
    fn equals(&mut self, _: &Primary<String>, _: &Primary<String>) {}
    fn not_equals(&mut self, _: &Primary<String>, _: &Primary<String>) {}

    fn implies(&mut self, imp: &Implication<String>) {
        let (name, _) = ref_name(&imp.antecedent);
        let then = (*imp.then).clone();
        self.implications.push((name, imp.value, then))
    }

    fn tensor(&mut self, l: &Expr<String>, r: &Expr<String>) {
        l.accept(self);
        r.accept(self)
    }

    fn with(&mut self, l: &Expr<String>, r: &Expr<String>) {
        l.accept(self);
        r.accept(self)
    }

    fn alt(&mut self, l: &Expr<String>, r: &Expr<String>) {
        ignore(&mut self.ignored, l, r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perm_parse::Kind;

    fn parse(s: &str) -> Expr<String> {
        perm_parse::parse(s).unwrap()
    }

    #[test]
    fn params() {
        let e = parse("unique(this) * full(#0) in Open * #0 != null & x == false");
        let mut v = PermVisitor::new(Mode::Params);
        e.accept(&mut v).unwrap();
        assert!(!v.impossible);
        assert_eq!(v.names["this"].perms[0].kind, Kind::Unique);
        assert_eq!(v.names["#0"].perms[0].states, ["Open"]);
        assert_eq!(v.names["#0"].null, Some(false));
        assert_eq!(v.names["x"].value, Some(false));

        let mut v = PermVisitor::new(Mode::Params);
        parse("x == null * x != null").accept(&mut v).unwrap();
        assert!(v.impossible);

        let mut v = PermVisitor::new(Mode::Params);
        parse("false").accept(&mut v).unwrap();
        assert!(v.impossible);

        let mut v = PermVisitor::new(Mode::Params);
        parse("full(x) | pure(y)").accept(&mut v).unwrap();
        assert!(v.names.is_empty());
        assert_eq!(v.ignored.len(), 1);
    }

    #[test]
    fn fields() {
        let mut v = PermVisitor::new(Mode::Fields);
        parse("full(f) in Open * g == true").accept(&mut v).unwrap();
        assert_eq!(v.names.len(), 2);

        for e in ["full(#0)", "pure(this!fr)", "f == this", "result in A"] {
            let mut v = PermVisitor::new(Mode::Fields);
            assert!(matches!(parse(e).accept(&mut v), Err(Error::ParamInInvariant(_))));
        }
    }

    #[test]
    fn states_and_implications() {
        let e = parse("full(this) * this!fr in Open * x in A, B * (b == true => y in C)");
        let mut s = StateInfoVisitor::default();
        e.accept(&mut s);
        assert_eq!(s.states[&("this".to_string(), true)], ["Open"]);
        assert_eq!(s.states[&("x".to_string(), false)], ["A", "B"]);
        assert_eq!(s.states.len(), 2);

        let mut i = ImplicationVisitor::default();
        e.accept(&mut i);
        assert_eq!(i.implications.len(), 1);
        assert_eq!(i.implications[0].0, "b");
        assert!(i.implications[0].1);
    }
}
