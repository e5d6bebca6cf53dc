use std::any::Any;
use std::fmt;
use std::rc::Rc;

use once_cell::sync::OnceCell;

use crate::context::Context;
use crate::expr::Expression;
use crate::rule::WeakRules;
use crate::values::{SemanticValues, Token};

/// A host-supplied matcher with the same parse contract as built-in
/// operators: it returns the number of bytes consumed, or `None`.
pub type UserFn = dyn Fn(&str, usize, &mut SemanticValues, &mut dyn Any) -> Option<usize>;

pub struct LiteralString {
    pub(crate) lit: Vec<u8>,
    is_keyword: OnceCell<bool>,
}

pub struct CharacterClass {
    pub(crate) chars: Vec<u8>,
}

pub struct User {
    pub(crate) f: Rc<UserFn>,
}

/// A by-name link to a rule. The rule table is held weakly so that
/// operator trees never own the grammar they point into; the name is
/// resolved on every parse.
pub struct Reference {
    pub(crate) rules: WeakRules,
    pub(crate) name: String,
    pub(crate) pos: usize,
}

/// A parsing expression. Composite variants hold their children as
/// shared subtrees; parsing never mutates the tree.
pub enum Ope {
    Sequence(Vec<Rc<Ope>>),
    PrioritizedChoice(Vec<Rc<Ope>>),
    ZeroOrMore(Rc<Ope>),
    OneOrMore(Rc<Ope>),
    Option(Rc<Ope>),
    AndPredicate(Rc<Ope>),
    NotPredicate(Rc<Ope>),
    LiteralString(LiteralString),
    CharacterClass(CharacterClass),
    AnyCharacter,
    TokenBoundary(Rc<Ope>),
    Ignore(Rc<Ope>),
    User(User),
    Reference(Reference),
    Whitespace(Rc<Ope>),
    Expression(Expression),
}

pub fn seq(opes: Vec<Rc<Ope>>) -> Rc<Ope> {
    Rc::new(Ope::Sequence(opes))
}

pub fn cho(opes: Vec<Rc<Ope>>) -> Rc<Ope> {
    Rc::new(Ope::PrioritizedChoice(opes))
}

pub fn zom(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::ZeroOrMore(ope))
}

pub fn oom(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::OneOrMore(ope))
}

pub fn opt(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Option(ope))
}

pub fn apd(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::AndPredicate(ope))
}

pub fn npd(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::NotPredicate(ope))
}

pub fn lit(lit: impl Into<Vec<u8>>) -> Rc<Ope> {
    Rc::new(Ope::LiteralString(LiteralString {
        lit: lit.into(),
        is_keyword: OnceCell::new(),
    }))
}

pub fn cls(chars: impl Into<Vec<u8>>) -> Rc<Ope> {
    Rc::new(Ope::CharacterClass(CharacterClass {
        chars: chars.into(),
    }))
}

pub fn dot() -> Rc<Ope> {
    Rc::new(Ope::AnyCharacter)
}

pub fn tok(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::TokenBoundary(ope))
}

pub fn ign(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Ignore(ope))
}

pub fn usr(
    f: impl Fn(&str, usize, &mut SemanticValues, &mut dyn Any) -> Option<usize> + 'static,
) -> Rc<Ope> {
    Rc::new(Ope::User(User { f: Rc::new(f) }))
}

/// Wraps a whitespace rule: values produced inside are discarded and
/// recursive whitespace skipping is suppressed for the child parse.
pub fn wsp(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Whitespace(ign(ope)))
}

impl Ope {
    /// Dispatch wrapper: brackets the core parse with the optional
    /// tracer callbacks. Returns the number of bytes consumed, `None`
    /// on mismatch.
    pub(crate) fn parse(
        &self,
        s: &str,
        p: usize,
        sv: &mut SemanticValues,
        c: &mut Context,
        dt: &mut dyn Any,
    ) -> Option<usize> {
        if c.tracer_enter.is_none() && c.tracer_leave.is_none() {
            return self.parse_core(s, p, sv, c, dt);
        }

        let label = self.label();
        if let Some(enter) = c.tracer_enter.clone() {
            enter(&label, s, sv, &*dt, p);
        }
        let l = self.parse_core(s, p, sv, c, dt);
        if let Some(leave) = c.tracer_leave.clone() {
            leave(&label, s, sv, &*dt, p, l);
        }
        l
    }

    fn parse_core(
        &self,
        s: &str,
        p: usize,
        sv: &mut SemanticValues,
        c: &mut Context,
        dt: &mut dyn Any,
    ) -> Option<usize> {
        match self {
            Ope::Sequence(opes) => {
                let mut l = 0;
                for ope in opes {
                    let chl = ope.parse(s, p + l, sv, c, dt)?;
                    l += chl;
                }
                Some(l)
            }

            Ope::PrioritizedChoice(opes) => {
                for (id, ope) in opes.iter().enumerate() {
                    let mut chv = SemanticValues::new(c.input.clone(), p);
                    if let Some(l) = ope.parse(s, p, &mut chv, c, dt) {
                        sv.vs.append(&mut chv.vs);
                        sv.ts.append(&mut chv.ts);
                        sv.span = chv.span;
                        sv.valid_span = chv.valid_span;
                        sv.choice = id;
                        return Some(l);
                    }
                }
                None
            }

            Ope::ZeroOrMore(ope) => {
                let save_error_pos = c.error_pos;
                let mut l = 0;
                while p + l < s.len() {
                    let save_vs = sv.vs.len();
                    let save_ts = sv.ts.len();
                    match ope.parse(s, p + l, sv, c, dt) {
                        Some(chl) => l += chl,
                        None => {
                            sv.vs.truncate(save_vs);
                            sv.ts.truncate(save_ts);
                            c.error_pos = save_error_pos;
                            break;
                        }
                    }
                }
                Some(l)
            }

            Ope::OneOrMore(ope) => {
                let mut l = ope.parse(s, p, sv, c, dt)?;
                let save_error_pos = c.error_pos;
                while p + l < s.len() {
                    let save_vs = sv.vs.len();
                    let save_ts = sv.ts.len();
                    match ope.parse(s, p + l, sv, c, dt) {
                        Some(chl) => l += chl,
                        None => {
                            sv.vs.truncate(save_vs);
                            sv.ts.truncate(save_ts);
                            c.error_pos = save_error_pos;
                            break;
                        }
                    }
                }
                Some(l)
            }

            Ope::Option(ope) => {
                let save_error_pos = c.error_pos;
                let save_vs = sv.vs.len();
                let save_ts = sv.ts.len();
                match ope.parse(s, p, sv, c, dt) {
                    Some(l) => Some(l),
                    None => {
                        sv.vs.truncate(save_vs);
                        sv.ts.truncate(save_ts);
                        c.error_pos = save_error_pos;
                        Some(0)
                    }
                }
            }

            Ope::AndPredicate(ope) => {
                let mut chv = SemanticValues::new(c.input.clone(), p);
                ope.parse(s, p, &mut chv, c, dt)?;
                Some(0)
            }

            Ope::NotPredicate(ope) => {
                let save_error_pos = c.error_pos;
                let mut chv = SemanticValues::new(c.input.clone(), p);
                match ope.parse(s, p, &mut chv, c, dt) {
                    Some(_) => {
                        c.set_error_pos(p);
                        None
                    }
                    None => {
                        c.error_pos = save_error_pos;
                        Some(0)
                    }
                }
            }

            Ope::LiteralString(ls) => ls.parse(s, p, sv, c, dt),

            Ope::CharacterClass(cc) => {
                let bytes = s.as_bytes();
                if p >= bytes.len() {
                    c.set_error_pos(p);
                    return None;
                }
                let ch = bytes[p];
                let spec = &cc.chars;
                let mut i = 0;
                while i < spec.len() {
                    if i + 2 < spec.len() && spec[i + 1] == b'-' {
                        if spec[i] <= ch && ch <= spec[i + 2] {
                            return Some(1);
                        }
                        i += 3;
                    } else {
                        if spec[i] == ch {
                            return Some(1);
                        }
                        i += 1;
                    }
                }
                c.set_error_pos(p);
                None
            }

            Ope::AnyCharacter => {
                if p >= s.len() {
                    c.set_error_pos(p);
                    return None;
                }
                Some(1)
            }

            Ope::TokenBoundary(ope) => {
                let l = ope.parse(s, p, sv, c, dt)?;
                sv.ts.push(Token { pos: p, len: l });
                sv.set_token_span(p..p + l);

                let mut l = l;
                if let Some(ws) = c.whitespace_ope.clone() {
                    let wl = ws.parse(s, p + l, sv, c, dt)?;
                    l += wl;
                }
                Some(l)
            }

            Ope::Ignore(ope) => {
                let mut chv = SemanticValues::new(c.input.clone(), p);
                ope.parse(s, p, &mut chv, c, dt)
            }

            Ope::User(u) => (u.f)(s, p, sv, dt),

            Ope::Reference(r) => {
                let rules = r.rules.upgrade()?;
                let rules = rules.borrow();
                match rules.get(&r.name) {
                    Some(rule) => rule.parse_ope(s, p, sv, c, dt),
                    None => None,
                }
            }

            Ope::Whitespace(ope) => {
                if c.in_whitespace {
                    Some(0)
                } else {
                    c.in_whitespace = true;
                    let l = ope.parse(s, p, sv, c, dt);
                    c.in_whitespace = false;
                    l
                }
            }

            Ope::Expression(e) => e.parse_expr(s, p, sv, c, dt, 0),
        }
    }

    pub(crate) fn label(&self) -> String {
        match self {
            Ope::Sequence(_) => "Sequence".to_string(),
            Ope::PrioritizedChoice(_) => "PrioritizedChoice".to_string(),
            Ope::ZeroOrMore(_) => "ZeroOrMore".to_string(),
            Ope::OneOrMore(_) => "OneOrMore".to_string(),
            Ope::Option(_) => "Option".to_string(),
            Ope::AndPredicate(_) => "AndPredicate".to_string(),
            Ope::NotPredicate(_) => "NotPredicate".to_string(),
            Ope::LiteralString(_) => "LiteralString".to_string(),
            Ope::CharacterClass(_) => "CharacterClass".to_string(),
            Ope::AnyCharacter => "AnyCharacter".to_string(),
            Ope::TokenBoundary(_) => "TokenBoundary".to_string(),
            Ope::Ignore(_) => "Ignore".to_string(),
            Ope::User(_) => "User".to_string(),
            Ope::Reference(r) => format!("Reference[{}]", r.name),
            Ope::Whitespace(_) => "Whitespace".to_string(),
            Ope::Expression(_) => "Expression".to_string(),
        }
    }
}

impl LiteralString {
    fn parse(
        &self,
        s: &str,
        p: usize,
        sv: &mut SemanticValues,
        c: &mut Context,
        dt: &mut dyn Any,
    ) -> Option<usize> {
        let bytes = s.as_bytes();
        if p + self.lit.len() > bytes.len() || bytes[p..p + self.lit.len()] != self.lit[..] {
            c.set_error_pos(p);
            return None;
        }
        let mut l = self.lit.len();

        // A literal that is itself a word must not run into another word:
        // check the keyword operator as a negative predicate right after
        // the match.
        let is_keyword = *self.is_keyword.get_or_init(|| match &c.keyword_ope {
            Some(kw) => match std::str::from_utf8(&self.lit) {
                Ok(text) => {
                    let input: Rc<str> = Rc::from(text);
                    let mut scratch = Context::new(input.clone());
                    let mut chv = SemanticValues::new(input, 0);
                    let mut unit = ();
                    kw.parse(text, 0, &mut chv, &mut scratch, &mut unit) == Some(text.len())
                }
                Err(_) => false,
            },
            None => false,
        });
        if is_keyword {
            if let Some(kw) = c.keyword_ope.clone() {
                let mut scratch = Context::new(c.input.clone());
                let mut chv = SemanticValues::new(c.input.clone(), p + l);
                let mut unit = ();
                if kw.parse(s, p + l, &mut chv, &mut scratch, &mut unit).is_some() {
                    return None;
                }
            }
        }

        if let Some(ws) = c.whitespace_ope.clone() {
            let wl = ws.parse(s, p + l, sv, c, dt)?;
            l += wl;
        }
        Some(l)
    }
}

// DSL rendering. Operators print back to grammar syntax, parenthesized
// just enough that recompiling the output yields an equivalent tree.

const PREC_CHOICE: u8 = 0;
const PREC_SEQUENCE: u8 = 1;
const PREC_PREFIX: u8 = 2;
const PREC_SUFFIX: u8 = 3;
const PREC_PRIMARY: u8 = 4;

impl Ope {
    fn prec(&self) -> u8 {
        match self {
            Ope::PrioritizedChoice(_) => PREC_CHOICE,
            Ope::Sequence(_) | Ope::Expression(_) => PREC_SEQUENCE,
            Ope::AndPredicate(_) | Ope::NotPredicate(_) | Ope::Ignore(_) => PREC_PREFIX,
            Ope::ZeroOrMore(_) | Ope::OneOrMore(_) | Ope::Option(_) => PREC_SUFFIX,
            Ope::Whitespace(ope) => ope.prec(),
            _ => PREC_PRIMARY,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        if self.prec() < min_prec {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Ope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ope::Sequence(opes) => {
                for (i, ope) in opes.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    ope.fmt_prec(f, PREC_PREFIX)?;
                }
                Ok(())
            }
            Ope::PrioritizedChoice(opes) => {
                for (i, ope) in opes.iter().enumerate() {
                    if i > 0 {
                        write!(f, " / ")?;
                    }
                    ope.fmt_prec(f, PREC_SEQUENCE)?;
                }
                Ok(())
            }
            Ope::ZeroOrMore(ope) => {
                ope.fmt_prec(f, PREC_PRIMARY)?;
                write!(f, "*")
            }
            Ope::OneOrMore(ope) => {
                ope.fmt_prec(f, PREC_PRIMARY)?;
                write!(f, "+")
            }
            Ope::Option(ope) => {
                ope.fmt_prec(f, PREC_PRIMARY)?;
                write!(f, "?")
            }
            Ope::AndPredicate(ope) => {
                write!(f, "&")?;
                ope.fmt_prec(f, PREC_SUFFIX)
            }
            Ope::NotPredicate(ope) => {
                write!(f, "!")?;
                ope.fmt_prec(f, PREC_SUFFIX)
            }
            Ope::LiteralString(ls) => {
                write!(f, "'")?;
                for &b in &ls.lit {
                    write_escaped(f, b, b'\'')?;
                }
                write!(f, "'")
            }
            Ope::CharacterClass(cc) => {
                write!(f, "[")?;
                for &b in &cc.chars {
                    write_escaped(f, b, b']')?;
                }
                write!(f, "]")
            }
            Ope::AnyCharacter => write!(f, "."),
            Ope::TokenBoundary(ope) => write!(f, "< {} >", ope),
            Ope::Ignore(ope) => {
                write!(f, "~")?;
                ope.fmt_prec(f, PREC_SUFFIX)
            }
            Ope::User(_) => write!(f, "%user"),
            Ope::Reference(r) => write!(f, "{}", r.name),
            Ope::Whitespace(ope) => write!(f, "{}", ope),
            Ope::Expression(e) => write!(f, "{} ({} {})*", e.atom, e.binop, e.atom),
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, b: u8, quote: u8) -> fmt::Result {
    match b {
        b'\n' => write!(f, "\\n"),
        b'\r' => write!(f, "\\r"),
        b'\t' => write!(f, "\\t"),
        b'\\' => write!(f, "\\\\"),
        b'[' | b']' => write!(f, "\\{}", b as char),
        _ if b == quote => write!(f, "\\{}", b as char),
        0x20..=0x7e => write!(f, "{}", b as char),
        _ => write!(f, "\\x{:02x}", b),
    }
}
