use std::collections::HashSet;
use std::rc::Rc;

use crate::expr::Expression;
use crate::ope::{CharacterClass, LiteralString, Ope, Reference};

/// Per-variant traversal hooks. Implementations override the variants
/// they care about; everything else is a no-op so each analysis only
/// spells out its own walk.
pub(crate) trait Visitor {
    fn visit_sequence(&mut self, _opes: &[Rc<Ope>]) {}
    fn visit_prioritized_choice(&mut self, _opes: &[Rc<Ope>]) {}
    fn visit_zero_or_more(&mut self, _ope: &Rc<Ope>) {}
    fn visit_one_or_more(&mut self, _ope: &Rc<Ope>) {}
    fn visit_option(&mut self, _ope: &Rc<Ope>) {}
    fn visit_and_predicate(&mut self, _ope: &Rc<Ope>) {}
    fn visit_not_predicate(&mut self, _ope: &Rc<Ope>) {}
    fn visit_literal_string(&mut self, _lit: &LiteralString) {}
    fn visit_character_class(&mut self, _cls: &CharacterClass) {}
    fn visit_any_character(&mut self) {}
    fn visit_token_boundary(&mut self, _ope: &Rc<Ope>) {}
    fn visit_ignore(&mut self, _ope: &Rc<Ope>) {}
    fn visit_user(&mut self) {}
    fn visit_reference(&mut self, _reference: &Reference) {}
    fn visit_whitespace(&mut self, _ope: &Rc<Ope>) {}
    fn visit_expression(&mut self, _expr: &Expression) {}
}

impl Ope {
    pub(crate) fn accept(&self, v: &mut dyn Visitor) {
        match self {
            Ope::Sequence(opes) => v.visit_sequence(opes),
            Ope::PrioritizedChoice(opes) => v.visit_prioritized_choice(opes),
            Ope::ZeroOrMore(ope) => v.visit_zero_or_more(ope),
            Ope::OneOrMore(ope) => v.visit_one_or_more(ope),
            Ope::Option(ope) => v.visit_option(ope),
            Ope::AndPredicate(ope) => v.visit_and_predicate(ope),
            Ope::NotPredicate(ope) => v.visit_not_predicate(ope),
            Ope::LiteralString(lit) => v.visit_literal_string(lit),
            Ope::CharacterClass(cls) => v.visit_character_class(cls),
            Ope::AnyCharacter => v.visit_any_character(),
            Ope::TokenBoundary(ope) => v.visit_token_boundary(ope),
            Ope::Ignore(ope) => v.visit_ignore(ope),
            Ope::User(_) => v.visit_user(),
            Ope::Reference(reference) => v.visit_reference(reference),
            Ope::Whitespace(ope) => v.visit_whitespace(ope),
            Ope::Expression(expr) => v.visit_expression(expr),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TokenInfo {
    pub(crate) is_token: bool,
    pub(crate) has_token_boundary: bool,
}

/// A rule is a token iff its body contains a token boundary, or reaches
/// no rule reference at all.
#[derive(Default)]
pub(crate) struct TokenChecker {
    has_token_boundary: bool,
    has_rule: bool,
}

impl TokenChecker {
    pub(crate) fn check(ope: &Ope) -> TokenInfo {
        let mut v = TokenChecker::default();
        ope.accept(&mut v);
        TokenInfo {
            is_token: v.has_token_boundary || !v.has_rule,
            has_token_boundary: v.has_token_boundary,
        }
    }
}

impl Visitor for TokenChecker {
    fn visit_sequence(&mut self, opes: &[Rc<Ope>]) {
        for ope in opes {
            ope.accept(self);
        }
    }

    fn visit_prioritized_choice(&mut self, opes: &[Rc<Ope>]) {
        for ope in opes {
            ope.accept(self);
        }
    }

    fn visit_zero_or_more(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
    }

    fn visit_one_or_more(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
    }

    fn visit_option(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
    }

    fn visit_token_boundary(&mut self, _ope: &Rc<Ope>) {
        self.has_token_boundary = true;
    }

    fn visit_ignore(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
    }

    fn visit_reference(&mut self, _reference: &Reference) {
        self.has_rule = true;
    }

    fn visit_expression(&mut self, _expr: &Expression) {
        self.has_rule = true;
    }
}

/// Walks a rule body tracking whether at least one byte of input has
/// been committed before a reference back to the rule under test can be
/// reached; a self-reference before commitment is left recursion.
struct DetectLeftRecursion<'a> {
    pos: Option<usize>,
    name: &'a str,
    refs: HashSet<String>,
    done: bool,
}

/// Returns the source position of the offending reference if `name`'s
/// body can reach itself without consuming input.
pub(crate) fn detect_left_recursion(name: &str, ope: &Ope) -> Option<usize> {
    let mut v = DetectLeftRecursion {
        pos: None,
        name,
        refs: HashSet::new(),
        done: false,
    };
    ope.accept(&mut v);
    v.pos
}

impl Visitor for DetectLeftRecursion<'_> {
    fn visit_sequence(&mut self, opes: &[Rc<Ope>]) {
        for ope in opes {
            ope.accept(self);
            if self.done {
                break;
            } else if self.pos.is_some() {
                self.done = true;
                break;
            }
        }
    }

    fn visit_prioritized_choice(&mut self, opes: &[Rc<Ope>]) {
        for ope in opes {
            ope.accept(self);
            if self.pos.is_some() {
                self.done = true;
                break;
            }
        }
    }

    fn visit_zero_or_more(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
        self.done = false;
    }

    fn visit_one_or_more(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
        self.done = true;
    }

    fn visit_option(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
        self.done = false;
    }

    fn visit_and_predicate(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
        self.done = false;
    }

    fn visit_not_predicate(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
        self.done = false;
    }

    fn visit_literal_string(&mut self, lit: &LiteralString) {
        self.done = !lit.lit.is_empty();
    }

    fn visit_character_class(&mut self, _cls: &CharacterClass) {
        self.done = true;
    }

    fn visit_any_character(&mut self) {
        self.done = true;
    }

    fn visit_token_boundary(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
    }

    fn visit_ignore(&mut self, ope: &Rc<Ope>) {
        ope.accept(self);
    }

    fn visit_reference(&mut self, reference: &Reference) {
        if reference.name == self.name {
            self.pos = Some(reference.pos);
        } else if !self.refs.contains(&reference.name) {
            self.refs.insert(reference.name.clone());
            let body = reference
                .rules
                .upgrade()
                .and_then(|rules| rules.borrow().get(&reference.name).map(|r| r.ope()));
            if let Some(body) = body {
                body.accept(self);
            }
        }
        self.done = true;
    }

    fn visit_expression(&mut self, expr: &Expression) {
        expr.atom.accept(self);
        self.done = true;
    }
}
