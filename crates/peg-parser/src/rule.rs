use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use crate::context::{Context, TracerEnter, TracerLeave};
use crate::error::Error;
use crate::ope::{seq, tok, Ope};
use crate::values::{SemanticValue, SemanticValues, Value};
use crate::visitor::{TokenChecker, TokenInfo};

pub(crate) type RuleMap = IndexMap<String, Rule>;
pub(crate) type SharedRules = Rc<RefCell<RuleMap>>;
pub(crate) type WeakRules = Weak<RefCell<RuleMap>>;

/// What a semantic action returns: an optional value for the enclosing
/// frame, or a message that converts the match into a failure.
pub type ActionResult = Result<Option<Value>, String>;

/// A semantic action: receives the rule's frame and the user data.
pub type ActionFn = dyn Fn(&SemanticValues, &mut dyn Any) -> ActionResult;

/// An enter/leave hook: receives the user data only.
pub type HookFn = dyn Fn(&mut dyn Any);

/// Supplies the diagnostic recorded when the rule fails.
pub type MessageFn = dyn Fn() -> String;

/// Produces the matched span as a string value.
pub fn action_to_str(sv: &SemanticValues, _dt: &mut dyn Any) -> ActionResult {
    Ok(Some(Rc::new(sv.span().to_string())))
}

/// Parses the matched span as an integer value.
pub fn action_to_i64(sv: &SemanticValues, _dt: &mut dyn Any) -> ActionResult {
    let n: i64 = sv.span().parse().map_err(|e| format!("{e}"))?;
    Ok(Some(Rc::new(n)))
}

/// A named entry into the operator algebra.
///
/// Besides its body a rule owns the hooks driven during dispatch: an
/// optional semantic action, enter/leave callbacks, a failure message
/// supplier, and the ignore flag that keeps its value out of the
/// enclosing frame. The grammar-wide whitespace and keyword-boundary
/// operators are attached to the start rule only.
pub struct Rule {
    name: Rc<str>,
    ope: Rc<Ope>,
    pub action: Option<Rc<ActionFn>>,
    pub enter: Option<Rc<HookFn>>,
    pub leave: Option<Rc<HookFn>>,
    pub message: Option<Rc<MessageFn>>,
    pub ignore: bool,
    pub whitespace_ope: Option<Rc<Ope>>,
    pub keyword_ope: Option<Rc<Ope>>,
    pub tracer_enter: Option<TracerEnter>,
    pub tracer_leave: Option<TracerLeave>,
    token_info: OnceCell<TokenInfo>,
}

impl Rule {
    pub fn new(name: &str, ope: Rc<Ope>) -> Rule {
        Rule {
            name: Rc::from(name),
            ope,
            action: None,
            enter: None,
            leave: None,
            message: None,
            ignore: false,
            whitespace_ope: None,
            keyword_ope: None,
            tracer_enter: None,
            tracer_leave: None,
            token_info: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ope(&self) -> Rc<Ope> {
        self.ope.clone()
    }

    pub(crate) fn set_ope(&mut self, ope: Rc<Ope>) {
        self.ope = ope;
        self.token_info = OnceCell::new();
    }

    fn token_info(&self) -> TokenInfo {
        *self
            .token_info
            .get_or_init(|| TokenChecker::check(&self.ope))
    }

    /// Whether this rule is a lexical token: its body contains a token
    /// boundary, or reaches no rule reference at all. Memoized.
    pub fn is_token(&self) -> bool {
        self.token_info().is_token
    }

    pub(crate) fn has_token_boundary(&self) -> bool {
        self.token_info().has_token_boundary
    }

    /// Matches `s` from the beginning against this rule. On success
    /// returns the consumed length (always `s.len()`) and the value the
    /// rule produced; a partial match reports "not exact match" at the
    /// position parsing stopped.
    pub fn parse(&self, s: &str, dt: &mut dyn Any) -> Result<(usize, Option<Value>), Error> {
        let input: Rc<str> = Rc::from(s);
        let mut c = Context::new(input.clone());
        c.whitespace_ope = self.whitespace_ope.clone();
        c.keyword_ope = self.keyword_ope.clone();
        c.tracer_enter = self.tracer_enter.clone();
        c.tracer_leave = self.tracer_leave.clone();

        let mut sv = SemanticValues::new(input, 0);
        let l = self.parse_ope(s, 0, &mut sv, &mut c, dt);

        match l {
            Some(l) if l == s.len() => {
                let val = sv.vs.first().and_then(|sv| sv.val.clone());
                Ok((l, val))
            }
            Some(l) => {
                let (line, column) = line_info(s, l);
                Err(Error::single(line, column, "not exact match"))
            }
            None => {
                let (pos, message) = match c.message_pos {
                    Some(pos) => (pos, c.message.clone()),
                    None => (c.error_pos.unwrap_or(0), "syntax error".to_string()),
                };
                let (line, column) = line_info(s, pos);
                Err(Error::single(line, column, message))
            }
        }
    }

    pub(crate) fn parse_ope(
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

        let label = format!("Rule[{}]", self.name);
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
        if let Some(enter) = &self.enter {
            enter(dt);
        }

        c.rule_stack.push(self.name.clone());
        let mut chldsv = SemanticValues::new(c.input.clone(), p);

        // Wire the grammar-wide whitespace operator around the body: at
        // the outermost rule whitespace is skipped up front, and token
        // rules skip it after their (possibly implicit) token boundary.
        let ope = match c.whitespace_ope.clone() {
            Some(ws) if !c.in_token => {
                if c.rule_stack.len() == 1 {
                    if self.is_token() && !self.has_token_boundary() {
                        seq(vec![ws, tok(self.ope.clone())])
                    } else {
                        seq(vec![ws, self.ope.clone()])
                    }
                } else if self.is_token() {
                    if !self.has_token_boundary() {
                        seq(vec![tok(self.ope.clone()), ws])
                    } else {
                        seq(vec![self.ope.clone(), ws])
                    }
                } else {
                    self.ope.clone()
                }
            }
            _ => self.ope.clone(),
        };

        let mut l = if !c.in_token && self.is_token() {
            c.in_token = true;
            let l = ope.parse(s, p, &mut chldsv, c, dt);
            c.in_token = false;
            l
        } else {
            ope.parse(s, p, &mut chldsv, c, dt)
        };

        let mut val: Option<Value> = None;
        if let Some(len) = l {
            if !chldsv.valid_span {
                chldsv.set_span(p..p + len);
            }

            if let Some(action) = &self.action {
                match action(&chldsv, dt) {
                    Ok(v) => val = v,
                    Err(message) => {
                        c.set_message(p, message);
                        l = None;
                    }
                }
            } else if let Some(first) = chldsv.vs.first() {
                val = first.val.clone();
            }
        }

        if l.is_some() {
            if !self.ignore {
                sv.vs.push(SemanticValue {
                    val,
                    span: chldsv.span.clone(),
                });
            }
        } else if let Some(message) = &self.message {
            c.set_message(p, message());
        }

        c.rule_stack.pop();

        if let Some(leave) = &self.leave {
            leave(dt);
        }

        l
    }
}

/// A shared rule table. Rules are looked up by name; references created
/// through [`Grammar::reference`] hold the table weakly and resolve at
/// parse time, so rules may freely refer to rules defined later.
#[derive(Clone, Default)]
pub struct Grammar {
    rules: SharedRules,
}

impl Grammar {
    pub fn new() -> Grammar {
        Grammar::default()
    }

    /// Inserts a rule under its name, replacing any previous definition.
    pub fn add(&self, rule: Rule) {
        let name = rule.name().to_string();
        self.rules.borrow_mut().insert(name, rule);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.borrow().contains_key(name)
    }

    /// Rule names in definition order.
    pub fn names(&self) -> Vec<String> {
        self.rules.borrow().keys().cloned().collect()
    }

    pub fn rule(&self, name: &str) -> Option<Ref<'_, Rule>> {
        Ref::filter_map(self.rules.borrow(), |rules| rules.get(name)).ok()
    }

    pub fn rule_mut(&self, name: &str) -> Option<RefMut<'_, Rule>> {
        RefMut::filter_map(self.rules.borrow_mut(), |rules| rules.get_mut(name)).ok()
    }

    /// An operator referring to `name` in this grammar.
    pub fn reference(&self, name: &str) -> Rc<Ope> {
        self.reference_at(name, 0)
    }

    /// Same as [`Grammar::reference`], tagged with the source position
    /// the reference appeared at (used in diagnostics).
    pub fn reference_at(&self, name: &str, pos: usize) -> Rc<Ope> {
        Rc::new(Ope::Reference(crate::ope::Reference {
            rules: Rc::downgrade(&self.rules),
            name: name.to_string(),
            pos,
        }))
    }

    pub(crate) fn weak(&self) -> WeakRules {
        Rc::downgrade(&self.rules)
    }
}

/// 1-based line and column of a byte offset, counting bytes.
pub(crate) fn line_info(s: &str, pos: usize) -> (usize, usize) {
    let pos = pos.min(s.len());
    let mut line = 1;
    let mut col_start = 0;
    for (i, b) in s.as_bytes()[..pos].iter().enumerate() {
        if *b == b'\n' {
            line += 1;
            col_start = i + 1;
        }
    }
    (line, pos - col_start + 1)
}
