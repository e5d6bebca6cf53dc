use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::context::Context;
use crate::error::Error;
use crate::ope::Ope;
use crate::parser::Options;
use crate::rule::{ActionFn, Grammar, WeakRules};
use crate::values::{SemanticValue, SemanticValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Assoc {
    None,
    Left,
    Right,
}

/// Operator token text to (precedence level, associativity). Higher
/// levels bind tighter.
pub(crate) type BinOpeInfo = HashMap<String, (usize, Assoc)>;

/// Precedence-climbing replacement for a rule body of the shape
/// `atom (binop atom)*`. The host rule's action collapses each
/// `[lhs, op, rhs]` triple as the climb reduces.
pub struct Expression {
    pub(crate) atom: Rc<Ope>,
    pub(crate) binop: Rc<Ope>,
    pub(crate) bopinf: BinOpeInfo,
    pub(crate) rule: String,
    pub(crate) rules: WeakRules,
}

impl Expression {
    /// The host rule's action, looked up live so actions installed
    /// after compilation are honored.
    fn rule_action(&self) -> Option<Rc<ActionFn>> {
        let rules = self.rules.upgrade()?;
        let rules = rules.borrow();
        rules.get(&self.rule).and_then(|r| r.action.clone())
    }

    pub(crate) fn parse_expr(
        &self,
        s: &str,
        p: usize,
        sv: &mut SemanticValues,
        c: &mut Context,
        dt: &mut dyn Any,
        min_prec: usize,
    ) -> Option<usize> {
        let mut l = self.atom.parse(s, p, sv, c, dt)?;

        let action = self.rule_action();
        let save_error_pos = c.error_pos;

        while p + l < s.len() {
            let save_vs = sv.vs.len();
            let save_ts = sv.ts.len();

            let mut opv = SemanticValues::new(c.input.clone(), p + l);
            let chl = match self.binop.parse(s, p + l, &mut opv, c, dt) {
                Some(chl) => chl,
                None => {
                    c.error_pos = save_error_pos;
                    break;
                }
            };

            let Some(op_value) = opv.vs.first().cloned() else {
                break;
            };
            let op_text = opv.value_span(0);
            let Some(&(level, assoc)) = self.bopinf.get(op_text) else {
                break;
            };
            if level < min_prec {
                break;
            }

            sv.vs.push(op_value);
            l += chl;

            let next_min_prec = if assoc == Assoc::Left { level + 1 } else { level };

            let rhs_pos = p + l;
            let mut rhsv = SemanticValues::new(c.input.clone(), rhs_pos);
            match self.parse_expr(s, rhs_pos, &mut rhsv, c, dt, next_min_prec) {
                Some(chl) => {
                    l += chl;
                    let rhs = rhsv.vs.first().cloned().unwrap_or(SemanticValue {
                        val: None,
                        span: rhs_pos..p + l,
                    });
                    sv.vs.push(rhs);
                }
                None => {
                    sv.vs.truncate(save_vs);
                    sv.ts.truncate(save_ts);
                    c.error_pos = save_error_pos;
                    break;
                }
            }

            let val = match &action {
                Some(action) => match action(sv, dt) {
                    Ok(val) => val,
                    Err(message) => {
                        c.set_message(p, message);
                        sv.vs.truncate(save_vs);
                        sv.ts.truncate(save_ts);
                        c.error_pos = save_error_pos;
                        return None;
                    }
                },
                None => sv.vs.first().and_then(|v| v.val.clone()),
            };

            sv.vs.clear();
            sv.vs.push(SemanticValue { val, span: p..p + l });
        }

        Some(l)
    }
}

/// Builds the operator table from `%binop` directives: each directive
/// lists an associativity (`L` or `R`) followed by operator tokens, and
/// directives listed later bind tighter.
pub(crate) fn binop_info(options: &Options) -> BinOpeInfo {
    let mut info = BinOpeInfo::new();
    if let Some(entries) = options.get("%binop") {
        for (i, entry) in entries.iter().enumerate() {
            let level = i + 1;
            let mut fields = entry.split_whitespace();
            let assoc = match fields.next() {
                Some("L") => Assoc::Left,
                Some("R") => Assoc::Right,
                _ => Assoc::None,
            };
            for tok in fields {
                info.insert(tok.to_string(), (level, assoc));
            }
        }
    }
    info
}

/// Rewrites the rule named by `%expr` from `atom (binop atom)*` into an
/// [`Expression`] operator carrying the `%binop` table.
pub(crate) fn enable_expression_parsing(grammar: &Grammar, options: &Options) -> Result<(), Error> {
    let Some(rule_name) = options.get("%expr").and_then(|vs| vs.first()) else {
        return Ok(());
    };
    let Some(rule) = grammar.rule(rule_name) else {
        return Ok(());
    };
    let body = rule.ope();
    drop(rule);

    let shape_error = || Error::single(1, 1, "expression syntax error");

    let Ope::Sequence(parts) = &*body else {
        return Err(shape_error());
    };
    if parts.len() != 2 {
        return Err(shape_error());
    }
    let Ope::Reference(atom) = &*parts[0] else {
        return Err(shape_error());
    };
    let Ope::ZeroOrMore(rep) = &*parts[1] else {
        return Err(shape_error());
    };
    let Ope::Sequence(pair) = &**rep else {
        return Err(shape_error());
    };
    if pair.len() != 2 {
        return Err(shape_error());
    }
    let Ope::Reference(_binop) = &*pair[0] else {
        return Err(shape_error());
    };
    let Ope::Reference(atom2) = &*pair[1] else {
        return Err(shape_error());
    };
    if atom.name != atom2.name {
        return Err(shape_error());
    }

    let expression = Expression {
        atom: parts[0].clone(),
        binop: pair[0].clone(),
        bopinf: binop_info(options),
        rule: rule_name.clone(),
        rules: grammar.weak(),
    };
    grammar
        .rule_mut(rule_name)
        .expect("expression rule was just read")
        .set_ope(Rc::new(Ope::Expression(expression)));
    Ok(())
}
