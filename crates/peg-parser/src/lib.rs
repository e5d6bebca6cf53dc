#![doc = include_str!("../README.md")]

mod ast;
mod context;
mod error;
mod expr;
mod ope;
mod parser;
mod rule;
mod values;
mod visitor;

#[cfg(test)]
mod tests;

pub use crate::ast::{Ast, AstOptimizer};
pub use crate::context::{TracerEnter, TracerLeave};
pub use crate::error::{Error, ErrorDetail};
pub use crate::expr::Expression;
pub use crate::ope::{
    apd, cho, cls, dot, ign, lit, npd, oom, opt, seq, tok, usr, wsp, zom, Ope, UserFn,
};
pub use crate::parser::{Parser, KEYWORD_RULE_NAME, WHITESPACE_RULE_NAME};
pub use crate::rule::{
    action_to_i64, action_to_str, ActionFn, ActionResult, Grammar, HookFn, MessageFn, Rule,
};
pub use crate::values::{SemanticValue, SemanticValues, Token, Value};
