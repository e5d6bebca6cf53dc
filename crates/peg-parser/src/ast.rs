use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::Error;
use crate::expr::{binop_info, Assoc, BinOpeInfo};
use crate::parser::Parser;
use crate::rule::ActionFn;
use crate::values::SemanticValues;

/// A node of the default-built syntax tree: a token leaf or an interior
/// node owning its children, with a weak back-reference to its parent.
#[derive(Debug)]
pub struct Ast {
    pub name: String,
    pub line: usize,
    pub column: usize,
    pub token: Option<String>,
    pub children: Vec<Rc<Ast>>,
    parent: RefCell<Weak<Ast>>,
}

impl Ast {
    pub fn leaf(
        name: impl Into<String>,
        line: usize,
        column: usize,
        token: impl Into<String>,
    ) -> Rc<Ast> {
        Rc::new(Ast {
            name: name.into(),
            line,
            column,
            token: Some(token.into()),
            children: Vec::new(),
            parent: RefCell::new(Weak::new()),
        })
    }

    pub fn node(
        name: impl Into<String>,
        line: usize,
        column: usize,
        children: Vec<Rc<Ast>>,
    ) -> Rc<Ast> {
        let node = Rc::new(Ast {
            name: name.into(),
            line,
            column,
            token: None,
            children,
            parent: RefCell::new(Weak::new()),
        });
        for child in &node.children {
            *child.parent.borrow_mut() = Rc::downgrade(&node);
        }
        node
    }

    pub fn parent(&self) -> Option<Rc<Ast>> {
        self.parent.borrow().upgrade()
    }

    fn dump(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        for _ in 0..level {
            write!(f, "  ")?;
        }
        match &self.token {
            Some(token) => writeln!(f, "- {} ({:?})", self.name, token)?,
            None => writeln!(f, "+ {}", self.name)?,
        }
        for child in &self.children {
            child.dump(f, level + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dump(f, 0)
    }
}

impl Parser {
    /// Installs a default action on every rule so that a successful
    /// parse produces an [`Ast`]: token rules become leaves carrying
    /// their token text, other rules become interior nodes over their
    /// children. A rule named by `%expr` assembles its flat
    /// `atom (binop atom)*` values into a precedence-aware subtree.
    pub fn enable_ast(&self) {
        let expr_rule = self.options.get("%expr").and_then(|vs| vs.first()).cloned();
        let bopinf = binop_info(&self.options);

        for name in self.grammar().names() {
            let is_token = self
                .grammar()
                .rule(&name)
                .map(|r| r.is_token())
                .unwrap_or(false);

            let action: Rc<ActionFn> = if expr_rule.as_deref() == Some(name.as_str()) {
                let nm = name.clone();
                let bopinf = bopinf.clone();
                Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                    let (line, column) = sv.line_col();
                    let (ast, _) = build_expr_ast(sv, 0, 0, line, column, &nm, &bopinf);
                    Ok(Some(ast))
                })
            } else if is_token {
                let nm = name.clone();
                Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                    let (line, column) = sv.line_col();
                    Ok(Some(Ast::leaf(nm.clone(), line, column, sv.token())))
                })
            } else {
                let nm = name.clone();
                Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                    let (line, column) = sv.line_col();
                    let children: Vec<Rc<Ast>> =
                        (0..sv.len()).filter_map(|i| sv.get::<Ast>(i)).collect();
                    Ok(Some(Ast::node(nm.clone(), line, column, children)))
                })
            };

            if let Some(mut rule) = self.grammar().rule_mut(&name) {
                rule.action = Some(action);
            }
        }
    }

    /// Parses `s` and returns the tree built by the actions
    /// [`Parser::enable_ast`] installed.
    pub fn parse_ast(&self, s: &str, dt: &mut dyn Any) -> Result<Rc<Ast>, Error> {
        let value = self.parse_value(s, dt)?;
        value
            .and_then(|v| v.downcast::<Ast>().ok())
            .ok_or_else(|| Error::single(1, 1, "no syntax tree was produced."))
    }
}

/// Precedence-climbs over the flat node list a rule of shape
/// `atom (binop atom)*` collected, nesting operator applications by the
/// `%binop` table.
fn build_expr_ast(
    sv: &SemanticValues,
    mut i: usize,
    min_prec: usize,
    line: usize,
    column: usize,
    name: &str,
    bopinf: &BinOpeInfo,
) -> (Rc<Ast>, usize) {
    let mut ast = sv.get::<Ast>(i).expect("expression frame holds tree nodes");
    i += 1;

    while i < sv.len() {
        let ope = sv.get::<Ast>(i).expect("expression frame holds tree nodes");
        let Some((level, assoc)) = ope
            .token
            .as_deref()
            .and_then(|tok| bopinf.get(tok).copied())
        else {
            break;
        };
        if level < min_prec {
            break;
        }
        i += 1;

        let next_min_prec = if assoc == Assoc::Left { level + 1 } else { level };
        let (rhs, next) = build_expr_ast(sv, i, next_min_prec, line, column, name, bopinf);
        i = next;

        ast = Ast::node(name, line, column, vec![ast, ope, rhs]);
    }

    (ast, i)
}

/// Collapses interior nodes with exactly one child, unless the node's
/// name is listed as an exception.
pub struct AstOptimizer {
    exceptions: Vec<String>,
}

impl AstOptimizer {
    pub fn new(exceptions: &[&str]) -> AstOptimizer {
        AstOptimizer {
            exceptions: exceptions.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn optimize(&self, ast: &Rc<Ast>) -> Rc<Ast> {
        if ast.children.len() == 1 && !self.exceptions.iter().any(|e| e == &ast.name) {
            return self.optimize(&ast.children[0]);
        }
        match &ast.token {
            Some(token) => Ast::leaf(ast.name.clone(), ast.line, ast.column, token.clone()),
            None => {
                let children = ast.children.iter().map(|c| self.optimize(c)).collect();
                Ast::node(ast.name.clone(), ast.line, ast.column, children)
            }
        }
    }
}
