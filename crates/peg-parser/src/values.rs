use std::any::Any;
use std::ops::Range;
use std::rc::Rc;

use crate::ope::Ope;
use crate::rule::line_info;

/// An opaque semantic value produced by a rule action.
///
/// Values are reference counted and dynamically typed; actions downcast
/// them back with [`SemanticValues::get`] or the typed accessors.
pub type Value = Rc<dyn Any>;

/// A lexical atom captured by a token boundary operator, identified by
/// its byte offset and length in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub pos: usize,
    pub len: usize,
}

/// A semantic value together with the span of input it was produced from.
#[derive(Clone)]
pub struct SemanticValue {
    pub(crate) val: Option<Value>,
    pub(crate) span: Range<usize>,
}

impl SemanticValue {
    pub fn value(&self) -> Option<&Value> {
        self.val.as_ref()
    }
}

/// The per-invocation accumulator handed to semantic actions.
///
/// While a rule matches its body, every non-ignored sub-rule appends a
/// value here and every token boundary records a token. The frame also
/// remembers the matched span, the branch taken by the nearest
/// prioritized choice, and the position the match started at.
pub struct SemanticValues {
    pub(crate) input: Rc<str>,
    pub(crate) pos: usize,
    pub(crate) span: Range<usize>,
    pub(crate) valid_span: bool,
    pub(crate) vs: Vec<SemanticValue>,
    pub(crate) ts: Vec<Token>,
    pub(crate) choice: usize,
}

impl SemanticValues {
    pub(crate) fn new(input: Rc<str>, pos: usize) -> SemanticValues {
        SemanticValues {
            input,
            pos,
            span: pos..pos,
            valid_span: false,
            vs: Vec::new(),
            ts: Vec::new(),
            choice: 0,
        }
    }

    pub(crate) fn set_span(&mut self, span: Range<usize>) {
        self.span = span;
    }

    /// Marks the span as supplied by a token boundary, overriding the
    /// literal substring the enclosing rule consumed.
    pub(crate) fn set_token_span(&mut self, span: Range<usize>) {
        self.span = span;
        self.valid_span = true;
    }

    /// Number of semantic values collected in this frame.
    pub fn len(&self) -> usize {
        self.vs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vs.is_empty()
    }

    pub fn values(&self) -> &[SemanticValue] {
        &self.vs
    }

    pub fn tokens(&self) -> &[Token] {
        &self.ts
    }

    /// The full input being parsed.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Byte offset the enclosing rule started matching at.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Zero-based index of the alternative taken by the nearest
    /// prioritized choice inside the rule body.
    pub fn choice(&self) -> usize {
        self.choice
    }

    /// The substring this frame matched. When a token boundary fired
    /// inside the rule, this is the token text instead.
    pub fn span(&self) -> &str {
        &self.input[self.span.clone()]
    }

    /// Text of the first captured token, falling back to the matched span.
    pub fn token(&self) -> &str {
        match self.ts.first() {
            Some(t) => &self.input[t.pos..t.pos + t.len],
            None => self.span(),
        }
    }

    /// Text of the i-th captured token.
    pub fn token_text(&self, i: usize) -> Option<&str> {
        self.ts.get(i).map(|t| &self.input[t.pos..t.pos + t.len])
    }

    /// 1-based line and column of the position this frame started at.
    pub fn line_col(&self) -> (usize, usize) {
        line_info(&self.input, self.pos)
    }

    /// Downcasts the i-th semantic value.
    pub fn get<T: Any>(&self, i: usize) -> Option<Rc<T>> {
        self.vs
            .get(i)
            .and_then(|sv| sv.val.clone())
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// The i-th semantic value as a string. Panics if it is not one.
    pub fn to_str(&self, i: usize) -> String {
        self.get::<String>(i)
            .map(|s| (*s).clone())
            .expect("semantic value is a string")
    }

    /// The i-th semantic value as an integer. Panics if it is not one.
    pub fn to_i64(&self, i: usize) -> i64 {
        self.get::<i64>(i)
            .map(|n| *n)
            .expect("semantic value is an integer")
    }

    /// The span of input the i-th semantic value was produced from.
    pub fn value_span(&self, i: usize) -> &str {
        &self.input[self.vs[i].span.clone()]
    }

    /// The i-th semantic value as an operator subtree (used by the
    /// grammar compiler's own actions).
    pub(crate) fn to_ope(&self, i: usize) -> Rc<Ope> {
        self.get::<Ope>(i).expect("semantic value is an operator")
    }
}
