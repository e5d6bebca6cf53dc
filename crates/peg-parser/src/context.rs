use std::any::Any;
use std::rc::Rc;

use crate::ope::Ope;
use crate::values::SemanticValues;

/// Callback invoked before an operator is tried: label, input, current
/// frame, user data, position.
pub type TracerEnter = Rc<dyn Fn(&str, &str, &SemanticValues, &dyn Any, usize)>;

/// Callback invoked after an operator was tried; the final argument is
/// the consumed length, `None` on failure.
pub type TracerLeave = Rc<dyn Fn(&str, &str, &SemanticValues, &dyn Any, usize, Option<usize>)>;

/// Mutable per-parse state threaded through every operator.
pub(crate) struct Context {
    pub(crate) input: Rc<str>,

    pub(crate) error_pos: Option<usize>,
    pub(crate) message_pos: Option<usize>,
    pub(crate) message: String,

    pub(crate) rule_stack: Vec<Rc<str>>,

    pub(crate) whitespace_ope: Option<Rc<Ope>>,
    pub(crate) in_whitespace: bool,

    pub(crate) keyword_ope: Option<Rc<Ope>>,
    pub(crate) in_token: bool,

    pub(crate) tracer_enter: Option<TracerEnter>,
    pub(crate) tracer_leave: Option<TracerLeave>,
}

impl Context {
    pub(crate) fn new(input: Rc<str>) -> Context {
        Context {
            input,
            error_pos: None,
            message_pos: None,
            message: String::new(),
            rule_stack: Vec::new(),
            whitespace_ope: None,
            in_whitespace: false,
            keyword_ope: None,
            in_token: false,
            tracer_enter: None,
            tracer_leave: None,
        }
    }

    /// Furthest-failure tracking; the position only ever moves forward.
    pub(crate) fn set_error_pos(&mut self, pos: usize) {
        if self.error_pos < Some(pos) {
            self.error_pos = Some(pos);
        }
    }

    pub(crate) fn set_message(&mut self, pos: usize, message: String) {
        if self.message_pos < Some(pos) {
            self.message_pos = Some(pos);
            self.message = message;
        }
    }
}
