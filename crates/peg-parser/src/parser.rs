use std::any::Any;
use std::cell::RefMut;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::{TracerEnter, TracerLeave};
use crate::error::{Error, ErrorDetail};
use crate::expr::enable_expression_parsing;
use crate::ope::{cho, cls, dot, ign, lit, npd, oom, opt, seq, tok, wsp, zom, Ope};
use crate::rule::{line_info, ActionResult, Grammar, Rule};
use crate::values::{SemanticValues, Value};

/// Defining a rule under this name installs it as the grammar-wide
/// whitespace operator on the start rule.
pub const WHITESPACE_RULE_NAME: &str = "%whitespace";

/// Defining a rule under this name installs it as the keyword-boundary
/// operator: literals the rule fully matches must not run into another
/// match of it.
pub const KEYWORD_RULE_NAME: &str = "%keyword";

/// Directives collected from the options block after a `---` line, in
/// order of appearance: `%expr = RULE`, `%binop = {L|R} tok…`.
pub(crate) type Options = IndexMap<String, Vec<String>>;

/// Accumulated while the meta grammar parses a grammar source.
#[derive(Default)]
struct BuildData {
    grammar: Grammar,
    start: String,
    references: IndexMap<String, usize>,
    duplicates: Vec<(String, usize)>,
}

/// A compiled PEG parser: a rule table plus the recorded start rule.
///
/// Compile a grammar with [`Parser::new`], install actions on rules via
/// [`Parser::rule_mut`], then run [`Parser::parse`] or
/// [`Parser::parse_value`] against inputs.
pub struct Parser {
    grammar: Grammar,
    start: String,
    pub(crate) options: Options,
    pub tracer_enter: Option<TracerEnter>,
    pub tracer_leave: Option<TracerLeave>,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser").field("start", &self.start).finish()
    }
}

impl Parser {
    /// Compiles a grammar. On failure all diagnostics are reported at
    /// once: syntax errors, duplicate definitions, undefined references
    /// and left-recursive rules.
    pub fn new(syntax: &str) -> Result<Parser, Error> {
        Parser::with_user_rules(syntax, Vec::new())
    }

    /// Compiles a grammar with extra host-defined rules merged in. A
    /// rule name prefixed with `~` is marked ignored.
    pub fn with_user_rules(
        syntax: &str,
        user_rules: Vec<(String, Rc<Ope>)>,
    ) -> Result<Parser, Error> {
        let (grammar_src, options) = split_options(syntax);

        let meta = meta_grammar();
        let mut data = BuildData::default();
        meta.rule("Start")
            .expect("meta grammar defines Start")
            .parse(grammar_src, &mut data)?;

        for (name, ope) in user_rules {
            let (name, ignore) = match name.strip_prefix('~') {
                Some(rest) => (rest, true),
                None => (name.as_str(), false),
            };
            if name.is_empty() {
                continue;
            }
            let mut rule = Rule::new(name, ope);
            rule.ignore = ignore;
            data.grammar.add(rule);
        }

        let mut details = Vec::new();

        for (name, pos) in &data.duplicates {
            let (line, column) = line_info(grammar_src, *pos);
            details.push(ErrorDetail {
                line,
                column,
                message: format!("'{name}' is already defined."),
            });
        }

        for (name, pos) in &data.references {
            if !data.grammar.contains(name) {
                let (line, column) = line_info(grammar_src, *pos);
                details.push(ErrorDetail {
                    line,
                    column,
                    message: format!("'{name}' is not defined."),
                });
            }
        }

        if !details.is_empty() {
            return Err(Error { details });
        }

        for name in data.grammar.names() {
            let body = data
                .grammar
                .rule(&name)
                .expect("rule was just listed")
                .ope();
            if let Some(pos) = crate::visitor::detect_left_recursion(&name, &body) {
                let (line, column) = line_info(grammar_src, pos);
                details.push(ErrorDetail {
                    line,
                    column,
                    message: format!("'{name}' is left recursive."),
                });
            }
        }

        if !details.is_empty() {
            return Err(Error { details });
        }

        if data.start.is_empty() {
            return Err(Error::single(1, 1, "start rule is not defined."));
        }

        if data.grammar.contains(WHITESPACE_RULE_NAME) {
            let ws = wsp(data.grammar.reference(WHITESPACE_RULE_NAME));
            data.grammar
                .rule_mut(&data.start)
                .expect("start rule exists")
                .whitespace_ope = Some(ws);
        }

        if data.grammar.contains(KEYWORD_RULE_NAME) {
            let kw = data
                .grammar
                .rule(KEYWORD_RULE_NAME)
                .expect("keyword rule exists")
                .ope();
            data.grammar
                .rule_mut(&data.start)
                .expect("start rule exists")
                .keyword_ope = Some(kw);
        }

        enable_expression_parsing(&data.grammar, &options)?;

        Ok(Parser {
            grammar: data.grammar,
            start: data.start,
            options,
            tracer_enter: None,
            tracer_leave: None,
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Name of the start rule (the first non-ignored definition).
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Mutable access to a rule, for installing actions and hooks.
    pub fn rule_mut(&self, name: &str) -> Option<RefMut<'_, Rule>> {
        self.grammar.rule_mut(name)
    }

    /// Matches `s` against the grammar's start rule.
    pub fn parse(&self, s: &str, dt: &mut dyn Any) -> Result<(), Error> {
        self.parse_value(s, dt).map(|_| ())
    }

    /// Matches `s` and returns the value produced by the start rule's
    /// action, if any.
    pub fn parse_value(&self, s: &str, dt: &mut dyn Any) -> Result<Option<Value>, Error> {
        {
            let mut start = self
                .grammar
                .rule_mut(&self.start)
                .expect("start rule exists");
            start.tracer_enter = self.tracer_enter.clone();
            start.tracer_leave = self.tracer_leave.clone();
        }
        let start = self.grammar.rule(&self.start).expect("start rule exists");
        let (_, value) = start.parse(s, dt)?;
        Ok(value)
    }
}

fn set_action(
    g: &Grammar,
    name: &str,
    f: impl Fn(&SemanticValues, &mut dyn Any) -> ActionResult + 'static,
) {
    g.rule_mut(name).expect("meta grammar rule").action = Some(Rc::new(f));
}

/// The PEG-syntax grammar, assembled from the same operator algebra it
/// compiles grammars for. Actions build the user rule table into the
/// [`BuildData`] passed as user data.
fn meta_grammar() -> Grammar {
    let g = Grammar::new();
    let r = |name: &str| g.reference(name);

    g.add(Rule::new(
        "Start",
        seq(vec![r("Spacing"), oom(r("Definition")), r("EndOfFile")]),
    ));
    g.add(Rule::new(
        "Definition",
        seq(vec![
            opt(r("IGNORE")),
            r("Identifier"),
            r("LEFTARROW"),
            r("Expression"),
        ]),
    ));

    g.add(Rule::new(
        "Expression",
        seq(vec![
            r("Sequence"),
            zom(seq(vec![r("SLASH"), r("Sequence")])),
        ]),
    ));
    g.add(Rule::new("Sequence", zom(r("Prefix"))));
    g.add(Rule::new(
        "Prefix",
        seq(vec![opt(cho(vec![r("AND"), r("NOT")])), r("Suffix")]),
    ));
    g.add(Rule::new(
        "Suffix",
        seq(vec![
            r("Primary"),
            opt(cho(vec![r("QUESTION"), r("STAR"), r("PLUS")])),
        ]),
    ));
    g.add(Rule::new(
        "Primary",
        cho(vec![
            seq(vec![opt(r("IGNORE")), r("Identifier"), npd(r("LEFTARROW"))]),
            seq(vec![r("OPEN"), r("Expression"), r("CLOSE")]),
            seq(vec![r("BeginTok"), r("Expression"), r("EndTok")]),
            r("Literal"),
            r("Class"),
            r("DOT"),
        ]),
    ));

    g.add(Rule::new(
        "Identifier",
        seq(vec![r("IdentCont"), r("Spacing")]),
    ));
    g.add(Rule::new(
        "IdentCont",
        seq(vec![r("IdentStart"), zom(r("IdentRest"))]),
    ));
    g.add(Rule::new(
        "IdentStart",
        cls(b"a-zA-Z_\x80-\xff%".as_slice()),
    ));
    g.add(Rule::new(
        "IdentRest",
        cho(vec![r("IdentStart"), cls("0-9")]),
    ));

    g.add(Rule::new(
        "Literal",
        cho(vec![
            seq(vec![
                lit("'"),
                tok(zom(seq(vec![npd(lit("'")), r("Char")]))),
                lit("'"),
                r("Spacing"),
            ]),
            seq(vec![
                lit("\""),
                tok(zom(seq(vec![npd(lit("\"")), r("Char")]))),
                lit("\""),
                r("Spacing"),
            ]),
        ]),
    ));

    g.add(Rule::new(
        "Class",
        seq(vec![
            lit("["),
            tok(zom(seq(vec![npd(lit("]")), r("Range")]))),
            lit("]"),
            r("Spacing"),
        ]),
    ));

    g.add(Rule::new(
        "Range",
        cho(vec![
            seq(vec![r("Char"), lit("-"), r("Char")]),
            r("Char"),
        ]),
    ));
    g.add(Rule::new(
        "Char",
        cho(vec![
            seq(vec![lit("\\"), cls(r#"nrt'"[]\"#)]),
            seq(vec![lit("\\"), cls("0-3"), cls("0-7"), cls("0-7")]),
            seq(vec![lit("\\"), cls("0-7"), opt(cls("0-7"))]),
            seq(vec![lit("\\x"), cls("0-9a-fA-F"), opt(cls("0-9a-fA-F"))]),
            seq(vec![npd(lit("\\")), dot()]),
        ]),
    ));

    g.add(Rule::new(
        "LEFTARROW",
        seq(vec![cho(vec![lit("<-"), lit("←")]), r("Spacing")]),
    ));
    g.add(Rule::new("SLASH", seq(vec![lit("/"), r("Spacing")])));
    g.add(Rule::new("AND", seq(vec![lit("&"), r("Spacing")])));
    g.add(Rule::new("NOT", seq(vec![lit("!"), r("Spacing")])));
    g.add(Rule::new("QUESTION", seq(vec![lit("?"), r("Spacing")])));
    g.add(Rule::new("STAR", seq(vec![lit("*"), r("Spacing")])));
    g.add(Rule::new("PLUS", seq(vec![lit("+"), r("Spacing")])));
    g.add(Rule::new("OPEN", seq(vec![lit("("), r("Spacing")])));
    g.add(Rule::new("CLOSE", seq(vec![lit(")"), r("Spacing")])));
    g.add(Rule::new("DOT", seq(vec![lit("."), r("Spacing")])));

    g.add(Rule::new(
        "Spacing",
        zom(cho(vec![r("Space"), r("Comment")])),
    ));
    g.add(Rule::new(
        "Comment",
        seq(vec![
            lit("#"),
            zom(seq(vec![npd(r("EndOfLine")), dot()])),
            r("EndOfLine"),
        ]),
    ));
    g.add(Rule::new(
        "Space",
        cho(vec![lit(" "), lit("\t"), r("EndOfLine")]),
    ));
    g.add(Rule::new(
        "EndOfLine",
        cho(vec![lit("\r\n"), lit("\n"), lit("\r")]),
    ));
    g.add(Rule::new("EndOfFile", npd(dot())));

    g.add(Rule::new("BeginTok", seq(vec![lit("<"), r("Spacing")])));
    g.add(Rule::new("EndTok", seq(vec![lit(">"), r("Spacing")])));

    g.add(Rule::new("IGNORE", lit("~")));

    g.rule_mut("SLASH").expect("meta grammar rule").ignore = true;

    set_action(&g, "Definition", |sv, dt| {
        let data = dt
            .downcast_mut::<BuildData>()
            .expect("grammar build context");

        let ignore = sv.len() == 4;
        let base = if ignore { 1 } else { 0 };
        let name = sv.to_str(base);
        let ope = sv.to_ope(base + 2);

        if data.grammar.contains(&name) {
            data.duplicates.push((name, sv.pos()));
        } else {
            let mut rule = Rule::new(&name, ope);
            rule.ignore = ignore;
            data.grammar.add(rule);
            if data.start.is_empty() && !ignore {
                data.start = name;
            }
        }
        Ok(None)
    });

    set_action(&g, "Expression", |sv, _| {
        if sv.len() == 1 {
            Ok(Some(sv.to_ope(0)))
        } else {
            let opes = (0..sv.len()).map(|i| sv.to_ope(i)).collect();
            Ok(Some(cho(opes)))
        }
    });

    set_action(&g, "Sequence", |sv, _| {
        if sv.len() == 1 {
            Ok(Some(sv.to_ope(0)))
        } else {
            let opes = (0..sv.len()).map(|i| sv.to_ope(i)).collect();
            Ok(Some(seq(opes)))
        }
    });

    set_action(&g, "Prefix", |sv, _| {
        if sv.len() == 1 {
            return Ok(Some(sv.to_ope(0)));
        }
        let ope = sv.to_ope(1);
        let ope = match sv.to_str(0).as_str() {
            "&" => crate::ope::apd(ope),
            _ => npd(ope),
        };
        Ok(Some(ope))
    });

    set_action(&g, "Suffix", |sv, _| {
        let ope = sv.to_ope(0);
        if sv.len() == 1 {
            return Ok(Some(ope));
        }
        let ope = match sv.to_str(1).as_str() {
            "?" => opt(ope),
            "*" => zom(ope),
            _ => oom(ope),
        };
        Ok(Some(ope))
    });

    set_action(&g, "Primary", |sv, dt| {
        let data = dt
            .downcast_mut::<BuildData>()
            .expect("grammar build context");

        match sv.choice() {
            0 => {
                let ignore = sv.len() == 2;
                let base = if ignore { 1 } else { 0 };
                let ident = sv.to_str(base);
                data.references
                    .entry(ident.clone())
                    .or_insert_with(|| sv.pos());
                let reference = data.grammar.reference_at(&ident, sv.pos());
                Ok(Some(if ignore { ign(reference) } else { reference }))
            }
            1 => Ok(Some(sv.to_ope(1))),
            2 => Ok(Some(tok(sv.to_ope(1)))),
            _ => Ok(Some(sv.to_ope(0))),
        }
    });

    set_action(&g, "IdentCont", |sv, _| {
        Ok(Some(Rc::new(sv.span().to_string())))
    });

    set_action(&g, "Literal", |sv, _| {
        Ok(Some(lit(resolve_escape_sequence(sv.span()))))
    });

    set_action(&g, "Class", |sv, _| {
        Ok(Some(cls(resolve_escape_sequence(sv.span()))))
    });

    for name in ["AND", "NOT", "QUESTION", "STAR", "PLUS"] {
        set_action(&g, name, |sv, _| {
            Ok(Some(Rc::new(sv.span()[..1].to_string())))
        });
    }

    set_action(&g, "DOT", |_, _| Ok(Some(dot())));

    g
}

/// Splits a grammar source at the first `---` line; everything after it
/// is parsed as directive lines (`%key = value`, `#` comments allowed).
fn split_options(s: &str) -> (&str, Options) {
    let mut grammar_end = s.len();
    let mut rest = "";
    let mut offset = 0;
    for line in s.split_inclusive('\n') {
        if line.trim() == "---" {
            grammar_end = offset;
            rest = &s[offset + line.len()..];
            break;
        }
        offset += line.len();
    }

    let mut options = Options::new();
    for line in rest.lines() {
        let line = match line.find('#') {
            Some(i) => &line[..i],
            None => line,
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.starts_with('%') && !value.is_empty() {
            options
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    (&s[..grammar_end], options)
}

fn hex_value(b: u8) -> Option<u32> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u32),
        b'a'..=b'f' => Some((b - b'a' + 10) as u32),
        b'A'..=b'F' => Some((b - b'A' + 10) as u32),
        _ => None,
    }
}

fn digit_value(b: u8) -> Option<u32> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u32),
        _ => None,
    }
}

fn parse_hex_number(s: &[u8], mut i: usize) -> (u8, usize) {
    let mut ret: u32 = 0;
    while i < s.len() {
        let Some(v) = hex_value(s[i]) else { break };
        ret = ret.wrapping_mul(16).wrapping_add(v);
        i += 1;
    }
    (ret as u8, i)
}

fn parse_oct_number(s: &[u8], mut i: usize) -> (u8, usize) {
    let mut ret: u32 = 0;
    while i < s.len() {
        let Some(v) = digit_value(s[i]) else { break };
        ret = ret.wrapping_mul(8).wrapping_add(v);
        i += 1;
    }
    (ret as u8, i)
}

/// Decodes `\n \r \t \' \" \[ \] \\`, `\xHH` and octal `\ooo` escapes
/// into raw bytes. Operates on token text the grammar already
/// validated.
fn resolve_escape_sequence(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        if ch != b'\\' || i + 1 == bytes.len() {
            out.push(ch);
            i += 1;
            continue;
        }
        i += 1;
        match bytes[i] {
            b'n' => {
                out.push(b'\n');
                i += 1;
            }
            b'r' => {
                out.push(b'\r');
                i += 1;
            }
            b't' => {
                out.push(b'\t');
                i += 1;
            }
            b'\'' | b'"' | b'[' | b']' | b'\\' => {
                out.push(bytes[i]);
                i += 1;
            }
            b'x' => {
                let (b, next) = parse_hex_number(bytes, i + 1);
                if next == i + 1 {
                    out.push(bytes[i]);
                    i += 1;
                } else {
                    out.push(b);
                    i = next;
                }
            }
            _ => {
                let (b, next) = parse_oct_number(bytes, i);
                if next == i {
                    out.push(bytes[i]);
                    i += 1;
                } else {
                    out.push(b);
                    i = next;
                }
            }
        }
    }

    out
}
