use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pretty_assertions::assert_eq;

use crate::{
    action_to_i64, action_to_str, cho, cls, dot, lit, npd, oom, seq, tok, usr, wsp, zom,
    ActionResult, Ast, AstOptimizer, ErrorDetail, Grammar, Ope, Parser, Rule, SemanticValues,
};

#[test]
fn simple_syntax() {
    Parser::new(
        "
        ROOT ← _
        _    <- ' '
    ",
    )
    .unwrap();
}

#[test]
fn empty_syntax() {
    assert!(Parser::new("").is_err());
}

#[test]
fn string_capture() {
    let parser = Parser::new(
        r"
        ROOT      <-  _ ('[' TAG_NAME ']' _)*
        TAG_NAME  <-  (!']' .)+
        _         <-  [ \t]*
    ",
    )
    .unwrap();

    let tags = Rc::new(RefCell::new(Vec::<String>::new()));
    {
        let tags = tags.clone();
        parser.rule_mut("TAG_NAME").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                tags.borrow_mut().push(sv.span().to_string());
                Ok(None)
            }));
    }

    assert!(parser.parse(" [tag1] [tag:2] [tag-3] ", &mut ()).is_ok());
    assert_eq!(*tags.borrow(), ["tag1", "tag:2", "tag-3"]);
}

#[test]
fn string_capture_with_combinators() {
    let g = Grammar::new();
    g.add(Rule::new(
        "ROOT",
        seq(vec![g.reference("WS"), zom(g.reference("TAG"))]),
    ));
    g.add(Rule::new(
        "TAG",
        seq(vec![
            lit("["),
            g.reference("TAG_NAME"),
            lit("]"),
            g.reference("WS"),
        ]),
    ));
    g.add(Rule::new(
        "TAG_NAME",
        oom(seq(vec![npd(lit("]")), dot()])),
    ));
    g.add(Rule::new("WS", zom(cls(" \t"))));

    let tags = Rc::new(RefCell::new(Vec::<String>::new()));
    {
        let tags = tags.clone();
        g.rule_mut("TAG_NAME").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                tags.borrow_mut().push(sv.span().to_string());
                Ok(None)
            }));
    }

    let result = g
        .rule("ROOT")
        .unwrap()
        .parse(" [tag1] [tag:2] [tag-3] ", &mut ());
    assert!(result.is_ok());
    assert_eq!(*tags.borrow(), ["tag1", "tag:2", "tag-3"]);
}

#[test]
fn string_capture_with_token_boundary() {
    let parser = Parser::new(
        r"
        ROOT  <- _ TOKEN*
        TOKEN <- '[' < (!']' .)+ > ']' _
        _     <- [ \t\r\n]*
    ",
    )
    .unwrap();

    let tags = Rc::new(RefCell::new(Vec::<String>::new()));
    {
        let tags = tags.clone();
        parser.rule_mut("TOKEN").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                tags.borrow_mut().push(sv.token().to_string());
                Ok(None)
            }));
    }

    assert!(parser.parse(" [tag1] [tag:2] [tag-3] ", &mut ()).is_ok());
    assert_eq!(*tags.borrow(), ["tag1", "tag:2", "tag-3"]);
}

#[test]
fn cyclic_grammar_construction() {
    let g = Grammar::new();
    g.add(Rule::new("PARENT", seq(vec![g.reference("CHILD")])));
    g.add(Rule::new("CHILD", seq(vec![g.reference("PARENT")])));
    assert!(g.contains("PARENT"));
    assert!(g.contains("CHILD"));
}

#[test]
fn token_classification() {
    let parser = Parser::new(
        r"
        EXPRESSION       <-  _ TERM (TERM_OPERATOR TERM)*
        TERM             <-  FACTOR (FACTOR_OPERATOR FACTOR)*
        FACTOR           <-  NUMBER / '(' _ EXPRESSION ')' _
        TERM_OPERATOR    <-  < [-+] > _
        FACTOR_OPERATOR  <-  < [/*] > _
        NUMBER           <-  < [0-9]+ > _
        _                <-  [ \t\r\n]*
    ",
    )
    .unwrap();

    let g = parser.grammar();
    assert!(!g.rule("EXPRESSION").unwrap().is_token());
    assert!(!g.rule("FACTOR").unwrap().is_token());
    assert!(g.rule("FACTOR_OPERATOR").unwrap().is_token());
    assert!(g.rule("NUMBER").unwrap().is_token());
    assert!(g.rule("_").unwrap().is_token());
}

#[test]
fn lambda_action() {
    let parser = Parser::new(
        "
       START <- (CHAR)*
       CHAR  <- .
    ",
    )
    .unwrap();

    let text = Rc::new(RefCell::new(String::new()));
    {
        let text = text.clone();
        parser.rule_mut("CHAR").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                text.borrow_mut().push_str(sv.span());
                Ok(None)
            }));
    }

    assert!(parser.parse("hello", &mut ()).is_ok());
    assert_eq!(*text.borrow(), "hello");
}

#[test]
fn enter_leave_handlers() {
    let parser = Parser::new(
        "
        START  <- LTOKEN '=' RTOKEN
        LTOKEN <- TOKEN
        RTOKEN <- TOKEN
        TOKEN  <- [A-Za-z]+
    ",
    )
    .unwrap();

    parser.rule_mut("LTOKEN").unwrap().enter = Some(Rc::new(|dt: &mut dyn Any| {
        *dt.downcast_mut::<bool>().unwrap() = false;
    }));
    parser.rule_mut("LTOKEN").unwrap().leave = Some(Rc::new(|dt: &mut dyn Any| {
        *dt.downcast_mut::<bool>().unwrap() = true;
    }));

    let message = "should be upper case string...";
    parser.rule_mut("TOKEN").unwrap().action =
        Some(Rc::new(move |sv: &SemanticValues, dt: &mut dyn Any| {
            if *dt.downcast_ref::<bool>().unwrap() && sv.span() != sv.span().to_uppercase() {
                return Err(message.to_string());
            }
            Ok(None)
        }));

    let mut require_upper_case = false;
    assert!(parser.parse("hello=world", &mut require_upper_case).is_err());
    assert!(parser.parse("HELLO=world", &mut require_upper_case).is_err());
    assert!(parser.parse("hello=WORLD", &mut require_upper_case).is_ok());
    assert!(parser.parse("HELLO=WORLD", &mut require_upper_case).is_ok());

    let err = parser
        .parse("hello=world", &mut require_upper_case)
        .unwrap_err();
    assert_eq!(
        err.details,
        [ErrorDetail {
            line: 1,
            column: 7,
            message: message.to_string(),
        }]
    );
}

#[test]
fn whitespace_skipping() {
    let parser = Parser::new(
        r#"
        # Rules
        ROOT         <-  ITEM (',' ITEM)*
        ITEM         <-  WORD / PHRASE

        # Tokens
        WORD         <-  < [a-zA-Z0-9_]+ >
        PHRASE       <-  < '"' (!'"' .)* '"' >

        %whitespace  <-  [ \t\r\n]*
    "#,
    )
    .unwrap();

    assert!(parser
        .parse("  one, \t \"two, three\",   four  ", &mut ())
        .is_ok());
}

#[test]
fn whitespace_rule_with_references() {
    let parser = Parser::new(
        r"
        # Rules
        ROOT         <-  ITEM (',' ITEM)*
        ITEM         <-  '[' < [a-zA-Z0-9_]+ > ']'

        %whitespace  <-  (SPACE / TAB)*
        SPACE        <-  ' '
        TAB          <-  '\t'
    ",
    )
    .unwrap();

    let items = Rc::new(RefCell::new(Vec::<String>::new()));
    {
        let items = items.clone();
        parser.rule_mut("ITEM").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                items.borrow_mut().push(sv.token().to_string());
                Ok(None)
            }));
    }

    assert!(parser.parse("[one], \t[two] ,[three] ", &mut ()).is_ok());
    assert_eq!(*items.borrow(), ["one", "two", "three"]);
}

#[test]
fn keyword_boundary() {
    let parser = Parser::new(
        r"
        ROOT         <-  'hello' ','? 'world'
        %whitespace  <-  [ \t\r\n]*
        %keyword     <-  [a-z]+
    ",
    )
    .unwrap();

    assert!(parser.parse("helloworld", &mut ()).is_err());
    assert!(parser.parse("hello world", &mut ()).is_ok());
    assert!(parser.parse("hello,world", &mut ()).is_ok());
    assert!(parser.parse("hello, world", &mut ()).is_ok());
    assert!(parser.parse("hello , world", &mut ()).is_ok());
}

#[test]
fn ignored_rule_skips_semantic_values() {
    let parser = Parser::new(
        r"
        ROOT  <-  _ ITEM (',' _ ITEM _)*
        ITEM  <-  ([a-z0-9])+
        ~_    <-  [ \t]*
    ",
    )
    .unwrap();

    let count = Rc::new(Cell::new(0));
    {
        let count = count.clone();
        parser.rule_mut("ROOT").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                count.set(sv.len());
                Ok(None)
            }));
    }

    assert!(parser.parse(" item1, item2 ", &mut ()).is_ok());
    assert_eq!(count.get(), 2);
}

#[test]
fn whitespace_rule_skips_semantic_values() {
    let parser = Parser::new(
        r"
        ROOT        <-  ITEM (',' ITEM)*
        ITEM        <-  < ([a-z0-9])+ >
        %whitespace <-  [ \t]*
    ",
    )
    .unwrap();

    let count = Rc::new(Cell::new(0));
    {
        let count = count.clone();
        parser.rule_mut("ROOT").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                count.set(sv.len());
                Ok(None)
            }));
    }

    assert!(parser.parse(" item1, item2 ", &mut ()).is_ok());
    assert_eq!(count.get(), 2);
}

#[test]
fn ignore_erasure_keeps_consumed_length() {
    let with_value = Parser::new("S <- X 'b'\nX <- 'a'").unwrap();
    let ignored = Parser::new("S <- ~X 'b'\nX <- 'a'").unwrap();

    let count = Rc::new(Cell::new(usize::MAX));
    for parser in [&with_value, &ignored] {
        let count = count.clone();
        parser.rule_mut("S").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                count.set(sv.len());
                Ok(None)
            }));
    }

    assert!(with_value.parse("ab", &mut ()).is_ok());
    assert_eq!(count.get(), 1);
    assert!(ignored.parse("ab", &mut ()).is_ok());
    assert_eq!(count.get(), 0);
}

#[test]
fn choice_index_reports_winning_alternative() {
    let parser = Parser::new("S <- 'a' / 'b' / 'c'").unwrap();

    let choice = Rc::new(Cell::new(usize::MAX));
    {
        let choice = choice.clone();
        parser.rule_mut("S").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                choice.set(sv.choice());
                Ok(None)
            }));
    }

    assert!(parser.parse("c", &mut ()).is_ok());
    assert_eq!(choice.get(), 2);
    assert!(parser.parse("a", &mut ()).is_ok());
    assert_eq!(choice.get(), 0);
}

#[test]
fn failed_alternative_leaves_no_values_behind() {
    let parser = Parser::new(
        "
        S     <- PAT1 / PAT2
        PAT1  <- HELLO ' One'
        PAT2  <- HELLO ' Two'
        HELLO <- 'Hello'
    ",
    )
    .unwrap();

    let count = Rc::new(Cell::new(usize::MAX));
    {
        let count = count.clone();
        parser.rule_mut("S").unwrap().action =
            Some(Rc::new(move |sv: &SemanticValues, _: &mut dyn Any| {
                count.set(sv.len());
                Ok(None)
            }));
    }

    assert!(parser.parse("Hello Two", &mut ()).is_ok());
    assert_eq!(count.get(), 1);
}

#[test]
fn furthest_failure_position_is_reported() {
    let parser = Parser::new("S <- 'ab' 'X' / 'aZ'").unwrap();
    let err = parser.parse("abY", &mut ()).unwrap_err();
    assert_eq!(
        err.details,
        [ErrorDetail {
            line: 1,
            column: 3,
            message: "syntax error".to_string(),
        }]
    );
}

#[test]
fn partial_match_is_not_exact() {
    let parser = Parser::new("ROOT <- 'a'").unwrap();
    let err = parser.parse("ab", &mut ()).unwrap_err();
    assert_eq!(
        err.details,
        [ErrorDetail {
            line: 1,
            column: 2,
            message: "not exact match".to_string(),
        }]
    );
}

#[test]
fn whitespace_wiring_at_top_level_token() {
    let parser = Parser::new("NUM <- [0-9]+\n%whitespace <- [ \\t]*").unwrap();
    assert!(parser.parse(" 42 ", &mut ()).is_ok());
    assert!(parser.parse(" 4 2 ", &mut ()).is_err());
}

#[test]
fn octal_and_hex_escapes() {
    let parser = Parser::new(r"ROOT <- '\132\x7a'").unwrap();
    assert!(parser.parse("Zz", &mut ()).is_ok());
    assert!(parser.parse("zz", &mut ()).is_err());
}

#[test]
fn simple_calculator() {
    let parser = Parser::new(
        "
        Additive  <- Multitive '+' Additive / Multitive
        Multitive <- Primary '*' Multitive / Primary
        Primary   <- '(' Additive ')' / Number
        Number    <- [0-9]+
    ",
    )
    .unwrap();

    parser.rule_mut("Additive").unwrap().action =
        Some(Rc::new(|sv: &SemanticValues, _: &mut dyn Any| {
            Ok(Some(Rc::new(match sv.choice() {
                0 => sv.to_i64(0) + sv.to_i64(1),
                _ => sv.to_i64(0),
            })))
        }));
    parser.rule_mut("Multitive").unwrap().action =
        Some(Rc::new(|sv: &SemanticValues, _: &mut dyn Any| {
            Ok(Some(Rc::new(match sv.choice() {
                0 => sv.to_i64(0) * sv.to_i64(1),
                _ => sv.to_i64(0),
            })))
        }));
    parser.rule_mut("Number").unwrap().action = Some(Rc::new(action_to_i64));

    let val = parser.parse_value("(1+2)*3", &mut ()).unwrap().unwrap();
    assert_eq!(*val.downcast::<i64>().unwrap(), 9);
}

fn reduce(sv: &SemanticValues, _dt: &mut dyn Any) -> ActionResult {
    let mut ret = sv.to_i64(0);
    for i in (1..sv.len()).step_by(2) {
        let num = sv.to_i64(i + 1);
        match sv.to_str(i).as_str() {
            "+" => ret += num,
            "-" => ret -= num,
            "*" => ret *= num,
            _ => ret /= num,
        }
    }
    Ok(Some(Rc::new(ret)))
}

fn install_calculator_actions(parser: &Parser) {
    parser.rule_mut("EXPRESSION").unwrap().action = Some(Rc::new(reduce));
    parser.rule_mut("TERM").unwrap().action = Some(Rc::new(reduce));
    parser.rule_mut("TERM_OPERATOR").unwrap().action = Some(Rc::new(action_to_str));
    parser.rule_mut("FACTOR_OPERATOR").unwrap().action = Some(Rc::new(action_to_str));
    parser.rule_mut("NUMBER").unwrap().action = Some(Rc::new(action_to_i64));
}

#[test]
fn calculator_with_combinators() {
    let g = Grammar::new();
    g.add(Rule::new(
        "EXPRESSION",
        seq(vec![
            g.reference("TERM"),
            zom(seq(vec![g.reference("TERM_OPERATOR"), g.reference("TERM")])),
        ]),
    ));
    g.add(Rule::new(
        "TERM",
        seq(vec![
            g.reference("FACTOR"),
            zom(seq(vec![
                g.reference("FACTOR_OPERATOR"),
                g.reference("FACTOR"),
            ])),
        ]),
    ));
    g.add(Rule::new(
        "FACTOR",
        cho(vec![
            g.reference("NUMBER"),
            seq(vec![lit("("), g.reference("EXPRESSION"), lit(")")]),
        ]),
    ));
    g.add(Rule::new("TERM_OPERATOR", cls("+-")));
    g.add(Rule::new("FACTOR_OPERATOR", cls("/*")));
    g.add(Rule::new("NUMBER", oom(cls("0-9"))));

    g.rule_mut("EXPRESSION").unwrap().action = Some(Rc::new(reduce));
    g.rule_mut("TERM").unwrap().action = Some(Rc::new(reduce));
    g.rule_mut("TERM_OPERATOR").unwrap().action = Some(Rc::new(action_to_str));
    g.rule_mut("FACTOR_OPERATOR").unwrap().action = Some(Rc::new(action_to_str));
    g.rule_mut("NUMBER").unwrap().action = Some(Rc::new(action_to_i64));

    let (_, val) = g
        .rule("EXPRESSION")
        .unwrap()
        .parse("1+2*3*(4-5+6)/7-8", &mut ())
        .unwrap();
    assert_eq!(*val.unwrap().downcast::<i64>().unwrap(), -3);
}

#[test]
fn calculator_with_whitespace_ope_on_rule() {
    let g = Grammar::new();
    g.add(Rule::new(
        "EXPRESSION",
        seq(vec![
            g.reference("TERM"),
            zom(seq(vec![g.reference("TERM_OPERATOR"), g.reference("TERM")])),
        ]),
    ));
    g.add(Rule::new(
        "TERM",
        seq(vec![
            g.reference("FACTOR"),
            zom(seq(vec![
                g.reference("FACTOR_OPERATOR"),
                g.reference("FACTOR"),
            ])),
        ]),
    ));
    g.add(Rule::new(
        "FACTOR",
        cho(vec![
            g.reference("NUMBER"),
            seq(vec![lit("("), g.reference("EXPRESSION"), lit(")")]),
        ]),
    ));
    g.add(Rule::new("TERM_OPERATOR", tok(cls("-+"))));
    g.add(Rule::new("FACTOR_OPERATOR", tok(cls("/*"))));
    g.add(Rule::new("NUMBER", tok(oom(cls("0-9")))));

    g.rule_mut("EXPRESSION").unwrap().whitespace_ope = Some(wsp(zom(cls(" \t"))));

    g.rule_mut("EXPRESSION").unwrap().action = Some(Rc::new(reduce));
    g.rule_mut("TERM").unwrap().action = Some(Rc::new(reduce));
    g.rule_mut("TERM_OPERATOR").unwrap().action = Some(Rc::new(action_to_str));
    g.rule_mut("FACTOR_OPERATOR").unwrap().action = Some(Rc::new(action_to_str));
    g.rule_mut("NUMBER").unwrap().action = Some(Rc::new(action_to_i64));

    let input = " (1 + 2 * (3 + 4)) / 5 - 6 ";
    let (len, val) = g
        .rule("EXPRESSION")
        .unwrap()
        .parse(input, &mut ())
        .unwrap();
    assert_eq!(len, input.len());
    assert_eq!(*val.unwrap().downcast::<i64>().unwrap(), -3);
}

#[test]
fn calculator() {
    let parser = Parser::new(
        "
        # Grammar for Calculator...
        EXPRESSION       <-  TERM (TERM_OPERATOR TERM)*
        TERM             <-  FACTOR (FACTOR_OPERATOR FACTOR)*
        FACTOR           <-  NUMBER / '(' EXPRESSION ')'
        TERM_OPERATOR    <-  [-+]
        FACTOR_OPERATOR  <-  [/*]
        NUMBER           <-  [0-9]+
    ",
    )
    .unwrap();

    install_calculator_actions(&parser);

    let val = parser
        .parse_value("1+2*3*(4-5+6)/7-8", &mut ())
        .unwrap()
        .unwrap();
    assert_eq!(*val.downcast::<i64>().unwrap(), -3);
}

#[test]
fn calculator_with_whitespace() {
    let parser = Parser::new(
        r"
        # Grammar for simple calculator...
        EXPRESSION       <-  TERM (TERM_OPERATOR TERM)*
        TERM             <-  FACTOR (FACTOR_OPERATOR FACTOR)*
        FACTOR           <-  NUMBER / '(' EXPRESSION ')'
        TERM_OPERATOR    <-  [-+]
        FACTOR_OPERATOR  <-  [/*]
        NUMBER           <-  [0-9]+
        %whitespace      <-  [ \t]*
    ",
    )
    .unwrap();

    install_calculator_actions(&parser);

    let val = parser
        .parse_value(" 1 + 2 * 3 * (4 - 5 + 6) / 7 - 8 ", &mut ())
        .unwrap()
        .unwrap();
    assert_eq!(*val.downcast::<i64>().unwrap(), -3);
}

#[test]
fn calculator_with_expression_parsing() {
    let parser = Parser::new(
        r"
        # Grammar for simple calculator...
        EXPRESSION   <-  ATOM (BINOP ATOM)*
        ATOM         <-  NUMBER / '(' EXPRESSION ')'
        BINOP        <-  < [-+/*] >
        NUMBER       <-  < [0-9]+ >
        %whitespace  <-  [ \t]*
        ---
        # Expression parsing
        %expr  = EXPRESSION # rule
        %binop = L + -      # level 1
        %binop = L * /      # level 2
    ",
    )
    .unwrap();

    parser.rule_mut("EXPRESSION").unwrap().action =
        Some(Rc::new(|sv: &SemanticValues, _: &mut dyn Any| {
            let mut val = sv.to_i64(0);
            if sv.len() > 1 {
                let rhs = sv.to_i64(2);
                match sv.to_str(1).as_str() {
                    "+" => val += rhs,
                    "-" => val -= rhs,
                    "*" => val *= rhs,
                    _ => val /= rhs,
                }
            }
            Ok(Some(Rc::new(val)))
        }));
    parser.rule_mut("BINOP").unwrap().action =
        Some(Rc::new(|sv: &SemanticValues, _: &mut dyn Any| {
            Ok(Some(Rc::new(sv.token().to_string())))
        }));
    parser.rule_mut("NUMBER").unwrap().action =
        Some(Rc::new(|sv: &SemanticValues, _: &mut dyn Any| {
            let n: i64 = sv.token().parse().map_err(|_| "invalid number".to_string())?;
            Ok(Some(Rc::new(n)))
        }));

    let val = parser
        .parse_value("1+2*3*(4-5+6)/7-8", &mut ())
        .unwrap()
        .unwrap();
    assert_eq!(*val.downcast::<i64>().unwrap(), -3);

    let val = parser
        .parse_value(" 1 + 1 + 1 ", &mut ())
        .unwrap()
        .unwrap();
    assert_eq!(*val.downcast::<i64>().unwrap(), 3);
}

#[test]
fn expression_parsing_rejects_malformed_rule() {
    let result = Parser::new(
        r"
        EXPRESSION <- NUMBER
        NUMBER     <- [0-9]+
        ---
        %expr  = EXPRESSION
        %binop = L + -
    ",
    );
    let err = result.unwrap_err();
    assert_eq!(err.details[0].message, "expression syntax error");
}

fn eval(ast: &Ast) -> i64 {
    if ast.name == "NUMBER" {
        ast.token
            .as_deref()
            .expect("number is a leaf")
            .parse()
            .expect("number token is numeric")
    } else {
        let nodes = &ast.children;
        let mut result = eval(&nodes[0]);
        for i in (1..nodes.len()).step_by(2) {
            let num = eval(&nodes[i + 1]);
            match nodes[i].token.as_deref().expect("operator is a leaf") {
                "+" => result += num,
                "-" => result -= num,
                "*" => result *= num,
                _ => result /= num,
            }
        }
        result
    }
}

#[test]
fn calculator_with_ast() {
    let parser = Parser::new(
        r"
        EXPRESSION       <-  _ TERM (TERM_OPERATOR TERM)*
        TERM             <-  FACTOR (FACTOR_OPERATOR FACTOR)*
        FACTOR           <-  NUMBER / '(' _ EXPRESSION ')' _
        TERM_OPERATOR    <-  < [-+] > _
        FACTOR_OPERATOR  <-  < [/*] > _
        NUMBER           <-  < [0-9]+ > _
        ~_               <-  [ \t\r\n]*
    ",
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast("1+2*3*(4-5+6)/7-8", &mut ()).unwrap();
    let ast = AstOptimizer::new(&[]).optimize(&ast);
    assert_eq!(eval(&ast), -3);
}

#[test]
fn ast_skips_ignored_rule() {
    let parser = Parser::new(
        r"
        START <-  ~HELLO WORLD
        HELLO <- 'Hello' _
        WORLD <- 'World' _
        _     <- [ \t\r\n]*
    ",
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast("Hello World", &mut ()).unwrap();
    assert_eq!(ast.children.len(), 1);
    assert_eq!(ast.children[0].name, "WORLD");
}

#[test]
fn ast_skips_not_predicate_values() {
    let parser = Parser::new(
        r"
        START       <- _ !DUMMY HELLO_WORLD '.'
        HELLO_WORLD <- HELLO 'World' _
        HELLO       <- 'Hello' _
        DUMMY       <- 'dummy' _
        ~_          <- [ \t\r\n]*
    ",
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast("Hello World.", &mut ()).unwrap();
    assert_eq!(ast.children.len(), 1);
    assert_eq!(ast.children[0].name, "HELLO_WORLD");
}

#[test]
fn ast_skips_and_predicate_values() {
    let parser = Parser::new(
        r"
        START       <- _ &HELLO HELLO_WORLD '.'
        HELLO_WORLD <- HELLO 'World' _
        HELLO       <- 'Hello' _
        ~_          <- [ \t\r\n]*
    ",
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast("Hello World.", &mut ()).unwrap();
    assert_eq!(ast.children.len(), 1);
    assert_eq!(ast.children[0].name, "HELLO_WORLD");
}

#[test]
fn literal_token_on_ast() {
    let parser = Parser::new(
        r#"
        STRING_LITERAL  <- '"' (('\\"' / '\\t' / '\\n') / (!["] .))* '"'
    "#,
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast(r#""a\tb""#, &mut ()).unwrap();
    assert_eq!(ast.token.as_deref(), Some(r#""a\tb""#));
    assert!(ast.children.is_empty());
}

#[test]
fn literal_token_on_ast_with_subrules() {
    let parser = Parser::new(
        r#"
        STRING_LITERAL  <-  '"' (ESC / CHAR)* '"'
        ESC             <-  ('\\"' / '\\t' / '\\n')
        CHAR            <-  (!["] .)
    "#,
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast(r#""a\tb""#, &mut ()).unwrap();
    assert_eq!(ast.token, None);
    assert_eq!(ast.children.len(), 3);
}

#[test]
fn literal_token_on_ast_with_boundary() {
    let parser = Parser::new(
        r#"
        STRING_LITERAL  <-  < '"' (ESC / CHAR)* '"' >
        ESC             <-  ('\\"' / '\\t' / '\\n')
        CHAR            <-  (!["] .)
    "#,
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast(r#""a\tb""#, &mut ()).unwrap();
    assert_eq!(ast.token.as_deref(), Some(r#""a\tb""#));
    assert!(ast.children.is_empty());
}

#[test]
fn missing_definitions() {
    let err = Parser::new("A <- B C").unwrap_err();
    let messages: Vec<_> = err.details.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(messages, ["'B' is not defined.", "'C' is not defined."]);
}

#[test]
fn duplicate_definitions() {
    let err = Parser::new("A <- ''\nA <- ''").unwrap_err();
    assert_eq!(
        err.details,
        [ErrorDetail {
            line: 2,
            column: 1,
            message: "'A' is already defined.".to_string(),
        }]
    );
}

#[test]
fn duplicate_and_undefined_reported_together() {
    let err = Parser::new("A <- B\nA <- ''").unwrap_err();
    assert_eq!(
        err.details,
        [
            ErrorDetail {
                line: 2,
                column: 1,
                message: "'A' is already defined.".to_string(),
            },
            ErrorDetail {
                line: 1,
                column: 6,
                message: "'B' is not defined.".to_string(),
            },
        ]
    );
}

#[test]
fn left_recursion_is_rejected() {
    let err = Parser::new("A <- A 'a'\nB <- A 'a'").unwrap_err();
    assert_eq!(
        err.details,
        [ErrorDetail {
            line: 1,
            column: 6,
            message: "'A' is left recursive.".to_string(),
        }]
    );
}

#[test]
fn left_recursion_through_option() {
    let err = Parser::new("A  <- 'a' / 'b'? B 'c'\nB  <- A").unwrap_err();
    assert!(err
        .details
        .iter()
        .any(|d| d.message == "'A' is left recursive."));
}

#[test]
fn left_recursion_through_zero_or_more() {
    assert!(Parser::new("A <- 'a'* A*").is_err());
}

#[test]
fn left_recursion_through_empty_literal() {
    assert!(Parser::new("A <- '' A").is_err());
}

#[test]
fn user_defined_rules() {
    let rules: Vec<(String, Rc<Ope>)> = vec![
        (
            "NAME".to_string(),
            usr(|s: &str, p: usize, _sv: &mut SemanticValues, _dt: &mut dyn Any| {
                for name in ["PEG", "BNF"] {
                    if s.len() - p >= name.len() && &s[p..p + name.len()] == name {
                        return Some(name.len());
                    }
                }
                None
            }),
        ),
        ("~_".to_string(), zom(cls(" \t\r\n"))),
    ];

    let parser = Parser::with_user_rules(" ROOT <- _ 'Hello' _ NAME '!' _ ", rules).unwrap();
    assert!(parser.parse(" Hello BNF! ", &mut ()).is_ok());
    assert!(parser.parse(" Hello C++! ", &mut ()).is_err());
}

#[test]
fn semantic_predicate() {
    let parser = Parser::new("NUMBER  <-  [0-9]+").unwrap();

    parser.rule_mut("NUMBER").unwrap().action =
        Some(Rc::new(|sv: &SemanticValues, _: &mut dyn Any| {
            let val: i64 = sv.span().parse().map_err(|_| "not a number".to_string())?;
            if val != 100 {
                return Err("value error!!".to_string());
            }
            Ok(Some(Rc::new(val)))
        }));

    let val = parser.parse_value("100", &mut ()).unwrap().unwrap();
    assert_eq!(*val.downcast::<i64>().unwrap(), 100);

    let err = parser.parse_value("200", &mut ()).unwrap_err();
    assert_eq!(err.details[0].message, "value error!!");
}

#[test]
fn multibyte_characters() {
    let parser = Parser::new(
        "
        文 <- 修飾語? 主語 述語 '。'
        主語 <- 名詞 助詞
        述語 <- 動詞 助詞
        修飾語 <- 形容詞
        名詞 <- 'サーバー' / 'クライアント'
        形容詞 <- '古い' / '新しい'
        動詞 <- '落ち' / '復旧し'
        助詞 <- 'が' / 'を' / 'た' / 'ます' / 'に'
    ",
    )
    .unwrap();

    assert!(parser.parse("サーバーを復旧します。", &mut ()).is_ok());
}

#[test]
fn rule_failure_message() {
    let parser = Parser::new("ROOT <- NUM\nNUM <- [0-9]+").unwrap();
    parser.rule_mut("NUM").unwrap().message =
        Some(Rc::new(|| "number is expected".to_string()));

    let err = parser.parse("abc", &mut ()).unwrap_err();
    assert_eq!(
        err.details,
        [ErrorDetail {
            line: 1,
            column: 1,
            message: "number is expected".to_string(),
        }]
    );
}

#[test]
fn tracers_bracket_every_dispatch() {
    let mut parser = Parser::new("S <- 'a' 'b'").unwrap();

    let enters = Rc::new(Cell::new(0usize));
    let leaves = Rc::new(Cell::new(0usize));
    {
        let enters = enters.clone();
        parser.tracer_enter = Some(Rc::new(
            move |_name: &str, _s: &str, _sv: &SemanticValues, _dt: &dyn Any, _pos: usize| {
                enters.set(enters.get() + 1);
            },
        ));
    }
    {
        let leaves = leaves.clone();
        parser.tracer_leave = Some(Rc::new(
            move |_name: &str,
                  _s: &str,
                  _sv: &SemanticValues,
                  _dt: &dyn Any,
                  _pos: usize,
                  _len: Option<usize>| {
                leaves.set(leaves.get() + 1);
            },
        ));
    }

    assert!(parser.parse("ab", &mut ()).is_ok());
    assert!(enters.get() > 0);
    assert_eq!(enters.get(), leaves.get());
}

#[test]
fn ast_with_expression_parsing() {
    let parser = Parser::new(
        r"
        EXPRESSION   <-  ATOM (BINOP ATOM)*
        ATOM         <-  NUMBER / '(' EXPRESSION ')'
        BINOP        <-  < [-+/*] >
        NUMBER       <-  < [0-9]+ >
        %whitespace  <-  [ \t]*
        ---
        %expr  = EXPRESSION
        %binop = L + -
        %binop = L * /
    ",
    )
    .unwrap();

    parser.enable_ast();
    let ast = parser.parse_ast("1+2*3", &mut ()).unwrap();
    let ast = AstOptimizer::new(&[]).optimize(&ast);

    assert_eq!(ast.name, "EXPRESSION");
    assert_eq!(ast.children.len(), 3);
    assert_eq!(ast.children[0].token.as_deref(), Some("1"));
    assert_eq!(ast.children[1].token.as_deref(), Some("+"));
    assert_eq!(ast.children[2].children.len(), 3);
}

fn grammar_to_source(parser: &Parser) -> String {
    let mut out = String::new();
    for name in parser.grammar().names() {
        let rule = parser.grammar().rule(&name).unwrap();
        let prefix = if rule.ignore { "~" } else { "" };
        out.push_str(&format!("{}{} <- {}\n", prefix, name, rule.ope()));
    }
    out
}

#[test]
fn printed_grammar_recompiles_to_equivalent_parser() {
    let source = r"
        EXPRESSION       <-  TERM (TERM_OPERATOR TERM)*
        TERM             <-  FACTOR (FACTOR_OPERATOR FACTOR)*
        FACTOR           <-  NUMBER / '(' EXPRESSION ')'
        TERM_OPERATOR    <-  [-+]
        FACTOR_OPERATOR  <-  [/*]
        NUMBER           <-  [0-9]+
        %whitespace      <-  [ \t]*
    ";

    let original = Parser::new(source).unwrap();
    let reprinted = grammar_to_source(&original);
    let recompiled = Parser::new(&reprinted).unwrap();

    install_calculator_actions(&original);
    install_calculator_actions(&recompiled);

    for input in [
        " 1 + 2 * 3 * (4 - 5 + 6) / 7 - 8 ",
        "1+2*3",
        "(8/2",
        "",
        "1 + ",
    ] {
        let a = original.parse_value(input, &mut ());
        let b = recompiled.parse_value(input, &mut ());
        match (a, b) {
            (Ok(Some(a)), Ok(Some(b))) => {
                assert_eq!(
                    *a.downcast::<i64>().unwrap(),
                    *b.downcast::<i64>().unwrap(),
                    "input: {input:?}"
                );
            }
            (Err(_), Err(_)) => {}
            (a, b) => panic!(
                "parsers disagree on {input:?}: {:?} vs {:?}",
                a.is_ok(),
                b.is_ok()
            ),
        }
    }
}
