use std::any::Any;
use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use peg_parser::{AstOptimizer, Error, Parser, SemanticValues};

/// Lint a PEG grammar and optionally run a source against it.
#[derive(ClapParser)]
#[command(name = "peglint", version, about)]
struct Args {
    /// Print the AST of the parsed source.
    #[arg(long)]
    ast: bool,

    /// Collapse single-child AST nodes before printing.
    #[arg(long, requires = "ast")]
    opt: bool,

    /// Trace rule and operator dispatch while parsing the source.
    #[arg(long)]
    trace: bool,

    /// Read the source text from a file.
    #[arg(short = 'f', long = "file", value_name = "PATH", conflicts_with = "expr")]
    file: Option<PathBuf>,

    /// Use the given source text directly.
    #[arg(short = 'e', long = "expr", value_name = "TEXT")]
    expr: Option<String>,

    /// Path of the grammar to lint.
    grammar: PathBuf,
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("peglint: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let grammar = fs::read_to_string(&args.grammar)
        .with_context(|| format!("cannot read grammar {}", args.grammar.display()))?;

    let mut parser = match Parser::new(&grammar) {
        Ok(parser) => parser,
        Err(err) => {
            print_details(&err);
            return Ok(false);
        }
    };

    let source = match (&args.file, &args.expr) {
        (Some(path), _) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("cannot read source {}", path.display()))?,
        ),
        (None, Some(text)) => Some(text.clone()),
        (None, None) => None,
    };
    let Some(source) = source else {
        return Ok(true);
    };

    if args.trace {
        setup_tracer(&mut parser);
    }

    if args.ast {
        parser.enable_ast();
        match parser.parse_ast(&source, &mut ()) {
            Ok(ast) => {
                let ast = if args.opt {
                    AstOptimizer::new(&[]).optimize(&ast)
                } else {
                    ast
                };
                print!("{ast}");
            }
            Err(err) => {
                print_details(&err);
                return Ok(false);
            }
        }
    } else if let Err(err) = parser.parse(&source, &mut ()) {
        print_details(&err);
        return Ok(false);
    }

    Ok(true)
}

fn print_details(err: &Error) {
    for detail in &err.details {
        eprintln!("{detail}");
    }
}

/// Prints one line per dispatched rule/operator, indented by nesting
/// depth; a `*` marks positions where the parser backtracked.
fn setup_tracer(parser: &mut Parser) {
    println!("pos:lev\trule/ope");
    println!("-------\t--------");

    let level = Rc::new(Cell::new(0usize));
    let prev_pos = Rc::new(Cell::new(0usize));

    {
        let level = level.clone();
        let prev_pos = prev_pos.clone();
        parser.tracer_enter = Some(Rc::new(
            move |name: &str, _s: &str, _sv: &SemanticValues, _dt: &dyn Any, pos: usize| {
                let backtrack = if pos < prev_pos.get() { "*" } else { "" };
                println!(
                    "{}:{}{}\t{}{}",
                    pos,
                    level.get(),
                    backtrack,
                    "  ".repeat(level.get()),
                    name
                );
                prev_pos.set(pos);
                level.set(level.get() + 1);
            },
        ));
    }

    parser.tracer_leave = Some(Rc::new(
        move |_name: &str,
              _s: &str,
              _sv: &SemanticValues,
              _dt: &dyn Any,
              _pos: usize,
              _len: Option<usize>| {
            level.set(level.get().saturating_sub(1));
        },
    ));
}
