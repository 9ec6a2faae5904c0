//! The `yoku` executable (§6.1): a thin presentation layer over
//! `yoku::driver` — argument handling, REPL line editing, and color
//! convention live here; every actual language decision lives in the
//! library crate.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use yoku::diagnostics::{render, Diagnostic};
use yoku::driver::{run_module, Repl, StepOutcome};
use yoku::lexing::source::CodeSource;
use yoku::value::pretty_print;

/// Positionals are collected raw rather than declared as a single `Option
/// <PathBuf>` so that "more than one argument" can be reported with the
/// exact usage message and exit code this language's CLI promises (§6.1),
/// rather than clap's own argument-count diagnostics.
#[derive(ClapParser, Debug)]
#[command(name = "yoku", about = "Run a Yoku source file, or start a REPL with none given")]
struct Cli {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

const USAGE_EXIT: u8 = 64;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.args.len() {
        0 => {
            run_repl();
            ExitCode::SUCCESS
        }
        1 => run_file(PathBuf::from(&cli.args[0])),
        _ => {
            eprintln!("Usage: yoku [script]");
            ExitCode::from(USAGE_EXIT)
        }
    }
}

fn run_file(path: PathBuf) -> ExitCode {
    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let path_display = path.display().to_string();
    let mut out = io::stdout();
    match run_module(&path_display, &source, &mut out) {
        Ok(_) => ExitCode::SUCCESS,
        Err(diagnostic) => {
            report(&diagnostic, &path_display, &source);
            ExitCode::FAILURE
        }
    }
}

fn run_repl() {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            log::error!("could not start the line editor: {e}");
            return;
        }
    };

    let mut repl = Repl::new("<repl>", Box::new(io::stdout()));
    let mut prompt = "> ";
    loop {
        match editor.readline(prompt) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                match repl.submit(&line) {
                    StepOutcome::Value(value) => {
                        println!("{}", pretty_print(&value).blue());
                        prompt = "> ";
                    }
                    StepOutcome::NeedsMoreInput => {
                        prompt = ".. ";
                    }
                    StepOutcome::Failed(diagnostic, source) => {
                        report(&diagnostic, "<repl>", &source);
                        prompt = "> ";
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                log::error!("readline error: {e}");
                break;
            }
        }
    }
}

fn report(diagnostic: &Diagnostic, path: &str, source: &str) {
    let rendered = render(diagnostic, &CodeSource::new(path, source));
    eprintln!("{}", rendered.red());
}
