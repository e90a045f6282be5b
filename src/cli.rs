use std::{
    collections::HashSet,
    io,
    path::PathBuf,
    process::ExitCode,
    time::Instant,
};

use brainfc::{
    analysis::{Analyzer, Checks, Severity},
    codegen::{generate_iterative_with, CodegenOptions, DEFAULT_TAPE_SIZE},
    interpreter::{Runtime, TreeInterpreter},
    jit::{execute, IrEngine, JitError, RuntimeError},
    lexer::{join, tokenize},
    parser::parse_iterative,
    CompileOptions,
};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("{0} error diagnostics, refusing to generate code")]
    Denied(usize),

    #[error(transparent)]
    Jit(#[from] JitError),

    #[error("interpreter trapped: {0}")]
    Interpreter(RuntimeError),
}

/// Brainf**k compiler with a verifying IR engine and a tree interpreter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The file to operate on
    #[arg()]
    file: PathBuf,

    /// Stages to print or run, `diagnostics run` when empty
    #[arg(value_enum)]
    commands: Vec<Command>,

    /// Bytes of tape the generated program allocates
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_TAPE_SIZE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    tape_size: u32,

    /// Name of the generated entry function
    #[arg(short, long, default_value = "main")]
    entry: String,

    /// Diagnostics to leave out, may be repeated
    #[arg(short, long, value_enum)]
    skip_check: Vec<Check>,

    /// Stop before code generation when any error diagnostic is reported
    #[arg(short, long)]
    deny_errors: bool,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::WarnLevel>,
}

#[derive(ValueEnum, Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Command {
    /// Output the tokens
    Tokens,
    /// Output the tree
    Ast,
    /// Output the diagnostics
    Diagnostics,
    /// Output the generated IR
    Ir,
    /// Run the generated IR
    Run,
    /// Walk the tree directly
    Interpret,
}

#[derive(ValueEnum, Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Check {
    MissingLoopClose,
    EmptyLoop,
    LeadingDecrement,
    UnmatchedLoopClose,
}

impl From<Check> for Checks {
    fn from(check: Check) -> Self {
        match check {
            Check::MissingLoopClose => Checks::MISSING_LOOP_CLOSE,
            Check::EmptyLoop => Checks::EMPTY_LOOP,
            Check::LeadingDecrement => Checks::LEADING_DECREMENT,
            Check::UnmatchedLoopClose => Checks::UNMATCHED_LOOP_CLOSE,
        }
    }
}

impl Args {
    fn options(&self) -> CompileOptions {
        let skipped = self
            .skip_check
            .iter()
            .fold(Checks::empty(), |acc, &check| acc | Checks::from(check));
        CompileOptions {
            codegen: CodegenOptions {
                tape_size: self.tape_size,
                entry_name: self.entry.clone(),
                ..CodegenOptions::default()
            },
            checks: Checks::all().difference(skipped),
        }
    }

    fn commands(&self) -> HashSet<Command> {
        if self.commands.is_empty() {
            HashSet::from([Command::Diagnostics, Command::Run])
        } else {
            self.commands.iter().copied().collect()
        }
    }
}

/// Prints progress banners on stderr so stdout only carries what was asked for
fn stage<T>(name: &str, f: impl FnOnce() -> T) -> T {
    eprintln!("{}", format!("Starting {name}").blue());
    let now = Instant::now();
    let result = f();
    eprintln!("{} {:.2?}", format!("Finished {name} in").green(), now.elapsed());
    result
}

pub fn run(args: Args) -> Result<ExitCode, Error> {
    let commands = args.commands();
    let options = args.options();

    eprintln!("Running {}", args.file.display());
    let text = std::fs::read_to_string(&args.file).map_err(|source| Error::Read {
        path: args.file.clone(),
        source,
    })?;

    let tokens = stage("lexing", || tokenize(&text));
    if commands.contains(&Command::Tokens) {
        println!("{}", join(&tokens));
    }

    let tree = stage("parsing", || parse_iterative(&tokens));
    if commands.contains(&Command::Ast) {
        print!("{}", tree);
    }

    let diagnostics = stage("analysis", || Analyzer::new(options.checks).analyze(&tree));
    if commands.contains(&Command::Diagnostics) {
        for diagnostic in &diagnostics {
            let severity = match diagnostic.severity() {
                Severity::Error => diagnostic.severity().to_string().red().bold(),
                Severity::Warning => diagnostic.severity().to_string().yellow().bold(),
            };
            eprintln!("{}: {} at {}", severity, diagnostic.issue, diagnostic.location);
        }
    }
    let errors = diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity() == Severity::Error)
        .count();
    if args.deny_errors && errors > 0 {
        return Err(Error::Denied(errors));
    }

    if commands.contains(&Command::Interpret) {
        let mut runtime = Runtime::new(
            options.codegen.tape_size as usize,
            Box::new(io::stdin()),
            Box::new(io::stdout()),
        );
        stage("tree-interpreter", || {
            TreeInterpreter::new().interpret(&mut runtime, &tree)
        })
        .map_err(Error::Interpreter)?;
    }

    let module = stage("code generation", || generate_iterative_with(&tree, &options.codegen));
    if commands.contains(&Command::Ir) {
        print!("{}", module);
    }

    if !commands.contains(&Command::Run) {
        return Ok(ExitCode::SUCCESS);
    }

    let stdout = io::stdout();
    let mut engine = IrEngine::new(io::stdin().lock(), stdout.lock());
    let status = stage("execution", || execute(&mut engine, module))?;
    Ok(ExitCode::from((status & 0xff) as u8))
}
