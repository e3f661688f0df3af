use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use asteria::{CompilerOptions, SimpleScript, Value};

/// Run Asteria scripts.
#[derive(Parser)]
#[command(name = "asteria", version, about)]
struct Cli {
    /// Script file to run; reads standard input when absent.
    file: Option<PathBuf>,

    /// Arguments passed to the script, reachable through `__varg`.
    args: Vec<String>,

    /// Evaluate a single expression and print its result.
    #[arg(short = 'e', long = "eval", conflicts_with = "file")]
    eval: Option<String>,

    /// Optimization level (0 disables constant folding).
    #[arg(short = 'O', long = "optimize", default_value_t = 1)]
    optimize: u8,

    /// Parse numeric literals without a radix point as reals.
    #[arg(long)]
    integers_as_reals: bool,

    /// Honor backslash escapes in single-quoted strings.
    #[arg(long)]
    escapable_single_quotes: bool,

    /// Treat keywords as plain identifiers.
    #[arg(long)]
    keywords_as_identifiers: bool,

    /// Fail at compile time on unresolved names.
    #[arg(long)]
    no_implicit_global_names: bool,

    /// Disable proper tail calls.
    #[arg(long)]
    no_proper_tail_calls: bool,

    /// Emit a trap before every sub-expression for host tracing hooks.
    #[arg(long)]
    verbose_single_step_traps: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let opts = CompilerOptions {
        integers_as_reals: cli.integers_as_reals,
        escapable_single_quotes: cli.escapable_single_quotes,
        keywords_as_identifiers: cli.keywords_as_identifiers,
        implicit_global_names: !cli.no_implicit_global_names,
        proper_tail_calls: !cli.no_proper_tail_calls,
        verbose_single_step_traps: cli.verbose_single_step_traps,
        optimization_level: cli.optimize,
    };

    let mut script = SimpleScript::with_options(opts);

    let loaded = if let Some(code) = &cli.eval {
        script
            .reload_oneline("[command line]", code)
            .map_err(asteria::ScriptError::from)
    } else if let Some(file) = &cli.file {
        script.reload_file(file)
    } else {
        script.reload_stdin()
    };

    if let Err(err) = loaded {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }

    let args: Vec<Value> = cli.args.iter().map(|a| Value::from(a.as_str())).collect();
    match script.execute_value(args) {
        Ok(Value::Null) if cli.eval.is_none() => ExitCode::SUCCESS,
        Ok(value) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
