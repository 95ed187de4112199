//! # dav CLI
//!
//! ```bash
//! # Compile rule/property files into a knowledge-base directory
//! dav compile -k compiled rules.dav
//!
//! # Run inference over problem files
//! dav infer -k compiled -T 30 -P 4 problems.dav
//!
//! # Learning pass (the built-in cost providers train as stubs)
//! dav learn -k compiled problems.dav
//! ```
//!
//! Exit codes: 0 success, 1 usage error, 2 input error, 3 internal error.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dav::engine::{collect_problems, compile_knowledge_base, ComponentRegistry, DavError, Engine};
use dav::kb::{store, PredicateLibrary};
use dav::parser::parse_statements_lenient;
use dav::{Config, Statement};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

const EXIT_USAGE: u8 = 1;
const EXIT_INPUT: u8 = 2;
const EXIT_INTERNAL: u8 = 3;

#[derive(Parser)]
#[command(
    name = "dav",
    version,
    about = "Weighted abductive reasoning: find the minimum-cost explanation of observations"
)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Compile rule and property files into a knowledge base.
    #[command(alias = "c")]
    Compile(CommonArgs),

    /// Infer the best explanation for each problem.
    #[command(alias = "i")]
    Infer(CommonArgs),

    /// Run inference and feed the solutions to the training hooks.
    #[command(alias = "l")]
    Learn(CommonArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Knowledge-base directory.
    #[arg(short = 'k', value_name = "PATH")]
    kb: Option<PathBuf>,

    /// Per-problem timeout in seconds.
    #[arg(short = 'T', value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Worker pool size (0 = one per core).
    #[arg(short = 'P', value_name = "N")]
    parallel: Option<usize>,

    /// LHS enumeration strategy (depth, astar).
    #[arg(long)]
    enumerator: Option<String>,

    /// ILP conversion strategy (null, weighted, costed).
    #[arg(long)]
    converter: Option<String>,

    /// Engine parameter, repeatable (e.g. --param max-depth=4).
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Emit JSON summaries instead of XML.
    #[arg(long)]
    json: bool,

    /// Input files.
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not usage errors.
            let benign = matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = e.print();
            return if benign {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_USAGE)
            };
        }
    };

    match run(cli) {
        Ok(clean_input) => {
            if clean_input {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INPUT)
            }
        }
        Err(e) => {
            error!("{e:#}");
            let code = match e.downcast_ref::<DavError>() {
                Some(DavError::Parse(_) | DavError::Input(_)) => EXIT_INPUT,
                Some(DavError::Config(_)) => EXIT_USAGE,
                _ => EXIT_INTERNAL,
            };
            ExitCode::from(code)
        }
    }
}

/// Returns whether every input file parsed cleanly.
fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.mode {
        Mode::Compile(args) => run_compile(args),
        Mode::Infer(args) => run_infer(args, false),
        Mode::Learn(args) => run_infer(args, true),
    }
}

fn load_config(args: &CommonArgs) -> anyhow::Result<Config> {
    let mut config = Config::load().map_err(DavError::Config)?;
    if let Some(kb) = &args.kb {
        config.kb_dir = kb.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(parallel) = args.parallel {
        config.threads = parallel;
    }
    if let Some(enumerator) = &args.enumerator {
        config.enumerator = enumerator.clone();
    }
    if let Some(converter) = &args.converter {
        config.converter = converter.clone();
    }
    for kv in &args.params {
        let Some((key, value)) = kv.split_once('=') else {
            return Err(DavError::Config(dav::ConfigError::InvalidParam {
                key: kv.clone(),
                value: "expected KEY=VALUE".to_string(),
            })
            .into());
        };
        config.params.set(key, value);
    }
    Ok(config)
}

/// Parse every input file, reporting errors with their positions; a bad
/// block is skipped, the rest of the file continues.
fn parse_inputs(inputs: &[PathBuf]) -> anyhow::Result<(Vec<Statement>, bool)> {
    let mut statements = Vec::new();
    let mut clean = true;
    for path in inputs {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let (parsed, errors) = parse_statements_lenient(&source);
        for e in &errors {
            error!("{}: {e}", path.display());
            clean = false;
        }
        statements.extend(parsed);
    }
    Ok((statements, clean))
}

fn run_compile(args: CommonArgs) -> anyhow::Result<bool> {
    let config = load_config(&args)?;
    let (statements, clean) = parse_inputs(&args.inputs)?;
    if statements.is_empty() {
        return Err(DavError::Input("no statements to compile".to_string()).into());
    }

    let max_distance = config
        .params
        .f64_or("kb-max-distance", -1.0)
        .map_err(DavError::Config)?;
    let kb = compile_knowledge_base(
        statements,
        PredicateLibrary::new(),
        (max_distance >= 0.0).then_some(max_distance as f32),
    );
    store::save(&kb, &config.kb_dir).map_err(DavError::Kb)?;
    println!(
        "compiled {} axioms, {} predicates -> {}",
        kb.num_axioms(),
        kb.library().len(),
        config.kb_dir.display()
    );
    Ok(clean)
}

fn run_infer(args: CommonArgs, learn: bool) -> anyhow::Result<bool> {
    let config = load_config(&args)?;
    let (statements, clean) = parse_inputs(&args.inputs)?;
    let problems = collect_problems(&statements);
    if problems.is_empty() {
        return Err(DavError::Input("no problems in the input files".to_string()).into());
    }

    let kb = store::load(&config.kb_dir, PredicateLibrary::new()).map_err(DavError::Kb)?;
    let engine = Engine::from_config(std::sync::Arc::new(kb), &config, &ComponentRegistry::new())?;

    let outcomes = if learn {
        engine.learn(problems)
    } else {
        engine.infer(problems)
    };

    let mut failed = false;
    for outcome in outcomes {
        match outcome {
            Ok(outcome) => {
                let rendered = if args.json {
                    dav::output::write_json(&outcome)
                } else {
                    dav::output::write_xml(&outcome)
                };
                match rendered {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        error!("output failed: {e}");
                        failed = true;
                    }
                }
            }
            Err(e) => {
                error!("problem failed: {e}");
                failed = true;
            }
        }
    }
    if failed {
        return Err(DavError::Internal("one or more problems failed".to_string()).into());
    }
    Ok(clean)
}
