use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use docmorph::{transform_bytes, validate_spec_text, RuntimeVars, TransformOptions, TransformSpec};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docmorph")]
#[command(version, about = "Extract rows from JSON, XML or HTML documents with a YAML spec")]
struct Cli {
    /// Log filter, e.g. `debug` or `docmorph=trace`. Logs go to stderr.
    #[arg(long, global = true, env = "DOCMORPH_LOG", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a spec over an input document and print the rendered output.
    Transform(TransformArgs),
    /// Check a spec and print every problem found.
    Validate(ValidateArgs),
}

#[derive(Args)]
struct TransformArgs {
    #[arg(short, long)]
    spec: PathBuf,
    #[arg(short, long)]
    input: PathBuf,
    /// Runtime variable as `name=value`; the value is parsed as JSON when possible.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,
    /// JSON object file with runtime variables. `--var` entries override it.
    #[arg(long = "vars", value_name = "FILE")]
    vars_file: Option<PathBuf>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    preview: Option<usize>,
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(short, long)]
    spec: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Command::Transform(args) => run_transform(args),
        Command::Validate(args) => run_validate(args),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_spec(path: &Path) -> anyhow::Result<TransformSpec> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read spec {}", path.display()))?;
    match validate_spec_text(&source) {
        Ok(spec) => {
            tracing::debug!("loaded spec '{}' from {}", spec.name, path.display());
            Ok(spec)
        }
        Err(errors) => {
            for err in &errors {
                eprintln!("{}", err);
            }
            bail!("{} has {} error(s)", path.display(), errors.len())
        }
    }
}

fn parse_var(raw: &str) -> anyhow::Result<(String, JsonValue)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("--var expects NAME=VALUE, got '{}'", raw);
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((name.trim().to_string(), value))
}

fn load_vars(args: &TransformArgs) -> anyhow::Result<RuntimeVars> {
    let mut vars = RuntimeVars::new();
    if let Some(path) = &args.vars_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read vars {}", path.display()))?;
        let value: JsonValue = serde_json::from_str(&text)
            .with_context(|| format!("invalid json in {}", path.display()))?;
        match value {
            JsonValue::Object(map) => vars.extend(map),
            _ => bail!("{} must contain a JSON object", path.display()),
        }
    }
    for raw in &args.vars {
        let (name, value) = parse_var(raw)?;
        vars.insert(name, value);
    }
    Ok(vars)
}

fn run_transform(args: TransformArgs) -> anyhow::Result<ExitCode> {
    let spec = load_spec(&args.spec)?;
    let vars = load_vars(&args)?;
    let input = fs::read(&args.input)
        .with_context(|| format!("failed to read input {}", args.input.display()))?;
    let options = TransformOptions {
        limit: args.limit,
        preview_limit: args.preview,
    };

    let output = transform_bytes(&spec, &input, &vars, &options)
        .with_context(|| format!("transform '{}' failed", spec.name))?;

    match &args.output {
        Some(path) => fs::write(path, &output)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", output),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_validate(args: ValidateArgs) -> anyhow::Result<ExitCode> {
    let source = fs::read_to_string(&args.spec)
        .with_context(|| format!("failed to read spec {}", args.spec.display()))?;
    match validate_spec_text(&source) {
        Ok(_) => {
            println!("ok");
            Ok(ExitCode::SUCCESS)
        }
        Err(errors) => {
            for err in &errors {
                println!("{}", err);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
