//! `warrant`: compile rule specifications into SQLite schema and procedures,
//! and run them.
//!
//! # Usage
//!
//! ```text
//! warrant check pets.yaml
//! warrant compile pets.yaml -o pets.sql --prefix pets
//! warrant compile alerts.yaml -r -D Threshold=20
//! warrant plan pets.yaml --rule PetsLiveWithPeople
//! warrant run pets.yaml --facts household.yaml
//! ```
//!
//! Settings are read from `warrant.toml` (or `--config`) and `WARRANT_*`
//! environment variables; flags override both.

mod facts;
mod report;
mod settings;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indexmap::IndexMap;
use serde::Serialize;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use warrant_core::{
  CompileOptions, Specification, Value,
  fact::{Explanation, FactId},
  source::Document,
  store::InferenceStore,
};
use warrant_sql::{Artifact, GenerateOptions};
use warrant_store_sqlite::SqliteEngine;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "warrant", version, about = "Compile production rules into SQLite")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(long, global = true, value_name = "FILE", default_value = "warrant.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Args, Debug)]
struct SpecArgs {
  /// Specification files, merged in order.
  #[arg(required = true, value_name = "SPEC")]
  files: Vec<PathBuf>,

  /// Accept recursive rules (each must assert `!distinct`).
  #[arg(short = 'c', long)]
  allow_cycles: bool,

  /// Accept recursive rules that do not assert `!distinct`. Termination is
  /// then bounded only by `max_cascade_steps`.
  #[arg(long)]
  allow_indistinct_cycles: bool,

  /// Accept the `~` and `!~` regular expression operators.
  #[arg(short = 'r', long)]
  allow_regexp: bool,

  /// Override a parameter, e.g. `-D Threshold=20`. Repeatable.
  #[arg(short = 'D', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
  params: Vec<(String, Value)>,
}

/// `NAME=VALUE`, the value read as a YAML scalar.
fn parse_param(text: &str) -> Result<(String, Value), String> {
  let (name, value) = text
    .split_once('=')
    .ok_or_else(|| format!("expected NAME=VALUE, got {text:?}"))?;
  let value = serde_yaml_ng::from_str(value)
    .map_err(|e| format!("bad value for {name}: {e}"))?;
  Ok((name.trim().to_string(), value))
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Generate the schema and procedures.
  Compile {
    #[command(flatten)]
    spec: SpecArgs,

    /// Output file; stdout when omitted.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Table and procedure name prefix.
    #[arg(short, long)]
    prefix: Option<String>,

    #[arg(long, value_enum, default_value_t = Format::Sql)]
    format: Format,
  },

  /// Validate and summarize a specification.
  Check {
    #[command(flatten)]
    spec: SpecArgs,
  },

  /// Print evaluation plans.
  Plan {
    #[command(flatten)]
    spec: SpecArgs,

    /// Only this rule.
    #[arg(long)]
    rule: Option<String>,

    /// Print plans as JSON.
    #[arg(long)]
    json: bool,
  },

  /// Assert base facts and print the derived facts with their explanations.
  Run {
    #[command(flatten)]
    spec: SpecArgs,

    /// YAML list of base facts to assert.
    #[arg(long, value_name = "FILE")]
    facts: PathBuf,

    /// SQLite database file; in memory when omitted.
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[arg(short, long)]
    prefix: Option<String>,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
  /// Annotated SQL script.
  Sql,
  /// The artifact as JSON.
  Json,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let mut settings = Settings::load(&cli.config)?;

  match cli.command {
    Command::Compile {
      spec,
      output,
      prefix,
      format,
    } => {
      if let Some(prefix) = prefix {
        settings.prefix = prefix;
      }
      compile(&spec, &settings, output.as_deref(), format)?;
    }

    Command::Check { spec } => {
      let specification = specification(&spec, &settings)?;
      let plans = warrant_core::plan::compile(&specification)?;
      // Generation catches what planning cannot, such as a bad prefix.
      warrant_sql::generate(&specification, &plans, &generate_options(&settings))?;
      print!("{}", report::check(&specification, &plans));
    }

    Command::Plan { spec, rule, json } => {
      let specification = specification(&spec, &settings)?;
      let mut plans = warrant_core::plan::compile(&specification)?;
      if let Some(rule) = rule {
        plans.retain(|name, _| *name == rule);
        if plans.is_empty() {
          bail!("no enabled rule named {rule:?}");
        }
      }
      if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
      } else {
        print!("{}", report::plans(&plans));
      }
    }

    Command::Run {
      spec,
      facts: facts_file,
      database,
      prefix,
    } => {
      if let Some(prefix) = prefix {
        settings.prefix = prefix;
      }
      if database.is_some() {
        settings.database = database;
      }
      let specification = specification(&spec, &settings)?;
      if let Some(function) = specification.functions.values().next() {
        bail!(
          "run cannot execute declared function {} (external {}); load the artifact into \
           an application that defines it",
          function.name,
          function.external
        );
      }
      let artifact = artifact(&specification, &settings)?;
      let input = facts::load(&facts_file)?;
      let report = run(&specification, artifact, input, &settings).await?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }

  Ok(())
}

// ─── Commands ─────────────────────────────────────────────────────────────────

fn specification(args: &SpecArgs, settings: &Settings) -> anyhow::Result<Specification> {
  let document = Document::load_all(args.files.as_slice())?;
  let mut parameters = settings.parameters.clone();
  parameters.extend(args.params.iter().cloned());
  let options = CompileOptions {
    allow_cycles: args.allow_cycles || settings.allow_cycles,
    allow_indistinct_cycles: args.allow_indistinct_cycles || settings.allow_indistinct_cycles,
    allow_regexp: args.allow_regexp || settings.allow_regexp,
    parameters,
  };
  let specification = Specification::from_document(&document, &options)?;
  tracing::info!(
    files = args.files.len(),
    schemas = specification.facts.len(),
    rules = specification.rules.len(),
    "specification loaded"
  );
  Ok(specification)
}

/// Compile and emit the artifact. Nothing is written to `output` unless the
/// whole compilation succeeds.
fn compile(
  spec: &SpecArgs,
  settings: &Settings,
  output: Option<&Path>,
  format: Format,
) -> anyhow::Result<()> {
  let specification = specification(spec, settings)?;
  let artifact = artifact(&specification, settings)?;

  let text = match format {
    Format::Sql => format!("{}{}", banner(&spec.files), artifact.render()),
    Format::Json => artifact.to_json().context("failed to serialise artifact")?,
  };
  match output {
    Some(path) => {
      std::fs::write(path, text)
        .with_context(|| format!("failed to write {}", path.display()))?;
      tracing::info!(
        path = %path.display(),
        procedures = artifact.procedures.len(),
        "artifact written"
      );
    }
    None => print!("{text}"),
  }
  Ok(())
}

fn generate_options(settings: &Settings) -> GenerateOptions {
  GenerateOptions {
    prefix: settings.prefix.clone(),
  }
}

fn artifact(specification: &Specification, settings: &Settings) -> anyhow::Result<Artifact> {
  Ok(warrant_sql::compile(specification, &generate_options(settings))?)
}

fn banner(files: &[PathBuf]) -> String {
  let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
  format!(
    "-- generated by warrant {} at {} from {}\n",
    env!("CARGO_PKG_VERSION"),
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
    names.join(", ")
  )
}

#[derive(Serialize)]
struct RunReport {
  asserted: Vec<FactId>,
  /// Active derived facts by schema, each explained down to base facts.
  derived:  IndexMap<String, Vec<Explanation>>,
}

async fn run(
  specification: &Specification,
  artifact: Artifact,
  input: Vec<warrant_core::fact::NewFact>,
  settings: &Settings,
) -> anyhow::Result<RunReport> {
  let engine = match &settings.database {
    Some(path) => open(path, artifact).await?,
    None => SqliteEngine::open_in_memory(artifact).await?,
  }
  .with_limits(settings.limits());

  let mut asserted = Vec::with_capacity(input.len());
  for (index, fact) in input.into_iter().enumerate() {
    let schema = fact.schema.clone();
    let activation = engine
      .assert_fact(fact)
      .await
      .with_context(|| format!("failed to assert fact #{index} ({schema})"))?;
    asserted.push(activation.fact.id);
  }
  tracing::info!(facts = asserted.len(), "facts asserted");

  let mut derived = IndexMap::new();
  for schema in specification.facts.keys() {
    if !specification.is_derived(schema) {
      continue;
    }
    let mut explained = Vec::new();
    for fact in engine.facts(schema, false).await? {
      if let Some(explanation) = engine.explain(fact.id).await? {
        explained.push(explanation);
      }
    }
    derived.insert(schema.clone(), explained);
  }

  Ok(RunReport { asserted, derived })
}

async fn open(path: &Path, artifact: Artifact) -> anyhow::Result<SqliteEngine> {
  SqliteEngine::open(path, artifact)
    .await
    .with_context(|| format!("failed to open database at {}", path.display()))
}
