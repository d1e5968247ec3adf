mod dataflow;
mod descriptor;
mod engine;
mod errors;
mod interproc;
mod ir;
mod lattice;
mod opcodes;
mod repository;
mod signature;
mod telemetry;
mod types;
mod vna;
mod workspace;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use opentelemetry::KeyValue;
use tracing::{debug, info};

use crate::dataflow::DEFAULT_MAX_BLOCK_VISITS;
use crate::engine::{AnalysisConfig, Databases, Engine, build_context};
use crate::interproc::{
    DatabaseProperty, FieldPropertyDatabase, MemberKey, MethodPropertyDatabase, PropertyDatabase,
};
use crate::interproc::properties::{FieldNullness, ParameterNullness, ReturnNullness};
use crate::repository::TypeRepository;
use crate::signature::{
    JavaType, ParsedSignature, SignatureKind, parse_field_signature, parse_signature,
};
use crate::telemetry::{Telemetry, current_trace_id, in_phase, init_logging};
use crate::types::{TypeId, dotted_name, slashed_name};
use crate::workspace::Workspace;

/// CLI arguments for jvmflow execution.
#[derive(Parser, Debug)]
#[command(
    name = "jvmflow",
    about = "Type lattice, nullness dataflow, and interprocedural property databases for JVM programs.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse a program description and update the property databases.
    Analyze(AnalyzeArgs),
    /// Parse a generic signature and print its Java rendering.
    Signature {
        signature: String,
        #[arg(long, value_enum, default_value_t = KindArg::Field)]
        kind: KindArg,
    },
    /// Answer whether type A is a subtype of type B.
    Subtype(TypePairArgs),
    /// Print the first common superclass of two types.
    Join(TypePairArgs),
    /// Property database maintenance.
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    method_db: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    field_db: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    parameter_db: Option<PathBuf>,
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_BLOCK_VISITS)]
    max_visits: usize,
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
    #[arg(long)]
    strict_hierarchy: bool,
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    #[arg(long)]
    timing: bool,
    #[arg(long)]
    quiet: bool,
}

#[derive(clap::Args, Debug)]
struct TypePairArgs {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    a: String,
    b: String,
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Validate a property database file.
    Check {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = PropertyArg::Return)]
        property: PropertyArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Class,
    Method,
    Field,
}

impl From<KindArg> for SignatureKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Class => SignatureKind::Class,
            KindArg::Method => SignatureKind::Method,
            KindArg::Field => SignatureKind::Field,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PropertyArg {
    Return,
    Parameter,
    Field,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match cli.command {
        Command::Analyze(args) => analyze(args, &mut stdout),
        Command::Signature { signature, kind } => {
            describe_signature(&signature, kind.into(), &mut stdout)
        }
        Command::Subtype(args) => {
            let workspace = Workspace::load(&args.input)?;
            let (repository, a, b) = resolve_pair(&workspace, &args.a, &args.b);
            writeln!(stdout, "{}", repository.is_subtype_or_false(a, b))?;
            Ok(())
        }
        Command::Join(args) => {
            let workspace = Workspace::load(&args.input)?;
            let (repository, a, b) = resolve_pair(&workspace, &args.a, &args.b);
            let joined = repository.first_common_superclass_or_object(a, b);
            writeln!(stdout, "{}", repository.java_name(joined))?;
            Ok(())
        }
        Command::Db {
            command: DbCommand::Check { path, property },
        } => {
            let entries = check_database(&path, property)?;
            writeln!(stdout, "{}: {entries} entries", path.display())?;
            Ok(())
        }
    }
}

fn analyze(args: AnalyzeArgs, out: &mut impl Write) -> Result<()> {
    if !args.input.exists() {
        anyhow::bail!("input not found: {}", args.input.display());
    }
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure worker threads")?;
    }
    let telemetry = args
        .otel
        .clone()
        .map(Telemetry::new)
        .transpose()?
        .map(Arc::new);

    let started_at = Instant::now();
    let workspace = in_phase(
        telemetry.as_deref(),
        "load",
        &[KeyValue::new("jvmflow.input", args.input.display().to_string())],
        || {
            if let Some(trace_id) = current_trace_id() {
                debug!(trace_id = %trace_id, "telemetry enabled");
            }
            Workspace::load(&args.input)
        },
    )?;
    let class_count = workspace.len();
    let config = AnalysisConfig {
        max_block_visits: args.max_visits,
        strict_hierarchy: args.strict_hierarchy,
    };

    let hierarchy_started_at = Instant::now();
    let context = build_context(workspace, &config, telemetry.clone())?;
    let hierarchy_duration_ms = hierarchy_started_at.elapsed().as_millis();
    info!(
        classes = class_count,
        missing = context.missing_classes.len(),
        signatures = context.signatures.parsed,
        malformed_signatures = context.signatures.malformed + context.signatures.mismatched,
        "hierarchy ready"
    );

    let mut databases = Databases {
        return_nullness: load_database(args.method_db.as_deref()),
        parameter_nullness: load_database(args.parameter_db.as_deref()),
        field_nullness: load_database(args.field_db.as_deref()),
    };

    let analysis_started_at = Instant::now();
    let output = Engine::new(config).analyze(&context, &mut databases)?;
    let analysis_duration_ms = analysis_started_at.elapsed().as_millis();

    context.in_phase(
        "database",
        &[],
        || write_databases(&args, &databases, &context.workspace),
    )?;

    if !args.quiet {
        writeln!(
            out,
            "analyzed={} failed={} return_entries={} field_entries={} propagated={}",
            output.analyzed_methods,
            output.failed_methods,
            output.return_entries,
            output.field_entries,
            output.propagated_entries
        )?;
    }
    if args.timing && !args.quiet {
        eprintln!(
            "timing: total_ms={} hierarchy_ms={} analysis_ms={} classes={} methods={}",
            started_at.elapsed().as_millis(),
            hierarchy_duration_ms,
            analysis_duration_ms,
            class_count,
            output.analyzed_methods + output.failed_methods
        );
    }

    if let Some(telemetry) = telemetry {
        telemetry.shutdown()?;
    }
    Ok(())
}

/// Persist every database a path was given for; only application entries are written.
fn write_databases(args: &AnalyzeArgs, databases: &Databases, workspace: &Workspace) -> Result<()> {
    let is_application = |name: &str| workspace.is_application(name);
    if let Some(path) = &args.method_db {
        let written = databases.return_nullness.write_path(path, is_application)?;
        info!(path = %path.display(), written, "wrote return nullness database");
    }
    if let Some(path) = &args.parameter_db {
        let written = databases.parameter_nullness.write_path(path, is_application)?;
        info!(path = %path.display(), written, "wrote parameter nullness database");
    }
    if let Some(path) = &args.field_db {
        let written = databases.field_nullness.write_path(path, is_application)?;
        info!(path = %path.display(), written, "wrote field nullness database");
    }
    Ok(())
}

fn load_database<P: DatabaseProperty>(path: Option<&Path>) -> PropertyDatabase<MemberKey, P> {
    path.map(PropertyDatabase::load_or_empty)
        .unwrap_or_default()
}

fn describe_signature(text: &str, kind: SignatureKind, out: &mut impl Write) -> Result<()> {
    let parsed = parse_signature(text, kind)
        .with_context(|| format!("invalid {kind:?} signature: {text}"))?;
    match &parsed {
        ParsedSignature::Field(java_type) => writeln!(out, "{}", java_type.java_name())?,
        ParsedSignature::Method(method) => {
            let parameters: Vec<String> =
                method.parameters.iter().map(|parameter| parameter.java_name()).collect();
            writeln!(
                out,
                "{} ({})",
                method.return_type.java_name(),
                parameters.join(", ")
            )?;
        }
        ParsedSignature::Class(class) => {
            let superclass = JavaType::Class(class.superclass.clone());
            writeln!(out, "extends {}", superclass.java_name())?;
            for interface in &class.interfaces {
                let interface = JavaType::Class(interface.clone());
                writeln!(out, "implements {}", interface.java_name())?;
            }
        }
    }
    for parameter in parsed.type_parameters() {
        writeln!(out, "type parameter {parameter}")?;
    }
    Ok(())
}

/// Repository for `workspace` with both operands interned and their hierarchy resolved.
fn resolve_pair(workspace: &Workspace, a: &str, b: &str) -> (TypeRepository, TypeId, TypeId) {
    let (mut repository, _) = workspace.build_repository();
    let a = resolve_type(&repository, a);
    let b = resolve_type(&repository, b);
    for name in repository.complete_hierarchy() {
        debug!(class = %dotted_name(&name), "operand class missing from program description");
    }
    (repository, a, b)
}

/// `null`, a field signature such as `[Ljava/lang/String;`, or a bare class name.
fn resolve_type(repository: &TypeRepository, text: &str) -> TypeId {
    if text == "null" {
        return TypeId::NULL;
    }
    match parse_field_signature(text) {
        Ok(java_type) => repository.intern(&java_type),
        Err(_) => repository.class_type(&slashed_name(text)),
    }
}

fn check_database(path: &Path, property: PropertyArg) -> Result<usize> {
    let entries = match property {
        PropertyArg::Return => MethodPropertyDatabase::<ReturnNullness>::read_path(path)?.len(),
        PropertyArg::Parameter => {
            MethodPropertyDatabase::<ParameterNullness>::read_path(path)?.len()
        }
        PropertyArg::Field => FieldPropertyDatabase::<FieldNullness>::read_path(path)?.len(),
    };
    Ok(entries)
}
