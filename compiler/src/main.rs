use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use accinfer::diag::Diagnostic;
use accinfer::levels::InferOptions;
use accinfer::pass::PassId;
use accinfer::pipeline::{compute_provenance, run_pipeline, CompilationState, PipelineOptions};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Ast,
    Events,
    Graph,
    Attrs,
    Json,
    Dot,
}

#[derive(Parser, Debug)]
#[command(
    name = "accinfer",
    version,
    about = "Infers implicit routine and loop parallelism levels for .acc directive outlines"
)]
struct Cli {
    /// Input .acc source file
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Attrs)]
    emit: EmitStage,

    /// Never infer worker-level parallelism
    #[arg(long)]
    no_implicit_worker: bool,

    /// Never infer vector-level parallelism
    #[arg(long)]
    no_implicit_vector: bool,

    /// Log passes and timing
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(source = %cli.source.display(), emit = ?cli.emit, "starting");

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("accinfer: error: {}: {}", cli.source.display(), e);
            return ExitCode::from(2);
        }
    };

    let parse_result = accinfer::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            let (line, col) = line_col(&source, err.span().start);
            eprintln!("accinfer: {}:{line}:{col}: parse error: {}", cli.source.display(), err);
        }
        return ExitCode::from(1);
    }
    let Some(program) = parse_result.program else {
        eprintln!("accinfer: parse failed with no output");
        return ExitCode::from(1);
    };

    if let EmitStage::Ast = cli.emit {
        println!("{program:#?}");
        return ExitCode::SUCCESS;
    }

    // ── Run passes ──
    let terminal = match cli.emit {
        EmitStage::Events => PassId::Lower,
        EmitStage::Graph => PassId::BuildGraph,
        _ => PassId::AssignLevels,
    };
    let options = PipelineOptions {
        infer: InferOptions {
            implicit_worker: !cli.no_implicit_worker,
            implicit_vector: !cli.no_implicit_vector,
        },
        verbose: cli.verbose,
    };
    let mut state = CompilationState::new(program);
    state.provenance = Some(compute_provenance(&source));
    let display = cli.source.display().to_string();
    let result = run_pipeline(&mut state, terminal, &options, |_, diags| {
        for diag in diags {
            report(&display, &source, diag);
        }
    });
    if let Err(e) = result {
        tracing::debug!(error = %e, "pipeline stopped");
        return ExitCode::from(1);
    }

    // ── Emit ──
    let artifacts = &state.artifacts;
    let output = match cli.emit {
        EmitStage::Ast => unreachable!("handled before the pipeline"),
        EmitStage::Events => artifacts
            .events
            .as_deref()
            .map(accinfer::events::format_events),
        EmitStage::Graph => artifacts.graph.as_ref().map(|g| g.to_string()),
        EmitStage::Attrs => artifacts.attrs.as_ref().map(|a| a.to_string()),
        EmitStage::Dot => match (&artifacts.graph, &artifacts.attrs) {
            (Some(graph), Some(attrs)) => Some(accinfer::dot::emit_dot(graph, attrs)),
            _ => None,
        },
        EmitStage::Json => match (&artifacts.attrs, &state.provenance) {
            (Some(attrs), Some(provenance)) => match attrs.to_json(&provenance.source_hash_hex()) {
                Ok(json) => Some(json + "\n"),
                Err(e) => {
                    eprintln!("accinfer: error: {e}");
                    return ExitCode::from(2);
                }
            },
            _ => None,
        },
    };
    match output {
        Some(text) => {
            print!("{text}");
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("accinfer: internal error: requested artifact was not produced");
            ExitCode::from(1)
        }
    }
}

fn report(path: &str, source: &str, diag: &Diagnostic) {
    let (line, col) = line_col(source, diag.span.start);
    eprintln!("accinfer: {path}:{line}:{col}: {diag}");
    for related in &diag.related_spans {
        let (line, col) = line_col(source, related.span.start);
        eprintln!("  {path}:{line}:{col}: note: {}", related.label);
    }
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let col = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, col)
}
