//! `lode` - the lodestone command line.
//!
//! Machine-readable results go to stdout as a single JSON object; human
//! messages and logs go to stderr. Exit code 0 on success, 1 on failure.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use lodestone::indexer::{ensure_index_current, run_index, IndexOptions};
use lodestone::{graph, Store};

#[derive(Parser, Debug)]
#[command(name = "lode")]
#[command(about = "Code intelligence for Elixir projects. Index once, navigate everything.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build or refresh the index for a project.
    Index {
        /// Project root (defaults to the current directory).
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Skip the compiler-backed phases (trace, xref, diagnostics).
        #[arg(long)]
        no_compile: bool,
    },
    /// Query the index.
    Query {
        /// Query type: definition, references, callers, callees, routes,
        /// schema, impact, spec, types, diagnostics.
        query_type: String,
        /// Function reference as Module.name/arity.
        #[arg(long)]
        mfa: Option<String>,
        /// Module name.
        #[arg(long)]
        module: Option<String>,
        /// Comma-separated file list (impact analysis).
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,
        /// Traversal depth for callers/callees.
        #[arg(long, default_value_t = 1)]
        depth: usize,
        /// Project root (defaults to the current directory).
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Remove the index directory.
    Clear {
        /// Project root (defaults to the current directory).
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Cmd::Index { path, no_compile } => {
            let opts = IndexOptions {
                compile: !no_compile,
            };
            let outcome = run_index(&path, &opts)
                .with_context(|| format!("indexing {}", path.display()))?;
            eprintln!(
                "Indexed {} files into {} records in {}ms",
                outcome.files_indexed, outcome.records_indexed, outcome.duration_ms
            );
            for (kind, count) in &outcome.counts {
                if *count > 0 {
                    eprintln!("  {:<12} {}", kind, count);
                }
            }
            print_json(&json!({
                "success": true,
                "records_indexed": outcome.records_indexed,
                "files_indexed": outcome.files_indexed,
            }))
        }
        Cmd::Query {
            query_type,
            mfa,
            module,
            files,
            depth,
            path,
        } => {
            // Queries answer against a current index.
            ensure_index_current(&path, &IndexOptions::default())
                .with_context(|| format!("refreshing index for {}", path.display()))?;
            let store = Store::new(&path);
            let result = run_query(&store, &query_type, mfa, module, files, depth)?;
            print_json(&result)
        }
        Cmd::Clear { path } => {
            Store::new(&path).clear()?;
            eprintln!("Removed index for {}", path.display());
            print_json(&json!({ "success": true }))
        }
    }
}

fn run_query(
    store: &Store,
    query_type: &str,
    mfa: Option<String>,
    module: Option<String>,
    files: Vec<String>,
    depth: usize,
) -> Result<serde_json::Value> {
    let need_mfa = || mfa.clone().context("this query requires --mfa");
    let need_module = || module.clone().context("this query requires --module");

    let value = match query_type {
        "definition" => serde_json::to_value(graph::definition(store, &need_mfa()?)?)?,
        "references" => serde_json::to_value(graph::references(store, &need_mfa()?)?)?,
        "callers" => serde_json::to_value(graph::callers(store, &need_mfa()?, depth)?)?,
        "callees" => serde_json::to_value(graph::callees(store, &need_mfa()?, depth)?)?,
        "routes" => serde_json::to_value(graph::routes(store)?)?,
        "schema" => serde_json::to_value(graph::schema(store, &need_module()?)?)?,
        "impact" => {
            if files.is_empty() {
                bail!("this query requires --files");
            }
            serde_json::to_value(graph::impact(store, &files)?)?
        }
        "spec" => serde_json::to_value(graph::function_spec(store, &need_mfa()?)?)?,
        "types" => serde_json::to_value(graph::module_types(store, &need_module()?)?)?,
        "diagnostics" => serde_json::to_value(graph::diagnostics(store)?)?,
        other => {
            return Err(lodestone::Error::UnknownQueryType(other.to_string()).into());
        }
    };
    Ok(value)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
