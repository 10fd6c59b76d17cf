//! # lodestone-mcp
//!
//! MCP server for lodestone - Elixir code navigation for AI agents.
//! Speaks JSON-RPC 2.0 over line-delimited stdio; the rmcp transport
//! handles `initialize`/`initialized`/`tools/list`/`tools/call`/`ping` and
//! the protocol error codes.
//!
//! Every query tool brings the index up to date first, so answers always
//! reflect the working tree.

use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::ServerInfo;
use rmcp::{tool, tool_handler, tool_router, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use lodestone::indexer::{ensure_index_current, run_index, IndexOptions};
use lodestone::{graph, Store};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "lodestone-mcp")]
#[command(about = "MCP server for lodestone - Elixir code navigation for AI agents")]
#[command(version)]
struct Args {
    /// Project root the server answers queries for.
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Skip the compiler-backed phases (trace, xref, diagnostics).
    #[arg(long)]
    no_compile: bool,
}

// ============================================================================
// Tool Parameter Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct IndexParams {
    /// Project directory to index (defaults to the server's root).
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct MfaParams {
    /// Function reference as Module.name/arity (e.g. "App.Accounts.get_user/1").
    mfa: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DepthParams {
    /// Function reference as Module.name/arity.
    mfa: String,
    /// Traversal depth (levels of the call graph).
    #[serde(default = "default_depth")]
    depth: usize,
}

fn default_depth() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ModuleParams {
    /// Fully-qualified module name (e.g. "App.User").
    module: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct FilesParams {
    /// Changed files, relative to the project root.
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
struct NoParams {}

// ============================================================================
// Server
// ============================================================================

#[derive(Clone)]
struct LodestoneServer {
    root: PathBuf,
    opts: IndexOptions,
    tool_router: rmcp::handler::server::router::tool::ToolRouter<Self>,
}

impl LodestoneServer {
    fn new(root: PathBuf, opts: IndexOptions) -> Self {
        Self {
            root,
            opts,
            tool_router: Self::tool_router(),
        }
    }

    /// Refresh the index, then run a query against the store. Errors come
    /// back as human-readable strings per the tool-error convention.
    fn query<T: Serialize>(
        &self,
        run: impl FnOnce(&Store) -> lodestone::Result<T>,
    ) -> String {
        if let Err(e) = ensure_index_current(&self.root, &self.opts) {
            return format!("Error: {}", e);
        }
        let store = Store::new(&self.root);
        match run(&store) {
            Ok(value) => serde_json::to_string_pretty(&value)
                .unwrap_or_else(|e| format!("Serialization error: {}", e)),
            Err(e) => format!("Error: {}", e),
        }
    }
}

// ============================================================================
// MCP Tool Implementations
// ============================================================================

#[tool_router]
impl LodestoneServer {
    /// Build or refresh the index
    #[tool(
        name = "index",
        description = "Index the project: extract modules, functions, calls, routes, schemas and persist them under .lodestone/. Run this first, or whenever you want an explicit rebuild; the query tools refresh automatically."
    )]
    async fn index(&self, Parameters(params): Parameters<IndexParams>) -> String {
        let root = params
            .path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root.clone());
        match run_index(&root, &self.opts) {
            Ok(outcome) => serde_json::json!({
                "success": true,
                "records_indexed": outcome.records_indexed,
            })
            .to_string(),
            Err(e) => format!("Error: {}", e),
        }
    }

    /// Find a function definition
    #[tool(
        name = "function_definition",
        description = "Find where a function is defined. Takes an MFA like 'App.Accounts.get_user/1'. Returns zero or one definition with file and line span."
    )]
    async fn function_definition(&self, Parameters(params): Parameters<MfaParams>) -> String {
        self.query(|store| graph::definition(store, &params.mfa))
    }

    /// Find call sites of a function
    #[tool(
        name = "function_references",
        description = "List every call site of a function. Takes an MFA; returns call records sorted by file and line."
    )]
    async fn function_references(&self, Parameters(params): Parameters<MfaParams>) -> String {
        self.query(|store| graph::references(store, &params.mfa))
    }

    /// Walk the call graph upward
    #[tool(
        name = "function_callers",
        description = "Transitive callers of a function up to the given depth (default 1). Returns {mfa, depth} pairs in BFS order. USE THIS BEFORE changing a function's contract."
    )]
    async fn function_callers(&self, Parameters(params): Parameters<DepthParams>) -> String {
        self.query(|store| graph::callers(store, &params.mfa, params.depth))
    }

    /// Walk the call graph downward
    #[tool(
        name = "function_callees",
        description = "Transitive callees of a function up to the given depth (default 1). Returns {mfa, depth} pairs in BFS order."
    )]
    async fn function_callees(&self, Parameters(params): Parameters<DepthParams>) -> String {
        self.query(|store| graph::callees(store, &params.mfa, params.depth))
    }

    /// List HTTP routes
    #[tool(
        name = "routes",
        description = "All HTTP routes from the router DSL, fully expanded through nested scopes and resources, sorted by verb and path."
    )]
    async fn routes(&self, Parameters(_params): Parameters<NoParams>) -> String {
        self.query(graph::routes)
    }

    /// Show a module's schema
    #[tool(
        name = "schema",
        description = "The ORM schema defined by a module: table source, fields with types, and associations."
    )]
    async fn schema(&self, Parameters(params): Parameters<ModuleParams>) -> String {
        self.query(|store| graph::schema(store, &params.module))
    }

    /// What breaks if these files change?
    #[tool(
        name = "impact_analysis",
        description = "Change-impact closure for a set of files: the modules they define, every module that transitively depends on them, and the test files exercising any of those. USE THIS BEFORE a refactor."
    )]
    async fn impact_analysis(&self, Parameters(params): Parameters<FilesParams>) -> String {
        self.query(|store| graph::impact(store, &params.files))
    }

    /// Show a function's typespec
    #[tool(
        name = "function_spec",
        description = "The @spec annotation for a function, with parameter and return type spellings."
    )]
    async fn function_spec(&self, Parameters(params): Parameters<MfaParams>) -> String {
        self.query(|store| graph::function_spec(store, &params.mfa))
    }

    /// List a module's type definitions
    #[tool(
        name = "module_types",
        description = "Type definitions declared by a module: @type, @typep, @opaque, @callback, @macrocallback."
    )]
    async fn module_types(&self, Parameters(params): Parameters<ModuleParams>) -> String {
        self.query(|store| graph::module_types(store, &params.module))
    }

    /// Compiler diagnostics
    #[tool(
        name = "type_errors",
        description = "Compiler diagnostics captured by the last full index run: errors, warnings, hints with file and line."
    )]
    async fn type_errors(&self, Parameters(_params): Parameters<NoParams>) -> String {
        self.query(graph::diagnostics)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for LodestoneServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: rmcp::model::ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability::default()),
                ..Default::default()
            },
            server_info: rmcp::model::Implementation {
                name: "lodestone".to_string(),
                title: Some("Lodestone MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: Some("https://github.com/lodestone-tools/lodestone".to_string()),
            },
            instructions: Some(
                "Navigate Elixir codebases through the index instead of grepping.\n\n\
                 NAVIGATION TOOLS:\n\
                 - function_definition(mfa) - Where is it defined?\n\
                 - function_references(mfa) - Every call site.\n\
                 - function_callers(mfa, depth) - Who reaches this code?\n\
                 - function_callees(mfa, depth) - What does it reach?\n\n\
                 STRUCTURE TOOLS:\n\
                 - routes() - The full routing table.\n\
                 - schema(module) - Table, fields, associations.\n\
                 - function_spec(mfa) / module_types(module) - Type annotations.\n\n\
                 CHANGE TOOLS:\n\
                 - impact_analysis(files) - Blast radius + affected tests. USE BEFORE refactors.\n\
                 - type_errors() - Compiler diagnostics from the last full index.\n\n\
                 MFAs are written Module.name/arity, e.g. App.Accounts.get_user/1.\n\
                 Query tools refresh the index automatically; index() forces a rebuild."
                    .into(),
            ),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Install a panic hook that logs to stderr and exits cleanly. Handles the
/// broken-pipe panic from rmcp when the client disconnects.
fn install_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        if msg.contains("Broken pipe") || msg.contains("os error 32") {
            eprintln!("[lodestone-mcp] Client disconnected (broken pipe), shutting down");
        } else {
            let location = panic_info
                .location()
                .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_default();
            eprintln!("[lodestone-mcp] Panic{}: {}", location, msg);
        }
        std::process::exit(1);
    }));
}

/// Writing to a closed pipe must fail with EPIPE instead of killing the
/// process with SIGPIPE.
#[cfg(unix)]
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_sigpipe() {}

async fn run_server() -> Result<()> {
    let args = Args::parse();

    // Logging MUST write to stderr; stdout carries the JSON-RPC stream.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        "Starting lodestone-mcp v{} for {}",
        env!("CARGO_PKG_VERSION"),
        args.path.display()
    );

    let opts = IndexOptions {
        compile: !args.no_compile,
    };
    let server = LodestoneServer::new(args.path, opts);

    info!("Server ready. Listening on stdio...");

    server
        .serve(rmcp::transport::stdio())
        .await?
        .waiting()
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    ignore_sigpipe();
    install_panic_hook();

    match run_server().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let err_str = format!("{:?}", e);
            if err_str.contains("Broken pipe") || err_str.contains("os error 32") {
                eprintln!("[lodestone-mcp] Client disconnected, shutting down");
                ExitCode::SUCCESS
            } else {
                eprintln!("[lodestone-mcp] Error: {:#}", e);
                ExitCode::FAILURE
            }
        }
    }
}
