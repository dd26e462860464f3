//! Python language server binary
//!
//! Starts the LSP server for editor integration.
//!
//! # Usage
//!
//! ```bash
//! # Standard I/O mode (for editors)
//! pyls --stdio
//!
//! # Show version
//! pyls --version
//!
//! # Show help
//! pyls --help
//! ```

use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

use pyls::interpreter::ProviderRegistry;
use pyls::PythonLanguageServer;

/// Command line arguments
#[derive(Debug)]
struct Args {
    stdio: bool,
    version: bool,
    help: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();

        Self {
            stdio: args.contains(&"--stdio".to_string()),
            version: args.contains(&"--version".to_string()) || args.contains(&"-V".to_string()),
            help: args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()),
        }
    }
}

fn print_help() {
    eprintln!(
        r#"Python Language Server

USAGE:
    pyls [OPTIONS]

OPTIONS:
    --stdio         Use stdio for communication (required for editors)
    --version, -V   Print version information
    --help, -h      Print this help message

DESCRIPTION:
    The server communicates with editors via the Language Server Protocol
    over standard input/output. The interpreter backing completions and
    analysis is selected through initializationOptions.interpreter; an
    out-of-tree provider library can be supplied via its assembly path.

SUPPORTED FEATURES:
    - Real-time diagnostics with monotonic versioning
    - Code completion (members, names, keywords, named arguments)
    - Signature help
    - Hover information
    - Find all references
    - Workspace symbols
    - Multi-cell documents addressed by URI fragment
"#
    );
}

fn print_version() {
    eprintln!("pyls {} (Python Language Server)", env!("CARGO_PKG_VERSION"));
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.help {
        print_help();
        return;
    }

    if args.version {
        print_version();
        return;
    }

    // Log to stderr; stdout belongs to the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if args.stdio {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();

        let registry = ProviderRegistry::new();
        // Companions to the standard read requests that accept a version
        // pin, an explicit expression, and the completion option switches.
        let (service, socket) =
            LspService::build(move |client| PythonLanguageServer::new(client, registry.clone()))
                .custom_method("python/completion", PythonLanguageServer::completion_extended)
                .custom_method(
                    "python/signatureHelp",
                    PythonLanguageServer::signature_help_extended,
                )
                .custom_method("python/references", PythonLanguageServer::references_extended)
                .custom_method("python/hover", PythonLanguageServer::hover_extended)
                .finish();

        Server::new(stdin, stdout, socket).serve(service).await;
    } else {
        eprintln!("Python Language Server v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("This server communicates via Language Server Protocol over stdin/stdout.");
        eprintln!();
        eprintln!("Usage: pyls --stdio");
        eprintln!();
        eprintln!("For more information, run: pyls --help");
    }
}
