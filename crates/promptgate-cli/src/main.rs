//! Promptgate CLI: run prompt workflows from the shell or serve the
//! JSON-RPC surface over stdio.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use promptgate_cli::commands::{self, exec::ExecArgs, EngineOptions};
use promptgate_core::rpc::RpcRouter;

/// Promptgate: gated prompt execution engine
#[derive(Parser)]
#[command(name = "promptgate", version, about = "Promptgate: gated prompt execution engine")]
pub struct Cli {
    /// Path to a YAML or JSON config file
    #[arg(long, env = "PROMPTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for sessions, the database and the verification marker
    #[arg(long, env = "PROMPTGATE_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Directory of prompt definitions
    #[arg(long)]
    prompts_dir: Option<PathBuf>,

    /// Directory of canonical gate definitions
    #[arg(long)]
    gates_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one prompt_engine request and print the response
    Exec {
        /// Command text, e.g. ">>analyze topic=rust --> >>summarize"
        command: Option<String>,
        /// Resume a session
        #[arg(long)]
        session_id: Option<String>,
        /// Resume by chain id
        #[arg(long)]
        chain_id: Option<String>,
        /// Answer to the previously rendered step
        #[arg(long)]
        response: Option<String>,
        /// Gate verdict, e.g. "GATE_REVIEW: PASS - looks good"
        #[arg(long)]
        verdict: Option<String>,
        /// Escalation decision: retry, skip or abort
        #[arg(long)]
        action: Option<String>,
        /// Discard any existing session for this chain
        #[arg(long)]
        force_restart: bool,
        /// Extra argument as key=value (repeatable)
        #[arg(long = "arg", short = 'a')]
        args: Vec<String>,
        /// Quality gate id or inline criterion (repeatable)
        #[arg(long = "gate", short = 'g')]
        gates: Vec<String>,
        /// Gate mode: enforce, advise or report
        #[arg(long)]
        gate_mode: Option<String>,
        /// Print the full JSON response
        #[arg(long)]
        json: bool,
    },

    /// Serve JSON-RPC over stdio (one request per line)
    Serve,

    /// Manage chain sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Inspect quality gates
    Gates {
        #[command(subcommand)]
        action: GatesAction,
    },

    /// Send a raw JSON-RPC request
    Rpc {
        /// JSON-RPC method name (e.g. "sessions.list")
        #[arg(long)]
        method: String,
        /// JSON-RPC params as a JSON string
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List stored sessions
    List {
        /// Hide completed sessions
        #[arg(long)]
        active: bool,
    },
    /// Show one session
    Get {
        /// Session ID
        #[arg(long)]
        id: String,
    },
    /// Clear one session, or all of them
    Clear {
        /// Session ID
        #[arg(long)]
        id: Option<String>,
        /// Clear every session
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

#[derive(Subcommand)]
enum GatesAction {
    /// List canonical and temporary gates
    List {
        /// Only temporary gates bound to this scope id
        #[arg(long)]
        scope_id: Option<String>,
    },
    /// Classify a gate reference
    Resolve {
        /// Gate id or inline criterion text
        reference: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs always go to stderr; stdout carries results.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptgate_core=info,promptgate_cli=info,promptgate=info".into()),
        )
        .init();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        return;
    };

    let options = EngineOptions {
        config: cli.config,
        state_dir: cli.state_dir,
        prompts_dir: cli.prompts_dir,
        gates_dir: cli.gates_dir,
    };

    let result = match commands::init_engine(&options).await {
        Ok(engine) => {
            let router = RpcRouter::new(engine);
            match command {
                Commands::Exec {
                    command,
                    session_id,
                    chain_id,
                    response,
                    verdict,
                    action,
                    force_restart,
                    args,
                    gates,
                    gate_mode,
                    json,
                } => {
                    let exec_args = ExecArgs {
                        command,
                        session_id,
                        chain_id,
                        user_response: response,
                        gate_verdict: verdict,
                        gate_action: action,
                        force_restart,
                        options: args,
                        quality_gates: gates,
                        gate_mode,
                        json,
                    };
                    commands::exec::run(&router, &exec_args).await
                }

                Commands::Serve => commands::serve::run(&router).await,

                Commands::Sessions { action } => match action {
                    SessionsAction::List { active } => commands::sessions::list(&router, active).await,
                    SessionsAction::Get { id } => commands::sessions::get(&router, &id).await,
                    SessionsAction::Clear { id, all } => {
                        commands::sessions::clear(&router, id.as_deref(), all).await
                    }
                },

                Commands::Gates { action } => match action {
                    GatesAction::List { scope_id } => {
                        commands::gates::list(&router, scope_id.as_deref()).await
                    }
                    GatesAction::Resolve { reference } => {
                        commands::gates::resolve(&router, &reference).await
                    }
                },

                Commands::Rpc { method, params } => commands::rpc::call(&router, &method, &params).await,
            }
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
