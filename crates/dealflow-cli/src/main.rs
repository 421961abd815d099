#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "dealflow: deal pipeline board with atomic stage moves",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Project root (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Initialize a dealflow project",
        long_about = "Create .dealflow/ with a default config and a migrated deal database.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    dealflow init\n\n    # Reset the config to defaults\n    dealflow init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Lifecycle",
        about = "Add a deal",
        long_about = "Create a deal in a stage. It lands at the end of that stage.",
        after_help = "EXAMPLES:\n    # Add a lead\n    dealflow add d1 --stage Lead --title \"Acme renewal\"\n\n    # Attach payload fields\n    dealflow add d2 --stage Qualified --field amount=12000 --field owner=ana"
    )]
    Add(cmd::add::AddArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show the pipeline board",
        long_about = "List every stage in order with the deals it holds.",
        after_help = "EXAMPLES:\n    # Show the board\n    dealflow board\n\n    # Emit machine-readable output\n    dealflow board --json"
    )]
    Board(cmd::board::BoardArgs),

    #[command(
        next_help_heading = "Stage Moves",
        about = "Move one deal to another stage",
        long_about = "Persist a single stage move. The deal is appended to the target stage.",
        after_help = "EXAMPLES:\n    # Move a deal\n    dealflow move d1 Proposal\n\n    # Stage names are case-insensitive\n    dealflow move d1 \"closed won\""
    )]
    Move(cmd::move_cmd::MoveArgs),

    #[command(
        name = "bulk-move",
        next_help_heading = "Stage Moves",
        about = "Move several deals atomically",
        long_about = "Apply every move in one transaction. If any deal is missing, nothing changes.",
        after_help = "EXAMPLES:\n    # Close two deals at once\n    dealflow bulk-move d1=\"Closed Won\" d2=\"Closed Lost\""
    )]
    BulkMove(cmd::bulk::BulkMoveArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show stage progress",
        long_about = "Print how far along the configured pipeline a stage sits, as a percentage.",
        after_help = "EXAMPLES:\n    # Progress of the Proposal stage\n    dealflow progress Proposal"
    )]
    Progress(cmd::progress::ProgressArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show a deal's stage history",
        after_help = "EXAMPLES:\n    # Show history\n    dealflow history d1 --json"
    )]
    History(cmd::history::HistoryArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("DEALFLOW_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "dealflow=debug,info"
        } else {
            "dealflow=info,warn"
        })
    });

    let format = env::var("DEALFLOW_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = match cli.root {
        Some(ref root) => root.clone(),
        None => env::current_dir()?,
    };
    let output = output::resolve_output_mode(cli.json);

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, output, &project_root),
        Commands::Add(ref args) => cmd::add::run_add(args, output, &project_root),
        Commands::Board(ref args) => cmd::board::run_board(args, output, &project_root),
        Commands::Move(ref args) => cmd::move_cmd::run_move(args, output, &project_root),
        Commands::BulkMove(ref args) => cmd::bulk::run_bulk_move(args, output, &project_root),
        Commands::Progress(ref args) => {
            cmd::progress::run_progress(args, output, &project_root)
        }
        Commands::History(ref args) => cmd::history::run_history(args, output, &project_root),
    }
}
